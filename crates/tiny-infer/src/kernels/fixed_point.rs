//! Fixed-point arithmetic used to rescale int32 accumulators without floats.
//!
//! A real multiplier `m` is represented as a Q0.31 mantissa and a power-of-two
//! exponent, `m ≈ multiplier * 2^(shift - 31)`.

/// Split `real` into a Q0.31 multiplier and a shift.
///
/// Returns `None` when `real` is negative or not finite. Multipliers too small
/// to be represented collapse to `(0, 0)`.
pub fn quantize_multiplier(real: f64) -> Option<(i32, i32)> {
    if !real.is_finite() || real < 0.0 {
        return None;
    }
    if real == 0.0 {
        return Some((0, 0));
    }

    let (fraction, mut shift) = libm::frexp(real);
    let mut fixed = libm::round(fraction * (1i64 << 31) as f64) as i64;

    if fixed == 1i64 << 31 {
        fixed /= 2;
        shift += 1;
    }
    if shift < -31 {
        return Some((0, 0));
    }

    i32::try_from(fixed).ok().map(|fixed| (fixed, shift))
}

/// High 32 bits of `2 * a * b`, rounded to nearest.
pub fn saturating_rounding_doubling_high_mul(a: i32, b: i32) -> i32 {
    if a == i32::MIN && b == i32::MIN {
        return i32::MAX;
    }

    let ab = a as i64 * b as i64;
    let nudge: i64 = if ab >= 0 { 1 << 30 } else { 1 - (1 << 30) };
    // Truncating division, not an arithmetic shift.
    ((ab + nudge) / (1i64 << 31)) as i32
}

/// `x / 2^exponent`, rounded to nearest with ties away from zero.
pub fn rounding_divide_by_pot(x: i32, exponent: i32) -> i32 {
    debug_assert!((0..=31).contains(&exponent));
    let mask = ((1i64 << exponent) - 1) as i32;
    let remainder = x & mask;
    let threshold = (mask >> 1) + i32::from(x < 0);
    (x >> exponent) + i32::from(remainder > threshold)
}

/// `x * multiplier * 2^(shift - 31)`, rounded.
pub fn multiply_by_quantized_multiplier(x: i32, multiplier: i32, shift: i32) -> i32 {
    let left_shift = shift.clamp(0, 32);
    let right_shift = (-shift).clamp(0, 31);
    let shifted = ((x as i64) << left_shift).clamp(i32::MIN as i64, i32::MAX as i64) as i32;
    rounding_divide_by_pot(
        saturating_rounding_doubling_high_mul(shifted, multiplier),
        right_shift,
    )
}
