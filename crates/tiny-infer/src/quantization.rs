//! Affine int8 quantization.

use serde::{Deserialize, Serialize};

/// Smallest value representable by an int8 quantized tensor.
pub const QMIN: i32 = i8::MIN as i32;
/// Largest value representable by an int8 quantized tensor.
pub const QMAX: i32 = i8::MAX as i32;

/// The quantization parameters of a tensor.
///
/// Used in dequantization: `(q - zero_point) * scale`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantParams {
    /// The scaling factor.
    pub scale: f32,
    /// The quantized value that represents the real value zero.
    pub zero_point: i32,
}

impl QuantParams {
    /// Create quantization parameters.
    pub fn new(scale: f32, zero_point: i32) -> Self {
        Self { scale, zero_point }
    }

    /// Whether the parameters can be used to quantize values.
    pub fn is_valid(&self) -> bool {
        self.scale.is_finite() && self.scale > 0.0
    }
}

/// How real values are brought onto the integer grid when quantizing.
#[derive(
    Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub enum RoundingMode {
    /// Round half away from zero, then add the zero point.
    #[default]
    Nearest,
    /// Add the zero point, then drop the fractional part.
    ///
    /// This is what a plain `float -> int8` cast does, which biases every value toward zero.
    Truncate,
}

/// Quantization scheme to convert `f32` values to `i8` and vice-versa.
pub trait Quantization {
    /// Returns the quantization range `[a, b]`.
    fn range(&self) -> (i32, i32) {
        (QMIN, QMAX)
    }
    /// Convert a single value to int8.
    fn quantize_one(&self, value: f32) -> i8;
    /// Convert a single value back to `f32`.
    fn dequantize_one(&self, value: i8) -> f32;

    /// Convert the values to int8, writing them into `output`.
    ///
    /// Only `min(values.len(), output.len())` elements are converted.
    fn quantize(&self, values: &[f32], output: &mut [i8]) {
        for (x, x_q) in values.iter().zip(output.iter_mut()) {
            *x_q = self.quantize_one(*x);
        }
    }

    /// Convert the values back to `f32`, writing them into `output`.
    fn dequantize(&self, values: &[i8], output: &mut [f32]) {
        for (x_q, x) in values.iter().zip(output.iter_mut()) {
            *x = self.dequantize_one(*x_q);
        }
    }
}

/// Asymmetric (affine) per-tensor quantization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineQuantization {
    /// The tensor quantization parameters.
    pub params: QuantParams,
    /// Rounding applied when quantizing.
    pub rounding: RoundingMode,
}

impl AffineQuantization {
    /// Initialize an affine quantization scheme with the given parameters.
    pub fn init(params: QuantParams, rounding: RoundingMode) -> Self {
        Self { params, rounding }
    }
}

impl Quantization for AffineQuantization {
    fn quantize_one(&self, value: f32) -> i8 {
        let (a, b) = self.range();
        let QuantParams { scale, zero_point } = self.params;

        if value.is_nan() {
            return zero_point.clamp(a, b) as i8;
        }

        // Float to int `as` casts saturate.
        let x_q = match self.rounding {
            // x_q = clamp(round(x / scale) + zero_point, a, b)
            RoundingMode::Nearest => {
                (libm::roundf(value / scale) as i64).saturating_add(zero_point as i64)
            }
            // x_q = clamp(trunc(x / scale + zero_point), a, b)
            RoundingMode::Truncate => libm::truncf(value / scale + zero_point as f32) as i64,
        };

        x_q.clamp(a as i64, b as i64) as i8
    }

    fn dequantize_one(&self, value: i8) -> f32 {
        // x = scale * (x_q - zero_point)
        (value as i32 - self.params.zero_point) as f32 * self.params.scale
    }
}
