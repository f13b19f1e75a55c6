//! Sine regressors for the hello world program.
//!
//! Both models map `x` in `[0, 2π]` to an approximation of `sin(x)` through
//! two hidden layers of 16 units. They are generated by
//! `scripts/train_sine_model.py`.

use core::ops::Deref;
use std::io::{self, Write};

/// Input fed to the model by the program.
pub const INPUT: f32 = 0.5;

/// Embedded bytes, aligned like a tensor buffer.
#[repr(C, align(16))]
pub struct AlignedModel<B: ?Sized>(B);

impl Deref for AlignedModel<[u8]> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

/// Int8 weights and activations with int32 biases.
pub static HELLO_WORLD_INT8: &AlignedModel<[u8]> =
    &AlignedModel(*include_bytes!("../models/hello_world_int8.tinf"));

/// The same network before quantization.
pub static HELLO_WORLD_FLOAT: &AlignedModel<[u8]> =
    &AlignedModel(*include_bytes!("../models/hello_world_float.tinf"));

/// The line printed for a prediction.
pub fn prediction_line(input: f32, output: f32) -> String {
    format!("Predicted output for {input:.2} is {output:.4}")
}

/// Run `model` on [`INPUT`], reporting to `out` and failures to `err`.
///
/// Returns the process exit status: `0` on success, `1` when inference fails.
pub fn run(model: &[u8], out: &mut impl Write, err: &mut impl Write) -> io::Result<u8> {
    writeln!(out, "Hello World Test")?;

    match tiny_infer::run_inference(model, INPUT) {
        Ok(output) => {
            writeln!(out, "{}", prediction_line(INPUT, output))?;
            Ok(0)
        }
        Err(error) => {
            writeln!(err, "Inference failed: {error}")?;
            Ok(1)
        }
    }
}
