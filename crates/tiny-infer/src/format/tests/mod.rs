mod reader;

use super::*;
use crate::quantization::QuantParams;
use alloc::vec::Vec;

/// `y = relu(2x + 1)` on a single f32 value.
fn float_affine_model() -> ModelWriter {
    let mut writer = ModelWriter::new("affine");
    let fc = writer.add_operator(OperatorKind::FullyConnected);
    let input = writer.add_activation("input", DType::F32, &[1, 1], None);
    let weights = writer.add_constant_f32("weights", &[1, 1], &[2.0]);
    let bias = writer.add_constant_f32("bias", &[1], &[1.0]);
    let output = writer.add_activation("output", DType::F32, &[1, 1], None);
    writer.add_node(fc, &[input, weights, bias], &[output], Activation::Relu);
    writer.with_inputs(&[input]).with_outputs(&[output])
}

fn float_affine_bytes() -> Vec<u8> {
    float_affine_model().to_bytes().unwrap()
}

fn quant(scale: f32, zero_point: i32) -> QuantParams {
    QuantParams::new(scale, zero_point)
}
