use bytemuck::{Pod, Zeroable};
use core::iter;

use super::fixed_point::{multiply_by_quantized_multiplier, quantize_multiplier};
use super::{Kernel, KernelError};
use crate::arena::ArenaSlot;
use crate::format::{Activation, DType, NodeDescriptor, OperatorKind};
use crate::interpreter::tensor::{decode_f32, decode_i32};
use crate::interpreter::{InvokeContext, PrepareContext, TensorRef};
use crate::quantization::{QMAX, QMIN, QuantParams};

/// `output = activation(input · weightsᵀ + bias)`.
///
/// Inputs are `[input, weights, bias?]` with weights shaped
/// `[units, depth]`; the input holds `batches × depth` elements and the output
/// `batches × units`. Supports `f32` tensors and int8 tensors with `i32` bias.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullyConnected;

/// The fully-connected kernel, ready to be registered.
pub static FULLY_CONNECTED: FullyConnected = FullyConnected;

/// Requantization parameters of an int8 node, derived once at prepare time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
struct QuantizedOpData {
    output_multiplier: i32,
    output_shift: i32,
    input_offset: i32,
    weights_offset: i32,
    output_offset: i32,
    activation_min: i32,
    activation_max: i32,
}

struct Dims {
    depth: usize,
    units: usize,
}

impl Kernel for FullyConnected {
    fn kind(&self) -> OperatorKind {
        OperatorKind::FullyConnected
    }

    fn prepare(
        &self,
        ctx: &mut PrepareContext<'_, '_>,
        node: &NodeDescriptor,
    ) -> Result<ArenaSlot, KernelError> {
        check_arity(node)?;

        let input = ctx.tensor(node.inputs[0])?;
        let weights = ctx.tensor(node.inputs[1])?;
        let bias = node.inputs.get(2).map(|&index| ctx.tensor(index)).transpose()?;
        let output = ctx.tensor(node.outputs[0])?;

        check_shapes(node, &input, &weights, bias.as_ref(), &output)?;

        match input.dtype() {
            DType::F32 => {
                expect_dtype(&weights, DType::F32)?;
                expect_dtype(&output, DType::F32)?;
                if let Some(bias) = &bias {
                    expect_dtype(bias, DType::F32)?;
                }
                Ok(ArenaSlot::default())
            }
            DType::I8 => {
                expect_dtype(&weights, DType::I8)?;
                expect_dtype(&output, DType::I8)?;
                if let Some(bias) = &bias {
                    expect_dtype(bias, DType::I32)?;
                }

                let input_params = quantization(&input, node.inputs[0])?;
                let weights_params = quantization(&weights, node.inputs[1])?;
                let output_params = quantization(&output, node.outputs[0])?;
                let op_data = quantized_op_data(
                    input_params,
                    weights_params,
                    output_params,
                    node.activation,
                )?;

                log::trace!("fully connected requantization: {op_data:?}");
                ctx.allocate_op_data(op_data)
            }
            dtype => Err(KernelError::UnsupportedDType(dtype)),
        }
    }

    fn invoke(
        &self,
        ctx: &mut InvokeContext<'_>,
        node: &NodeDescriptor,
    ) -> Result<(), KernelError> {
        check_arity(node)?;

        let input = ctx.input(node.inputs[0])?;
        let weights = ctx.input(node.inputs[1])?;
        let bias = node.inputs.get(2).map(|&index| ctx.input(index)).transpose()?;
        let dims = dims(&weights, node.inputs[1])?;

        match input.dtype() {
            DType::F32 => {
                let mut output = ctx.output()?;
                let output = output.as_f32_mut()?;
                let activation = node.activation;
                fully_connected_f32(&input, &weights, bias.as_ref(), output, &dims, activation)
            }
            DType::I8 => {
                let op_data = *ctx.op_data::<QuantizedOpData>()?;
                let mut output = ctx.output()?;
                let output = output.as_i8_mut()?;
                fully_connected_i8(&input, &weights, bias.as_ref(), output, &dims, &op_data)
            }
            dtype => Err(KernelError::UnsupportedDType(dtype)),
        }
    }
}

fn fully_connected_f32(
    input: &TensorRef<'_>,
    weights: &TensorRef<'_>,
    bias: Option<&TensorRef<'_>>,
    output: &mut [f32],
    dims: &Dims,
    activation: Activation,
) -> Result<(), KernelError> {
    let row_bytes = dims.depth * DType::F32.size();
    let bias = bias.map_or(&[][..], |bias| bias.bytes());

    for (x, out_row) in input
        .bytes()
        .chunks_exact(row_bytes)
        .zip(output.chunks_exact_mut(dims.units))
    {
        let rows = weights.bytes().chunks_exact(row_bytes);
        let biases = decode_f32(bias).chain(iter::repeat(0.0));

        for ((w, out), b) in rows.zip(out_row.iter_mut()).zip(biases) {
            let mut acc = 0.0f32;
            for (w, x) in decode_f32(w).zip(decode_f32(x)) {
                acc += w * x;
            }
            acc += b;

            *out = match activation {
                Activation::None => acc,
                Activation::Relu => acc.max(0.0),
            };
        }
    }

    Ok(())
}

fn fully_connected_i8(
    input: &TensorRef<'_>,
    weights: &TensorRef<'_>,
    bias: Option<&TensorRef<'_>>,
    output: &mut [i8],
    dims: &Dims,
    op: &QuantizedOpData,
) -> Result<(), KernelError> {
    let input = input.as_i8()?;
    let weights = weights.as_i8()?;
    let bias = bias.map_or(&[][..], |bias| bias.bytes());

    for (x, out_row) in input
        .chunks_exact(dims.depth)
        .zip(output.chunks_exact_mut(dims.units))
    {
        let rows = weights.chunks_exact(dims.depth);
        let biases = decode_i32(bias).chain(iter::repeat(0));

        for ((w, out), b) in rows.zip(out_row.iter_mut()).zip(biases) {
            // The 32-bit accumulator wraps on overflow, as in two's complement integer kernels.
            let mut acc: i32 = 0;
            for (&w, &x) in w.iter().zip(x) {
                let product = (w as i32 + op.weights_offset) * (x as i32 + op.input_offset);
                acc = acc.wrapping_add(product);
            }
            acc = acc.wrapping_add(b);

            let acc = multiply_by_quantized_multiplier(acc, op.output_multiplier, op.output_shift)
                .saturating_add(op.output_offset);
            *out = acc.clamp(op.activation_min, op.activation_max) as i8;
        }
    }

    Ok(())
}

fn quantized_op_data(
    input: QuantParams,
    weights: QuantParams,
    output: QuantParams,
    activation: Activation,
) -> Result<QuantizedOpData, KernelError> {
    let real_multiplier = input.scale as f64 * weights.scale as f64 / output.scale as f64;
    let (output_multiplier, output_shift) =
        quantize_multiplier(real_multiplier).ok_or(KernelError::InvalidMultiplier)?;

    let activation_min = match activation {
        Activation::None => QMIN,
        Activation::Relu => QMIN.max(output.zero_point),
    };

    Ok(QuantizedOpData {
        output_multiplier,
        output_shift,
        input_offset: -input.zero_point,
        weights_offset: -weights.zero_point,
        output_offset: output.zero_point,
        activation_min,
        activation_max: QMAX,
    })
}

fn check_arity(node: &NodeDescriptor) -> Result<(), KernelError> {
    if !(2..=3).contains(&node.inputs.len()) {
        return Err(KernelError::InputCount {
            min: 2,
            max: 3,
            found: node.inputs.len(),
        });
    }
    if node.outputs.len() != 1 {
        return Err(KernelError::OutputCount {
            expected: 1,
            found: node.outputs.len(),
        });
    }
    Ok(())
}

fn dims(weights: &TensorRef<'_>, index: u32) -> Result<Dims, KernelError> {
    match *weights.shape().dims() {
        [units, depth] => Ok(Dims {
            depth: depth as usize,
            units: units as usize,
        }),
        _ => Err(KernelError::RankMismatch {
            tensor: index,
            expected: 2,
            found: weights.shape().rank(),
        }),
    }
}

fn check_shapes(
    node: &NodeDescriptor,
    input: &TensorRef<'_>,
    weights: &TensorRef<'_>,
    bias: Option<&TensorRef<'_>>,
    output: &TensorRef<'_>,
) -> Result<(), KernelError> {
    let dims = dims(weights, node.inputs[1])?;
    let input_elements = input.shape().num_elements();

    if input_elements % dims.depth != 0 {
        return Err(KernelError::ShapeMismatch {
            tensor: node.inputs[0],
            expected: input_elements.next_multiple_of(dims.depth),
            found: input_elements,
        });
    }
    let batches = input_elements / dims.depth;

    if let Some(bias) = bias
        && bias.shape().num_elements() != dims.units
    {
        return Err(KernelError::ShapeMismatch {
            tensor: node.inputs[2],
            expected: dims.units,
            found: bias.shape().num_elements(),
        });
    }

    if output.shape().num_elements() != batches * dims.units {
        return Err(KernelError::ShapeMismatch {
            tensor: node.outputs[0],
            expected: batches * dims.units,
            found: output.shape().num_elements(),
        });
    }

    Ok(())
}

fn expect_dtype(tensor: &TensorRef<'_>, expected: DType) -> Result<(), KernelError> {
    if tensor.dtype() != expected {
        return Err(KernelError::DTypeMismatch {
            expected,
            found: tensor.dtype(),
        });
    }
    Ok(())
}

fn quantization(tensor: &TensorRef<'_>, index: u32) -> Result<QuantParams, KernelError> {
    tensor
        .quantization()
        .ok_or(KernelError::MissingQuantization { tensor: index })
}
