//! One-shot scalar inference.
//!
//! [`run_inference`] loads a model, registers its kernels, allocates its
//! tensors in the static arena, then quantizes one real input, runs the graph
//! and dequantizes one real output. Nothing survives between calls.

use serde::{Deserialize, Serialize};

use crate::arena::TensorArena;
use crate::format::{DType, FormatError, Model, OperatorKind};
use crate::interpreter::{Interpreter, InterpreterError};
use crate::quantization::{AffineQuantization, Quantization, RoundingMode};
use crate::resolver::{OpResolver, ResolverError};

/// Size of the static arena used by [`run_inference`].
pub const TENSOR_ARENA_SIZE: usize = 2048;

static TENSOR_ARENA: spin::Mutex<TensorArena<TENSOR_ARENA_SIZE>> =
    spin::Mutex::new(TensorArena::new());

/// Resolver sized for the operators of the hello world model.
pub type HelloWorldOpResolver = OpResolver<1>;

/// Errors returned by [`run_inference`], one per pipeline step.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InferenceError {
    /// The model targets another schema version.
    #[error("model schema version {found} is not supported, expected {expected}")]
    SchemaMismatch {
        /// Version found in the model.
        found: u16,
        /// Version supported by this runtime.
        expected: u16,
    },
    /// The model bytes are not a valid container.
    #[error("invalid model: {0}")]
    InvalidModel(#[source] FormatError),
    /// More operators were registered than the resolver can hold.
    #[error("operator registry is full ({capacity} slots)")]
    RegistryOverflow {
        /// Resolver capacity.
        capacity: usize,
    },
    /// An operator was registered twice.
    #[error("operator {kind} registered twice")]
    DuplicateOperator {
        /// The operator.
        kind: OperatorKind,
    },
    /// The arena is too small for the model, or a node could not be prepared.
    #[error("tensor allocation failed: {0}")]
    AllocationFailed(#[source] InterpreterError),
    /// A node failed while running.
    #[error("invocation failed: {0}")]
    InvokeFailed(#[source] InterpreterError),
    /// Another inference holds the static arena.
    #[error("the tensor arena is in use by another inference")]
    ArenaBusy,
    /// The graph input or output cannot carry a scalar value.
    #[error("graph tensor {index} is unsupported: {reason}")]
    UnsupportedTensor {
        /// Input or output index.
        index: usize,
        /// What is wrong with it.
        reason: &'static str,
    },
}

impl From<FormatError> for InferenceError {
    fn from(err: FormatError) -> Self {
        match err {
            FormatError::SchemaMismatch { found, expected } => {
                InferenceError::SchemaMismatch { found, expected }
            }
            err => InferenceError::InvalidModel(err),
        }
    }
}

impl From<ResolverError> for InferenceError {
    fn from(err: ResolverError) -> Self {
        match err {
            ResolverError::Overflow { capacity, .. } => {
                InferenceError::RegistryOverflow { capacity }
            }
            ResolverError::Duplicate { kind } => InferenceError::DuplicateOperator { kind },
        }
    }
}

/// Configuration of a scalar inference.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Rounding used to quantize the input.
    pub rounding: RoundingMode,
    /// The graph input receiving the value.
    pub input_index: usize,
    /// The graph output read back.
    pub output_index: usize,
}

impl RunnerConfig {
    /// The default configuration: nearest rounding, first input and output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the input rounding mode.
    pub fn with_rounding(mut self, rounding: RoundingMode) -> Self {
        self.rounding = rounding;
        self
    }

    /// Set the graph input receiving the value.
    pub fn with_input_index(mut self, input_index: usize) -> Self {
        self.input_index = input_index;
        self
    }

    /// Set the graph output read back.
    pub fn with_output_index(mut self, output_index: usize) -> Self {
        self.output_index = output_index;
        self
    }
}

/// Run `model_bytes` on a single real value, in the static arena.
///
/// Fails with [`InferenceError::ArenaBusy`] rather than waiting when another
/// call is in flight.
pub fn run_inference(model_bytes: &[u8], input: f32) -> Result<f32, InferenceError> {
    let mut arena = TENSOR_ARENA.try_lock().ok_or(InferenceError::ArenaBusy)?;
    run_inference_with(
        model_bytes,
        input,
        arena.as_mut_slice(),
        &RunnerConfig::default(),
    )
}

/// Run `model_bytes` on a single real value, in a caller-provided arena.
pub fn run_inference_with(
    model_bytes: &[u8],
    input: f32,
    arena: &mut [u8],
    config: &RunnerConfig,
) -> Result<f32, InferenceError> {
    let result = infer(model_bytes, input, arena, config);
    if let Err(err) = &result {
        log::warn!("Inference failed: {err}");
    }
    result
}

fn infer(
    model_bytes: &[u8],
    input: f32,
    arena: &mut [u8],
    config: &RunnerConfig,
) -> Result<f32, InferenceError> {
    let model = Model::from_bytes(model_bytes)?;
    log::debug!("Model '{}' (schema v{})", model.description(), model.version());

    let mut resolver = HelloWorldOpResolver::new();
    resolver.add_fully_connected()?;

    let mut interpreter = Interpreter::new(&model, &resolver, arena);
    interpreter
        .allocate_tensors()
        .map_err(InferenceError::AllocationFailed)?;
    log::debug!("Arena usage: {} bytes", interpreter.arena_used_bytes());

    write_input(&mut interpreter, input, config)?;
    interpreter.invoke().map_err(InferenceError::InvokeFailed)?;
    let output = read_output(&interpreter, config)?;

    log::debug!("Input {input} -> output {output}");
    Ok(output)
}

fn write_input(
    interpreter: &mut Interpreter<'_, HelloWorldOpResolver>,
    input: f32,
    config: &RunnerConfig,
) -> Result<(), InferenceError> {
    let index = config.input_index;
    let unsupported = |reason| InferenceError::UnsupportedTensor { index, reason };

    let mut tensor = interpreter
        .input_mut(index)
        .map_err(|_| unsupported("graph has no input at this index"))?;
    if tensor.shape().num_elements() != 1 {
        return Err(unsupported("input must hold exactly one element"));
    }

    match (tensor.dtype(), tensor.quantization()) {
        (DType::I8, Some(params)) => {
            let quantized = AffineQuantization::init(params, config.rounding).quantize_one(input);
            log::trace!("Quantized input {input} to {quantized}");

            let [value] = tensor
                .as_i8_mut()
                .map_err(|_| unsupported("input must be int8"))?
            else {
                return Err(unsupported("input must hold exactly one element"));
            };
            *value = quantized;
            Ok(())
        }
        (DType::F32, _) => {
            let [value] = tensor
                .as_f32_mut()
                .map_err(|_| unsupported("input must be f32"))?
            else {
                return Err(unsupported("input must hold exactly one element"));
            };
            *value = input;
            Ok(())
        }
        (DType::I8, None) => Err(unsupported("int8 input is not quantized")),
        _ => Err(unsupported("input must be f32 or int8")),
    }
}

fn read_output(
    interpreter: &Interpreter<'_, HelloWorldOpResolver>,
    config: &RunnerConfig,
) -> Result<f32, InferenceError> {
    let index = config.output_index;
    let unsupported = |reason| InferenceError::UnsupportedTensor { index, reason };

    let tensor = interpreter
        .output(index)
        .map_err(|_| unsupported("graph has no output at this index"))?;
    if tensor.shape().num_elements() != 1 {
        return Err(unsupported("output must hold exactly one element"));
    }

    match (tensor.dtype(), tensor.quantization()) {
        (DType::I8, Some(params)) => {
            let [value] = tensor
                .as_i8()
                .map_err(|_| unsupported("output must be int8"))?
            else {
                return Err(unsupported("output must hold exactly one element"));
            };
            Ok(AffineQuantization::init(params, config.rounding).dequantize_one(*value))
        }
        (DType::F32, _) => tensor
            .f32_values()
            .ok()
            .and_then(|mut values| values.next())
            .ok_or(unsupported("output must be f32")),
        (DType::I8, None) => Err(unsupported("int8 output is not quantized")),
        _ => Err(unsupported("output must be f32 or int8")),
    }
}
