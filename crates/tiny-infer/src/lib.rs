#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # tiny-infer
//!
//! Quantized neural network inference for targets without an allocator at
//! run time. A model is read in place from an embedded byte buffer, its
//! kernels are registered in a fixed-capacity resolver, and every tensor and
//! bookkeeping record lives in one caller-sized arena.
//!
//! ```no_run
//! # let model_bytes: &[u8] = &[];
//! let prediction = tiny_infer::run_inference(model_bytes, 0.5)?;
//! # Ok::<(), tiny_infer::InferenceError>(())
//! ```

extern crate alloc;

pub mod arena;
pub mod format;
pub mod interpreter;
pub mod kernels;
pub mod quantization;
pub mod resolver;

mod runner;

pub use arena::{Arena, ArenaError, TensorArena};
pub use format::{FormatError, Model, ModelWriter, SCHEMA_VERSION};
pub use interpreter::{Interpreter, InterpreterError};
pub use kernels::{Kernel, KernelError};
pub use quantization::{AffineQuantization, QuantParams, Quantization, RoundingMode};
pub use resolver::{OpResolver, OperatorResolver, ResolverError};
pub use runner::*;
