//! Operator kernels.
//!
//! A kernel is a stateless `'static` value. Anything it derives from the model
//! while preparing (requantization parameters, activation bounds) is stored in
//! the arena and handed back on every invocation.

pub mod fixed_point;
mod fully_connected;

pub use fully_connected::{FULLY_CONNECTED, FullyConnected};

use bytemuck::PodCastError;

use crate::arena::{ArenaError, ArenaSlot};
use crate::format::{DType, NodeDescriptor, OperatorKind};
use crate::interpreter::{InvokeContext, PrepareContext};

/// The computation behind one [`OperatorKind`].
pub trait Kernel: Sync {
    /// The operator this kernel implements.
    fn kind(&self) -> OperatorKind;

    /// Check the node's tensors and precompute whatever [`Kernel::invoke`] needs.
    ///
    /// Returns the slot of the persistent op data allocated through the
    /// context, or an empty slot when the kernel needs none.
    fn prepare(
        &self,
        ctx: &mut PrepareContext<'_, '_>,
        node: &NodeDescriptor,
    ) -> Result<ArenaSlot, KernelError>;

    /// Compute the node's output.
    fn invoke(&self, ctx: &mut InvokeContext<'_>, node: &NodeDescriptor) -> Result<(), KernelError>;
}

/// Errors raised by kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// The node has the wrong number of inputs.
    #[error("expected {min} to {max} inputs, found {found}")]
    InputCount {
        /// Fewest inputs accepted.
        min: usize,
        /// Most inputs accepted.
        max: usize,
        /// Inputs of the node.
        found: usize,
    },
    /// The node has the wrong number of outputs.
    #[error("expected {expected} outputs, found {found}")]
    OutputCount {
        /// Outputs required.
        expected: usize,
        /// Outputs of the node.
        found: usize,
    },
    /// A tensor has an unexpected element type.
    #[error("expected a {expected:?} tensor, found {found:?}")]
    DTypeMismatch {
        /// The element type required.
        expected: DType,
        /// The element type found.
        found: DType,
    },
    /// The kernel has no implementation for this element type.
    #[error("unsupported element type {0:?}")]
    UnsupportedDType(DType),
    /// A quantized tensor lacks quantization parameters.
    #[error("tensor {tensor} is missing quantization parameters")]
    MissingQuantization {
        /// Tensor index.
        tensor: u32,
    },
    /// A tensor's shape is incompatible with the operator.
    #[error("tensor {tensor} has {found} elements, expected {expected}")]
    ShapeMismatch {
        /// Tensor index.
        tensor: u32,
        /// Elements required.
        expected: usize,
        /// Elements found.
        found: usize,
    },
    /// A tensor's rank is incompatible with the operator.
    #[error("tensor {tensor} has rank {found}, expected {expected}")]
    RankMismatch {
        /// Tensor index.
        tensor: u32,
        /// Rank required.
        expected: usize,
        /// Rank found.
        found: usize,
    },
    /// The requantization scale cannot be expressed as a fixed-point multiplier.
    #[error("requantization scale is not a finite positive number")]
    InvalidMultiplier,
    /// The node references a tensor the model does not declare.
    #[error("tensor index {0} is out of range")]
    TensorIndexOutOfRange(u32),
    /// A tensor is not readable from the current context.
    #[error("tensor {0} has no readable data")]
    MissingData(u32),
    /// Arena access failed.
    #[error(transparent)]
    Arena(#[from] ArenaError),
    /// Tensor data has the wrong size or alignment for its element type.
    #[error("tensor data cannot be viewed as its element type: {0:?}")]
    Cast(PodCastError),
}
