//! Graph execution over a fixed memory arena.
//!
//! An [`Interpreter`] binds a [`Model`], an [`OperatorResolver`] and a byte
//! buffer. [`Interpreter::allocate_tensors`] lays out every runtime tensor and
//! all bookkeeping in the buffer and prepares each node; after that,
//! [`Interpreter::invoke`] runs the nodes in order without allocating.

mod context;
pub(crate) mod tensor;

pub use context::{InvokeContext, PrepareContext};
pub use tensor::{Shape, TensorMut, TensorRef};

use crate::arena::{Arena, ArenaError, ArenaSlot};
use crate::format::{Model, NodeDescriptor, OperatorKind};
use crate::kernels::{Kernel, KernelError};
use crate::resolver::OperatorResolver;
use tensor::{NodeRecord, TensorRecord};

/// Alignment of every tensor buffer carved from the arena.
pub const TENSOR_ALIGNMENT: usize = 16;

/// Errors raised while allocating or running a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InterpreterError {
    /// Tensors were accessed or the graph invoked before [`Interpreter::allocate_tensors`].
    #[error("tensors have not been allocated")]
    TensorsNotAllocated,
    /// A node needs an operator the resolver does not provide.
    #[error("node {node} needs operator {kind}, which is not registered")]
    UnresolvedOperator {
        /// Node index.
        node: usize,
        /// Missing operator.
        kind: OperatorKind,
    },
    /// A node references an operator the model does not declare.
    #[error("node {node} references an undeclared operator")]
    InvalidNode {
        /// Node index.
        node: usize,
    },
    /// The arena is too small or was accessed out of bounds.
    #[error(transparent)]
    Arena(#[from] ArenaError),
    /// A kernel rejected a node.
    #[error("node {node} failed: {source}")]
    Kernel {
        /// Node index.
        node: usize,
        /// The kernel's error.
        #[source]
        source: KernelError,
    },
    /// A graph input or output index is out of range.
    #[error("index {index} is out of range ({count} available)")]
    TensorIndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of graph inputs or outputs.
        count: usize,
    },
}

struct Layout {
    tensors: ArenaSlot,
    nodes: ArenaSlot,
}

/// Executes a model inside a caller-provided buffer.
pub struct Interpreter<'a, R> {
    model: &'a Model<'a>,
    resolver: &'a R,
    arena: Arena<'a>,
    layout: Option<Layout>,
}

impl<'a, R: OperatorResolver> Interpreter<'a, R> {
    /// Bind a model and its kernels to `arena`. Nothing is allocated yet.
    pub fn new(model: &'a Model<'a>, resolver: &'a R, arena: &'a mut [u8]) -> Self {
        Self {
            model,
            resolver,
            arena: Arena::new(arena),
            layout: None,
        }
    }

    /// Lay out every tensor and record in the arena and prepare each node.
    ///
    /// Any previous allocation is discarded first. On failure the interpreter
    /// is left unallocated.
    pub fn allocate_tensors(&mut self) -> Result<(), InterpreterError> {
        self.layout = None;
        self.arena.reset();

        let descriptors = self.model.tensors();
        let tensors = self.arena.allocate_slice::<TensorRecord>(descriptors.len())?;
        let nodes = self
            .arena
            .allocate_slice::<NodeRecord>(self.model.nodes().len())?;

        for (index, descriptor) in descriptors.iter().enumerate() {
            let data = if descriptor.is_constant() {
                ArenaSlot::default()
            } else {
                self.arena
                    .allocate_head(descriptor.size_in_bytes(), TENSOR_ALIGNMENT)?
            };
            self.arena.slice_mut::<TensorRecord>(tensors)?[index] =
                TensorRecord::new(descriptor, data);
        }

        for (index, node) in self.model.nodes().iter().enumerate() {
            let kernel = self.kernel(index, node)?;
            let mut ctx = PrepareContext::new(self.model, &mut self.arena, tensors);
            let op_data = kernel
                .prepare(&mut ctx, node)
                .map_err(|source| InterpreterError::Kernel { node: index, source })?;
            self.arena.slice_mut::<NodeRecord>(nodes)?[index] = NodeRecord { op_data };
        }

        log::debug!(
            "Allocated {} tensors and {} nodes: {} of {} arena bytes used",
            descriptors.len(),
            self.model.nodes().len(),
            self.arena.used_bytes(),
            self.arena.capacity()
        );

        self.layout = Some(Layout { tensors, nodes });
        Ok(())
    }

    /// Run every node in order.
    pub fn invoke(&mut self) -> Result<(), InterpreterError> {
        let (tensors, nodes) = match &self.layout {
            Some(layout) => (layout.tensors, layout.nodes),
            None => return Err(InterpreterError::TensorsNotAllocated),
        };

        for (index, node) in self.model.nodes().iter().enumerate() {
            let kernel = self.kernel(index, node)?;
            let node_error = |source| InterpreterError::Kernel { node: index, source };

            let output_index = *node
                .outputs
                .first()
                .ok_or(node_error(KernelError::OutputCount {
                    expected: 1,
                    found: 0,
                }))?;
            let output = *self
                .arena
                .slice::<TensorRecord>(tensors)?
                .get(output_index as usize)
                .ok_or(node_error(KernelError::TensorIndexOutOfRange(output_index)))?;
            let record = *self
                .arena
                .slice::<NodeRecord>(nodes)?
                .get(index)
                .ok_or(ArenaError::InvalidSlot {
                    offset: nodes.offset(),
                    end: nodes.offset() + nodes.len(),
                })?;

            let (region, written) = self.arena.split_for_write(output.data)?;
            let records = region.slice::<TensorRecord>(tensors)?;
            let mut ctx = InvokeContext::new(
                self.model,
                region,
                records,
                written,
                output_index,
                record.op_data,
            );

            kernel.invoke(&mut ctx, node).map_err(node_error)?;
            log::trace!("Invoked node {index} ({})", kernel.kind());
        }

        Ok(())
    }

    fn kernel(
        &self,
        index: usize,
        node: &NodeDescriptor,
    ) -> Result<&'static dyn Kernel, InterpreterError> {
        let kind = self
            .model
            .operator(node)
            .ok_or(InterpreterError::InvalidNode { node: index })?;

        self.resolver
            .find(kind)
            .ok_or(InterpreterError::UnresolvedOperator { node: index, kind })
    }

    /// Number of graph inputs.
    pub fn inputs_len(&self) -> usize {
        self.model.inputs().len()
    }

    /// Number of graph outputs.
    pub fn outputs_len(&self) -> usize {
        self.model.outputs().len()
    }

    /// Bytes of the arena in use, alignment padding included.
    pub fn arena_used_bytes(&self) -> usize {
        self.arena.used_bytes()
    }

    /// Graph input `index`.
    pub fn input(&self, index: usize) -> Result<TensorRef<'_>, InterpreterError> {
        let tensor = graph_tensor(self.model.inputs(), index)?;
        self.tensor(tensor)
    }

    /// Graph input `index`, writable.
    pub fn input_mut(&mut self, index: usize) -> Result<TensorMut<'_>, InterpreterError> {
        let tensor = graph_tensor(self.model.inputs(), index)?;
        let record = self.record(tensor)?;
        let data = self.arena.get_mut(record.data)?;
        Ok(TensorMut::new(&record, data))
    }

    /// Graph output `index`.
    pub fn output(&self, index: usize) -> Result<TensorRef<'_>, InterpreterError> {
        let tensor = graph_tensor(self.model.outputs(), index)?;
        self.tensor(tensor)
    }

    fn record(&self, tensor: usize) -> Result<TensorRecord, InterpreterError> {
        let layout = self
            .layout
            .as_ref()
            .ok_or(InterpreterError::TensorsNotAllocated)?;
        let records = self.arena.slice::<TensorRecord>(layout.tensors)?;

        records
            .get(tensor)
            .copied()
            .ok_or(InterpreterError::TensorIndexOutOfRange {
                index: tensor,
                count: records.len(),
            })
    }

    // Graph inputs and outputs are never constants, so their data is in the arena.
    fn tensor(&self, tensor: usize) -> Result<TensorRef<'_>, InterpreterError> {
        let record = self.record(tensor)?;
        let data = self.arena.get(record.data)?;
        Ok(TensorRef::new(&record, data))
    }
}

fn graph_tensor(indices: &[u32], index: usize) -> Result<usize, InterpreterError> {
    indices
        .get(index)
        .map(|&tensor| tensor as usize)
        .ok_or(InterpreterError::TensorIndexOutOfRange {
            index,
            count: indices.len(),
        })
}

#[cfg(test)]
mod tests;
