use bytemuck::Pod;

use super::tensor::{TensorMut, TensorRecord, TensorRef};
use crate::arena::{Arena, ArenaError, ArenaSlot, ReadRegion};
use crate::format::Model;
use crate::kernels::KernelError;

/// What a kernel sees while preparing a node.
pub struct PrepareContext<'c, 'a> {
    model: &'c Model<'c>,
    arena: &'c mut Arena<'a>,
    tensors: ArenaSlot,
}

impl<'c, 'a> PrepareContext<'c, 'a> {
    pub(crate) fn new(model: &'c Model<'c>, arena: &'c mut Arena<'a>, tensors: ArenaSlot) -> Self {
        Self {
            model,
            arena,
            tensors,
        }
    }

    /// A tensor of the model. Tensors computed at runtime read as zeros.
    pub fn tensor(&self, index: u32) -> Result<TensorRef<'_>, KernelError> {
        let records = self.arena.slice::<TensorRecord>(self.tensors)?;
        let record = records
            .get(index as usize)
            .ok_or(KernelError::TensorIndexOutOfRange(index))?;
        let data = tensor_data(self.model, index, record, |slot| self.arena.get(slot))?;

        Ok(TensorRef::new(record, data))
    }

    /// Store `value` in the arena for the lifetime of the interpreter.
    pub fn allocate_op_data<T: Pod>(&mut self, value: T) -> Result<ArenaSlot, KernelError> {
        Ok(self.arena.allocate_record(value)?)
    }
}

/// What a kernel sees while invoking a node: every tensor read-only except the
/// node's output.
pub struct InvokeContext<'c> {
    model: &'c Model<'c>,
    region: ReadRegion<'c>,
    tensors: &'c [TensorRecord],
    output: &'c mut [u8],
    output_index: u32,
    op_data: ArenaSlot,
}

impl<'c> InvokeContext<'c> {
    pub(crate) fn new(
        model: &'c Model<'c>,
        region: ReadRegion<'c>,
        tensors: &'c [TensorRecord],
        output: &'c mut [u8],
        output_index: u32,
        op_data: ArenaSlot,
    ) -> Self {
        Self {
            model,
            region,
            tensors,
            output,
            output_index,
            op_data,
        }
    }

    /// A tensor other than the output.
    pub fn input(&self, index: u32) -> Result<TensorRef<'c>, KernelError> {
        if index == self.output_index {
            return Err(KernelError::MissingData(index));
        }
        let record = self
            .tensors
            .get(index as usize)
            .ok_or(KernelError::TensorIndexOutOfRange(index))?;
        let data = tensor_data(self.model, index, record, |slot| self.region.get(slot))?;

        Ok(TensorRef::new(record, data))
    }

    /// The tensor the node writes.
    pub fn output(&mut self) -> Result<TensorMut<'_>, KernelError> {
        let record = self
            .tensors
            .get(self.output_index as usize)
            .ok_or(KernelError::TensorIndexOutOfRange(self.output_index))?;

        Ok(TensorMut::new(record, self.output))
    }

    /// The op data returned by the kernel's prepare step.
    pub fn op_data<T: Pod>(&self) -> Result<&'c T, KernelError> {
        Ok(self.region.record(self.op_data)?)
    }
}

fn tensor_data<'d>(
    model: &'d Model<'d>,
    index: u32,
    record: &TensorRecord,
    arena: impl FnOnce(ArenaSlot) -> Result<&'d [u8], ArenaError>,
) -> Result<&'d [u8], KernelError> {
    if record.is_constant() {
        model
            .constant_data(index as usize)
            .ok_or(KernelError::MissingData(index))
    } else {
        Ok(arena(record.data)?)
    }
}
