use bytemuck::{Pod, Zeroable};

use crate::arena::ArenaSlot;
use crate::format::{DType, MAX_DIMS, TensorDescriptor};
use crate::kernels::KernelError;
use crate::quantization::QuantParams;

const FLAG_QUANTIZED: u32 = 1;
const FLAG_CONSTANT: u32 = 1 << 1;

/// Runtime view of a tensor, stored in the arena tail.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub(crate) struct TensorRecord {
    dims: [u32; MAX_DIMS],
    rank: u32,
    dtype: u32,
    scale: f32,
    zero_point: i32,
    flags: u32,
    /// Arena storage; empty for constants, whose data stays in the model.
    pub(crate) data: ArenaSlot,
}

impl TensorRecord {
    pub(crate) fn new(descriptor: &TensorDescriptor, data: ArenaSlot) -> Self {
        let mut dims = [0; MAX_DIMS];
        dims[..descriptor.shape.len()].copy_from_slice(&descriptor.shape);

        let mut flags = 0;
        if descriptor.is_constant() {
            flags |= FLAG_CONSTANT;
        }
        let params = descriptor.quantization;
        if params.is_some() {
            flags |= FLAG_QUANTIZED;
        }

        Self {
            dims,
            rank: descriptor.shape.len() as u32,
            dtype: dtype_code(descriptor.dtype),
            scale: params.map_or(0.0, |p| p.scale),
            zero_point: params.map_or(0, |p| p.zero_point),
            flags,
            data,
        }
    }

    pub(crate) fn is_constant(&self) -> bool {
        self.flags & FLAG_CONSTANT != 0
    }

    pub(crate) fn dtype(&self) -> DType {
        match self.dtype {
            0 => DType::F32,
            1 => DType::I32,
            _ => DType::I8,
        }
    }

    pub(crate) fn shape(&self) -> Shape {
        Shape {
            dims: self.dims,
            rank: self.rank as usize,
        }
    }

    pub(crate) fn quantization(&self) -> Option<QuantParams> {
        (self.flags & FLAG_QUANTIZED != 0).then(|| QuantParams::new(self.scale, self.zero_point))
    }
}

fn dtype_code(dtype: DType) -> u32 {
    match dtype {
        DType::F32 => 0,
        DType::I32 => 1,
        DType::I8 => 2,
    }
}

/// Per-node persistent data, stored in the arena tail.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub(crate) struct NodeRecord {
    pub(crate) op_data: ArenaSlot,
}

/// Dimensions of a tensor, outermost first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shape {
    dims: [u32; MAX_DIMS],
    rank: usize,
}

impl Shape {
    /// The dimensions.
    pub fn dims(&self) -> &[u32] {
        &self.dims[..self.rank]
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of elements.
    pub fn num_elements(&self) -> usize {
        self.dims().iter().map(|&dim| dim as usize).product()
    }
}

/// A read-only tensor: metadata plus its bytes.
#[derive(Clone, Copy, Debug)]
pub struct TensorRef<'t> {
    dtype: DType,
    shape: Shape,
    quantization: Option<QuantParams>,
    data: &'t [u8],
}

impl<'t> TensorRef<'t> {
    pub(crate) fn new(record: &TensorRecord, data: &'t [u8]) -> Self {
        Self {
            dtype: record.dtype(),
            shape: record.shape(),
            quantization: record.quantization(),
            data,
        }
    }

    /// Element type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Dimensions.
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Quantization parameters, if the tensor is quantized.
    pub fn quantization(&self) -> Option<QuantParams> {
        self.quantization
    }

    /// Raw little-endian bytes.
    pub fn bytes(&self) -> &'t [u8] {
        self.data
    }

    /// The elements of an `i8` tensor.
    pub fn as_i8(&self) -> Result<&'t [i8], KernelError> {
        self.expect_dtype(DType::I8)?;
        Ok(bytemuck::cast_slice(self.data))
    }

    /// The elements of an `f32` tensor.
    ///
    /// Constant data may sit at any address inside the model buffer, so
    /// elements are decoded rather than cast.
    pub fn f32_values(&self) -> Result<impl Iterator<Item = f32> + use<'t>, KernelError> {
        self.expect_dtype(DType::F32)?;
        Ok(decode_f32(self.data))
    }

    /// The elements of an `i32` tensor.
    pub fn i32_values(&self) -> Result<impl Iterator<Item = i32> + use<'t>, KernelError> {
        self.expect_dtype(DType::I32)?;
        Ok(decode_i32(self.data))
    }

    fn expect_dtype(&self, expected: DType) -> Result<(), KernelError> {
        if self.dtype != expected {
            return Err(KernelError::DTypeMismatch {
                expected,
                found: self.dtype,
            });
        }
        Ok(())
    }
}

/// Little-endian `f32` elements of `bytes`, at any alignment.
pub(crate) fn decode_f32(bytes: &[u8]) -> impl Iterator<Item = f32> + '_ {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Little-endian `i32` elements of `bytes`, at any alignment.
pub(crate) fn decode_i32(bytes: &[u8]) -> impl Iterator<Item = i32> + '_ {
    bytes
        .chunks_exact(4)
        .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// A writable tensor living in the arena.
#[derive(Debug)]
pub struct TensorMut<'t> {
    dtype: DType,
    shape: Shape,
    quantization: Option<QuantParams>,
    data: &'t mut [u8],
}

impl<'t> TensorMut<'t> {
    pub(crate) fn new(record: &TensorRecord, data: &'t mut [u8]) -> Self {
        Self {
            dtype: record.dtype(),
            shape: record.shape(),
            quantization: record.quantization(),
            data,
        }
    }

    /// Element type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Dimensions.
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Quantization parameters, if the tensor is quantized.
    pub fn quantization(&self) -> Option<QuantParams> {
        self.quantization
    }

    /// The elements of an `i8` tensor.
    pub fn as_i8_mut(&mut self) -> Result<&mut [i8], KernelError> {
        self.expect_dtype(DType::I8)?;
        Ok(bytemuck::cast_slice_mut(self.data))
    }

    /// The elements of an `f32` tensor.
    pub fn as_f32_mut(&mut self) -> Result<&mut [f32], KernelError> {
        self.expect_dtype(DType::F32)?;
        bytemuck::try_cast_slice_mut(self.data).map_err(KernelError::Cast)
    }

    fn expect_dtype(&self, expected: DType) -> Result<(), KernelError> {
        if self.dtype != expected {
            return Err(KernelError::DTypeMismatch {
                expected,
                found: self.dtype,
            });
        }
        Ok(())
    }
}
