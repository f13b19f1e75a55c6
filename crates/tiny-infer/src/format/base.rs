use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::ops::Range;
use serde::{Deserialize, Serialize};

use crate::quantization::QuantParams;

/// Magic number identifying a tiny-infer model container: "TINF" in little endian.
pub const MAGIC_NUMBER: u32 = 0x464E_4954;

/// Schema version this runtime was built against.
///
/// Containers carrying any other version are rejected before anything else is parsed.
pub const SCHEMA_VERSION: u16 = 3;

/// Size of the fixed header: magic (4) + version (2) + metadata size (4).
pub const HEADER_SIZE: usize = 10;

/// Alignment of the data section and of every constant buffer inside it.
pub const DATA_ALIGNMENT: usize = 16;

/// Upper bound on the CBOR metadata block.
pub const MAX_METADATA_SIZE: u32 = 64 * 1024;

/// Upper bound on the number of tensors a model may declare.
pub const MAX_TENSOR_COUNT: usize = 256;

/// Upper bound on the number of nodes a model may declare.
pub const MAX_NODE_COUNT: usize = 256;

/// Maximum tensor rank.
pub const MAX_DIMS: usize = 4;

/// Upper bound on the byte size of a single tensor, matching the reach of an arena slot.
pub const MAX_TENSOR_BYTES: usize = u32::MAX as usize;

pub(crate) const MAX_CBOR_RECURSION_DEPTH: usize = 64;

/// Byte range of the magic number inside the header.
pub const fn magic_range() -> Range<usize> {
    0..4
}

/// Byte range of the schema version inside the header.
pub const fn version_range() -> Range<usize> {
    4..6
}

/// Byte range of the metadata size inside the header.
pub const fn metadata_size_range() -> Range<usize> {
    6..10
}

/// Offset of the data section for a metadata block of `metadata_size` bytes.
pub fn aligned_data_section_start(metadata_size: usize) -> usize {
    (HEADER_SIZE + metadata_size).next_multiple_of(DATA_ALIGNMENT)
}

/// Errors raised while reading or writing a model container.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// The buffer cannot hold the header or the metadata it announces.
    #[error("model buffer is too short: expected at least {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },
    /// The buffer does not start with [`MAGIC_NUMBER`].
    #[error("invalid magic number {found:#010x}, not a tiny-infer model")]
    InvalidMagicNumber {
        /// The magic number found in the header.
        found: u32,
    },
    /// The model was produced for another schema version.
    #[error("model schema version {found} does not match supported version {expected}")]
    SchemaMismatch {
        /// The version found in the header.
        found: u16,
        /// The version this runtime supports.
        expected: u16,
    },
    /// The metadata block exceeds [`MAX_METADATA_SIZE`].
    #[error("metadata size {size} exceeds the maximum of {limit} bytes")]
    MetadataTooLarge {
        /// Announced size.
        size: u32,
        /// Allowed size.
        limit: u32,
    },
    /// The metadata block could not be decoded.
    #[error("failed to decode model metadata: {0}")]
    MetadataDeserialization(String),
    /// The metadata could not be encoded.
    #[error("failed to encode model metadata: {0}")]
    MetadataSerialization(String),
    /// The metadata decoded but describes an inconsistent model.
    #[error("invalid model: {0}")]
    Validation(String),
}

/// Parsed fixed-size header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelHeader {
    /// Magic number.
    pub magic: u32,
    /// Schema version.
    pub version: u16,
    /// Size of the CBOR metadata block in bytes.
    pub metadata_size: u32,
}

impl ModelHeader {
    /// Header for the current schema version.
    pub fn new(metadata_size: u32) -> Self {
        Self {
            magic: MAGIC_NUMBER,
            version: SCHEMA_VERSION,
            metadata_size,
        }
    }

    /// Parse the header from the first [`HEADER_SIZE`] bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FormatError::Truncated {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[magic_range()]);
        let mut version = [0u8; 2];
        version.copy_from_slice(&bytes[version_range()]);
        let mut metadata_size = [0u8; 4];
        metadata_size.copy_from_slice(&bytes[metadata_size_range()]);

        Ok(Self {
            magic: u32::from_le_bytes(magic),
            version: u16::from_le_bytes(version),
            metadata_size: u32::from_le_bytes(metadata_size),
        })
    }

    /// Serialize the header.
    pub fn into_bytes(self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[magic_range()].copy_from_slice(&self.magic.to_le_bytes());
        bytes[version_range()].copy_from_slice(&self.version.to_le_bytes());
        bytes[metadata_size_range()].copy_from_slice(&self.metadata_size.to_le_bytes());
        bytes
    }
}

/// Element type of a tensor.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    /// 32-bit float.
    F32,
    /// 32-bit signed integer, used for quantized biases.
    I32,
    /// 8-bit signed integer, used for quantized weights and activations.
    I8,
}

impl DType {
    /// Size of one element in bytes.
    pub const fn size(&self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::I8 => 1,
        }
    }
}

/// Operators a model graph can reference.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatorKind {
    /// `y = activation(W x + b)`.
    FullyConnected,
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorKind::FullyConnected => f.write_str("FullyConnected"),
        }
    }
}

/// Activation fused into an operator.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    /// Identity.
    #[default]
    None,
    /// `max(x, 0)`.
    Relu,
}

/// Metadata describing a single tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorDescriptor {
    /// Tensor name, for diagnostics.
    pub name: String,
    /// Element type.
    pub dtype: DType,
    /// Dimensions, outermost first.
    pub shape: Vec<u32>,
    /// Quantization parameters, required for quantized activations.
    pub quantization: Option<QuantParams>,
    /// `(start, end)` byte offsets of constant data, relative to the data section.
    ///
    /// `None` for tensors computed at runtime, whose storage comes from the arena.
    pub buffer: Option<(u64, u64)>,
}

impl TensorDescriptor {
    /// Number of elements.
    pub fn num_elements(&self) -> usize {
        self.shape.iter().map(|&dim| dim as usize).product()
    }

    /// Number of bytes needed to store the tensor.
    ///
    /// Only meaningful for descriptors of a loaded [`Model`](super::Model), whose
    /// sizes are known to fit [`MAX_TENSOR_BYTES`].
    pub fn size_in_bytes(&self) -> usize {
        self.num_elements() * self.dtype.size()
    }

    /// Number of bytes needed to store the tensor, or `None` on overflow.
    pub fn checked_size_in_bytes(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(self.dtype.size(), |acc, &dim| acc.checked_mul(dim as usize))
    }

    /// Whether the tensor data is stored in the model.
    pub fn is_constant(&self) -> bool {
        self.buffer.is_some()
    }
}

/// Metadata describing one operation of the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Index into [`ModelMetadata::operators`].
    pub operator: u32,
    /// Indices of the input tensors.
    pub inputs: Vec<u32>,
    /// Indices of the output tensors.
    pub outputs: Vec<u32>,
    /// Activation fused into the operator.
    pub activation: Activation,
}

/// The CBOR metadata block of a model container.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Free-form description.
    pub description: String,
    /// Operators referenced by the nodes.
    pub operators: Vec<OperatorKind>,
    /// All tensors, constant and computed.
    pub tensors: Vec<TensorDescriptor>,
    /// Nodes in execution order.
    pub nodes: Vec<NodeDescriptor>,
    /// Graph input tensor indices.
    pub inputs: Vec<u32>,
    /// Graph output tensor indices.
    pub outputs: Vec<u32>,
}
