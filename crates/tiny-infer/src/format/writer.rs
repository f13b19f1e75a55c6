use super::base::{
    Activation, DATA_ALIGNMENT, DType, FormatError, ModelHeader, ModelMetadata, NodeDescriptor,
    OperatorKind, SCHEMA_VERSION, TensorDescriptor, aligned_data_section_start,
};
use crate::quantization::QuantParams;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

/// Builder producing model containers.
///
/// Used by tooling that exports trained models and by tests that need small
/// models with known weights.
///
/// # Example
///
/// ```
/// use tiny_infer::format::{Activation, DType, Model, ModelWriter, OperatorKind};
/// use tiny_infer::quantization::QuantParams;
///
/// let mut writer = ModelWriter::new("identity");
/// let fc = writer.add_operator(OperatorKind::FullyConnected);
/// let input = writer.add_activation("input", DType::F32, &[1, 1], None);
/// let weights = writer.add_constant_f32("weights", &[1, 1], &[1.0]);
/// let output = writer.add_activation("output", DType::F32, &[1, 1], None);
/// writer.add_node(fc, &[input, weights], &[output], Activation::None);
///
/// let bytes = writer.with_inputs(&[input]).with_outputs(&[output]).to_bytes().unwrap();
/// let model = Model::from_bytes(&bytes).unwrap();
/// assert_eq!(model.nodes().len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct ModelWriter {
    metadata: ModelMetadata,
    data: Vec<u8>,
    version: u16,
}

impl ModelWriter {
    /// Create an empty model with the given description.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            metadata: ModelMetadata {
                description: description.into(),
                ..Default::default()
            },
            data: Vec::new(),
            version: SCHEMA_VERSION,
        }
    }

    /// Override the schema version written in the header.
    pub fn with_version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    /// Set the graph inputs.
    pub fn with_inputs(mut self, inputs: &[u32]) -> Self {
        self.metadata.inputs = inputs.to_vec();
        self
    }

    /// Set the graph outputs.
    pub fn with_outputs(mut self, outputs: &[u32]) -> Self {
        self.metadata.outputs = outputs.to_vec();
        self
    }

    /// Declare an operator, returning its index.
    ///
    /// Declaring an operator twice returns the first index.
    pub fn add_operator(&mut self, kind: OperatorKind) -> u32 {
        if let Some(index) = self.metadata.operators.iter().position(|k| *k == kind) {
            return index as u32;
        }
        self.metadata.operators.push(kind);
        (self.metadata.operators.len() - 1) as u32
    }

    /// Declare a tensor computed at runtime, returning its index.
    pub fn add_activation(
        &mut self,
        name: &str,
        dtype: DType,
        shape: &[u32],
        quantization: Option<QuantParams>,
    ) -> u32 {
        self.push_tensor(TensorDescriptor {
            name: name.to_string(),
            dtype,
            shape: shape.to_vec(),
            quantization,
            buffer: None,
        })
    }

    /// Add a constant `f32` tensor.
    pub fn add_constant_f32(&mut self, name: &str, shape: &[u32], values: &[f32]) -> u32 {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.add_constant(name, DType::F32, shape, &bytes, None)
    }

    /// Add a constant quantized `i8` tensor.
    pub fn add_constant_i8(
        &mut self,
        name: &str,
        shape: &[u32],
        values: &[i8],
        quantization: QuantParams,
    ) -> u32 {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        self.add_constant(name, DType::I8, shape, bytes, Some(quantization))
    }

    /// Add a constant `i32` tensor, typically a quantized bias.
    pub fn add_constant_i32(
        &mut self,
        name: &str,
        shape: &[u32],
        values: &[i32],
        quantization: Option<QuantParams>,
    ) -> u32 {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.add_constant(name, DType::I32, shape, &bytes, quantization)
    }

    /// Add a constant tensor from raw little-endian bytes.
    pub fn add_constant(
        &mut self,
        name: &str,
        dtype: DType,
        shape: &[u32],
        bytes: &[u8],
        quantization: Option<QuantParams>,
    ) -> u32 {
        let start = self.data.len().next_multiple_of(DATA_ALIGNMENT);
        self.data.resize(start, 0);
        self.data.extend_from_slice(bytes);

        self.push_tensor(TensorDescriptor {
            name: name.to_string(),
            dtype,
            shape: shape.to_vec(),
            quantization,
            buffer: Some((start as u64, self.data.len() as u64)),
        })
    }

    /// Append a node to the execution order.
    pub fn add_node(
        &mut self,
        operator: u32,
        inputs: &[u32],
        outputs: &[u32],
        activation: Activation,
    ) {
        self.metadata.nodes.push(NodeDescriptor {
            operator,
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
            activation,
        });
    }

    fn push_tensor(&mut self, tensor: TensorDescriptor) -> u32 {
        self.metadata.tensors.push(tensor);
        (self.metadata.tensors.len() - 1) as u32
    }

    /// Serialize the container.
    ///
    /// The metadata is not validated here; reading the bytes back with
    /// [`Model::from_bytes`](super::Model::from_bytes) does that.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FormatError> {
        let mut metadata = Vec::new();
        ciborium::ser::into_writer(&self.metadata, &mut metadata)
            .map_err(|e| FormatError::MetadataSerialization(e.to_string()))?;

        let metadata_size: u32 = metadata.len().try_into().map_err(|_| {
            FormatError::MetadataSerialization("metadata does not fit in 4 GiB".into())
        })?;

        let mut header = ModelHeader::new(metadata_size);
        header.version = self.version;

        let data_start = aligned_data_section_start(metadata.len());
        let mut bytes = Vec::with_capacity(data_start + self.data.len());
        bytes.extend_from_slice(&header.into_bytes());
        bytes.extend_from_slice(&metadata);
        bytes.resize(data_start, 0);
        bytes.extend_from_slice(&self.data);

        Ok(bytes)
    }
}
