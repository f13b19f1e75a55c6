use super::base::{
    DType, FormatError, HEADER_SIZE, MAGIC_NUMBER, MAX_CBOR_RECURSION_DEPTH, MAX_DIMS,
    MAX_METADATA_SIZE, MAX_NODE_COUNT, MAX_TENSOR_BYTES, MAX_TENSOR_COUNT, ModelHeader,
    ModelMetadata, NodeDescriptor, OperatorKind, SCHEMA_VERSION, TensorDescriptor,
    aligned_data_section_start,
};
use crate::quantization::{QMAX, QMIN};
use alloc::format;
use alloc::string::ToString;

/// A validated model container.
///
/// Metadata is decoded into owned structures; constant tensor data stays in the
/// caller's buffer and is only ever borrowed.
#[derive(Debug, Clone)]
pub struct Model<'a> {
    header: ModelHeader,
    metadata: ModelMetadata,
    data: &'a [u8],
}

impl<'a> Model<'a> {
    /// Load a model from bytes.
    ///
    /// The schema version is checked right after the magic number: a container
    /// written for another schema is rejected with [`FormatError::SchemaMismatch`]
    /// before its metadata is decoded.
    pub fn from_bytes(bytes: &'a [u8]) -> Result<Self, FormatError> {
        let header = ModelHeader::from_bytes(bytes)?;

        if header.magic != MAGIC_NUMBER {
            return Err(FormatError::InvalidMagicNumber {
                found: header.magic,
            });
        }

        if header.version != SCHEMA_VERSION {
            return Err(FormatError::SchemaMismatch {
                found: header.version,
                expected: SCHEMA_VERSION,
            });
        }

        if header.metadata_size > MAX_METADATA_SIZE {
            return Err(FormatError::MetadataTooLarge {
                size: header.metadata_size,
                limit: MAX_METADATA_SIZE,
            });
        }

        let metadata_end = HEADER_SIZE + header.metadata_size as usize;
        if bytes.len() < metadata_end {
            return Err(FormatError::Truncated {
                expected: metadata_end,
                actual: bytes.len(),
            });
        }

        let metadata: ModelMetadata = ciborium::de::from_reader_with_recursion_limit(
            &bytes[HEADER_SIZE..metadata_end],
            MAX_CBOR_RECURSION_DEPTH,
        )
        .map_err(|e| FormatError::MetadataDeserialization(e.to_string()))?;

        // A model without constants may end right after its metadata.
        let data_start = aligned_data_section_start(header.metadata_size as usize);
        let data = bytes.get(data_start..).unwrap_or(&[]);

        let model = Self {
            header,
            metadata,
            data,
        };
        model.validate()?;

        log::debug!(
            "Loaded model '{}': {} tensors, {} nodes, {} bytes of constant data",
            model.metadata.description,
            model.metadata.tensors.len(),
            model.metadata.nodes.len(),
            model.data.len()
        );

        Ok(model)
    }

    fn validate(&self) -> Result<(), FormatError> {
        let metadata = &self.metadata;

        if metadata.tensors.len() > MAX_TENSOR_COUNT {
            return Err(FormatError::Validation(format!(
                "model declares {} tensors, exceeding the maximum of {}",
                metadata.tensors.len(),
                MAX_TENSOR_COUNT
            )));
        }

        if metadata.nodes.len() > MAX_NODE_COUNT {
            return Err(FormatError::Validation(format!(
                "model declares {} nodes, exceeding the maximum of {}",
                metadata.nodes.len(),
                MAX_NODE_COUNT
            )));
        }

        for tensor in &metadata.tensors {
            self.validate_tensor(tensor)?;
        }

        for (index, node) in metadata.nodes.iter().enumerate() {
            self.validate_node(index, node)?;
        }

        if metadata.inputs.is_empty() || metadata.outputs.is_empty() {
            return Err(FormatError::Validation(
                "model must declare at least one input and one output".into(),
            ));
        }

        for &index in metadata.inputs.iter().chain(metadata.outputs.iter()) {
            let tensor = self.tensor_index(index, "graph")?;
            if tensor.is_constant() {
                return Err(FormatError::Validation(format!(
                    "graph input/output '{}' must not be a constant",
                    tensor.name
                )));
            }
        }

        Ok(())
    }

    fn validate_tensor(&self, tensor: &TensorDescriptor) -> Result<(), FormatError> {
        if tensor.shape.len() > MAX_DIMS {
            return Err(FormatError::Validation(format!(
                "tensor '{}' has rank {}, exceeding the maximum of {}",
                tensor.name,
                tensor.shape.len(),
                MAX_DIMS
            )));
        }

        if tensor.shape.contains(&0) {
            return Err(FormatError::Validation(format!(
                "tensor '{}' has an empty dimension",
                tensor.name
            )));
        }

        match tensor.checked_size_in_bytes() {
            Some(size) if size <= MAX_TENSOR_BYTES => {}
            _ => {
                return Err(FormatError::Validation(format!(
                    "tensor '{}' with shape {:?} exceeds the maximum of {} bytes",
                    tensor.name, tensor.shape, MAX_TENSOR_BYTES
                )));
            }
        }

        if let Some(params) = tensor.quantization {
            if !params.is_valid() {
                return Err(FormatError::Validation(format!(
                    "tensor '{}' has invalid quantization scale {}",
                    tensor.name, params.scale
                )));
            }
            if tensor.dtype == DType::I8 && !(QMIN..=QMAX).contains(&params.zero_point) {
                return Err(FormatError::Validation(format!(
                    "tensor '{}' has zero point {} outside the int8 range",
                    tensor.name, params.zero_point
                )));
            }
        }

        if let Some((start, end)) = tensor.buffer {
            let start: usize = start.try_into().map_err(|_| {
                FormatError::Validation(format!(
                    "tensor '{}' start offset {} exceeds platform maximum",
                    tensor.name, start
                ))
            })?;
            let end: usize = end.try_into().map_err(|_| {
                FormatError::Validation(format!(
                    "tensor '{}' end offset {} exceeds platform maximum",
                    tensor.name, end
                ))
            })?;

            if end < start || end > self.data.len() {
                return Err(FormatError::Validation(format!(
                    "tensor '{}' buffer {}..{} lies outside the {}-byte data section",
                    tensor.name,
                    start,
                    end,
                    self.data.len()
                )));
            }

            if end - start != tensor.size_in_bytes() {
                return Err(FormatError::Validation(format!(
                    "tensor '{}' buffer holds {} bytes but its shape needs {}",
                    tensor.name,
                    end - start,
                    tensor.size_in_bytes()
                )));
            }
        }

        Ok(())
    }

    fn validate_node(&self, index: usize, node: &NodeDescriptor) -> Result<(), FormatError> {
        if node.operator as usize >= self.metadata.operators.len() {
            return Err(FormatError::Validation(format!(
                "node {} references operator {} but only {} are declared",
                index,
                node.operator,
                self.metadata.operators.len()
            )));
        }

        for &tensor in node.inputs.iter() {
            self.tensor_index(tensor, "node input")?;
        }

        for &tensor in node.outputs.iter() {
            if self.tensor_index(tensor, "node output")?.is_constant() {
                return Err(FormatError::Validation(format!(
                    "node {} writes to constant tensor {}",
                    index, tensor
                )));
            }
        }

        Ok(())
    }

    fn tensor_index(&self, index: u32, role: &str) -> Result<&TensorDescriptor, FormatError> {
        self.metadata.tensors.get(index as usize).ok_or_else(|| {
            FormatError::Validation(format!(
                "{} tensor index {} out of range ({} tensors)",
                role,
                index,
                self.metadata.tensors.len()
            ))
        })
    }
}

impl<'a> Model<'a> {
    /// Schema version of the container.
    pub fn version(&self) -> u16 {
        self.header.version
    }

    /// Free-form description stored in the metadata.
    pub fn description(&self) -> &str {
        &self.metadata.description
    }

    /// The decoded metadata block.
    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    /// All tensor descriptors.
    pub fn tensors(&self) -> &[TensorDescriptor] {
        &self.metadata.tensors
    }

    /// A tensor descriptor by index.
    pub fn tensor(&self, index: usize) -> Option<&TensorDescriptor> {
        self.metadata.tensors.get(index)
    }

    /// Nodes in execution order.
    pub fn nodes(&self) -> &[NodeDescriptor] {
        &self.metadata.nodes
    }

    /// The operator a node executes.
    pub fn operator(&self, node: &NodeDescriptor) -> Option<OperatorKind> {
        self.metadata.operators.get(node.operator as usize).copied()
    }

    /// Graph input tensor indices.
    pub fn inputs(&self) -> &[u32] {
        &self.metadata.inputs
    }

    /// Graph output tensor indices.
    pub fn outputs(&self) -> &[u32] {
        &self.metadata.outputs
    }

    /// Constant data of a tensor, borrowed from the model buffer.
    ///
    /// Returns `None` for tensors computed at runtime.
    pub fn constant_data(&self, index: usize) -> Option<&'a [u8]> {
        let (start, end) = self.metadata.tensors.get(index)?.buffer?;
        // Offsets were checked against the data section when the model was loaded.
        self.data.get(start as usize..end as usize)
    }
}
