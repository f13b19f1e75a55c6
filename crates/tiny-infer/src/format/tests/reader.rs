use super::*;

#[test]
fn reads_back_written_model() {
    let bytes = float_affine_bytes();
    let model = Model::from_bytes(&bytes).unwrap();

    assert_eq!(model.version(), SCHEMA_VERSION);
    assert_eq!(model.description(), "affine");
    assert_eq!(model.tensors().len(), 4);
    assert_eq!(model.nodes().len(), 1);
    assert_eq!(model.inputs(), &[0u32]);
    assert_eq!(model.outputs(), &[3u32]);
    assert_eq!(
        model.operator(&model.nodes()[0]),
        Some(OperatorKind::FullyConnected)
    );
    assert_eq!(model.nodes()[0].activation, Activation::Relu);
}

#[test]
fn header_matches_layout() {
    let bytes = float_affine_bytes();
    let header = ModelHeader::from_bytes(&bytes).unwrap();

    assert_eq!(header.magic, MAGIC_NUMBER);
    assert_eq!(header.version, SCHEMA_VERSION);
    assert_eq!(&bytes[magic_range()], b"TINF");

    let data_start = aligned_data_section_start(header.metadata_size as usize);
    assert_eq!(data_start % DATA_ALIGNMENT, 0);
    assert!(bytes.len() > data_start);
}

#[test]
fn constant_data_is_borrowed_from_buffer() {
    let bytes = float_affine_bytes();
    let model = Model::from_bytes(&bytes).unwrap();

    let weights = model.constant_data(1).unwrap();
    assert_eq!(weights, 2.0f32.to_le_bytes());
    let bias = model.constant_data(2).unwrap();
    assert_eq!(bias, 1.0f32.to_le_bytes());

    let range = bytes.as_ptr_range();
    assert!(range.contains(&weights.as_ptr()));
}

#[test]
fn runtime_tensors_have_no_constant_data() {
    let bytes = float_affine_bytes();
    let model = Model::from_bytes(&bytes).unwrap();

    assert!(model.constant_data(0).is_none());
    assert!(model.constant_data(3).is_none());
    assert!(model.constant_data(99).is_none());
}

#[test]
fn constant_buffers_are_aligned() {
    let mut writer = ModelWriter::new("alignment");
    let fc = writer.add_operator(OperatorKind::FullyConnected);
    let input = writer.add_activation("input", DType::I8, &[1, 3], Some(quant(0.5, 0)));
    let weights = writer.add_constant_i8("weights", &[1, 3], &[1, 2, 3], quant(0.1, 0));
    let bias = writer.add_constant_i32("bias", &[1], &[7], Some(quant(0.05, 0)));
    let output = writer.add_activation("output", DType::I8, &[1, 1], Some(quant(0.5, 0)));
    writer.add_node(fc, &[input, weights, bias], &[output], Activation::None);
    let bytes = writer
        .with_inputs(&[input])
        .with_outputs(&[output])
        .to_bytes()
        .unwrap();

    let model = Model::from_bytes(&bytes).unwrap();
    for tensor in model.tensors().iter().filter(|t| t.is_constant()) {
        let (start, _) = tensor.buffer.unwrap();
        assert_eq!(start as usize % DATA_ALIGNMENT, 0, "{}", tensor.name);
    }
    assert_eq!(model.constant_data(1).unwrap(), &[1u8, 2, 3]);
    assert_eq!(model.constant_data(2).unwrap(), 7i32.to_le_bytes());
}

#[test]
fn operators_are_deduplicated() {
    let mut writer = ModelWriter::new("dedup");
    let first = writer.add_operator(OperatorKind::FullyConnected);
    let second = writer.add_operator(OperatorKind::FullyConnected);

    assert_eq!(first, second);
}

#[test]
fn quantization_parameters_survive() {
    let mut writer = ModelWriter::new("quantized");
    let fc = writer.add_operator(OperatorKind::FullyConnected);
    let input = writer.add_activation("input", DType::I8, &[1, 1], Some(quant(0.0246, -128)));
    let weights = writer.add_constant_i8("weights", &[1, 1], &[64], quant(0.01, 0));
    let output = writer.add_activation("output", DType::I8, &[1, 1], Some(quant(0.0079, 1)));
    writer.add_node(fc, &[input, weights], &[output], Activation::None);
    let bytes = writer
        .with_inputs(&[input])
        .with_outputs(&[output])
        .to_bytes()
        .unwrap();

    let model = Model::from_bytes(&bytes).unwrap();
    assert_eq!(model.tensors()[0].quantization, Some(quant(0.0246, -128)));
    assert_eq!(model.tensors()[2].quantization, Some(quant(0.0079, 1)));
}
