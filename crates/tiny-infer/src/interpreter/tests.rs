use super::*;
use crate::arena::TensorArena;
use crate::format::{Activation, DType, ModelWriter};
use crate::resolver::OpResolver;
use alloc::vec::Vec;

/// `y = W2 · relu(W1 · x + b1)` with `x` of two elements.
fn two_layer_model() -> Vec<u8> {
    let mut writer = ModelWriter::new("two layers");
    let fc = writer.add_operator(OperatorKind::FullyConnected);
    let input = writer.add_activation("x", DType::F32, &[1, 2], None);
    let w1 = writer.add_constant_f32("w1", &[2, 2], &[1.0, -1.0, 0.5, 2.0]);
    let b1 = writer.add_constant_f32("b1", &[2], &[0.0, 1.0]);
    let hidden = writer.add_activation("h", DType::F32, &[1, 2], None);
    let w2 = writer.add_constant_f32("w2", &[1, 2], &[1.0, 1.0]);
    let output = writer.add_activation("y", DType::F32, &[1, 1], None);
    writer.add_node(fc, &[input, w1, b1], &[hidden], Activation::Relu);
    writer.add_node(fc, &[hidden, w2], &[output], Activation::None);

    writer
        .with_inputs(&[input])
        .with_outputs(&[output])
        .to_bytes()
        .unwrap()
}

fn resolver() -> OpResolver<1> {
    let mut resolver = OpResolver::new();
    resolver.add_fully_connected().unwrap();
    resolver
}

fn predict(interpreter: &mut Interpreter<'_, OpResolver<1>>, x: [f32; 2]) -> f32 {
    interpreter
        .input_mut(0)
        .unwrap()
        .as_f32_mut()
        .unwrap()
        .copy_from_slice(&x);
    interpreter.invoke().unwrap();

    let output: Vec<f32> = interpreter.output(0).unwrap().f32_values().unwrap().collect();
    output[0]
}

#[test]
fn runs_nodes_in_order() {
    let bytes = two_layer_model();
    let model = Model::from_bytes(&bytes).unwrap();
    let resolver = resolver();
    let mut arena = TensorArena::<1024>::new();
    let mut interpreter = Interpreter::new(&model, &resolver, arena.as_mut_slice());

    interpreter.allocate_tensors().unwrap();

    // h = relu([2, 4.5]), y = 6.5
    assert_eq!(predict(&mut interpreter, [3.0, 1.0]), 6.5);
    // h = relu([-3, 4.5]), y = 4.5
    assert_eq!(predict(&mut interpreter, [-1.0, 2.0]), 4.5);
}

#[test]
fn graph_io_counts() {
    let bytes = two_layer_model();
    let model = Model::from_bytes(&bytes).unwrap();
    let resolver = resolver();
    let mut arena = TensorArena::<1024>::new();
    let interpreter = Interpreter::new(&model, &resolver, arena.as_mut_slice());

    assert_eq!(interpreter.inputs_len(), 1);
    assert_eq!(interpreter.outputs_len(), 1);
}

#[test]
fn access_before_allocation_fails() {
    let bytes = two_layer_model();
    let model = Model::from_bytes(&bytes).unwrap();
    let resolver = resolver();
    let mut arena = TensorArena::<1024>::new();
    let mut interpreter = Interpreter::new(&model, &resolver, arena.as_mut_slice());

    assert_eq!(interpreter.invoke(), Err(InterpreterError::TensorsNotAllocated));
    assert!(matches!(
        interpreter.input(0),
        Err(InterpreterError::TensorsNotAllocated)
    ));
    assert!(matches!(
        interpreter.output(0),
        Err(InterpreterError::TensorsNotAllocated)
    ));
    assert_eq!(interpreter.arena_used_bytes(), 0);
}

#[test]
fn unregistered_operator() {
    let bytes = two_layer_model();
    let model = Model::from_bytes(&bytes).unwrap();
    let resolver = OpResolver::<1>::new();
    let mut arena = TensorArena::<1024>::new();
    let mut interpreter = Interpreter::new(&model, &resolver, arena.as_mut_slice());

    assert_eq!(
        interpreter.allocate_tensors(),
        Err(InterpreterError::UnresolvedOperator {
            node: 0,
            kind: OperatorKind::FullyConnected
        })
    );
    assert_eq!(interpreter.invoke(), Err(InterpreterError::TensorsNotAllocated));
}

#[test]
fn undersized_arena() {
    let bytes = two_layer_model();
    let model = Model::from_bytes(&bytes).unwrap();
    let resolver = resolver();
    let mut arena = TensorArena::<128>::new();
    let mut interpreter = Interpreter::new(&model, &resolver, arena.as_mut_slice());

    assert!(matches!(
        interpreter.allocate_tensors(),
        Err(InterpreterError::Arena(ArenaError::OutOfMemory { .. }))
    ));
}

#[test]
fn reallocation_reuses_the_arena() {
    let bytes = two_layer_model();
    let model = Model::from_bytes(&bytes).unwrap();
    let resolver = resolver();
    let mut arena = TensorArena::<1024>::new();
    let mut interpreter = Interpreter::new(&model, &resolver, arena.as_mut_slice());

    interpreter.allocate_tensors().unwrap();
    let used = interpreter.arena_used_bytes();
    assert!(used > 0 && used <= 1024);

    interpreter.allocate_tensors().unwrap();
    assert_eq!(interpreter.arena_used_bytes(), used);
    assert_eq!(predict(&mut interpreter, [3.0, 1.0]), 6.5);
}

#[test]
fn graph_index_out_of_range() {
    let bytes = two_layer_model();
    let model = Model::from_bytes(&bytes).unwrap();
    let resolver = resolver();
    let mut arena = TensorArena::<1024>::new();
    let mut interpreter = Interpreter::new(&model, &resolver, arena.as_mut_slice());
    interpreter.allocate_tensors().unwrap();

    assert!(matches!(
        interpreter.input(1),
        Err(InterpreterError::TensorIndexOutOfRange { index: 1, count: 1 })
    ));
    assert!(matches!(
        interpreter.output(3),
        Err(InterpreterError::TensorIndexOutOfRange { index: 3, count: 1 })
    ));
}

#[test]
fn kernel_errors_name_the_node() {
    let mut writer = ModelWriter::new("bad second node");
    let fc = writer.add_operator(OperatorKind::FullyConnected);
    let input = writer.add_activation("x", DType::F32, &[1, 2], None);
    let w1 = writer.add_constant_f32("w1", &[1, 2], &[1.0, 1.0]);
    let hidden = writer.add_activation("h", DType::F32, &[1, 1], None);
    let w2 = writer.add_constant_f32("w2", &[1, 3], &[1.0, 1.0, 1.0]);
    let output = writer.add_activation("y", DType::F32, &[1, 1], None);
    writer.add_node(fc, &[input, w1], &[hidden], Activation::None);
    writer.add_node(fc, &[hidden, w2], &[output], Activation::None);
    let bytes = writer
        .with_inputs(&[input])
        .with_outputs(&[output])
        .to_bytes()
        .unwrap();

    let model = Model::from_bytes(&bytes).unwrap();
    let resolver = resolver();
    let mut arena = TensorArena::<1024>::new();
    let mut interpreter = Interpreter::new(&model, &resolver, arena.as_mut_slice());

    assert!(matches!(
        interpreter.allocate_tensors(),
        Err(InterpreterError::Kernel {
            node: 1,
            source: KernelError::ShapeMismatch { tensor: 2, .. }
        })
    ));
}
