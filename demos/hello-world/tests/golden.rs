//! Predictions of the embedded models, replayed by the export script.

use hello_world::{HELLO_WORLD_FLOAT, HELLO_WORLD_INT8, INPUT, run};
use rstest::rstest;
use tiny_infer::{
    ArenaError, InferenceError, InterpreterError, RoundingMode, RunnerConfig, SCHEMA_VERSION,
    TENSOR_ARENA_SIZE, TensorArena, run_inference, run_inference_with,
};

fn predict(model: &[u8], input: f32, config: &RunnerConfig) -> Result<f32, InferenceError> {
    let mut arena = TensorArena::<TENSOR_ARENA_SIZE>::new();
    run_inference_with(model, input, arena.as_mut_slice(), config)
}

// The only test going through the static arena.
#[test]
fn program_output_and_exit_status() {
    let output = run_inference(&HELLO_WORLD_INT8, INPUT).unwrap();
    assert!((output - 0.484_879_52).abs() < 1e-6, "got {output}");
    assert!((output - INPUT.sin()).abs() < 0.05);

    let (mut out, mut err) = (Vec::new(), Vec::new());
    assert_eq!(run(&HELLO_WORLD_INT8, &mut out, &mut err).unwrap(), 0);
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "Hello World Test\nPredicted output for 0.50 is 0.4849\n"
    );
    assert!(err.is_empty());

    let mut corrupted = HELLO_WORLD_INT8.to_vec();
    corrupted[0] = b'X';
    let (mut out, mut err) = (Vec::new(), Vec::new());
    assert_eq!(run(&corrupted, &mut out, &mut err).unwrap(), 1);
    assert_eq!(String::from_utf8(out).unwrap(), "Hello World Test\n");
    assert!(
        String::from_utf8(err)
            .unwrap()
            .starts_with("Inference failed: invalid model")
    );
}

#[rstest]
#[case(0.0, 0.0)]
#[case(1.0, 0.858_475_2)]
#[case(1.57, 1.001_554_5)]
#[case(3.0, 0.127_181_52)]
#[case(4.5, -0.977_707_9)]
#[case(6.0, -0.174_874_59)]
// Quantized inputs saturate at the ends of the int8 range.
#[case::below_range(-1.0, 0.0)]
#[case::above_range(7.0, 0.063_590_76)]
#[case::far_above_range(100.0, 0.063_590_76)]
fn int8_golden(#[case] input: f32, #[case] expected: f32) {
    let output = predict(&HELLO_WORLD_INT8, input, &RunnerConfig::default()).unwrap();

    assert!((output - expected).abs() < 1e-6, "{input} gave {output}");
}

#[rstest]
#[case(0.0, 0.008_187_741)]
#[case(0.5, 0.483_364_97)]
#[case(1.0, 0.852_482_3)]
#[case(1.57, 0.999_140_4)]
#[case(3.0, 0.134_156_79)]
#[case(4.5, -0.960_035_6)]
#[case(6.0, -0.265_491_5)]
fn float_golden(#[case] input: f32, #[case] expected: f32) {
    let output = predict(&HELLO_WORLD_FLOAT, input, &RunnerConfig::default()).unwrap();

    assert!((output - expected).abs() < 1e-5, "{input} gave {output}");
}

#[test]
fn truncating_input_quantization() {
    let config = RunnerConfig::new().with_rounding(RoundingMode::Truncate);

    // 0.5 lands on -107 instead of -108.
    let output = predict(&HELLO_WORLD_INT8, INPUT, &config).unwrap();
    assert!((output - 0.500_777_24).abs() < 1e-6, "got {output}");
}

#[test]
fn quantized_model_tracks_float_model() {
    let config = RunnerConfig::default();
    let int8 = predict(&HELLO_WORLD_INT8, INPUT, &config).unwrap();
    let float = predict(&HELLO_WORLD_FLOAT, INPUT, &config).unwrap();

    assert!((int8 - float).abs() < 0.01);
}

#[test]
fn undersized_arena() {
    let mut arena = TensorArena::<256>::new();

    let result = run_inference_with(
        &HELLO_WORLD_INT8,
        INPUT,
        arena.as_mut_slice(),
        &RunnerConfig::default(),
    );

    assert!(matches!(
        result,
        Err(InferenceError::AllocationFailed(InterpreterError::Arena(
            ArenaError::OutOfMemory { .. }
        )))
    ));
}

#[test]
fn other_schema_version() {
    let mut model = HELLO_WORLD_INT8.to_vec();
    model[4..6].copy_from_slice(&(SCHEMA_VERSION + 1).to_le_bytes());

    assert_eq!(
        predict(&model, INPUT, &RunnerConfig::default()),
        Err(InferenceError::SchemaMismatch {
            found: SCHEMA_VERSION + 1,
            expected: SCHEMA_VERSION
        })
    );
}
