use js_instrument::{instrument_source, RunOutcome, Sandbox, SandboxOptions, TraceSink};
use serde_json::json;

#[test]
fn wall_clock_ceiling_times_the_run_out() {
    let instrumented = instrument_source("while (true) { }").expect("transform");
    let options = SandboxOptions {
        timeout_ms: 200,
        // keep the engine spinning well past the ceiling
        loop_iteration_limit: 300_000_000,
        ..SandboxOptions::default()
    };
    let outcome = Sandbox::new(options).run(&instrumented, &mut TraceSink::discard());
    assert!(matches!(outcome, RunOutcome::TimedOut { timeout_ms: 200, .. }), "got: {outcome:?}");
}

#[test]
fn engine_loop_limit_surfaces_as_a_failure() {
    let instrumented = instrument_source("while (true) { }").expect("transform");
    let options = SandboxOptions {
        timeout_ms: 30_000,
        loop_iteration_limit: 10_000,
        ..SandboxOptions::default()
    };
    let outcome = Sandbox::new(options).run(&instrumented, &mut TraceSink::discard());
    assert!(matches!(outcome, RunOutcome::Failed { .. }), "got: {outcome:?}");
}

#[test]
fn records_survive_a_failing_program() {
    let instrumented = instrument_source("let a = 1;\nmissingFunction();").expect("transform");
    let outcome = Sandbox::new(SandboxOptions::default())
        .run(&instrumented, &mut TraceSink::discard());
    match &outcome {
        RunOutcome::Failed { error, records, .. } => {
            assert!(!error.is_empty());
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].name, "a");
            assert_eq!(records[0].value, Some(json!(1)));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn uncaught_errors_carry_their_detail() {
    let instrumented = instrument_source("throw new Error(\"boom\");").expect("transform");
    let outcome = Sandbox::new(SandboxOptions::default())
        .run(&instrumented, &mut TraceSink::discard());
    match outcome {
        RunOutcome::Failed { error, .. } => assert!(error.contains("boom"), "got: {error}"),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn sink_is_flushed_before_the_failure_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("observations.jsonl");
    let instrumented = instrument_source("let a = 1;\nmissingFunction();").expect("transform");
    let mut sink = TraceSink::to_path(&path, false).expect("sink");
    let outcome = Sandbox::new(SandboxOptions::default()).run(&instrumented, &mut sink);
    assert!(matches!(outcome, RunOutcome::Failed { .. }));
    let text = std::fs::read_to_string(&path).expect("stream");
    assert_eq!(text.lines().count(), 1);
}
