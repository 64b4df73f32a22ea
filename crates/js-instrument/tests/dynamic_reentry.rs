use js_instrument::{instrument_source, RunOutcome, Sandbox, SandboxOptions, TraceRecord, TraceSink};
use serde_json::json;

fn run_program(source: &str) -> RunOutcome {
    let instrumented = instrument_source(source).expect("transform");
    let options = SandboxOptions {
        timeout_ms: 10_000,
        ..SandboxOptions::default()
    };
    Sandbox::new(options).run(&instrumented, &mut TraceSink::discard())
}

fn completed(outcome: &RunOutcome) -> &[TraceRecord] {
    assert!(outcome.is_completed(), "run did not complete: {outcome:?}");
    outcome.records()
}

fn find<'a>(records: &'a [TraceRecord], name: &str) -> &'a TraceRecord {
    records
        .iter()
        .find(|record| record.name == name)
        .unwrap_or_else(|| panic!("no record named {name:?} in {records:?}"))
}

#[test]
fn evaluated_source_is_reinstrumented() {
    let outcome = run_program("eval(\"let y = 1;\");\nconst z = 2;");
    let records = completed(&outcome);
    assert_eq!(find(records, "y").value, Some(json!(1)), "runtime-introduced binding is traced");
    assert_eq!(find(records, "z").value, Some(json!(2)));
}

#[test]
fn eval_preserves_the_completion_value() {
    let outcome = run_program("const v = eval(\"1 + 1\");");
    let records = completed(&outcome);
    assert_eq!(find(records, "v").value, Some(json!(2)));
}

#[test]
fn eval_passes_non_strings_through() {
    let outcome = run_program("const n = eval(42);");
    let records = completed(&outcome);
    assert_eq!(find(records, "n").value, Some(json!(42)));
}

#[test]
fn unparseable_eval_source_does_not_abort_the_host_program() {
    let outcome = run_program(
        r#"
let before = 1;
let threw = false;
try { eval("] this is not js ["); } catch (error) { threw = true; }
const after = 2;
"#,
    );
    let records = completed(&outcome);
    assert_eq!(find(records, "before").value, Some(json!(1)));
    assert_eq!(find(records, "after").value, Some(json!(2)));
    let threw: Vec<_> = records.iter().filter(|record| record.name == "threw").collect();
    assert_eq!(threw.last().and_then(|record| record.value.clone()), Some(json!(true)));
}

#[test]
fn constructed_function_bodies_are_instrumented() {
    let outcome = run_program(
        "const make = Function(\"let inner = 42; return inner;\");\nconst out = make();",
    );
    let records = completed(&outcome);
    assert_eq!(find(records, "inner").value, Some(json!(42)), "constructor body is traced");
    assert_eq!(find(records, "out").value, Some(json!(42)));
}

#[test]
fn constructed_functions_accept_parameters() {
    let outcome = run_program(
        "const add = Function(\"a\", \"b\", \"let total = a + b; return total;\");\nconst out = add(2, 3);",
    );
    let records = completed(&outcome);
    assert_eq!(find(records, "total").value, Some(json!(5)));
    assert_eq!(find(records, "out").value, Some(json!(5)));
}

#[test]
fn nested_dynamic_introduction_is_traced_at_every_level() {
    let outcome = run_program("eval(\"eval('let deep = 3;')\");");
    let records = completed(&outcome);
    assert_eq!(find(records, "deep").value, Some(json!(3)));
}
