use js_instrument::{
    instrument_source, RunOutcome, Sandbox, SandboxOptions, TraceRecord, TraceSink,
};
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

fn all<'a>(records: &'a [TraceRecord], name: &str) -> Vec<&'a TraceRecord> {
    records.iter().filter(|record| record.name == name).collect()
}

#[test]
fn destructuring_fidelity() {
    let outcome = run_program("const [a, , ...b] = [1, 2, 3, 4];\nconst sum = a + b[1];");
    let records = completed(&outcome);
    assert_eq!(records[0].name, "[a, , ...b]");
    assert_eq!(records[0].value, Some(json!([1, 2, 3, 4])));
    assert_eq!(find(records, "a").value, Some(json!(1)));
    assert_eq!(find(records, "b").value, Some(json!([3, 4])));
    assert_eq!(find(records, "sum").value, Some(json!(5)));
    // holder + a + b + sum, nothing for the hole
    assert_eq!(records.len(), 4);
}

#[test]
fn postfix_update_records_post_value_but_yields_pre_value() {
    let outcome = run_program("let x = 5;\nconst r = x++;");
    let records = completed(&outcome);
    let xs = all(records, "x");
    assert_eq!(xs.len(), 2);
    assert_eq!(xs[0].value, Some(json!(5)));
    assert_eq!(xs[1].value, Some(json!(6)), "the record reflects the assigned value");
    assert_eq!(find(records, "r").value, Some(json!(5)), "the expression yields the pre-value");
}

#[test]
fn prefix_update_records_and_yields_post_value() {
    let outcome = run_program("let x = 5;\nconst r = ++x;");
    let records = completed(&outcome);
    assert_eq!(all(records, "x")[1].value, Some(json!(6)));
    assert_eq!(find(records, "r").value, Some(json!(6)));
}

#[test]
fn update_target_object_is_evaluated_once() {
    let outcome = run_program(
        r#"
let calls = 0;
const backing = { count: 10 };
function target() { calls = calls + 1; return backing; }
target().count++;
const seen = calls;
"#,
    );
    let records = completed(&outcome);
    assert_eq!(find(records, "seen").value, Some(json!(1)));
    assert_eq!(find(records, "target().count").value, Some(json!(11)));
}

#[test]
fn postfix_member_update_invokes_a_getter_once() {
    let outcome = run_program(
        r#"
let reads = 0;
const cell = { _v: 1 };
Object.defineProperty(cell, "v", {
  get: function () { reads = reads + 1; return this._v; },
  set: function (next) { this._v = next; }
});
cell.v++;
const seen = reads;
const after = cell._v;
"#,
    );
    let records = completed(&outcome);
    assert_eq!(find(records, "seen").value, Some(json!(1)));
    assert_eq!(find(records, "cell.v").value, Some(json!(2)));
    assert_eq!(find(records, "after").value, Some(json!(2)));
}

#[test]
fn prefix_member_update_invokes_a_getter_once() {
    let outcome = run_program(
        r#"
let reads = 0;
const cell = { _v: 1 };
Object.defineProperty(cell, "v", {
  get: function () { reads = reads + 1; return this._v; },
  set: function (next) { this._v = next; }
});
++cell.v;
const seen = reads;
"#,
    );
    let records = completed(&outcome);
    assert_eq!(find(records, "seen").value, Some(json!(1)));
}

#[test]
fn assignment_expression_value_is_preserved() {
    let outcome = run_program("let x;\nconst r = (x = 7);");
    let records = completed(&outcome);
    assert_eq!(find(records, "x").value, Some(json!(7)));
    assert_eq!(find(records, "r").value, Some(json!(7)));
}

#[test]
fn destructuring_assignment_value_is_preserved() {
    let outcome = run_program("let a, b;\nconst r = ([a, b] = [1, 2]);\nconst len = r.length;");
    let records = completed(&outcome);
    assert_eq!(find(records, "a").value, Some(json!(1)));
    assert_eq!(find(records, "b").value, Some(json!(2)));
    assert_eq!(find(records, "r").value, Some(json!([1, 2])));
    assert_eq!(find(records, "len").value, Some(json!(2)));
}

#[test]
fn object_rest_reports_the_whole_source_object() {
    // deliberate deviation from exact rest semantics; see DESIGN.md
    let outcome = run_program("const { head, ...tail } = { head: 1, x: 2 };");
    let records = completed(&outcome);
    assert_eq!(find(records, "head").value, Some(json!(1)));
    assert_eq!(find(records, "tail").value, Some(json!({"head": 1, "x": 2})));
}

#[test]
fn defaults_apply_to_null_and_missing_values() {
    let outcome = run_program("const { z = 9 } = { z: null };\nconst { m = 4 } = {};");
    let records = completed(&outcome);
    assert_eq!(find(records, "z").value, Some(json!(9)));
    assert_eq!(find(records, "m").value, Some(json!(4)));
}

#[test]
fn records_arrive_in_program_order() {
    let outcome = run_program("let a = 1;\nlet b = 2;\na = b + 1;\nb--;");
    let records = completed(&outcome);
    let names: Vec<&str> = records.iter().map(|record| record.name.as_str()).collect();
    assert_eq!(names, ["a", "b", "a", "b"]);
    let values: Vec<_> = records.iter().map(|record| record.value.clone()).collect();
    assert_eq!(values, [Some(json!(1)), Some(json!(2)), Some(json!(3)), Some(json!(1))]);
}

#[test]
fn functions_project_to_a_descriptive_placeholder() {
    let outcome = run_program("function g() { return 1; }\nconst h = g;");
    let records = completed(&outcome);
    assert_eq!(find(records, "h").value, Some(json!("[Function: g]")));
}

#[test]
fn undefined_projects_to_an_absent_value() {
    let outcome = run_program("let u = undefined;");
    let records = completed(&outcome);
    assert_eq!(find(records, "u").value, None);
}

#[test]
fn primitive_projections() {
    let outcome = run_program(
        "const s = \"hi\";\nconst big = 5n;\nconst nan = 0 / 0;\nconst flag = true;\nconst nil = null;",
    );
    let records = completed(&outcome);
    assert_eq!(find(records, "s").value, Some(json!("hi")));
    assert_eq!(find(records, "big").value, Some(json!("5")));
    assert_eq!(find(records, "nan").value, Some(json!(null)));
    assert_eq!(find(records, "flag").value, Some(json!(true)));
    assert_eq!(find(records, "nil").value, Some(json!(null)));
}

#[test]
fn cyclic_objects_fall_back_to_string_conversion() {
    let outcome = run_program("const node = { name: \"n\" };\nnode.self = node;\nconst copy = node;");
    let records = completed(&outcome);
    let copy = find(records, "copy").value.clone().expect("projected");
    assert!(copy.is_string(), "cycle falls back to a string: {copy:?}");
}

#[test]
fn completion_value_is_projected() {
    let outcome = run_program("const x = 1;\nx + 1");
    match outcome {
        RunOutcome::Completed { result, .. } => assert_eq!(result, Some(json!(2))),
        other => panic!("expected completion, got {other:?}"),
    }
}

#[test]
fn observations_stream_into_the_sink_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("observations.jsonl");
    let instrumented = instrument_source("let a = 1;\na++;").expect("transform");
    let mut sink = TraceSink::to_path(&path, false).expect("sink");
    let outcome = Sandbox::new(SandboxOptions::default()).run(&instrumented, &mut sink);
    assert!(outcome.is_completed());

    let text = std::fs::read_to_string(&path).expect("stream");
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).expect("record json"))
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["name"], "a");
    assert_eq!(lines[0]["value"], json!(1));
    assert_eq!(lines[1]["value"], json!(2));
}

#[test]
fn browser_stand_ins_exist_and_are_callable() {
    let outcome = run_program(
        r#"
const el = document.createElement("div");
const tag = el.tagName;
const missing = document.getElementById("nope");
const agent = navigator.userAgent;
const here = location.href;
const timer = setTimeout(function () {}, 10);
"#,
    );
    let records = completed(&outcome);
    assert_eq!(find(records, "tag").value, Some(json!("div")));
    assert_eq!(find(records, "missing").value, Some(json!(null)));
    assert!(find(records, "agent").value.is_some());
    assert_eq!(find(records, "here").value, Some(json!("http://localhost/")));
    assert_eq!(find(records, "timer").value, Some(json!(0)));
}
