//! Isolated execution of instrumented programs.
//!
//! One `boa_engine::Context` per run, populated with stand-in globals, the
//! observation hook, and wrapped dynamic code entry points (`eval`, the
//! `Function` constructor) that route source text through the transform
//! capability before executing it in the same context. The program runs on
//! a dedicated thread; the host drains an event channel under the
//! wall-clock ceiling, so observations arrive in hook-invocation order and
//! survive failures and timeouts.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use boa_engine::object::builtins::{JsArray, JsFunction};
use boa_engine::object::{FunctionObjectBuilder, ObjectInitializer};
use boa_engine::property::Attribute;
use boa_engine::value::JsVariant;
use boa_engine::vm::RuntimeLimits;
use boa_engine::{Context, JsArgs, JsString, JsValue, NativeFunction, Source};

use crate::trace::TraceSink;
use crate::transform::{self, TransformError, HOOK_NAME};
use crate::types::{RunOutcome, SandboxOptions, TraceRecord};

/// Recursive instrumentation capability handed to the wrapped dynamic code
/// entry points. Code admitted at runtime passes through the same
/// transformation as code admitted at load time.
pub type TransformFn = Arc<dyn Fn(&str) -> Result<String, TransformError> + Send + Sync>;

enum Event {
    Observation(TraceRecord),
    Finished(Result<Option<serde_json::Value>, String>),
}

pub struct Sandbox {
    options: SandboxOptions,
    transform: TransformFn,
}

impl Sandbox {
    pub fn new(options: SandboxOptions) -> Self {
        let transform: TransformFn = Arc::new(transform::instrument_source);
        Self { options, transform }
    }

    /// Substitutes the transform capability used for dynamically introduced
    /// code.
    pub fn with_transform(options: SandboxOptions, transform: TransformFn) -> Self {
        Self { options, transform }
    }

    /// Executes one already-instrumented program, streaming every
    /// observation into `sink`. Consumes the host: a sandbox instance
    /// executes exactly one top-level program. The sink is flushed and
    /// closed on every exit path.
    pub fn run(self, source: &str, sink: &mut TraceSink) -> RunOutcome {
        let timeout_ms = self.options.timeout_ms;
        let deadline = Duration::from_millis(timeout_ms);
        let (events_tx, events_rx) = mpsc::channel::<Event>();
        let source = source.to_string();
        let options = self.options;
        let transform = self.transform;
        let started = Instant::now();

        std::thread::spawn(move || {
            let result = execute(&source, &options, transform, &events_tx);
            let _ = events_tx.send(Event::Finished(result));
        });

        let mut records: Vec<TraceRecord> = Vec::new();
        loop {
            let elapsed = started.elapsed();
            if elapsed >= deadline {
                sink.close();
                return RunOutcome::TimedOut { timeout_ms, records };
            }
            match events_rx.recv_timeout(deadline - elapsed) {
                Ok(Event::Observation(record)) => {
                    sink.record(&record);
                    records.push(record);
                }
                Ok(Event::Finished(Ok(result))) => {
                    sink.close();
                    return RunOutcome::Completed {
                        result,
                        records,
                        elapsed_ms: started.elapsed().as_millis(),
                    };
                }
                Ok(Event::Finished(Err(error))) => {
                    sink.close();
                    return RunOutcome::Failed {
                        error,
                        records,
                        elapsed_ms: started.elapsed().as_millis(),
                    };
                }
                Err(RecvTimeoutError::Timeout) => {
                    sink.close();
                    return RunOutcome::TimedOut { timeout_ms, records };
                }
                Err(RecvTimeoutError::Disconnected) => {
                    sink.close();
                    return RunOutcome::Failed {
                        error: "execution thread terminated without reporting".to_string(),
                        records,
                        elapsed_ms: started.elapsed().as_millis(),
                    };
                }
            }
        }
    }
}

fn execute(
    source: &str,
    options: &SandboxOptions,
    transform: TransformFn,
    events: &Sender<Event>,
) -> Result<Option<serde_json::Value>, String> {
    let mut context = Context::default();
    let mut limits = RuntimeLimits::default();
    limits.set_loop_iteration_limit(options.loop_iteration_limit);
    limits.set_recursion_limit(options.recursion_limit);
    limits.set_stack_size_limit(options.stack_size_limit);
    context.set_runtime_limits(limits);

    // Captured before the program runs, so later clobbering of the global
    // JSON object cannot reach the hook's projection path.
    let stringify = pristine_stringify(&mut context);

    register_report_hook(&mut context, events.clone(), stringify.clone());
    register_console(&mut context);
    register_timers(&mut context);
    register_browser_stubs(&mut context);
    register_dynamic_entry_points(&mut context, transform);

    match context.eval(Source::from_bytes(source.as_bytes())) {
        Ok(value) => Ok(project_value(&value, stringify.as_ref(), &mut context)),
        Err(error) => Err(error.to_string()),
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

fn pristine_stringify(context: &mut Context) -> Option<JsFunction> {
    let json = context
        .global_object()
        .get(JsString::from("JSON"), context)
        .ok()?;
    let stringify = json.as_object()?.get(JsString::from("stringify"), context).ok()?;
    let object = stringify.as_object()?.clone();
    JsFunction::from_object(object)
}

/// The pass-through hook: returns its second argument unchanged and emits a
/// record. Nothing in here may throw into the traced program.
fn register_report_hook(context: &mut Context, events: Sender<Event>, stringify: Option<JsFunction>) {
    let hook = unsafe {
        NativeFunction::from_closure(move |_this, args, ctx| {
            let value = args.get_or_undefined(1).clone();
            let name = match args.get_or_undefined(0).to_string(ctx) {
                Ok(name) => name.to_std_string_lossy(),
                Err(_) => "<unnamed>".to_string(),
            };
            let record = TraceRecord {
                ts: unix_millis(),
                name,
                value: project_value(&value, stringify.as_ref(), ctx),
            };
            let _ = events.send(Event::Observation(record));
            Ok(value)
        })
    };
    let _ = context.register_global_builtin_callable(JsString::from(HOOK_NAME), 2, hook);
}

/// JSON-safe projection of a runtime value. Total: every failure falls
/// through to a coarser representation.
fn project_value(
    value: &JsValue,
    stringify: Option<&JsFunction>,
    context: &mut Context,
) -> Option<serde_json::Value> {
    match value.variant() {
        JsVariant::Undefined => None,
        JsVariant::Null => Some(serde_json::Value::Null),
        JsVariant::Boolean(flag) => Some(serde_json::Value::Bool(flag)),
        JsVariant::Integer32(number) => Some(serde_json::Value::from(number)),
        JsVariant::Float64(number) => Some(
            serde_json::Number::from_f64(number)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
        ),
        JsVariant::BigInt(big) => Some(serde_json::Value::String(big.to_string())),
        JsVariant::String(_) => value
            .as_string()
            .map(|text| serde_json::Value::String(text.to_std_string_lossy())),
        JsVariant::Symbol(_) => Some(serde_json::Value::String("[symbol]".to_string())),
        JsVariant::Object(_) => Some(project_object(value, stringify, context)),
    }
}

fn project_object(
    value: &JsValue,
    stringify: Option<&JsFunction>,
    context: &mut Context,
) -> serde_json::Value {
    if value.is_callable() {
        let name = value
            .as_object()
            .and_then(|object| object.get(JsString::from("name"), context).ok())
            .and_then(|name| name.as_string().map(|text| text.to_std_string_lossy()))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "anonymous".to_string());
        return serde_json::Value::String(format!("[Function: {}]", name));
    }
    // structural copy through the engine's own serializer, so toJSON
    // methods participate; cycles and throwing getters fall through
    if let Some(stringify) = stringify {
        if let Ok(text) = stringify.call(&JsValue::undefined(), &[value.clone()], context) {
            if let Some(text) = text.as_string() {
                if let Ok(json) =
                    serde_json::from_str::<serde_json::Value>(&text.to_std_string_lossy())
                {
                    return json;
                }
            }
        }
    }
    match value.to_string(context) {
        Ok(text) => serde_json::Value::String(text.to_std_string_lossy()),
        Err(_) => serde_json::Value::String("[object]".to_string()),
    }
}

fn display_value(value: &JsValue, context: &mut Context) -> String {
    if let Some(text) = value.as_string() {
        return text.to_std_string_lossy();
    }
    match value.to_string(context) {
        Ok(text) => text.to_std_string_lossy(),
        Err(_) => "[unprintable]".to_string(),
    }
}

#[derive(Clone, Copy)]
enum LogStream {
    Out,
    Err,
}

fn register_console(context: &mut Context) {
    let printer = |stream: LogStream| unsafe {
        NativeFunction::from_closure(move |_this, args, ctx| {
            let parts: Vec<String> = args.iter().map(|arg| display_value(arg, ctx)).collect();
            match stream {
                LogStream::Out => println!("{}", parts.join(" ")),
                LogStream::Err => eprintln!("{}", parts.join(" ")),
            }
            Ok(JsValue::undefined())
        })
    };
    let console = ObjectInitializer::new(context)
        .function(printer(LogStream::Out), JsString::from("log"), 1)
        .function(printer(LogStream::Out), JsString::from("info"), 1)
        .function(printer(LogStream::Out), JsString::from("debug"), 1)
        .function(printer(LogStream::Err), JsString::from("warn"), 1)
        .function(printer(LogStream::Err), JsString::from("error"), 1)
        .build();
    let _ = context.register_global_property(JsString::from("console"), console, Attribute::all());
}

/// Timer stand-ins exist to be callable; they never fire their callbacks.
fn register_timers(context: &mut Context) {
    for name in ["setTimeout", "setInterval", "clearTimeout", "clearInterval"] {
        let inert = NativeFunction::from_fn_ptr(|_this, _args, _ctx| Ok(JsValue::from(0)));
        let _ = context.register_global_builtin_callable(JsString::from(name), 1, inert);
    }
}

/// Minimal browser-like surface so programs referencing `document`,
/// `location`, `navigator` or `window` do not fail on first touch.
fn register_browser_stubs(context: &mut Context) {
    let noop = || NativeFunction::from_fn_ptr(|_this, _args, _ctx| Ok(JsValue::undefined()));
    let null_result = || NativeFunction::from_fn_ptr(|_this, _args, _ctx| Ok(JsValue::null()));

    let location = ObjectInitializer::new(context)
        .property(
            JsString::from("href"),
            JsString::from("http://localhost/"),
            Attribute::all(),
        )
        .function(noop(), JsString::from("assign"), 1)
        .function(noop(), JsString::from("replace"), 1)
        .function(noop(), JsString::from("reload"), 0)
        .build();
    let _ = context.register_global_property(
        JsString::from("location"),
        location.clone(),
        Attribute::all(),
    );

    let create_element = unsafe {
        NativeFunction::from_closure(move |_this, args, ctx| {
            let tag = match args.get_or_undefined(0).to_string(ctx) {
                Ok(tag) => tag.to_std_string_lossy(),
                Err(_) => String::new(),
            };
            let element = ObjectInitializer::new(ctx)
                .property(
                    JsString::from("tagName"),
                    JsString::from(tag.as_str()),
                    Attribute::all(),
                )
                .property(JsString::from("innerHTML"), JsString::from(""), Attribute::all())
                .property(JsString::from("src"), JsString::from(""), Attribute::all())
                .property(JsString::from("href"), JsString::from(""), Attribute::all())
                .function(
                    NativeFunction::from_fn_ptr(|_this, _args, _ctx| Ok(JsValue::undefined())),
                    JsString::from("setAttribute"),
                    2,
                )
                .function(
                    NativeFunction::from_fn_ptr(|_this, _args, _ctx| Ok(JsValue::undefined())),
                    JsString::from("appendChild"),
                    1,
                )
                .build();
            Ok(element.into())
        })
    };
    let query_all = unsafe {
        NativeFunction::from_closure(move |_this, _args, ctx| Ok(JsArray::new(ctx).into()))
    };

    let body = ObjectInitializer::new(context)
        .function(noop(), JsString::from("appendChild"), 1)
        .function(noop(), JsString::from("removeChild"), 1)
        .build();
    let head = ObjectInitializer::new(context)
        .function(noop(), JsString::from("appendChild"), 1)
        .function(noop(), JsString::from("removeChild"), 1)
        .build();
    let document = ObjectInitializer::new(context)
        .function(create_element, JsString::from("createElement"), 1)
        .function(null_result(), JsString::from("querySelector"), 1)
        .function(query_all, JsString::from("querySelectorAll"), 1)
        .function(null_result(), JsString::from("getElementById"), 1)
        .function(noop(), JsString::from("addEventListener"), 2)
        .function(noop(), JsString::from("removeEventListener"), 2)
        .property(JsString::from("body"), body, Attribute::all())
        .property(JsString::from("head"), head, Attribute::all())
        .property(JsString::from("location"), location, Attribute::all())
        .build();
    let _ = context.register_global_property(JsString::from("document"), document, Attribute::all());

    let navigator = ObjectInitializer::new(context)
        .property(
            JsString::from("userAgent"),
            JsString::from("vartrace-sandbox"),
            Attribute::all(),
        )
        .build();
    let _ =
        context.register_global_property(JsString::from("navigator"), navigator, Attribute::all());

    let window = context.global_object();
    let _ = context.register_global_property(JsString::from("window"), window, Attribute::all());
}

/// Wraps the two dynamic code entry points. Source text is instrumented
/// through the injected capability before it runs in the same context; a
/// transform failure falls back to the original text so a parse edge case
/// never aborts the host program. Runtime errors raised by the admitted
/// code propagate to the caller as usual.
fn register_dynamic_entry_points(context: &mut Context, transform: TransformFn) {
    let eval_transform = transform.clone();
    let eval_fn = unsafe {
        NativeFunction::from_closure(move |_this, args, ctx| {
            let code = args.get_or_undefined(0);
            // eval on a non-string returns the argument untouched
            let Some(text) = code.as_string().map(|code| code.to_std_string_lossy()) else {
                return Ok(code.clone());
            };
            let body = match eval_transform(&text) {
                Ok(instrumented) => instrumented,
                Err(error) => {
                    tracing::debug!(%error, "evaluated source left uninstrumented");
                    text
                }
            };
            ctx.eval(Source::from_bytes(body.as_bytes()))
        })
    };
    let _ = context.register_global_builtin_callable(JsString::from("eval"), 1, eval_fn);

    let function_fn = unsafe {
        NativeFunction::from_closure(move |_this, args, ctx| {
            let (params, body) = match args.split_last() {
                Some((last, heads)) => {
                    let mut params = Vec::with_capacity(heads.len());
                    for head in heads {
                        params.push(head.to_string(ctx)?.to_std_string_lossy());
                    }
                    (params, last.to_string(ctx)?.to_std_string_lossy())
                }
                None => (Vec::new(), String::new()),
            };
            let body = match transform(&body) {
                Ok(instrumented) => instrumented,
                Err(error) => {
                    tracing::debug!(%error, "constructed function body left uninstrumented");
                    body
                }
            };
            let source = format!(
                "(function anonymous({}) {{\n{}\n}})",
                params.join(", "),
                body
            );
            ctx.eval(Source::from_bytes(source.as_bytes()))
        })
    };
    let function = FunctionObjectBuilder::new(context.realm(), function_fn)
        .name(JsString::from("Function"))
        .length(1)
        .constructor(true)
        .build();
    let _ =
        context.register_global_property(JsString::from("Function"), function, Attribute::all());
}
