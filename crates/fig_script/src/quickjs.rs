//! QuickJS Engine
//!
//! Wraps the QuickJS engine (via `rquickjs`) behind the [`JsEngine`] seam.
//! Every engine owns its own runtime and context; nothing is shared between
//! two script runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rquickjs::convert::Coerced;
use rquickjs::function::Rest;
use rquickjs::{Context, Ctx, Function, Object, Runtime, Value as JsValue};

use crate::engine::{EngineLimits, JsEngine, JsEngineError, JsEngineFactory, JsEngineResult, LogBuffer};

/// Conversions deeper than this are cut off (cyclic or absurd structures)
const MAX_CONVERSION_DEPTH: usize = 64;

// ─────────────────────────────────────────────────────────────────────────────
// Interrupt
// ─────────────────────────────────────────────────────────────────────────────

/// State polled by the QuickJS interrupt handler.
///
/// Cloning shares the state, so a clone held on another thread can cancel a
/// running script.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    deadline: Arc<Mutex<Option<Instant>>>,
    cancelled: Arc<AtomicBool>,
    timed_out: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the clock for the next execution
    pub fn arm(&self, timeout: Duration) {
        self.timed_out.store(false, Ordering::SeqCst);
        *self.deadline.lock() = Instant::now().checked_add(timeout);
    }

    pub fn disarm(&self) {
        *self.deadline.lock() = None;
    }

    /// Abort whatever is running and refuse to run anything else
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    fn should_interrupt(&self) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let expired = self
            .deadline
            .lock()
            .is_some_and(|deadline| Instant::now() >= deadline);
        if expired {
            self.timed_out.store(true, Ordering::SeqCst);
        }
        expired
    }

    /// Map a failed execution to the matching engine error
    pub fn classify(&self, timeout: Duration, message: String) -> JsEngineError {
        if self.timed_out() {
            JsEngineError::Timeout(timeout)
        } else if self.is_cancelled() {
            JsEngineError::Cancelled
        } else {
            JsEngineError::Script(message)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sandbox
// ─────────────────────────────────────────────────────────────────────────────

/// A QuickJS runtime and context with resource limits and an interrupt hook
pub struct Sandbox {
    runtime: Runtime,
    context: Context,
    interrupt: Interrupt,
}

impl Sandbox {
    /// Create a sandbox with its own interrupt state
    pub fn new(limits: &EngineLimits) -> JsEngineResult<Self> {
        Self::with_interrupt(limits, Interrupt::new())
    }

    /// Create a sandbox polled by an existing interrupt
    pub fn with_interrupt(limits: &EngineLimits, interrupt: Interrupt) -> JsEngineResult<Self> {
        let runtime = Runtime::new().map_err(|e| JsEngineError::Creation(e.to_string()))?;
        if limits.memory_limit_bytes > 0 {
            runtime.set_memory_limit(limits.memory_limit_bytes);
        }
        if limits.max_stack_bytes > 0 {
            runtime.set_max_stack_size(limits.max_stack_bytes);
        }

        let handler_state = interrupt.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || handler_state.should_interrupt())));

        let context =
            Context::full(&runtime).map_err(|e| JsEngineError::Creation(e.to_string()))?;

        Ok(Self {
            runtime,
            context,
            interrupt,
        })
    }

    /// Run a closure inside the context
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(Ctx<'_>) -> R,
    {
        self.context.with(f)
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Run garbage collection
    pub fn gc(&self) {
        self.runtime.run_gc();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Globals
// ─────────────────────────────────────────────────────────────────────────────

/// Register `log(...)` and a `console` object that write to `log`.
///
/// `emit` forwards each line to tracing under the caller's target.
pub fn register_log_globals(ctx: &Ctx<'_>, log: LogBuffer, emit: fn(&str)) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let sink = log.clone();
    globals.set(
        "log",
        Function::new(ctx.clone(), move |args: Rest<Coerced<String>>| {
            let line = join_args(args);
            emit(&line);
            sink.push(line);
        })?,
    )?;

    let console = Object::new(ctx.clone())?;
    for level in ["log", "info", "warn", "error", "debug"] {
        let sink = log.clone();
        console.set(
            level,
            Function::new(ctx.clone(), move |args: Rest<Coerced<String>>| {
                let line = join_args(args);
                emit(&line);
                sink.push(line);
            })?,
        )?;
    }
    globals.set("console", console)?;

    Ok(())
}

fn join_args(args: Rest<Coerced<String>>) -> String {
    args.0
        .into_iter()
        .map(|arg| arg.0)
        .collect::<Vec<_>>()
        .join(" ")
}

fn emit_script_log(line: &str) {
    tracing::info!(target: "fig.script", "{}", line);
}

// ─────────────────────────────────────────────────────────────────────────────
// Error Description
// ─────────────────────────────────────────────────────────────────────────────

/// Turn an rquickjs error into a readable message, pulling the pending
/// exception out of the context when there is one.
pub fn describe_error(ctx: &Ctx<'_>, error: rquickjs::Error) -> String {
    if !matches!(error, rquickjs::Error::Exception) {
        return error.to_string();
    }

    let thrown = ctx.catch();
    if let Some(object) = thrown.as_object() {
        let name: Option<String> = object.get("name").ok();
        let message: Option<String> = object.get("message").ok();
        match (name, message) {
            (Some(name), Some(message)) if !message.is_empty() => {
                return format!("{name}: {message}");
            }
            (Some(name), _) => return name,
            (None, Some(message)) => return message,
            (None, None) => {}
        }
    }

    thrown
        .get::<Coerced<String>>()
        .map(|text| text.0)
        .unwrap_or_else(|_| "Unknown exception".to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Value Conversion
// ─────────────────────────────────────────────────────────────────────────────

/// Convert a serde_json::Value to a JavaScript value
pub fn json_to_js<'js>(ctx: &Ctx<'js>, json: &serde_json::Value) -> rquickjs::Result<JsValue<'js>> {
    use rquickjs::IntoJs;

    match json {
        serde_json::Value::Null => Ok(JsValue::new_null(ctx.clone())),
        serde_json::Value::Bool(b) => Ok(JsValue::new_bool(ctx.clone(), *b)),
        serde_json::Value::Number(n) => match n.as_i64().and_then(|i| i32::try_from(i).ok()) {
            Some(i) => Ok(JsValue::new_int(ctx.clone(), i)),
            None => Ok(JsValue::new_float(ctx.clone(), n.as_f64().unwrap_or(f64::NAN))),
        },
        serde_json::Value::String(s) => s.as_str().into_js(ctx),
        serde_json::Value::Array(arr) => {
            let js_arr = rquickjs::Array::new(ctx.clone())?;
            for (i, item) in arr.iter().enumerate() {
                js_arr.set(i, json_to_js(ctx, item)?)?;
            }
            Ok(js_arr.into_value())
        }
        serde_json::Value::Object(obj) => {
            let js_obj = Object::new(ctx.clone())?;
            for (key, val) in obj {
                js_obj.set(key.as_str(), json_to_js(ctx, val)?)?;
            }
            Ok(js_obj.into_value())
        }
    }
}

/// Convert a JavaScript value to a serde_json::Value.
///
/// Functions, symbols and other values with no JSON shape become null.
pub fn js_to_json<'js>(value: JsValue<'js>) -> JsEngineResult<serde_json::Value> {
    js_to_json_at(value, 0)
}

fn js_to_json_at<'js>(js: JsValue<'js>, depth: usize) -> JsEngineResult<serde_json::Value> {
    let conversion = |e: rquickjs::Error| JsEngineError::Conversion(e.to_string());

    if depth > MAX_CONVERSION_DEPTH {
        return Err(JsEngineError::Conversion(
            "value is nested too deeply".to_string(),
        ));
    }

    match js.type_of() {
        rquickjs::Type::Bool => Ok(serde_json::Value::Bool(js.get().map_err(conversion)?)),
        rquickjs::Type::Int => {
            let i: i32 = js.get().map_err(conversion)?;
            Ok(serde_json::Value::from(i))
        }
        rquickjs::Type::Float => {
            let f: f64 = js.get().map_err(conversion)?;
            Ok(serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null))
        }
        rquickjs::Type::String => Ok(serde_json::Value::String(js.get().map_err(conversion)?)),
        rquickjs::Type::Array => {
            let arr: rquickjs::Array = js.get().map_err(conversion)?;
            let mut values = Vec::with_capacity(arr.len());
            for i in 0..arr.len() {
                let item: JsValue = arr.get(i).map_err(conversion)?;
                values.push(js_to_json_at(item, depth + 1)?);
            }
            Ok(serde_json::Value::Array(values))
        }
        rquickjs::Type::Object | rquickjs::Type::Exception => {
            let obj: Object = js.get().map_err(conversion)?;
            let mut fields = serde_json::Map::new();
            for prop in obj.props::<String, JsValue>() {
                let (key, val) = prop.map_err(conversion)?;
                fields.insert(key, js_to_json_at(val, depth + 1)?);
            }
            Ok(serde_json::Value::Object(fields))
        }
        _ => Ok(serde_json::Value::Null),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// A QuickJS-backed script engine.
///
/// The time limit starts when the engine is created and covers everything
/// done with it: injecting values, running the script and reading values
/// back, since reading can run script code through getters and proxies.
pub struct QuickJsEngine {
    sandbox: Sandbox,
    timeout: Duration,
}

impl QuickJsEngine {
    /// Report an interrupted operation as a timeout or cancellation
    fn interrupted_or(&self, error: JsEngineError) -> JsEngineError {
        let interrupt = self.sandbox.interrupt();
        if interrupt.timed_out() {
            JsEngineError::Timeout(self.timeout)
        } else if interrupt.is_cancelled() {
            JsEngineError::Cancelled
        } else {
            error
        }
    }
}

impl JsEngine for QuickJsEngine {
    fn set_value(&mut self, name: &str, value: &serde_json::Value) -> JsEngineResult<()> {
        self.sandbox.with(|ctx| {
            let js = json_to_js(&ctx, value).map_err(|e| JsEngineError::Conversion(e.to_string()))?;
            ctx.globals()
                .set(name, js)
                .map_err(|e| JsEngineError::Conversion(e.to_string()))
        })
    }

    fn bind_path(&mut self, path: &[&str], target: &str) -> JsEngineResult<()> {
        let Some((leaf, parents)) = path.split_last() else {
            return Ok(());
        };

        self.sandbox.with(|ctx| {
            let conversion = |e: rquickjs::Error| JsEngineError::Conversion(e.to_string());
            let globals = ctx.globals();
            let bound: JsValue = globals.get(target).map_err(conversion)?;

            let mut current = globals;
            for segment in parents {
                let existing: JsValue = current.get(*segment).map_err(conversion)?;
                current = match existing.into_object() {
                    Some(object) => object,
                    None => {
                        let object = Object::new(ctx.clone()).map_err(conversion)?;
                        current.set(*segment, object.clone()).map_err(conversion)?;
                        object
                    }
                };
            }

            current.set(*leaf, bound).map_err(conversion)
        })
    }

    fn get_value(&mut self, name: &str) -> JsEngineResult<serde_json::Value> {
        self.sandbox
            .with(|ctx| {
                let value: JsValue = ctx
                    .globals()
                    .get(name)
                    .map_err(|e| JsEngineError::Conversion(e.to_string()))?;
                js_to_json(value)
            })
            .map_err(|e| self.interrupted_or(e))
    }

    fn execute(&mut self, source: &str) -> JsEngineResult<()> {
        let interrupt = self.sandbox.interrupt();
        if interrupt.is_cancelled() {
            return Err(JsEngineError::Cancelled);
        }

        let outcome = self.sandbox.with(|ctx| {
            ctx.eval::<JsValue, _>(source)
                .map(|_| ())
                .map_err(|e| describe_error(&ctx, e))
        });

        outcome.map_err(|message| interrupt.classify(self.timeout, message))
    }
}

/// Creates a fresh [`QuickJsEngine`] per script run
#[derive(Debug, Clone, Copy, Default)]
pub struct QuickJsEngineFactory;

impl JsEngineFactory for QuickJsEngineFactory {
    fn create(&self, limits: &EngineLimits, log: LogBuffer) -> JsEngineResult<Box<dyn JsEngine>> {
        let sandbox = Sandbox::new(limits)?;
        sandbox
            .with(|ctx| register_log_globals(&ctx, log, emit_script_log))
            .map_err(|e| JsEngineError::Creation(e.to_string()))?;
        sandbox.interrupt().arm(limits.timeout());

        Ok(Box::new(QuickJsEngine {
            sandbox,
            timeout: limits.timeout(),
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine(log: LogBuffer) -> Box<dyn JsEngine> {
        QuickJsEngineFactory
            .create(&EngineLimits::default(), log)
            .unwrap()
    }

    #[test]
    fn test_set_execute_get() {
        let mut engine = engine(LogBuffer::new());
        engine
            .set_value("Mode", &json!({ "Value": "A", "Count": 2 }))
            .unwrap();
        engine
            .execute("Mode.Value = Mode.Value + 'B'; Mode.Count += 1.5;")
            .unwrap();

        let mode = engine.get_value("Mode").unwrap();
        assert_eq!(mode["Value"], json!("AB"));
        assert_eq!(mode["Count"], json!(3.5));
    }

    #[test]
    fn test_log_is_captured() {
        let log = LogBuffer::new();
        let mut engine = engine(log.clone());
        engine
            .execute("log('hello', 42); console.warn('careful')")
            .unwrap();

        assert_eq!(log.lines(), vec!["hello 42", "careful"]);
    }

    #[test]
    fn test_bind_path_shares_object_and_prefix() {
        let mut engine = engine(LogBuffer::new());
        engine.set_value("Db->Host", &json!({ "Value": "a" })).unwrap();
        engine.set_value("Db->Port", &json!({ "Value": 1 })).unwrap();
        engine.bind_path(&["Db", "Host"], "Db->Host").unwrap();
        engine.bind_path(&["Db", "Port"], "Db->Port").unwrap();

        engine
            .execute("Db.Host.Value = 'b'; Db.Port.Value = Db.Port.Value + 1;")
            .unwrap();

        assert_eq!(engine.get_value("Db->Host").unwrap()["Value"], json!("b"));
        assert_eq!(engine.get_value("Db->Port").unwrap()["Value"], json!(2));
    }

    #[test]
    fn test_syntax_error_is_script_error() {
        let mut engine = engine(LogBuffer::new());
        let err = engine.execute("if (").unwrap_err();
        match err {
            JsEngineError::Script(message) => assert!(message.contains("SyntaxError")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_thrown_error_message() {
        let mut engine = engine(LogBuffer::new());
        let err = engine.execute("throw new Error('boom')").unwrap_err();
        assert_eq!(err.to_string(), "Script error: Error: boom");
    }

    #[test]
    fn test_timeout() {
        let limits = EngineLimits {
            timeout_ms: 50,
            ..Default::default()
        };
        let mut engine = QuickJsEngineFactory.create(&limits, LogBuffer::new()).unwrap();

        let started = Instant::now();
        let err = engine.execute("while (true) {}").unwrap_err();

        assert!(matches!(err, JsEngineError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_read_back_is_time_limited() {
        let limits = EngineLimits {
            timeout_ms: 100,
            ..Default::default()
        };
        let mut engine = QuickJsEngineFactory.create(&limits, LogBuffer::new()).unwrap();
        engine.set_value("Mode", &json!({ "Value": "A" })).unwrap();
        engine
            .execute(
                "Object.defineProperty(Mode, 'Value', { enumerable: true, get() { while (true) {} } });",
            )
            .unwrap();

        let started = Instant::now();
        let err = engine.get_value("Mode").unwrap_err();

        assert!(matches!(err, JsEngineError::Timeout(_)), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_cancelled_interrupt() {
        let interrupt = Interrupt::new();
        interrupt.cancel();
        assert!(interrupt.should_interrupt());
        assert!(matches!(
            interrupt.classify(Duration::from_secs(1), "x".into()),
            JsEngineError::Cancelled
        ));
    }
}
