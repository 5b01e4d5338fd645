//! Snippet Compiler
//!
//! Turns verification source text into an invocable unit. Snippets are ES
//! modules that export a `verify(settings)` function.
//!
//! Three stages, each with its own error type:
//!
//! - compile: parse the module against the reference library of its target
//!   runtime ([`CompileError`])
//! - instantiate: evaluate the module and look up the `verify` export
//!   ([`InstantiateError`])
//! - execute: call `verify` with the settings map ([`ExecuteError`])
//!
//! Every unit lives in its own QuickJS runtime and nothing is cached between
//! calls.

use fig_script::{
    EngineLimits, Interrupt, JsEngineError, LogBuffer, Sandbox, describe_error, js_to_json,
    json_to_js, register_log_globals,
};
use fig_types::{SettingValue, SettingValues, TargetRuntime};
use regex::Regex;
use rquickjs::convert::Coerced;
use rquickjs::function::Opt;
use rquickjs::module::Declared;
use rquickjs::{Ctx, Function, Module, Object, Value as JsValue};

use crate::verifier::VerificationOutcome;

/// Module name snippets are declared under
const SNIPPET_MODULE: &str = "verification";

/// Export every snippet must provide
pub const ENTRY_POINT: &str = "verify";

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// The snippet did not compile
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Compilation failed: {}", diagnostics.join("; "))]
pub struct CompileError {
    pub diagnostics: Vec<String>,
}

impl CompileError {
    pub fn new(diagnostic: impl Into<String>) -> Self {
        Self {
            diagnostics: vec![diagnostic.into()],
        }
    }
}

/// The compiled module could not produce a verification entry point
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstantiateError {
    #[error("Module evaluation failed: {0}")]
    Evaluation(String),

    #[error("Module does not export a `verify` function")]
    MissingEntryPoint,

    #[error("Export `verify` is a {0}, not a function")]
    NotAFunction(String),
}

/// The verification entry point failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecuteError {
    #[error("{0}")]
    Threw(String),

    #[error("Invalid verification result: {0}")]
    InvalidResult(String),

    #[error("Could not pass settings to the verification: {0}")]
    Arguments(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Snippet Compiler
// ─────────────────────────────────────────────────────────────────────────────

/// Compiles snippets into isolated units
#[derive(Debug, Clone, Default)]
pub struct SnippetCompiler {
    limits: EngineLimits,
}

impl SnippetCompiler {
    /// Memory and stack limits apply to every unit. The time limit is owned
    /// by whoever arms the unit's [`Interrupt`].
    pub fn new(limits: EngineLimits) -> Self {
        Self { limits }
    }

    /// Create the isolated runtime a snippet is compiled into
    pub fn sandbox(&self, log: LogBuffer, interrupt: Interrupt) -> Result<Sandbox, JsEngineError> {
        let sandbox = Sandbox::with_interrupt(&self.limits, interrupt)?;
        sandbox
            .with(|ctx| register_log_globals(&ctx, log, emit_verification_log))
            .map_err(|e| JsEngineError::Creation(e.to_string()))?;
        Ok(sandbox)
    }

    /// Compile `source` inside `sandbox` and hand the module to `f`.
    ///
    /// The module only lives for the duration of `f`.
    pub fn compile<R, F>(
        &self,
        sandbox: &Sandbox,
        source: &str,
        target: TargetRuntime,
        f: F,
    ) -> Result<R, CompileError>
    where
        F: for<'js> FnOnce(CompiledModule<'js>) -> R,
    {
        sandbox.with(|ctx| {
            install_reference_library(&ctx, target).map_err(|e| {
                CompileError::new(format!("Failed to load {target} reference library: {e}"))
            })?;

            let module = Module::declare(ctx.clone(), SNIPPET_MODULE, source)
                .map_err(|e| CompileError::new(describe_error(&ctx, e)))?;

            Ok(f(CompiledModule { ctx, module }))
        })
    }

    /// Compile without running anything, for validating a snippet before it
    /// is saved
    pub fn check(&self, source: &str, target: TargetRuntime) -> Result<(), CompileError> {
        let sandbox = self
            .sandbox(LogBuffer::new(), Interrupt::new())
            .map_err(|e| CompileError::new(e.to_string()))?;
        self.compile(&sandbox, source, target, |_| ())
    }
}

fn emit_verification_log(line: &str) {
    tracing::info!(target: "fig.verification", "{}", line);
}

// ─────────────────────────────────────────────────────────────────────────────
// Reference Libraries
// ─────────────────────────────────────────────────────────────────────────────

/// Install the globals a snippet may call for its target runtime. `log` and
/// `console` are present in every sandbox already.
fn install_reference_library(ctx: &Ctx<'_>, target: TargetRuntime) -> rquickjs::Result<()> {
    match target {
        TargetRuntime::Es2020 => Ok(()),
        TargetRuntime::Es2023 => install_text_helpers(ctx),
    }
}

fn install_text_helpers<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<()> {
    let text = Object::new(ctx.clone())?;

    text.set(
        "isNullOrWhiteSpace",
        Function::new(ctx.clone(), |value: Opt<JsValue<'js>>| match value.0 {
            None => true,
            Some(value) => match value.as_string() {
                Some(s) => s.to_string().map(|s| s.trim().is_empty()).unwrap_or(false),
                None => value.is_null() || value.is_undefined(),
            },
        })?,
    )?;

    text.set(
        "isMatch",
        Function::new(ctx.clone(), |value: Coerced<String>, pattern: Coerced<String>| {
            Regex::new(&pattern.0)
                .map(|regex| regex.is_match(&value.0))
                .unwrap_or(false)
        })?,
    )?;

    text.set(
        "toInt",
        Function::new(ctx.clone(), |value: Coerced<String>| {
            value.0.trim().parse::<i64>().ok().map(|i| i as f64)
        })?,
    )?;

    ctx.globals().set("text", text)
}

// ─────────────────────────────────────────────────────────────────────────────
// Compiled Module
// ─────────────────────────────────────────────────────────────────────────────

/// A compiled, not yet evaluated, snippet
pub struct CompiledModule<'js> {
    ctx: Ctx<'js>,
    module: Module<'js, Declared>,
}

impl<'js> CompiledModule<'js> {
    /// Evaluate the module body and locate its `verify` export
    pub fn instantiate(self) -> Result<VerificationEntry<'js>, InstantiateError> {
        let ctx = self.ctx;
        let evaluation = |e: rquickjs::Error| InstantiateError::Evaluation(describe_error(&ctx, e));

        let (module, promise) = self.module.eval().map_err(evaluation)?;
        promise.finish::<JsValue>().map_err(evaluation)?;

        let export: JsValue = module.get(ENTRY_POINT).map_err(evaluation)?;
        if export.is_undefined() || export.is_null() {
            return Err(InstantiateError::MissingEntryPoint);
        }
        let type_name = format!("{:?}", export.type_of()).to_lowercase();
        let function = export
            .into_function()
            .ok_or(InstantiateError::NotAFunction(type_name))?;

        Ok(VerificationEntry { ctx, function })
    }
}

/// The `verify` function of an evaluated snippet
pub struct VerificationEntry<'js> {
    ctx: Ctx<'js>,
    function: Function<'js>,
}

impl<'js> VerificationEntry<'js> {
    /// Call `verify(settings)`. A returned promise is driven to completion.
    pub fn invoke(&self, settings: &SettingValues) -> Result<VerificationOutcome, ExecuteError> {
        let threw = |e: rquickjs::Error| ExecuteError::Threw(describe_error(&self.ctx, e));

        let argument = settings_to_json(settings);
        let argument =
            json_to_js(&self.ctx, &argument).map_err(|e| ExecuteError::Arguments(e.to_string()))?;

        let returned: JsValue = self.function.call((argument,)).map_err(threw)?;
        let returned = match returned.as_promise() {
            Some(promise) => promise.finish::<JsValue>().map_err(threw)?,
            None => returned,
        };

        parse_outcome(returned)
    }
}

fn settings_to_json(settings: &SettingValues) -> serde_json::Value {
    serde_json::Value::Object(
        settings
            .iter()
            .map(|(name, value)| (name.clone(), serde_json::Value::from(value.clone())))
            .collect(),
    )
}

/// Accepts `{ success, message }` (either casing) or a bare boolean
fn parse_outcome(returned: JsValue<'_>) -> Result<VerificationOutcome, ExecuteError> {
    let returned = js_to_json(returned).map_err(|e| ExecuteError::InvalidResult(e.to_string()))?;

    if let Some(success) = returned.as_bool() {
        return Ok(VerificationOutcome {
            success,
            message: String::new(),
        });
    }

    let field = |lower: &str, upper: &str| returned.get(lower).or_else(|| returned.get(upper));

    let success = field("success", "Success")
        .and_then(serde_json::Value::as_bool)
        .ok_or_else(|| {
            ExecuteError::InvalidResult(format!(
                "expected an object with a boolean `success`, got {returned}"
            ))
        })?;
    let message = match field("message", "Message") {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => SettingValue::from(other.clone()).display_string(),
    };

    Ok(VerificationOutcome { success, message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, SettingValue)]) -> SettingValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect::<HashMap<_, _>>()
    }

    fn run(
        source: &str,
        target: TargetRuntime,
        values: &SettingValues,
    ) -> Result<Result<VerificationOutcome, String>, CompileError> {
        let compiler = SnippetCompiler::default();
        let sandbox = compiler.sandbox(LogBuffer::new(), Interrupt::new()).unwrap();
        compiler.compile(&sandbox, source, target, |module| {
            let entry = module.instantiate().map_err(|e| e.to_string())?;
            entry.invoke(values).map_err(|e| e.to_string())
        })
    }

    #[test]
    fn test_valid_snippet_round_trip() {
        let source = r#"
            export function verify(settings) {
                if (settings.Port > 1024) {
                    return { success: true, message: `port ${settings.Port} ok` };
                }
                return { success: false, message: "privileged port" };
            }
        "#;

        let outcome = run(
            source,
            TargetRuntime::Es2020,
            &settings(&[("Port", SettingValue::Int(8080))]),
        )
        .unwrap()
        .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.message, "port 8080 ok");
    }

    #[test]
    fn test_syntax_error_is_compile_error() {
        let err = run(
            "export function verify(settings) { return {",
            TargetRuntime::Es2023,
            &SettingValues::new(),
        )
        .err()
        .unwrap();

        assert_eq!(err.diagnostics.len(), 1);
        assert!(err.diagnostics[0].contains("SyntaxError"));
    }

    #[test]
    fn test_check_does_not_evaluate() {
        let compiler = SnippetCompiler::default();
        // Evaluating this would throw; compiling it must not.
        compiler
            .check(
                "throw new Error('side effect'); export function verify() {}",
                TargetRuntime::Es2023,
            )
            .unwrap();

        assert!(compiler.check("export function (", TargetRuntime::Es2023).is_err());
    }

    #[test]
    fn test_missing_entry_point() {
        let result = run(
            "export function check() { return true; }",
            TargetRuntime::Es2023,
            &SettingValues::new(),
        )
        .unwrap();

        assert_eq!(
            result.unwrap_err(),
            InstantiateError::MissingEntryPoint.to_string()
        );
    }

    #[test]
    fn test_module_body_throw_is_instantiate_error() {
        let result = run(
            "throw new Error('bad init'); export function verify() { return true; }",
            TargetRuntime::Es2023,
            &SettingValues::new(),
        )
        .unwrap();

        let message = result.unwrap_err();
        assert!(message.starts_with("Module evaluation failed"), "{message}");
        assert!(message.contains("bad init"));
    }

    #[test]
    fn test_async_verify() {
        let outcome = run(
            "export async function verify(s) { return { Success: s.Name === 'x', Message: 'async' }; }",
            TargetRuntime::Es2023,
            &settings(&[("Name", SettingValue::from("x"))]),
        )
        .unwrap()
        .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.message, "async");
    }

    #[test]
    fn test_rejected_promise_is_execute_error() {
        let result = run(
            "export async function verify() { throw new Error('rejected'); }",
            TargetRuntime::Es2023,
            &SettingValues::new(),
        )
        .unwrap();

        assert!(result.unwrap_err().contains("rejected"));
    }

    #[test]
    fn test_invalid_result_shape() {
        let result = run(
            "export function verify() { return 'yes'; }",
            TargetRuntime::Es2023,
            &SettingValues::new(),
        )
        .unwrap();

        assert!(result.unwrap_err().starts_with("Invalid verification result"));
    }

    #[test]
    fn test_text_helpers_depend_on_target_runtime() {
        let source = r#"
            export function verify(s) {
                const ok = !text.isNullOrWhiteSpace(s.Host)
                    && text.isNullOrWhiteSpace("  ")
                    && text.isMatch(s.Host, "^db[0-9]+$")
                    && text.toInt(" 42 ") === 42
                    && text.toInt("x") == null;
                return { success: ok, message: "" };
            }
        "#;
        let values = settings(&[("Host", SettingValue::from("db1"))]);

        let outcome = run(source, TargetRuntime::Es2023, &values).unwrap().unwrap();
        assert!(outcome.success);

        let message = run(source, TargetRuntime::Es2020, &values)
            .unwrap()
            .unwrap_err();
        assert!(message.contains("ReferenceError"), "{message}");
    }

    #[test]
    fn test_log_is_captured() {
        let compiler = SnippetCompiler::default();
        let log = LogBuffer::new();
        let sandbox = compiler.sandbox(log.clone(), Interrupt::new()).unwrap();

        compiler
            .compile(
                &sandbox,
                "export function verify() { log('checking'); return true; }",
                TargetRuntime::Es2020,
                |module| module.instantiate().unwrap().invoke(&SettingValues::new()).unwrap(),
            )
            .unwrap();

        assert_eq!(log.lines(), vec!["checking"]);
    }
}
