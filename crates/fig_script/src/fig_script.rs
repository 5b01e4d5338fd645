//! Fig Script - Display script runtime
//!
//! Display scripts are small JavaScript snippets attached to settings. They
//! read and change the UI state of the other settings of the same client
//! (visibility, read-only, validity, values).
//!
//! - `LoopGuard` - vetoes runs for clients that look stuck in a re-run cycle
//! - `JsEngine` / `JsEngineFactory` - the interpreter seam
//! - `QuickJsEngineFactory` - QuickJS implementation with timeout and limits
//! - `ScriptRunner` - runs one script against one `ScriptableClient`
//!
//! # Example
//!
//! ```ignore
//! use fig_script::ScriptRunner;
//!
//! let runner = ScriptRunner::default();
//! runner.run(Some("Sibling.IsVisible = Mode.Value == 'A'"), &mut client);
//! ```

mod engine;
mod loop_guard;
mod model;
mod quickjs;
mod runner;

pub use engine::{EngineLimits, JsEngine, JsEngineError, JsEngineFactory, JsEngineResult, LogBuffer};
pub use loop_guard::{ExecutionRecord, LoopGuard, LoopGuardConfig};
pub use model::{apply_script_changes, setting_to_script};
pub use quickjs::{
    Interrupt, QuickJsEngine, QuickJsEngineFactory, Sandbox, describe_error, js_to_json, json_to_js,
    register_log_globals,
};
pub use runner::{ScriptOutcome, ScriptRunReport, ScriptRunner, SkipReason};
