//! Script engine seam
//!
//! The display script runtime only talks to an interpreter through
//! [`JsEngine`]: inject values, bind nested names, execute, read values back.
//! [`QuickJsEngineFactory`](crate::QuickJsEngineFactory) is the production
//! implementation.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Engine Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by a script engine
#[derive(Debug, Clone, thiserror::Error)]
pub enum JsEngineError {
    #[error("Failed to create engine: {0}")]
    Creation(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Script timed out after {0:?}")]
    Timeout(Duration),

    #[error("Script execution was cancelled")]
    Cancelled,

    #[error("Value conversion error: {0}")]
    Conversion(String),
}

pub type JsEngineResult<T> = Result<T, JsEngineError>;

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Resource limits for one interpreter instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineLimits {
    /// Execution ceiling for a single `execute` call
    pub timeout_ms: u64,

    /// Heap limit in bytes, 0 for unlimited
    pub memory_limit_bytes: usize,

    /// Stack limit in bytes, 0 for the interpreter default
    pub max_stack_bytes: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            memory_limit_bytes: 32 * 1024 * 1024,
            max_stack_bytes: 1024 * 1024,
        }
    }
}

impl EngineLimits {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Collects lines written through the script's `log` callback.
///
/// Logging is a side channel only: nothing written here feeds back into
/// configuration state.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    lines: Arc<Mutex<Vec<String>>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: impl Into<String>) {
        self.lines.lock().push(line.into());
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine Traits
// ─────────────────────────────────────────────────────────────────────────────

/// A single-use interpreter instance
pub trait JsEngine {
    /// Bind a global name to a value
    fn set_value(&mut self, name: &str, value: &serde_json::Value) -> JsEngineResult<()>;

    /// Make the global `target` reachable at a nested path, creating empty
    /// intermediate objects as needed. Binding several paths that share a
    /// prefix reuses the intermediate objects.
    fn bind_path(&mut self, path: &[&str], target: &str) -> JsEngineResult<()>;

    /// Read a global name back
    fn get_value(&mut self, name: &str) -> JsEngineResult<serde_json::Value>;

    /// Run source text within the engine's time limit
    fn execute(&mut self, source: &str) -> JsEngineResult<()>;
}

/// Creates fresh engines; each engine is used for one script run
pub trait JsEngineFactory: Send + Sync {
    fn create(&self, limits: &EngineLimits, log: LogBuffer) -> JsEngineResult<Box<dyn JsEngine>>;
}
