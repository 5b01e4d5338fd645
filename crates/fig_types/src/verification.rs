//! Verification definitions and results
//!
//! A verification checks that a client's configuration is operationally
//! correct. It is either a snippet of source code compiled on demand
//! (dynamic) or a call to a preregistered native verifier (plugin).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Target Runtime
// ─────────────────────────────────────────────────────────────────────────────

/// The reference library set a dynamic verification is compiled against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetRuntime {
    /// Base library: `log`
    Es2020,
    /// Base library plus the `text` helpers
    #[default]
    Es2023,
}

impl TargetRuntime {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetRuntime::Es2020 => "es2020",
            TargetRuntime::Es2023 => "es2023",
        }
    }
}

impl std::fmt::Display for TargetRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TargetRuntime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "es2020" => Ok(TargetRuntime::Es2020),
            "es2023" => Ok(TargetRuntime::Es2023),
            other => Err(format!("unknown target runtime: {other}")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Definitions
// ─────────────────────────────────────────────────────────────────────────────

/// Verification supplied as source code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicVerificationDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// ES module source exporting `verify(settings)`
    pub code: String,

    #[serde(default)]
    pub target_runtime: TargetRuntime,

    /// Names of the settings the snippet reads
    #[serde(default)]
    pub settings_verified: Vec<String>,
}

impl DynamicVerificationDefinition {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            code: code.into(),
            target_runtime: TargetRuntime::default(),
            settings_verified: Vec::new(),
        }
    }

    pub fn with_target_runtime(mut self, target_runtime: TargetRuntime) -> Self {
        self.target_runtime = target_runtime;
        self
    }

    pub fn with_settings_verified(mut self, settings: Vec<String>) -> Self {
        self.settings_verified = settings;
        self
    }
}

/// Verification dispatched to a registered native verifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginVerificationDefinition {
    /// Registry key of the verifier
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Setting names passed positionally to the verifier
    #[serde(default)]
    pub property_arguments: Vec<String>,
}

impl PluginVerificationDefinition {
    pub fn new(name: impl Into<String>, property_arguments: Vec<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            property_arguments,
        }
    }
}

/// A stored verification definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VerificationDefinition {
    Dynamic(DynamicVerificationDefinition),
    Plugin(PluginVerificationDefinition),
}

impl VerificationDefinition {
    pub fn name(&self) -> &str {
        match self {
            VerificationDefinition::Dynamic(def) => &def.name,
            VerificationDefinition::Plugin(def) => &def.name,
        }
    }
}

impl From<DynamicVerificationDefinition> for VerificationDefinition {
    fn from(def: DynamicVerificationDefinition) -> Self {
        VerificationDefinition::Dynamic(def)
    }
}

impl From<PluginVerificationDefinition> for VerificationDefinition {
    fn from(def: PluginVerificationDefinition) -> Self {
        VerificationDefinition::Plugin(def)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result
// ─────────────────────────────────────────────────────────────────────────────

/// Message used when a dynamic verification does not compile
pub const COMPILE_ERROR_MESSAGE: &str = "Compile Error, see logs for details";

/// Outcome of a verification run. Always returned, never thrown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub success: bool,
    pub message: String,

    /// Compiler diagnostics, empty unless compilation failed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compile_errors: Vec<String>,

    /// Lines logged by the verification while it ran
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,

    #[serde(default)]
    pub duration_ms: f64,

    pub executed_at: DateTime<Utc>,
}

impl VerificationResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self::new(true, message)
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(false, message)
    }

    /// Failure carrying compiler diagnostics
    pub fn compile_failure(diagnostics: Vec<String>) -> Self {
        Self {
            compile_errors: diagnostics,
            ..Self::failure(COMPILE_ERROR_MESSAGE)
        }
    }

    fn new(success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            message: message.into(),
            compile_errors: Vec::new(),
            logs: Vec::new(),
            duration_ms: 0.0,
            executed_at: Utc::now(),
        }
    }

    pub fn with_logs(mut self, logs: Vec<String>) -> Self {
        self.logs = logs;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}
