//! Native verifier contract
//!
//! Plugin verifications dispatch to a [`Verifier`] registered under a name.
//! The verifier receives the values of the settings named by the
//! definition's property arguments, in order.

use async_trait::async_trait;
use fig_types::SettingValue;
use serde::{Deserialize, Serialize};

/// Pass or fail with a human-readable message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub success: bool,
    pub message: String,
}

impl VerificationOutcome {
    pub fn passed(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Error raised by a verifier body
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifierError {
    #[error("Invalid argument '{argument}': {reason}")]
    InvalidArgument { argument: String, reason: String },

    #[error("{0}")]
    Failed(String),
}

impl VerifierError {
    pub fn invalid_argument(argument: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            argument: argument.into(),
            reason: reason.into(),
        }
    }
}

/// What a verifier declares about itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierInfo {
    pub name: String,
    pub description: String,
    pub property_arguments: Vec<String>,
}

/// A natively implemented verifier
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Registry key
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Names of the arguments `run` expects, in order
    fn property_arguments(&self) -> &[&'static str] {
        &[]
    }

    async fn run(&self, args: &[SettingValue]) -> Result<VerificationOutcome, VerifierError>;

    fn info(&self) -> VerifierInfo {
        VerifierInfo {
            name: self.name().to_string(),
            description: self.description().to_string(),
            property_arguments: self
                .property_arguments()
                .iter()
                .map(|arg| arg.to_string())
                .collect(),
        }
    }
}

/// Fetch a string argument by position
pub fn string_arg<'a>(
    args: &'a [SettingValue],
    index: usize,
    name: &str,
) -> Result<&'a str, VerifierError> {
    match args.get(index) {
        Some(SettingValue::String(s)) if !s.trim().is_empty() => Ok(s.trim()),
        Some(SettingValue::String(_)) => Err(VerifierError::invalid_argument(name, "is empty")),
        Some(other) => Err(VerifierError::invalid_argument(
            name,
            format!("expected text, got {}", other.display_string()),
        )),
        None => Err(VerifierError::invalid_argument(name, "was not provided")),
    }
}
