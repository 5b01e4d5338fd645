//! Plugin Verification Runtime
//!
//! Resolves a plugin definition's property arguments against the settings
//! map, looks the verifier up by name and runs it. Every failure, including
//! a panicking verifier, becomes a failed [`VerificationResult`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use fig_types::{PluginVerificationDefinition, SettingValue, SettingValues, VerificationResult};
use futures::FutureExt;

use crate::registry::{RegistryError, VerifierRegistry};
use crate::verifier::VerificationOutcome;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PluginError {
    #[error("Setting '{0}' is required by the verification but was not provided")]
    MissingArgument(String),

    #[error("Invalid argument: setting '{0}' has no value")]
    NullArgument(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Verifier {verifier} panicked: {message}")]
    Panicked { verifier: String, message: String },
}

impl PluginError {
    fn kind(&self) -> &'static str {
        match self {
            PluginError::MissingArgument(_) => "missing_argument",
            PluginError::NullArgument(_) => "null_argument",
            PluginError::Registry(_) => "unknown_verifier",
            PluginError::Panicked { .. } => "unexpected",
        }
    }
}

/// Runs plugin verifications against a registry
#[derive(Clone)]
pub struct PluginVerifier {
    registry: Arc<VerifierRegistry>,
}

impl PluginVerifier {
    pub fn new(registry: Arc<VerifierRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<VerifierRegistry> {
        &self.registry
    }

    /// Run a plugin verification. Never fails: errors become failed results.
    pub async fn run(
        &self,
        definition: &PluginVerificationDefinition,
        settings: &SettingValues,
    ) -> VerificationResult {
        let started = Instant::now();

        let result = match self.try_run(definition, settings).await {
            Ok(outcome) => {
                tracing::debug!(
                    verifier = %definition.name,
                    success = outcome.success,
                    "Plugin verification finished"
                );
                if outcome.success {
                    VerificationResult::success(outcome.message)
                } else {
                    VerificationResult::failure(outcome.message)
                }
            }
            Err(e) => {
                tracing::warn!(
                    verifier = %definition.name,
                    kind = e.kind(),
                    error = %e,
                    "Plugin verification failed"
                );
                VerificationResult::failure(e.to_string())
            }
        };

        result.with_duration_ms(started.elapsed().as_secs_f64() * 1000.0)
    }

    async fn try_run(
        &self,
        definition: &PluginVerificationDefinition,
        settings: &SettingValues,
    ) -> Result<VerificationOutcome, PluginError> {
        let args = resolve_arguments(definition, settings)?;
        let verifier = self.registry.get(&definition.name)?;

        let run = AssertUnwindSafe(verifier.run(&args)).catch_unwind().await;
        match run {
            Ok(Ok(outcome)) => Ok(outcome),
            // The verifier's own message is the result.
            Ok(Err(e)) => Ok(VerificationOutcome::failed(e.to_string())),
            Err(panic) => Err(PluginError::Panicked {
                verifier: definition.name.clone(),
                message: panic_message(panic.as_ref()),
            }),
        }
    }
}

/// Look up each property argument in order. Absent names and null values are
/// distinct errors.
pub fn resolve_arguments(
    definition: &PluginVerificationDefinition,
    settings: &SettingValues,
) -> Result<Vec<SettingValue>, PluginError> {
    definition
        .property_arguments
        .iter()
        .map(|name| match settings.get(name) {
            None => Err(PluginError::MissingArgument(name.clone())),
            Some(value) if value.is_null() => Err(PluginError::NullArgument(name.clone())),
            Some(value) => Ok(value.clone()),
        })
        .collect()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
