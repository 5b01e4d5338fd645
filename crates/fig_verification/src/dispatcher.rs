//! Verification Dispatcher
//!
//! [`SettingVerifier`] is the single entry point for running verifications.
//! It picks the dynamic or plugin runtime from the definition's variant and
//! applies the optional time limit and cancellation to both.

use std::sync::Arc;
use std::time::{Duration, Instant};

use fig_script::{EngineLimits, Interrupt};
use fig_types::{
    DynamicVerificationDefinition, SettingValues, VerificationDefinition, VerificationResult,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::compiler::CompileError;
use crate::dynamic::{CANCELLED_MESSAGE, DynamicVerifier, timed_out_message};
use crate::plugin::PluginVerifier;
use crate::registry::VerifierRegistry;
use crate::verifier::VerifierInfo;

/// Verification tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Wall-clock ceiling for one verification, `None` or 0 for no limit
    pub timeout_ms: Option<u64>,

    /// Time limit used by the built-in network verifiers
    pub http_timeout_ms: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: Some(30_000),
            http_timeout_ms: 5_000,
        }
    }
}

impl VerificationConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

/// Runs verifications of either kind
#[derive(Clone)]
pub struct SettingVerifier {
    dynamic: DynamicVerifier,
    plugin: PluginVerifier,
    timeout: Option<Duration>,
}

impl SettingVerifier {
    pub fn new(
        registry: Arc<VerifierRegistry>,
        config: &VerificationConfig,
        limits: EngineLimits,
    ) -> Self {
        Self {
            dynamic: DynamicVerifier::new(limits).with_timeout(config.timeout()),
            plugin: PluginVerifier::new(registry),
            timeout: config.timeout(),
        }
    }

    /// A verifier with the built-in plugin verifiers registered
    pub fn with_builtins(config: &VerificationConfig, limits: EngineLimits) -> Self {
        let registry = VerifierRegistry::with_builtins(config.http_timeout());
        Self::new(Arc::new(registry), config, limits)
    }

    pub fn registry(&self) -> &Arc<VerifierRegistry> {
        self.plugin.registry()
    }

    /// Run a verification. The settings map is only read.
    pub async fn run(
        &self,
        definition: &VerificationDefinition,
        settings: &SettingValues,
    ) -> VerificationResult {
        self.run_cancellable(definition, settings, CancellationToken::new())
            .await
    }

    /// Run a verification that stops when `cancel` is triggered
    pub async fn run_cancellable(
        &self,
        definition: &VerificationDefinition,
        settings: &SettingValues,
        cancel: CancellationToken,
    ) -> VerificationResult {
        let started = Instant::now();
        let interrupt = Interrupt::new();

        let work = async {
            match definition {
                VerificationDefinition::Dynamic(def) => {
                    self.dynamic
                        .run_with_interrupt(def, settings, interrupt.clone())
                        .await
                }
                VerificationDefinition::Plugin(def) => self.plugin.run(def, settings).await,
            }
        };

        let deadline = async {
            match self.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => futures::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            result = work => result,

            _ = cancel.cancelled() => {
                interrupt.cancel();
                tracing::info!(verification = %definition.name(), "Verification cancelled");
                VerificationResult::failure(CANCELLED_MESSAGE)
                    .with_duration_ms(elapsed_ms(started))
            }

            _ = deadline => {
                interrupt.cancel();
                let timeout = self.timeout.unwrap_or_default();
                tracing::warn!(
                    verification = %definition.name(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Verification timed out"
                );
                VerificationResult::failure(timed_out_message(timeout))
                    .with_duration_ms(elapsed_ms(started))
            }
        }
    }

    /// Names of the registered plugin verifiers
    pub fn list_available_verifiers(&self) -> Vec<String> {
        self.registry().list_names()
    }

    pub fn describe_verifiers(&self) -> Vec<VerifierInfo> {
        self.registry().describe()
    }

    /// Compile a dynamic definition without running it
    pub async fn compile_only(
        &self,
        definition: &DynamicVerificationDefinition,
    ) -> Result<(), CompileError> {
        self.compile_only_cancellable(definition, CancellationToken::new())
            .await
    }

    /// Compile a dynamic definition, giving up when `cancel` is triggered
    pub async fn compile_only_cancellable(
        &self,
        definition: &DynamicVerificationDefinition,
        cancel: CancellationToken,
    ) -> Result<(), CompileError> {
        if cancel.is_cancelled() {
            return Err(CompileError::new(CANCELLED_MESSAGE));
        }

        let compiler = self.dynamic.compiler().clone();
        let code = definition.code.clone();
        let target = definition.target_runtime;
        let task = tokio::task::spawn_blocking(move || compiler.check(&code, target));

        tokio::select! {
            biased;

            joined = task => joined
                .map_err(|e| CompileError::new(format!("Compilation task failed: {e}")))?,

            _ = cancel.cancelled() => {
                tracing::info!(verification = %definition.name, "Compilation cancelled");
                Err(CompileError::new(CANCELLED_MESSAGE))
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::{VerificationOutcome, Verifier, VerifierError};
    use async_trait::async_trait;
    use fig_types::{PluginVerificationDefinition, SettingValue, TargetRuntime};

    /// Sleeps for the number of milliseconds it is given
    struct SlowVerifier;

    #[async_trait]
    impl Verifier for SlowVerifier {
        fn name(&self) -> &str {
            "Slow"
        }

        async fn run(&self, args: &[SettingValue]) -> Result<VerificationOutcome, VerifierError> {
            let ms = args.first().and_then(SettingValue::as_i64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms as u64)).await;
            Ok(VerificationOutcome::passed("done"))
        }
    }

    fn verifier(timeout_ms: Option<u64>) -> SettingVerifier {
        let mut registry = VerifierRegistry::with_builtins(Duration::from_secs(1));
        registry.register(Arc::new(SlowVerifier)).unwrap();
        let config = VerificationConfig {
            timeout_ms,
            ..Default::default()
        };
        SettingVerifier::new(Arc::new(registry), &config, EngineLimits::default())
    }

    fn delay(ms: i64) -> SettingValues {
        [("Delay".to_string(), SettingValue::Int(ms))].into_iter().collect()
    }

    fn slow() -> VerificationDefinition {
        PluginVerificationDefinition::new("Slow", vec!["Delay".into()]).into()
    }

    #[tokio::test]
    async fn test_dispatches_by_variant() {
        let verifier = verifier(None);

        let dynamic: VerificationDefinition = DynamicVerificationDefinition::new(
            "Dyn",
            "export function verify(s) { return { success: s.Delay === 0, message: 'dynamic' }; }",
        )
        .into();
        let result = verifier.run(&dynamic, &delay(0)).await;
        assert!(result.success);
        assert_eq!(result.message, "dynamic");

        let result = verifier.run(&slow(), &delay(0)).await;
        assert!(result.success);
        assert_eq!(result.message, "done");
    }

    #[tokio::test]
    async fn test_plugin_timeout() {
        let result = verifier(Some(50)).run(&slow(), &delay(5_000)).await;

        assert!(!result.success);
        assert_eq!(result.message, "Verification timed out after 50 ms");
    }

    #[tokio::test]
    async fn test_cancellation_stops_runaway_snippet() {
        let verifier = verifier(None);
        let definition: VerificationDefinition = DynamicVerificationDefinition::new(
            "Spins",
            "export function verify() { while (true) {} }",
        )
        .into();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = verifier
            .run_cancellable(&definition, &SettingValues::new(), cancel)
            .await;

        assert!(!result.success);
        assert_eq!(result.message, CANCELLED_MESSAGE);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unknown_verifier_is_not_listed() {
        let verifier = verifier(None);
        let definition: VerificationDefinition =
            PluginVerificationDefinition::new("DoesNotExist", vec![]).into();

        let result = verifier.run(&definition, &SettingValues::new()).await;

        assert!(!result.success);
        assert!(result.message.contains("Unknown verifier"));
        assert!(!verifier
            .list_available_verifiers()
            .contains(&"DoesNotExist".to_string()));
        assert!(verifier.list_available_verifiers().contains(&"Slow".to_string()));
    }

    #[tokio::test]
    async fn test_compile_only() {
        let verifier = verifier(None);

        let good = DynamicVerificationDefinition::new("Good", "export function verify() { return true; }");
        assert!(verifier.compile_only(&good).await.is_ok());

        let bad = DynamicVerificationDefinition::new("Bad", "export function verify() {")
            .with_target_runtime(TargetRuntime::Es2020);
        let err = verifier.compile_only(&bad).await.unwrap_err();
        assert!(!err.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_compile_only_cancelled() {
        let verifier = verifier(None);
        let good = DynamicVerificationDefinition::new("Good", "export function verify() { return true; }");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = verifier
            .compile_only_cancellable(&good, cancel)
            .await
            .unwrap_err();

        assert_eq!(err.diagnostics, vec![CANCELLED_MESSAGE.to_string()]);
    }
}
