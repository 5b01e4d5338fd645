//! Behavior Service
//!
//! The facade callers use: run display scripts, run verifications, list the
//! plugin verifiers and check snippets before they are saved. One instance is
//! shared by every client; the only state it keeps is the loop guard history.

use std::sync::Arc;
use std::time::Duration;

use fig_script::{LoopGuard, ScriptRunReport, ScriptRunner};
use fig_types::{
    DynamicVerificationDefinition, ScriptableClient, SettingValues, VerificationDefinition,
    VerificationResult,
};
use fig_verification::{CompileError, SettingVerifier, VerifierInfo, VerifierRegistry};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::FigConfig;

#[derive(Clone)]
pub struct BehaviorService {
    runner: ScriptRunner,
    verifier: SettingVerifier,
    idle_eviction: Duration,
}

impl BehaviorService {
    /// Service with the built-in plugin verifiers
    pub fn new(config: &FigConfig) -> Self {
        let registry = VerifierRegistry::with_builtins(config.verification.http_timeout());
        Self::with_registry(config, Arc::new(registry))
    }

    /// Service resolving plugin verifications against `registry`
    pub fn with_registry(config: &FigConfig, registry: Arc<VerifierRegistry>) -> Self {
        let loop_guard = Arc::new(LoopGuard::new(config.loop_guard.guard.clone()));
        Self {
            runner: ScriptRunner::quickjs(loop_guard, config.script.clone()),
            verifier: SettingVerifier::new(registry, &config.verification, config.script.clone()),
            idle_eviction: config.loop_guard.idle_eviction(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Display scripts
    // ─────────────────────────────────────────────────────────────────────────

    /// Run a display script against `client`. Never fails; the effects are the
    /// changes made to the client's settings.
    pub fn run_display_script(&self, script: Option<&str>, client: &mut ScriptableClient) {
        self.runner.run(script, client);
    }

    /// Run a display script and return what happened, for authoring tools
    pub fn test_display_script(
        &self,
        script: Option<&str>,
        client: &mut ScriptableClient,
    ) -> ScriptRunReport {
        self.runner.run_with_report(script, client)
    }

    /// Run every setting's display script in setting order
    pub fn run_all_display_scripts(&self, client: &mut ScriptableClient) -> Vec<ScriptRunReport> {
        let scripts: Vec<(String, String)> = client
            .settings
            .iter()
            .filter_map(|s| s.display_script.clone().map(|script| (s.name.clone(), script)))
            .collect();

        scripts
            .into_iter()
            .map(|(setting, script)| {
                debug!(client = %client.name, setting = %setting, "Running display script");
                self.runner.run_with_report(Some(&script), client)
            })
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Verifications
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn run_verification(
        &self,
        definition: &VerificationDefinition,
        settings: &SettingValues,
    ) -> VerificationResult {
        self.verifier.run(definition, settings).await
    }

    pub async fn run_verification_cancellable(
        &self,
        definition: &VerificationDefinition,
        settings: &SettingValues,
        cancel: CancellationToken,
    ) -> VerificationResult {
        self.verifier
            .run_cancellable(definition, settings, cancel)
            .await
    }

    /// Run several verifications concurrently; results keep the input order
    pub async fn run_all_verifications(
        &self,
        definitions: &[VerificationDefinition],
        settings: &SettingValues,
    ) -> Vec<VerificationResult> {
        futures::future::join_all(
            definitions
                .iter()
                .map(|definition| self.verifier.run(definition, settings)),
        )
        .await
    }

    pub fn list_available_verifiers(&self) -> Vec<String> {
        self.verifier.list_available_verifiers()
    }

    pub fn describe_verifiers(&self) -> Vec<VerifierInfo> {
        self.verifier.describe_verifiers()
    }

    /// Check that a dynamic definition compiles, before it is saved
    pub async fn compile_only(
        &self,
        definition: &DynamicVerificationDefinition,
    ) -> Result<(), CompileError> {
        self.verifier.compile_only(definition).await
    }

    pub async fn compile_only_cancellable(
        &self,
        definition: &DynamicVerificationDefinition,
        cancel: CancellationToken,
    ) -> Result<(), CompileError> {
        self.verifier
            .compile_only_cancellable(definition, cancel)
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Loop guard housekeeping
    // ─────────────────────────────────────────────────────────────────────────

    /// Drop history of clients that have not run a script recently
    pub fn evict_idle_history(&self) -> usize {
        let evicted = self.runner.loop_guard().evict_idle(self.idle_eviction);
        if evicted > 0 {
            info!(evicted, "Evicted idle client script history");
        }
        evicted
    }

    /// Drop the history of a deleted client
    pub fn forget_client(&self, client_id: Uuid) {
        self.runner.loop_guard().forget(client_id);
    }

    pub fn loop_guard(&self) -> &Arc<LoopGuard> {
        self.runner.loop_guard()
    }
}
