//! Dynamic Verification Runtime
//!
//! Compiles a snippet, instantiates it and calls its `verify` export on a
//! blocking worker thread. Every failure is folded into a
//! [`VerificationResult`]; nothing escapes to the caller.

use std::time::{Duration, Instant};

use fig_script::{EngineLimits, Interrupt, JsEngineError, LogBuffer};
use fig_types::{DynamicVerificationDefinition, SettingValues, VerificationResult};

use crate::compiler::{CompileError, ExecuteError, InstantiateError, SnippetCompiler};
use crate::verifier::VerificationOutcome;

/// Result message when a verification is interrupted by its caller
pub const CANCELLED_MESSAGE: &str = "Verification cancelled";

/// Result message when a verification runs past its time limit
pub fn timed_out_message(timeout: Duration) -> String {
    format!("Verification timed out after {} ms", timeout.as_millis())
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Everything that can go wrong running a dynamic verification
#[derive(Debug, Clone, thiserror::Error)]
pub enum DynamicVerificationError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("Failed to create verification: {0}")]
    Instantiate(#[from] InstantiateError),

    #[error("Verification threw an exception: {0}")]
    Execute(#[from] ExecuteError),

    #[error("Verification timed out after {} ms", .0.as_millis())]
    Timeout(Duration),

    #[error("{}", CANCELLED_MESSAGE)]
    Cancelled,

    #[error("Unexpected verification error: {0}")]
    Unexpected(String),
}

impl DynamicVerificationError {
    /// Log field distinguishing the failure stages
    pub fn kind(&self) -> &'static str {
        match self {
            DynamicVerificationError::Compile(_) => "compile",
            DynamicVerificationError::Instantiate(_) => "instantiate",
            DynamicVerificationError::Execute(_) => "execute",
            DynamicVerificationError::Timeout(_) => "timeout",
            DynamicVerificationError::Cancelled => "cancelled",
            DynamicVerificationError::Unexpected(_) => "unexpected",
        }
    }

    fn into_result(self) -> VerificationResult {
        match self {
            DynamicVerificationError::Compile(e) => VerificationResult::compile_failure(e.diagnostics),
            other => VerificationResult::failure(other.to_string()),
        }
    }
}

impl From<JsEngineError> for DynamicVerificationError {
    fn from(e: JsEngineError) -> Self {
        match e {
            JsEngineError::Timeout(limit) => DynamicVerificationError::Timeout(limit),
            JsEngineError::Cancelled => DynamicVerificationError::Cancelled,
            other => DynamicVerificationError::Unexpected(other.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dynamic Verifier
// ─────────────────────────────────────────────────────────────────────────────

/// Runs dynamic verifications, recompiling on every call
#[derive(Debug, Clone, Default)]
pub struct DynamicVerifier {
    compiler: SnippetCompiler,
    timeout: Option<Duration>,
}

impl DynamicVerifier {
    pub fn new(limits: EngineLimits) -> Self {
        Self {
            compiler: SnippetCompiler::new(limits),
            timeout: None,
        }
    }

    /// Interrupt the interpreter once a run takes longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn compiler(&self) -> &SnippetCompiler {
        &self.compiler
    }

    /// Run a dynamic verification
    pub async fn run(
        &self,
        definition: &DynamicVerificationDefinition,
        settings: &SettingValues,
    ) -> VerificationResult {
        self.run_with_interrupt(definition, settings, Interrupt::new())
            .await
    }

    /// Run a dynamic verification that can be stopped through `interrupt`
    pub async fn run_with_interrupt(
        &self,
        definition: &DynamicVerificationDefinition,
        settings: &SettingValues,
        interrupt: Interrupt,
    ) -> VerificationResult {
        let started = Instant::now();
        let log = LogBuffer::new();

        let compiler = self.compiler.clone();
        let timeout = self.timeout;
        let task_definition = definition.clone();
        let task_settings = settings.clone();
        let task_log = log.clone();

        let joined = tokio::task::spawn_blocking(move || {
            run_blocking(
                &compiler,
                &task_definition,
                &task_settings,
                task_log,
                interrupt,
                timeout,
            )
        })
        .await;

        let outcome = joined
            .map_err(|e| DynamicVerificationError::Unexpected(e.to_string()))
            .and_then(|outcome| outcome);

        let result = match outcome {
            Ok(outcome) => {
                tracing::debug!(
                    verification = %definition.name,
                    success = outcome.success,
                    "Dynamic verification finished"
                );
                if outcome.success {
                    VerificationResult::success(outcome.message)
                } else {
                    VerificationResult::failure(outcome.message)
                }
            }
            Err(e) => {
                log_failure(definition, &e);
                e.into_result()
            }
        };

        result
            .with_logs(log.take())
            .with_duration_ms(started.elapsed().as_secs_f64() * 1000.0)
    }
}

/// Compile, instantiate and execute in a fresh runtime on the current thread
fn run_blocking(
    compiler: &SnippetCompiler,
    definition: &DynamicVerificationDefinition,
    settings: &SettingValues,
    log: LogBuffer,
    interrupt: Interrupt,
    timeout: Option<Duration>,
) -> Result<VerificationOutcome, DynamicVerificationError> {
    if interrupt.is_cancelled() {
        return Err(DynamicVerificationError::Cancelled);
    }

    let sandbox = compiler.sandbox(log, interrupt.clone())?;
    if let Some(timeout) = timeout {
        interrupt.arm(timeout);
    }

    let outcome = compiler.compile(
        &sandbox,
        &definition.code,
        definition.target_runtime,
        |module| -> Result<VerificationOutcome, DynamicVerificationError> {
            let entry = module.instantiate()?;
            Ok(entry.invoke(settings)?)
        },
    );
    interrupt.disarm();

    // An interrupted run surfaces as whatever stage it was in; report why.
    match outcome {
        Ok(Ok(outcome)) => Ok(outcome),
        _ if interrupt.timed_out() => Err(DynamicVerificationError::Timeout(
            timeout.unwrap_or_default(),
        )),
        _ if interrupt.is_cancelled() => Err(DynamicVerificationError::Cancelled),
        Ok(Err(e)) => Err(e),
        Err(e) => Err(e.into()),
    }
}

fn log_failure(definition: &DynamicVerificationDefinition, error: &DynamicVerificationError) {
    let name = definition.name.as_str();
    match error {
        DynamicVerificationError::Compile(e) => tracing::warn!(
            verification = %name,
            kind = error.kind(),
            diagnostics = e.diagnostics.len(),
            error = %e,
            "Dynamic verification did not compile"
        ),
        DynamicVerificationError::Instantiate(e) => tracing::warn!(
            verification = %name,
            kind = error.kind(),
            error = %e,
            "Dynamic verification could not be instantiated"
        ),
        DynamicVerificationError::Execute(e) => tracing::warn!(
            verification = %name,
            kind = error.kind(),
            error = %e,
            "Dynamic verification threw during execution"
        ),
        DynamicVerificationError::Timeout(_) | DynamicVerificationError::Cancelled => {
            tracing::warn!(
                verification = %name,
                kind = error.kind(),
                "Dynamic verification interrupted"
            )
        }
        DynamicVerificationError::Unexpected(e) => tracing::warn!(
            verification = %name,
            kind = error.kind(),
            error = %e,
            "Dynamic verification failed unexpectedly"
        ),
    }
}
