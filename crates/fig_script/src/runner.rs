//! Display Script Runner
//!
//! Runs one display script against one client:
//!
//! 1. Skip when the script is blank or the loop guard flags the client
//! 2. Create a fresh engine, inject every setting under its flat name and
//!    build the nested `Parent.Child` namespaces
//! 3. Execute within the engine's timeout
//! 4. Copy changes back to the settings, committing grid edits on success
//! 5. Record the elapsed time with the loop guard, whatever happened
//!
//! Failures are logged and swallowed. A broken display script must never
//! break the operation that triggered it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use fig_types::ScriptableClient;

use crate::engine::{EngineLimits, JsEngine, JsEngineError, JsEngineFactory, LogBuffer};
use crate::loop_guard::LoopGuard;
use crate::model::{apply_script_changes, setting_to_script};
use crate::quickjs::QuickJsEngineFactory;

// ─────────────────────────────────────────────────────────────────────────────
// Run Report
// ─────────────────────────────────────────────────────────────────────────────

/// Why a script run did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No script, or only whitespace
    EmptyScript,
    /// The loop guard vetoed the run
    PossibleLoop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOutcome {
    Skipped(SkipReason),
    Completed,
    /// The script failed to parse, threw, or timed out
    Failed(String),
}

/// What happened during one script run
#[derive(Debug, Clone)]
pub struct ScriptRunReport {
    pub outcome: ScriptOutcome,
    pub duration: Duration,
    /// Lines the script wrote with `log(...)`
    pub logs: Vec<String>,
}

impl ScriptRunReport {
    pub fn is_completed(&self) -> bool {
        self.outcome == ScriptOutcome::Completed
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, ScriptOutcome::Skipped(_))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Script Runner
// ─────────────────────────────────────────────────────────────────────────────

/// Executes display scripts against scriptable clients
#[derive(Clone)]
pub struct ScriptRunner {
    factory: Arc<dyn JsEngineFactory>,
    loop_guard: Arc<LoopGuard>,
    limits: EngineLimits,
}

impl Default for ScriptRunner {
    fn default() -> Self {
        Self::new(
            Arc::new(QuickJsEngineFactory),
            Arc::new(LoopGuard::default()),
            EngineLimits::default(),
        )
    }
}

impl ScriptRunner {
    pub fn new(
        factory: Arc<dyn JsEngineFactory>,
        loop_guard: Arc<LoopGuard>,
        limits: EngineLimits,
    ) -> Self {
        Self {
            factory,
            loop_guard,
            limits,
        }
    }

    /// A runner backed by QuickJS
    pub fn quickjs(loop_guard: Arc<LoopGuard>, limits: EngineLimits) -> Self {
        Self::new(Arc::new(QuickJsEngineFactory), loop_guard, limits)
    }

    pub fn loop_guard(&self) -> &Arc<LoopGuard> {
        &self.loop_guard
    }

    pub fn limits(&self) -> &EngineLimits {
        &self.limits
    }

    /// Run a display script. Side effects are visible only through `client`.
    pub fn run(&self, script: Option<&str>, client: &mut ScriptableClient) {
        let _ = self.run_with_report(script, client);
    }

    /// Run a display script and report what happened
    pub fn run_with_report(
        &self,
        script: Option<&str>,
        client: &mut ScriptableClient,
    ) -> ScriptRunReport {
        let started = Instant::now();
        let log = LogBuffer::new();

        let outcome = match script.map(str::trim).filter(|s| !s.is_empty()) {
            None => ScriptOutcome::Skipped(SkipReason::EmptyScript),
            Some(_) if self.loop_guard.is_possible_loop(client.id) => {
                tracing::info!(
                    client_id = %client.id,
                    client = %client.name,
                    "Display script skipped: possible infinite loop"
                );
                ScriptOutcome::Skipped(SkipReason::PossibleLoop)
            }
            Some(source) => match self.execute(source, client, &log) {
                Ok(()) => ScriptOutcome::Completed,
                Err(e) => {
                    match &e {
                        JsEngineError::Timeout(limit) => tracing::warn!(
                            client_id = %client.id,
                            client = %client.name,
                            timeout_ms = limit.as_millis() as u64,
                            "Display script timed out"
                        ),
                        _ => tracing::warn!(
                            client_id = %client.id,
                            client = %client.name,
                            error = %e,
                            "Display script failed"
                        ),
                    }
                    ScriptOutcome::Failed(e.to_string())
                }
            },
        };

        let duration = started.elapsed();
        self.loop_guard
            .record_execution(client.id, duration.as_secs_f64() * 1000.0);

        ScriptRunReport {
            outcome,
            duration,
            logs: log.take(),
        }
    }

    fn execute(
        &self,
        source: &str,
        client: &mut ScriptableClient,
        log: &LogBuffer,
    ) -> Result<(), JsEngineError> {
        let mut engine = self.factory.create(&self.limits, log.clone())?;

        for setting in &client.settings {
            engine.set_value(&setting.name, &setting_to_script(setting))?;
        }
        for setting in &client.settings {
            if let Some(path) = setting.path_segments() {
                engine.bind_path(&path, &setting.name)?;
            }
        }

        // Snapshot what the engine holds so the comparison after the run sees
        // values the way the engine normalises them.
        let before = client
            .settings
            .iter()
            .map(|setting| engine.get_value(&setting.name))
            .collect::<Result<Vec<_>, _>>()?;

        let result = engine.execute(source);

        // Changes made before a failure are kept.
        let result = result.and(read_back(engine.as_mut(), client, &before));

        if result.is_ok() {
            client.settings.iter_mut().for_each(|s| s.row_saved());
        }
        result
    }
}

/// Apply what the script left in each setting's object. Stops at the first
/// timeout or cancellation; settings read before it keep their changes.
fn read_back(
    engine: &mut dyn JsEngine,
    client: &mut ScriptableClient,
    before: &[serde_json::Value],
) -> Result<(), JsEngineError> {
    let client_id = client.id;
    for (setting, before) in client.settings.iter_mut().zip(before) {
        match engine.get_value(&setting.name) {
            Ok(after) if !after.is_object() => tracing::debug!(
                client_id = %client_id,
                setting = %setting.name,
                "Display script replaced the setting object; ignoring it"
            ),
            Ok(after) => {
                let applied = apply_script_changes(setting, before, &after);
                if !applied.is_empty() {
                    tracing::debug!(
                        client_id = %client_id,
                        setting = %setting.name,
                        fields = ?applied,
                        "Display script changed setting"
                    );
                }
            }
            Err(e @ (JsEngineError::Timeout(_) | JsEngineError::Cancelled)) => return Err(e),
            Err(e) => tracing::debug!(
                client_id = %client_id,
                setting = %setting.name,
                error = %e,
                "Could not read setting back from script"
            ),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::JsEngineResult;
    use crate::loop_guard::LoopGuardConfig;
    use fig_types::{
        DataGridColumn, DataGridRow, ScriptableSetting, SettingKind, SettingValue, ValueType,
    };
    use uuid::Uuid;

    fn client() -> ScriptableClient {
        ScriptableClient::new(
            Uuid::new_v4(),
            "OrderService",
            vec![
                ScriptableSetting::drop_down("Mode", "A", vec!["A".into(), "B".into()]),
                ScriptableSetting::scalar("Sibling", "s").with_hidden(true),
                ScriptableSetting::scalar("Ratio", 0.5),
                ScriptableSetting::scalar("Retries", 3),
                ScriptableSetting::scalar("Database->Host", "db1"),
                ScriptableSetting::scalar("Database->Port", 5432),
                ScriptableSetting::time_span("Timeout", Some(Duration::from_millis(1500))),
                ScriptableSetting::data_grid(
                    "Services",
                    vec![
                        DataGridColumn::new("Name", ValueType::String),
                        DataGridColumn::new("Port", ValueType::Int),
                    ],
                    vec![DataGridRow::from_values([
                        ("Name", SettingValue::from("api")),
                        ("Port", SettingValue::Int(80)),
                    ])],
                ),
            ],
        )
    }

    fn grid_cell(client: &ScriptableClient, column: &str) -> fig_types::DataGridValue {
        let SettingKind::DataGrid { rows, .. } = &client.setting("Services").unwrap().kind else {
            panic!("expected data grid");
        };
        rows[0].cell(column).unwrap().clone()
    }

    #[test]
    fn test_read_only_script_changes_nothing() {
        let runner = ScriptRunner::default();
        let mut client = client();
        let original = client.clone();

        let report = runner.run_with_report(
            Some(
                "var total = Ratio.Value + Retries.Value + Timeout.Value + Services.Value.length;
                 var host = Database.Host.Value; var shown = Sibling.IsVisible;
                 log(total, host, shown, Mode.ValidValues.join(','));",
            ),
            &mut client,
        );

        assert!(report.is_completed(), "{:?}", report.outcome);
        assert_eq!(client, original);
        assert_eq!(report.logs, vec!["1504.5 db1 false A,B"]);
    }

    #[test]
    fn test_mode_controls_sibling_visibility() {
        let runner = ScriptRunner::default();
        let mut client = client();

        runner.run(
            Some("if (Mode.Value == 'A') { Sibling.IsVisible = true } else { Sibling.IsVisible = false }"),
            &mut client,
        );

        let sibling = client.setting("Sibling").unwrap();
        assert!(!sibling.hidden());
        assert!(sibling.is_visible());
    }

    #[test]
    fn test_visibility_invariant_after_script() {
        let runner = ScriptRunner::default();
        let mut client = client();

        runner.run(Some("Mode.IsVisible = false; Sibling.Hidden = false;"), &mut client);

        let mode = client.setting("Mode").unwrap();
        assert!(mode.hidden());
        assert!(!mode.is_visible());
        let sibling = client.setting("Sibling").unwrap();
        assert!(!sibling.hidden());
        assert!(sibling.is_visible());
    }

    #[test]
    fn test_empty_script_is_recorded_noop() {
        let runner = ScriptRunner::default();
        let mut client = client();
        let original = client.clone();

        for (i, script) in [None, Some(""), Some("   \n\t")].into_iter().enumerate() {
            let report = runner.run_with_report(script, &mut client);
            assert_eq!(report.outcome, ScriptOutcome::Skipped(SkipReason::EmptyScript));
            assert_eq!(runner.loop_guard().history_len(client.id), i + 1);
        }
        assert_eq!(client, original);
    }

    #[test]
    fn test_nested_names() {
        let runner = ScriptRunner::default();
        let mut client = client();

        let report = runner.run_with_report(
            Some(
                "Database.Host.Value = 'db2';
                 globalThis['Database->Port'].Value = Database.Port.Value + 1;",
            ),
            &mut client,
        );

        assert!(report.is_completed(), "{:?}", report.outcome);
        assert_eq!(
            client.setting("Database->Host").unwrap().value(),
            SettingValue::from("db2")
        );
        assert_eq!(
            client.setting("Database->Port").unwrap().value(),
            SettingValue::Int(5433)
        );
    }

    #[test]
    fn test_values_and_flags_are_applied() {
        let runner = ScriptRunner::default();
        let mut client = client();

        runner.run(
            Some(
                "Retries.Value = 5; Retries.IsReadOnly = true;
                 Ratio.IsValid = false; Ratio.ValidationExplanation = 'out of range';
                 Timeout.Value = 250;",
            ),
            &mut client,
        );

        let retries = client.setting("Retries").unwrap();
        assert_eq!(retries.value(), SettingValue::Int(5));
        assert!(retries.is_read_only());

        let ratio = client.setting("Ratio").unwrap();
        assert!(!ratio.is_valid);
        assert_eq!(ratio.validation_explanation.as_deref(), Some("out of range"));

        assert_eq!(
            client.setting("Timeout").unwrap().kind,
            SettingKind::TimeSpan {
                value: Some(Duration::from_millis(250))
            }
        );
    }

    #[test]
    fn test_grid_edits_are_committed_on_success() {
        let runner = ScriptRunner::default();
        let mut client = client();

        let report = runner.run_with_report(
            Some("Services.Value[0].Port.Value = 8080;"),
            &mut client,
        );

        assert!(report.is_completed(), "{:?}", report.outcome);
        let cell = grid_cell(&client, "Port");
        assert_eq!(cell.value(), &SettingValue::Int(8080));
        assert!(!cell.is_dirty());
    }

    #[test]
    fn test_failure_is_swallowed_and_partial_changes_kept() {
        let runner = ScriptRunner::default();
        let mut client = client();

        let report = runner.run_with_report(
            Some(
                "Mode.Value = 'B'; Services.Value[0].Port.Value = 9090;
                 throw new Error('display script broke');",
            ),
            &mut client,
        );

        let ScriptOutcome::Failed(message) = &report.outcome else {
            panic!("expected failure, got {:?}", report.outcome);
        };
        assert!(message.contains("display script broke"));
        assert_eq!(client.setting("Mode").unwrap().value(), SettingValue::from("B"));

        // Grid edits from a failed run stay pending
        assert!(grid_cell(&client, "Port").is_dirty());
        assert_eq!(runner.loop_guard().history_len(client.id), 1);
    }

    #[test]
    fn test_syntax_error_is_swallowed() {
        let runner = ScriptRunner::default();
        let mut client = client();
        let original = client.clone();

        let report = runner.run_with_report(Some("if (Mode.Value == {"), &mut client);

        assert!(matches!(report.outcome, ScriptOutcome::Failed(_)));
        assert_eq!(client, original);
    }

    #[test]
    fn test_timeout() {
        let limits = EngineLimits {
            timeout_ms: 100,
            ..Default::default()
        };
        let runner = ScriptRunner::quickjs(Arc::new(LoopGuard::default()), limits);
        let mut client = client();

        let report = runner.run_with_report(Some("while (true) { Retries.Value++; }"), &mut client);

        let ScriptOutcome::Failed(message) = &report.outcome else {
            panic!("expected failure, got {:?}", report.outcome);
        };
        assert!(message.contains("timed out"));
        assert!(report.duration < Duration::from_secs(5));
        assert_eq!(runner.loop_guard().history_len(client.id), 1);
    }

    fn short_timeout_runner() -> ScriptRunner {
        let limits = EngineLimits {
            timeout_ms: 200,
            ..Default::default()
        };
        ScriptRunner::quickjs(Arc::new(LoopGuard::default()), limits)
    }

    #[test]
    fn test_looping_getter_times_out_during_read_back() {
        let runner = short_timeout_runner();
        let mut client = client();

        let report = runner.run_with_report(
            Some(
                "Object.defineProperty(Mode, 'Value', { enumerable: true, get() { while (true) {} } });",
            ),
            &mut client,
        );

        let ScriptOutcome::Failed(message) = &report.outcome else {
            panic!("expected failure, got {:?}", report.outcome);
        };
        assert!(message.contains("timed out"), "{message}");
        assert!(report.duration < Duration::from_secs(5));
        assert_eq!(client.setting("Mode").unwrap().value(), SettingValue::from("A"));
        assert_eq!(runner.loop_guard().history_len(client.id), 1);
    }

    #[test]
    fn test_looping_proxy_does_not_hang() {
        let runner = short_timeout_runner();
        let mut client = client();

        let report = runner.run_with_report(
            Some("Mode = new Proxy({}, { ownKeys() { while (true) {} } });"),
            &mut client,
        );

        assert!(report.duration < Duration::from_secs(5));
        assert_eq!(client.setting("Mode").unwrap().value(), SettingValue::from("A"));
        assert_eq!(runner.loop_guard().history_len(client.id), 1);
    }

    #[test]
    fn test_rebinding_a_setting_global_changes_nothing() {
        let runner = ScriptRunner::default();
        let mut client = client();
        {
            let mode = client.setting_mut("Mode").unwrap();
            mode.category_name = Some("Connection".into());
            mode.display_order = Some(3);
        }
        let original = client.clone();

        let report = runner.run_with_report(Some("Mode = 'B';"), &mut client);

        assert!(report.is_completed(), "{:?}", report.outcome);
        assert_eq!(client, original);
    }

    #[test]
    fn test_failed_run_does_not_store_grid_edits() {
        let runner = ScriptRunner::default();
        let mut client = client();

        runner.run_with_report(
            Some("Services.Value[0].Port.Value = 9090; throw new Error('late failure');"),
            &mut client,
        );

        let cell = grid_cell(&client, "Port");
        assert_eq!(cell.value(), &SettingValue::Int(9090));
        assert!(cell.is_dirty());

        let stored: ScriptableClient =
            serde_json::from_value(serde_json::to_value(&client).unwrap()).unwrap();
        assert_eq!(grid_cell(&stored, "Port").value(), &SettingValue::Int(80));
        assert_eq!(
            client.setting("Services").unwrap().value(),
            SettingValue::List(vec![SettingValue::Map(
                [
                    ("Name".to_string(), SettingValue::from("api")),
                    ("Port".to_string(), SettingValue::Int(80)),
                ]
                .into(),
            )])
        );
    }

    #[test]
    fn test_possible_loop_is_skipped() {
        let guard = Arc::new(LoopGuard::new(LoopGuardConfig::default()));
        let runner = ScriptRunner::quickjs(guard.clone(), EngineLimits::default());
        let mut client = client();
        let original = client.clone();

        for _ in 0..11 {
            guard.record_execution(client.id, 1_000.0);
        }

        let report = runner.run_with_report(Some("Mode.Value = 'B';"), &mut client);

        assert_eq!(report.outcome, ScriptOutcome::Skipped(SkipReason::PossibleLoop));
        assert_eq!(client, original);
        assert_eq!(guard.history_len(client.id), 12);
    }

    struct BrokenFactory;

    impl JsEngineFactory for BrokenFactory {
        fn create(&self, _: &EngineLimits, _: LogBuffer) -> JsEngineResult<Box<dyn JsEngine>> {
            Err(JsEngineError::Creation("no interpreter".into()))
        }
    }

    #[test]
    fn test_engine_creation_failure_is_swallowed() {
        let runner = ScriptRunner::new(
            Arc::new(BrokenFactory),
            Arc::new(LoopGuard::default()),
            EngineLimits::default(),
        );
        let mut client = client();

        let report = runner.run_with_report(Some("log(1)"), &mut client);

        assert_eq!(
            report.outcome,
            ScriptOutcome::Failed("Failed to create engine: no interpreter".into())
        );
    }
}
