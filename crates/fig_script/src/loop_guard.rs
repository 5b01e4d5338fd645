//! Loop Guard
//!
//! Best-effort detection of display scripts caught in a run-mutate-rerun
//! cycle. A script that changes a value can cause the host to re-run the
//! same script; if a client's scripts are running much more often than
//! their own duration would explain, further runs are refused.
//!
//! This is a heuristic. The hard limit on a single run is the execution
//! timeout enforced by the engine.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Loop guard tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopGuardConfig {
    /// The window is `now - window_multiplier * mean duration`
    pub window_multiplier: f64,

    /// A client is flagged when more executions than this fall in the window
    pub max_recent_executions: usize,

    /// Executions kept per client
    pub history_capacity: usize,
}

impl Default for LoopGuardConfig {
    fn default() -> Self {
        Self {
            window_multiplier: 11.0,
            max_recent_executions: 10,
            history_capacity: 64,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Execution History
// ─────────────────────────────────────────────────────────────────────────────

/// One recorded script execution
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRecord {
    pub time: Instant,
    pub duration_ms: f64,
}

#[derive(Debug, Default)]
struct ClientHistory {
    records: VecDeque<ExecutionRecord>,
}

impl ClientHistory {
    fn push(&mut self, record: ExecutionRecord, capacity: usize) {
        while self.records.len() >= capacity.max(1) {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    fn last_seen(&self) -> Option<Instant> {
        self.records.back().map(|r| r.time)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loop Guard
// ─────────────────────────────────────────────────────────────────────────────

/// Per-client rolling history of script execution durations.
///
/// Each client's history sits behind its own map entry, so clients never
/// contend with each other and one client's history is only touched by one
/// caller at a time.
#[derive(Debug, Default)]
pub struct LoopGuard {
    config: LoopGuardConfig,
    history: DashMap<Uuid, ClientHistory>,
}

impl LoopGuard {
    pub fn new(config: LoopGuardConfig) -> Self {
        Self {
            config,
            history: DashMap::new(),
        }
    }

    pub fn config(&self) -> &LoopGuardConfig {
        &self.config
    }

    /// Whether the client's scripts look like they are re-triggering themselves
    pub fn is_possible_loop(&self, client_id: Uuid) -> bool {
        self.is_possible_loop_at(client_id, Instant::now())
    }

    /// [`is_possible_loop`](Self::is_possible_loop) evaluated at `now`
    pub fn is_possible_loop_at(&self, client_id: Uuid, now: Instant) -> bool {
        let Some(history) = self.history.get(&client_id) else {
            return false;
        };
        let records = &history.records;
        if records.is_empty() {
            return false;
        }

        let mean_ms = records.iter().map(|r| r.duration_ms).sum::<f64>() / records.len() as f64;
        let window_ms = (self.config.window_multiplier * mean_ms).max(0.0);
        let window = Duration::try_from_secs_f64(window_ms / 1000.0).unwrap_or(Duration::MAX);

        let recent = match now.checked_sub(window) {
            Some(threshold) => records.iter().filter(|r| r.time > threshold).count(),
            // Window reaches back before the clock's origin: everything is recent.
            None => records.len(),
        };

        recent > self.config.max_recent_executions
    }

    /// Record a script execution that just finished
    pub fn record_execution(&self, client_id: Uuid, duration_ms: f64) {
        self.record_execution_at(client_id, duration_ms, Instant::now());
    }

    /// Record a script execution that finished at `time`
    pub fn record_execution_at(&self, client_id: Uuid, duration_ms: f64, time: Instant) {
        let capacity = self.config.history_capacity;
        self.history.entry(client_id).or_default().push(
            ExecutionRecord {
                time,
                duration_ms: duration_ms.max(0.0),
            },
            capacity,
        );
    }

    /// Number of executions currently held for a client
    pub fn history_len(&self, client_id: Uuid) -> usize {
        self.history
            .get(&client_id)
            .map(|h| h.records.len())
            .unwrap_or(0)
    }

    /// Drop a client's history, e.g. when the client is deleted
    pub fn forget(&self, client_id: Uuid) {
        self.history.remove(&client_id);
    }

    /// Drop the history of clients that have not run a script for `max_idle`.
    /// Returns the number of clients evicted.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.history.len();
        self.history.retain(|_, history| {
            history
                .last_seen()
                .is_some_and(|seen| now.saturating_duration_since(seen) <= max_idle)
        });
        before - self.history.len()
    }
}
