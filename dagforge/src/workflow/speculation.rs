//! Speculation cache: confidence-gated pre-execution of likely-next tasks.
//!
//! When a task's dependencies are close enough to resolved that its
//! arguments can be predicted with acceptable confidence, the scheduler may
//! start it early. A speculative run is only consumed if the real
//! arguments it would have received end up matching what was predicted;
//! otherwise it's discarded and the task runs again for real.

use crate::workflow::task::{TaskId, TaskResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Observes speculative outcomes for metrics/logging. No-op by default.
pub trait SpeculationOutcomeSink: Send + Sync {
    fn on_hit(&self, _task_id: &TaskId) {}
    fn on_miss(&self, _task_id: &TaskId) {}
    fn on_aborted(&self, _task_id: &TaskId) {}
}

pub struct NullOutcomeSink;
impl SpeculationOutcomeSink for NullOutcomeSink {}

struct Entry {
    predicted_arguments: HashMap<String, Value>,
    handle: JoinHandle<TaskResult>,
    started_at: Instant,
}

/// Minimum confidence, in `0.0..=1.0`, required to start a speculative run.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.8;

/// Default time-to-live for a speculative entry before it's swept.
pub const DEFAULT_SPECULATION_TTL: Duration = Duration::from_secs(30);

/// Tracks in-flight speculative task executions, keyed by task id.
pub struct SpeculationCache {
    entries: Mutex<HashMap<TaskId, Entry>>,
    confidence_threshold: f64,
    ttl: Duration,
    outcomes: std::sync::Arc<dyn SpeculationOutcomeSink>,
}

impl SpeculationCache {
    pub fn new() -> Self {
        Self::with_config(DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_SPECULATION_TTL)
    }

    pub fn with_config(confidence_threshold: f64, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            confidence_threshold,
            ttl,
            outcomes: std::sync::Arc::new(NullOutcomeSink),
        }
    }

    pub fn with_outcome_sink(mut self, sink: std::sync::Arc<dyn SpeculationOutcomeSink>) -> Self {
        self.outcomes = sink;
        self
    }

    /// Whether a prediction at the given confidence clears the bar to
    /// speculate at all.
    pub fn should_speculate(&self, confidence: f64) -> bool {
        confidence >= self.confidence_threshold
    }

    /// Registers a speculative run already in flight, keyed by the
    /// arguments it was predicted to receive.
    pub fn start_speculation(
        &self,
        task_id: TaskId,
        predicted_arguments: HashMap<String, Value>,
        handle: JoinHandle<TaskResult>,
    ) {
        self.entries.lock().expect("speculation cache lock poisoned").insert(
            task_id,
            Entry {
                predicted_arguments,
                handle,
                started_at: Instant::now(),
            },
        );
    }

    /// Returns whether a live, unexpired speculative entry exists for this
    /// task without consuming it.
    pub fn check_cache(&self, task_id: &TaskId) -> bool {
        let entries = self.entries.lock().expect("speculation cache lock poisoned");
        entries
            .get(task_id)
            .map(|e| e.started_at.elapsed() < self.ttl)
            .unwrap_or(false)
    }

    /// Consumes the speculative entry for `task_id` if its predicted
    /// arguments exactly match `actual_arguments`, returning the completed
    /// result. Mismatched or expired entries are discarded (aborted) and
    /// `None` is returned so the caller re-executes for real.
    pub async fn validate_and_consume(
        &self,
        task_id: &TaskId,
        actual_arguments: &HashMap<String, Value>,
    ) -> Option<TaskResult> {
        let entry = {
            let mut entries = self.entries.lock().expect("speculation cache lock poisoned");
            entries.remove(task_id)?
        };

        if entry.started_at.elapsed() >= self.ttl || entry.predicted_arguments != *actual_arguments {
            entry.handle.abort();
            self.outcomes.on_miss(task_id);
            return None;
        }

        match entry.handle.await {
            Ok(result) => {
                self.outcomes.on_hit(task_id);
                Some(result)
            }
            Err(_) => {
                self.outcomes.on_miss(task_id);
                None
            }
        }
    }

    /// Discards a speculative entry without awaiting or validating it.
    pub fn discard_cache(&self, task_id: &TaskId) {
        if let Some(entry) = self
            .entries
            .lock()
            .expect("speculation cache lock poisoned")
            .remove(task_id)
        {
            entry.handle.abort();
            self.outcomes.on_aborted(task_id);
        }
    }

    pub fn abort_speculation(&self, task_id: &TaskId) {
        self.discard_cache(task_id);
    }

    /// Aborts and discards every in-flight speculative entry.
    pub fn abort_all_speculations(&self) {
        let mut entries = self.entries.lock().expect("speculation cache lock poisoned");
        for (task_id, entry) in entries.drain() {
            entry.handle.abort();
            self.outcomes.on_aborted(&task_id);
        }
    }

    /// Sweeps expired entries that were never consumed.
    pub fn sweep_expired(&self) {
        let mut entries = self.entries.lock().expect("speculation cache lock poisoned");
        let ttl = self.ttl;
        let outcomes = &self.outcomes;
        entries.retain(|task_id, entry| {
            if entry.started_at.elapsed() >= ttl {
                entry.handle.abort();
                outcomes.on_aborted(task_id);
                false
            } else {
                true
            }
        });
    }

    pub fn destroy(&self) {
        self.abort_all_speculations();
    }

    pub fn pending_count(&self) -> usize {
        self.entries.lock().expect("speculation cache lock poisoned").len()
    }
}

impl Default for SpeculationCache {
    fn default() -> Self {
        Self::new()
    }
}
