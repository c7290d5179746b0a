//! Event stream: a non-blocking, multi-subscriber broadcast of everything
//! the scheduler does, plus an optional durable sink.
//!
//! Subscribers each get their own bounded mpsc channel so a slow or dead
//! subscriber cannot stall dispatch; `emit` drops the event for a
//! subscriber whose channel is full rather than awaiting it.

use crate::workflow::task::{TaskId, TaskResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Everything the scheduler reports as it runs a workflow. Serialized onto
/// the wire for subscribers and, optionally, into the durable sink.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    WorkflowStarted {
        workflow_id: String,
        task_count: usize,
    },
    LayerStarted {
        workflow_id: String,
        layer_index: usize,
        task_ids: Vec<TaskId>,
    },
    TaskStarted {
        workflow_id: String,
        task_id: TaskId,
    },
    TaskCompleted {
        workflow_id: String,
        result: TaskResult,
    },
    LayerCompleted {
        workflow_id: String,
        layer_index: usize,
    },
    CheckpointCreated {
        workflow_id: String,
        layer_index: usize,
    },
    SpeculationStarted {
        workflow_id: String,
        task_id: TaskId,
    },
    SpeculationResolved {
        workflow_id: String,
        task_id: TaskId,
        hit: bool,
    },
    WorkflowCompleted {
        workflow_id: String,
        success: bool,
        completed: usize,
        failed: usize,
        total: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    WorkflowCancelled {
        workflow_id: String,
        reason: String,
    },
    TaskError {
        workflow_id: String,
        task_id: TaskId,
        error: String,
        recoverable: bool,
    },
    TaskWarning {
        workflow_id: String,
        task_id: TaskId,
        message: String,
    },
    StateUpdated {
        workflow_id: String,
    },
    /// An AIL or HIL decision point has been raised and the scheduler will
    /// not advance past this layer boundary until a matching
    /// `checkpoint_response`/`approval_response` command arrives.
    DecisionRequired {
        workflow_id: String,
        decision_type: String,
        description: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checkpoint_id: Option<String>,
    },
}

impl ExecutionEvent {
    pub fn workflow_id(&self) -> &str {
        match self {
            ExecutionEvent::WorkflowStarted { workflow_id, .. }
            | ExecutionEvent::LayerStarted { workflow_id, .. }
            | ExecutionEvent::TaskStarted { workflow_id, .. }
            | ExecutionEvent::TaskCompleted { workflow_id, .. }
            | ExecutionEvent::LayerCompleted { workflow_id, .. }
            | ExecutionEvent::CheckpointCreated { workflow_id, .. }
            | ExecutionEvent::SpeculationStarted { workflow_id, .. }
            | ExecutionEvent::SpeculationResolved { workflow_id, .. }
            | ExecutionEvent::WorkflowCompleted { workflow_id, .. }
            | ExecutionEvent::WorkflowCancelled { workflow_id, .. }
            | ExecutionEvent::TaskError { workflow_id, .. }
            | ExecutionEvent::TaskWarning { workflow_id, .. }
            | ExecutionEvent::StateUpdated { workflow_id, .. }
            | ExecutionEvent::DecisionRequired { workflow_id, .. } => workflow_id,
        }
    }
}

/// An event stamped with wall-clock time, as delivered to subscribers and
/// written to the durable sink.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StampedEvent {
    pub timestamp: DateTime<Utc>,
    pub event: ExecutionEvent,
}

/// A durable sink events are additionally written to. Failures here never
/// block or fail dispatch; they're reported to the caller of `emit` only as
/// a best-effort `Result` the scheduler is free to ignore.
pub trait EventSink: Send + Sync {
    fn write(&self, event: &StampedEvent) -> std::io::Result<()>;
}

/// No-op sink used when no durable persistence is configured.
pub struct NullSink;

impl EventSink for NullSink {
    fn write(&self, _event: &StampedEvent) -> std::io::Result<()> {
        Ok(())
    }
}

struct Subscriber {
    id: u64,
    sender: mpsc::Sender<StampedEvent>,
}

/// Stats describing delivery health, surfaced via `get_stats`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct EventStreamStats {
    pub emitted: u64,
    pub dropped: u64,
    pub subscriber_count: usize,
}

/// Multi-subscriber, non-blocking event broadcast with an optional durable
/// sink. Cloning shares the same subscriber set and sink.
#[derive(Clone)]
pub struct EventStream {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    next_subscriber_id: Arc<AtomicU64>,
    sink: Arc<dyn EventSink>,
    emitted: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    channel_capacity: usize,
}

impl EventStream {
    pub fn new() -> Self {
        Self::with_sink(Arc::new(NullSink))
    }

    pub fn with_sink(sink: Arc<dyn EventSink>) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_subscriber_id: Arc::new(AtomicU64::new(0)),
            sink,
            emitted: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
            channel_capacity: 256,
        }
    }

    /// Registers a new subscriber and returns its receiving half plus the
    /// id needed to unsubscribe.
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<StampedEvent>) {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .lock()
            .expect("event stream subscriber lock poisoned")
            .push(Subscriber { id, sender: tx });
        (id, rx)
    }

    /// Removes a subscriber; no-op if already gone.
    pub fn unsubscribe(&self, id: u64) {
        self.subscribers
            .lock()
            .expect("event stream subscriber lock poisoned")
            .retain(|s| s.id != id);
    }

    /// Closes the stream: every subscriber's channel is dropped, ending
    /// their receive loop.
    pub fn close(&self) {
        self.subscribers
            .lock()
            .expect("event stream subscriber lock poisoned")
            .clear();
    }

    /// Broadcasts an event. Non-blocking: a subscriber whose channel is
    /// full has the event dropped for it, not awaited. The durable sink (if
    /// any) is written synchronously; a write failure does not prevent
    /// delivery to subscribers.
    pub fn emit(&self, event: ExecutionEvent) {
        let stamped = StampedEvent {
            timestamp: Utc::now(),
            event,
        };
        self.emitted.fetch_add(1, Ordering::Relaxed);

        let _ = self.sink.write(&stamped);

        let mut subs = self
            .subscribers
            .lock()
            .expect("event stream subscriber lock poisoned");
        subs.retain(|s| {
            match s.sender.try_send(stamped.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    pub fn get_stats(&self) -> EventStreamStats {
        EventStreamStats {
            emitted: self.emitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            subscriber_count: self
                .subscribers
                .lock()
                .expect("event stream subscriber lock poisoned")
                .len(),
        }
    }
}

impl Default for EventStream {
    fn default() -> Self {
        Self::new()
    }
}
