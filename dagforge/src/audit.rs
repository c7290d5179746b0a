//! Durable, append-only persistence for the execution event stream.
//!
//! Mirrors the event stream's traffic to a JSON Lines file per workflow run
//! for debugging and replay. Writes happen on the calling thread inside
//! [`EventSink::write`](crate::workflow::event::EventSink) and are
//! best-effort: a failure here never blocks or fails dispatch.

use crate::workflow::event::{EventSink, StampedEvent};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Error types for audit persistence.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("write failed: {0}")]
    WriteFailed(#[from] std::io::Error),
}

/// Appends every event it sees as one JSON object per line to a file under
/// `audit_dir/{workflow_id}.jsonl`, creating the directory on first write.
pub struct FileEventSink {
    audit_dir: PathBuf,
    file: Mutex<Option<std::fs::File>>,
}

impl FileEventSink {
    pub fn new(audit_dir: impl Into<PathBuf>, workflow_id: impl AsRef<str>) -> std::io::Result<Self> {
        let audit_dir = audit_dir.into();
        std::fs::create_dir_all(&audit_dir)?;
        let path = audit_dir.join(format!("{}.jsonl", workflow_id.as_ref()));
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            audit_dir,
            file: Mutex::new(Some(file)),
        })
    }

    pub fn audit_dir(&self) -> &Path {
        &self.audit_dir
    }
}

impl EventSink for FileEventSink {
    fn write(&self, event: &StampedEvent) -> std::io::Result<()> {
        let line = serde_json::to_string(event)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut guard = self
            .file
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(file) = guard.as_mut() {
            writeln!(file, "{}", line)?;
        }
        Ok(())
    }
}

/// Reads back a JSONL audit file written by [`FileEventSink`], in order.
pub fn read_events(path: impl AsRef<Path>) -> Result<Vec<StampedEvent>, AuditError> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(AuditError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::event::ExecutionEvent;
    use tempfile::TempDir;

    #[test]
    fn writes_and_reads_back_events() {
        let dir = TempDir::new().unwrap();
        let sink = FileEventSink::new(dir.path(), "w1").unwrap();

        let event = StampedEvent {
            timestamp: chrono::Utc::now(),
            event: ExecutionEvent::WorkflowStarted {
                workflow_id: "w1".to_string(),
                task_count: 3,
            },
        };
        sink.write(&event).unwrap();
        sink.write(&event).unwrap();

        let events = read_events(dir.path().join("w1.jsonl")).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.workflow_id(), "w1");
    }

    #[test]
    fn creates_directory_if_missing() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("nested/audit");
        let sink = FileEventSink::new(&nested, "w1").unwrap();
        assert!(sink.audit_dir().exists());
    }
}
