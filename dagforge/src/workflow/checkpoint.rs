//! Checkpointing: durable, resumable snapshots of completed work.
//!
//! A checkpoint is taken after each execution layer completes and keyed by
//! `(workflow_id, layer_index)`. Encoding is `bincode` behind a leading
//! version byte, with a SHA-256 checksum over the sorted task id set so a
//! resume against a DAG whose shape changed since the checkpoint was taken
//! is caught rather than silently accepted.

use crate::workflow::state::WorkflowState;
use crate::workflow::task::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

/// Current checkpoint wire format version. Bump when the encoded shape of
/// [`WorkflowCheckpoint`] changes incompatibly.
pub const CHECKPOINT_VERSION: u8 = 1;

/// Default number of checkpoints retained per workflow by `prune`.
pub const DEFAULT_RETENTION: usize = 5;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("encoding failed: {0}")]
    Encode(String),

    #[error("decoding failed: {0}")]
    Decode(String),

    #[error("unsupported checkpoint version {0}")]
    UnsupportedVersion(u8),

    #[error("checkpoint payload checksum mismatch")]
    ChecksumMismatch,

    #[error("checkpoint was taken against a different task set (graph drift)")]
    GraphDrift,

    #[error("no checkpoint found for workflow {0}")]
    NotFound(String),
}

/// A durable snapshot of a workflow's full authoritative state after a given
/// layer completes: enough to resume scheduling from `layer_index + 1`
/// without replaying anything already done.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowCheckpoint {
    pub workflow_id: String,
    pub layer_index: usize,
    pub state: WorkflowState,
    pub created_at: DateTime<Utc>,
}

impl WorkflowCheckpoint {
    pub fn new(workflow_id: impl Into<String>, layer_index: usize, state: WorkflowState) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            layer_index,
            state,
            created_at: Utc::now(),
        }
    }

    fn task_ids_checksum(&self) -> String {
        let mut ids: Vec<&str> = self.state.tasks.iter().map(|r| r.task_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        let mut hasher = Sha256::new();
        for id in ids {
            hasher.update(id.as_bytes());
            hasher.update(b"\0");
        }
        format!("{:x}", hasher.finalize())
    }

    /// Encodes this checkpoint as `[version byte][4-byte checksum
    /// length][task_ids checksum][bincode payload]`.
    pub fn encode(&self) -> Result<Vec<u8>, CheckpointError> {
        let payload = bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CheckpointError::Encode(e.to_string()))?;
        let checksum = self.task_ids_checksum();
        let checksum_bytes = checksum.as_bytes();

        let mut out = Vec::with_capacity(1 + 4 + checksum_bytes.len() + payload.len());
        out.push(CHECKPOINT_VERSION);
        out.extend_from_slice(&(checksum_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(checksum_bytes);
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Decodes a checkpoint previously produced by [`encode`](Self::encode),
    /// verifying the embedded checksum against the decoded payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, CheckpointError> {
        if bytes.is_empty() {
            return Err(CheckpointError::Decode("empty buffer".to_string()));
        }
        let version = bytes[0];
        if version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion(version));
        }
        if bytes.len() < 5 {
            return Err(CheckpointError::Decode("truncated header".to_string()));
        }
        let checksum_len = u32::from_le_bytes(bytes[1..5].try_into().unwrap()) as usize;
        let checksum_start = 5;
        let checksum_end = checksum_start + checksum_len;
        if bytes.len() < checksum_end {
            return Err(CheckpointError::Decode("truncated checksum".to_string()));
        }
        let stored_checksum = String::from_utf8_lossy(&bytes[checksum_start..checksum_end]).to_string();
        let payload = &bytes[checksum_end..];

        let (checkpoint, _): (WorkflowCheckpoint, usize) =
            bincode::serde::decode_from_slice(payload, bincode::config::standard())
                .map_err(|e| CheckpointError::Decode(e.to_string()))?;

        if checkpoint.task_ids_checksum() != stored_checksum {
            return Err(CheckpointError::ChecksumMismatch);
        }

        Ok(checkpoint)
    }

    /// Verifies this checkpoint's recorded task set is still a subset of a
    /// resuming DAG's task ids, catching drift between the DAG definition
    /// and what was checkpointed.
    pub fn verify_against(&self, current_task_ids: &[TaskId]) -> Result<(), CheckpointError> {
        let current: std::collections::HashSet<&TaskId> = current_task_ids.iter().collect();
        if self.state.tasks.iter().all(|r| current.contains(&r.task_id)) {
            Ok(())
        } else {
            Err(CheckpointError::GraphDrift)
        }
    }
}

/// Storage seam for checkpoints. One in-memory implementation ships;
/// real deployments back this with a file or database.
pub trait CheckpointStorage: Send + Sync {
    fn store(&self, checkpoint: &WorkflowCheckpoint) -> Result<(), CheckpointError>;
    fn get(&self, workflow_id: &str, layer_index: usize) -> Result<WorkflowCheckpoint, CheckpointError>;
    fn get_latest(&self, workflow_id: &str) -> Result<WorkflowCheckpoint, CheckpointError>;
    fn list_by_workflow(&self, workflow_id: &str) -> Vec<usize>;
    fn delete(&self, workflow_id: &str, layer_index: usize) -> Result<(), CheckpointError>;
    /// Keeps only the most recent `keep` checkpoints for `workflow_id`.
    fn prune(&self, workflow_id: &str, keep: usize);
}

/// Encodes and stores checkpoints in memory, keyed by `(workflow_id,
/// layer_index)`.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    entries: RwLock<HashMap<(String, usize), Vec<u8>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStorage for InMemoryCheckpointStore {
    fn store(&self, checkpoint: &WorkflowCheckpoint) -> Result<(), CheckpointError> {
        let encoded = checkpoint.encode()?;
        self.entries
            .write()
            .expect("checkpoint store lock poisoned")
            .insert((checkpoint.workflow_id.clone(), checkpoint.layer_index), encoded);
        Ok(())
    }

    fn get(&self, workflow_id: &str, layer_index: usize) -> Result<WorkflowCheckpoint, CheckpointError> {
        let entries = self.entries.read().expect("checkpoint store lock poisoned");
        let bytes = entries
            .get(&(workflow_id.to_string(), layer_index))
            .ok_or_else(|| CheckpointError::NotFound(workflow_id.to_string()))?;
        WorkflowCheckpoint::decode(bytes)
    }

    fn get_latest(&self, workflow_id: &str) -> Result<WorkflowCheckpoint, CheckpointError> {
        let latest = self
            .list_by_workflow(workflow_id)
            .into_iter()
            .max()
            .ok_or_else(|| CheckpointError::NotFound(workflow_id.to_string()))?;
        self.get(workflow_id, latest)
    }

    fn list_by_workflow(&self, workflow_id: &str) -> Vec<usize> {
        self.entries
            .read()
            .expect("checkpoint store lock poisoned")
            .keys()
            .filter(|(w, _)| w == workflow_id)
            .map(|(_, layer)| *layer)
            .collect()
    }

    fn delete(&self, workflow_id: &str, layer_index: usize) -> Result<(), CheckpointError> {
        self.entries
            .write()
            .expect("checkpoint store lock poisoned")
            .remove(&(workflow_id.to_string(), layer_index));
        Ok(())
    }

    fn prune(&self, workflow_id: &str, keep: usize) {
        let mut layers = self.list_by_workflow(workflow_id);
        if layers.len() <= keep {
            return;
        }
        layers.sort_unstable_by(|a, b| b.cmp(a));
        for layer in layers.into_iter().skip(keep) {
            let _ = self.delete(workflow_id, layer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::state::{update_state, StateUpdate};
    use crate::workflow::task::TaskResult;
    use serde_json::Value;

    fn sample_checkpoint(workflow_id: &str, layer: usize) -> WorkflowCheckpoint {
        let state = WorkflowState::new(workflow_id).unwrap();
        let state = update_state(
            &state,
            StateUpdate::with_task(TaskResult::success(TaskId::new("t1"), Value::from(1), 5)),
        )
        .unwrap();
        WorkflowCheckpoint::new(workflow_id, layer, state)
    }

    #[test]
    fn encode_decode_roundtrips() {
        let checkpoint = sample_checkpoint("w1", 0);
        let encoded = checkpoint.encode().unwrap();
        let decoded = WorkflowCheckpoint::decode(&encoded).unwrap();
        assert_eq!(decoded.workflow_id, "w1");
        assert_eq!(decoded.layer_index, 0);
        assert_eq!(decoded.state.tasks.len(), 1);
    }

    #[test]
    fn decode_rejects_unsupported_version() {
        let mut encoded = sample_checkpoint("w1", 0).encode().unwrap();
        encoded[0] = 99;
        assert!(matches!(
            WorkflowCheckpoint::decode(&encoded),
            Err(CheckpointError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn decode_rejects_corrupted_checksum() {
        let checkpoint = sample_checkpoint("w1", 0);
        let mut encoded = checkpoint.encode().unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(WorkflowCheckpoint::decode(&encoded).is_err());
    }

    #[test]
    fn verify_against_detects_graph_drift() {
        let checkpoint = sample_checkpoint("w1", 0);
        assert!(checkpoint.verify_against(&[TaskId::new("t1"), TaskId::new("t2")]).is_ok());
        assert!(matches!(
            checkpoint.verify_against(&[TaskId::new("t2")]),
            Err(CheckpointError::GraphDrift)
        ));
    }

    #[test]
    fn store_and_get_latest() {
        let store = InMemoryCheckpointStore::new();
        store.store(&sample_checkpoint("w1", 0)).unwrap();
        store.store(&sample_checkpoint("w1", 1)).unwrap();
        store.store(&sample_checkpoint("w1", 2)).unwrap();

        let latest = store.get_latest("w1").unwrap();
        assert_eq!(latest.layer_index, 2);
    }

    #[test]
    fn get_latest_missing_workflow_errors() {
        let store = InMemoryCheckpointStore::new();
        assert!(matches!(store.get_latest("ghost"), Err(CheckpointError::NotFound(_))));
    }

    #[test]
    fn prune_keeps_only_most_recent() {
        let store = InMemoryCheckpointStore::new();
        for layer in 0..10 {
            store.store(&sample_checkpoint("w1", layer)).unwrap();
        }
        store.prune("w1", 3);

        let mut remaining = store.list_by_workflow("w1");
        remaining.sort_unstable();
        assert_eq!(remaining, vec![7, 8, 9]);
    }

    #[test]
    fn delete_removes_single_checkpoint() {
        let store = InMemoryCheckpointStore::new();
        store.store(&sample_checkpoint("w1", 0)).unwrap();
        store.delete("w1", 0).unwrap();
        assert!(store.get("w1", 0).is_err());
    }
}
