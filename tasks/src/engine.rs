//! Task engine (C11): single-writer-per-(dataset_id, task_kind) progress
//! gating for background work (embed, reduce, near_duplicate, auto_tag).
//! Mirrors `common::storage::db::Database`'s choice of `tokio::sync::Mutex`
//! for state shared between the request-handler and background-task
//! concurrency classes (§5).

use std::collections::HashMap;
use std::sync::Arc;

use common::error::AppError;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::state::{self, TaskMachine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Embed,
    Reduce,
    NearDuplicate,
    AutoTag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Complete,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgress {
    pub status: TaskStatus,
    pub processed: u64,
    pub total: u64,
    pub message: Option<String>,
}

impl TaskProgress {
    fn running(total: u64) -> Self {
        Self {
            status: TaskStatus::Running,
            processed: 0,
            total,
            message: None,
        }
    }
}

struct TaskSlot {
    progress: Mutex<TaskProgress>,
}

/// Keyed by (dataset_id, task_kind). The engine is the single writer of
/// each slot's progress record; readers take a snapshot under the lock,
/// never observing a torn write.
#[derive(Clone, Default)]
pub struct TaskEngine {
    slots: Arc<Mutex<HashMap<(String, TaskKind), Arc<TaskSlot>>>>,
}

impl TaskEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically checks-and-sets `status=running` for (dataset_id, kind);
    /// rejects with `Conflict` if a run is already in flight for that key.
    pub async fn start(&self, dataset_id: &str, kind: TaskKind, total: u64) -> Result<TaskHandle, AppError> {
        let key = (dataset_id.to_string(), kind);
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get(&key) {
            if slot.progress.lock().await.status == TaskStatus::Running {
                return Err(AppError::Conflict(format!(
                    "{kind:?} already running for dataset {dataset_id}"
                )));
            }
        }
        let slot = Arc::new(TaskSlot {
            progress: Mutex::new(TaskProgress::running(total)),
        });
        slots.insert(key, slot.clone());
        Ok(TaskHandle {
            slot,
            machine: Some(state::start()),
        })
    }

    /// Snapshot of the progress record for (dataset_id, kind), or `None`
    /// if that task has never run.
    pub async fn snapshot(&self, dataset_id: &str, kind: TaskKind) -> Option<TaskProgress> {
        let slots = self.slots.lock().await;
        let slot = slots.get(&(dataset_id.to_string(), kind))?;
        Some(slot.progress.lock().await.clone())
    }
}

/// Owns the slot plus the typestate machine for one run; `update` is
/// called at least once per batch, `complete`/`fail` consume the handle
/// to drive the terminal transition.
pub struct TaskHandle {
    slot: Arc<TaskSlot>,
    machine: Option<TaskMachine<(), state::Running>>,
}

impl TaskHandle {
    pub async fn update(&self, processed: u64, message: Option<String>) {
        let mut progress = self.slot.progress.lock().await;
        progress.processed = processed;
        if message.is_some() {
            progress.message = message;
        }
    }

    pub async fn complete(mut self, message: Option<String>) {
        if let Some(machine) = self.machine.take() {
            let _ = machine.complete();
        }
        let mut progress = self.slot.progress.lock().await;
        progress.status = TaskStatus::Complete;
        progress.processed = progress.total;
        if message.is_some() {
            progress.message = message;
        }
    }

    pub async fn fail(mut self, message: impl Into<String>) {
        if let Some(machine) = self.machine.take() {
            let _ = machine.fail();
        }
        let mut progress = self.slot.progress.lock().await;
        progress.status = TaskStatus::Error;
        progress.message = Some(message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_launch_conflicts_while_running() {
        let engine = TaskEngine::new();
        let _handle = engine.start("ds1", TaskKind::Embed, 10).await.expect("first launch");
        let err = engine.start("ds1", TaskKind::Embed, 10).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn relaunch_allowed_after_completion() {
        let engine = TaskEngine::new();
        let handle = engine.start("ds1", TaskKind::Embed, 10).await.expect("first launch");
        handle.complete(None).await;
        assert!(engine.start("ds1", TaskKind::Embed, 10).await.is_ok());
    }

    #[tokio::test]
    async fn snapshot_reflects_progress_updates() {
        let engine = TaskEngine::new();
        let handle = engine.start("ds1", TaskKind::Reduce, 100).await.expect("launch");
        handle.update(40, Some("batch 1".to_string())).await;
        let snap = engine.snapshot("ds1", TaskKind::Reduce).await.expect("snapshot");
        assert_eq!(snap.processed, 40);
        assert_eq!(snap.status, TaskStatus::Running);
    }
}
