//! Status Polling - Observing Fire-and-Forget Outcomes
//!
//! Fire-and-forget commands acknowledge immediately and never publish a
//! response, so their outcome is observed here instead: the runtime keeps a
//! progress snapshot for the most recent long-running operation, and
//! `InstanceRuntime::status()` combines it with the current lease record.
//! The finished snapshot is retained so a poller that arrives after
//! completion still sees what happened.

use serde::{Deserialize, Serialize};
use tickhouse_core::ConnectionState;
use tickhouse_registry::InstanceLease;
use tokio::sync::RwLock;

/// Progress counters for one long-running operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationProgress {
    /// Operation name (e.g. "force-backfill")
    pub operation: String,

    /// Total items to process
    pub total: u32,

    /// Items processed successfully
    pub completed: u32,

    /// Items that failed
    pub failed: u32,

    /// Item currently being worked on; `None` once finished
    pub current_item: Option<String>,
}

impl OperationProgress {
    /// Percent complete, counting failures as processed.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (((self.completed + self.failed) as u64 * 100) / self.total as u64) as u8
    }

    /// Whether every item has been processed.
    pub fn is_finished(&self) -> bool {
        self.completed + self.failed >= self.total
    }
}

/// Shared progress snapshot for the runtime's long-running operations.
#[derive(Default)]
pub struct ProgressTracker {
    current: RwLock<Option<OperationProgress>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a new operation, replacing any previous snapshot.
    pub async fn begin(&self, operation: impl Into<String>, total: u32) {
        *self.current.write().await = Some(OperationProgress {
            operation: operation.into(),
            total,
            completed: 0,
            failed: 0,
            current_item: None,
        });
    }

    pub async fn working_on(&self, item: &str) {
        if let Some(progress) = self.current.write().await.as_mut() {
            progress.current_item = Some(item.to_string());
        }
    }

    pub async fn item_done(&self) {
        if let Some(progress) = self.current.write().await.as_mut() {
            progress.completed += 1;
        }
    }

    pub async fn item_failed(&self) {
        if let Some(progress) = self.current.write().await.as_mut() {
            progress.failed += 1;
        }
    }

    /// Mark the operation finished; the snapshot stays readable.
    pub async fn finish(&self) {
        if let Some(progress) = self.current.write().await.as_mut() {
            progress.current_item = None;
        }
    }

    pub async fn snapshot(&self) -> Option<OperationProgress> {
        self.current.read().await.clone()
    }
}

/// Read-only status report for dashboards and post-acknowledgment polling.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatus {
    pub exchange_id: u32,

    /// This process's local lifecycle state
    pub connection_state: ConnectionState,

    /// Lease as currently visible in the store; `None` means free.
    /// (A store outage surfaces as an error from `status()`, never as
    /// `None`.)
    pub lease: Option<InstanceLease>,

    /// Most recent long-running operation, if any
    pub progress: Option<OperationProgress>,
}
