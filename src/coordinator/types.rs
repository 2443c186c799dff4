//! Public types for the sync engine coordinator.

use crate::events::SyncKind;

/// Engine lifecycle state.
///
/// Use [`super::SyncEngine::state()`] to check current state or
/// [`super::SyncEngine::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Just created, not yet started
    Disconnected,
    /// Waiting for the source database
    Connecting,
    /// Connected; the one-time full copy has not completed yet
    InitialSyncPending,
    /// Full copy in progress
    InitialSyncRunning,
    /// Waiting for the next poll
    Idle,
    /// Incremental cycle in progress
    PollingRunning,
    /// Graceful shutdown in progress
    ShuttingDown,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::InitialSyncPending => write!(f, "InitialSyncPending"),
            Self::InitialSyncRunning => write!(f, "InitialSyncRunning"),
            Self::Idle => write!(f, "Idle"),
            Self::PollingRunning => write!(f, "PollingRunning"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

/// What one incremental cycle applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IncrementalSummary {
    /// Change-log entries fetched
    pub log_entries: usize,
    /// Distinct keys to refresh and upsert
    pub updates: usize,
    /// Distinct keys to delete
    pub deletes: usize,
    /// Rows upserted into the target
    pub rows_upserted: usize,
    /// Rows the target reported deleted
    pub rows_deleted: u64,
    /// Change-log rows flagged processed
    pub marked_processed: u64,
}

/// Result of one [`super::SyncEngine::tick()`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Full copy completed
    InitialSync { rows: usize },
    /// Changes applied and committed
    Incremental(IncrementalSummary),
    /// Nothing in the change log
    NoChanges,
    /// Another cycle was in flight
    Skipped,
    /// The cycle failed; nothing was advanced
    Failed { kind: SyncKind, error: String },
}

impl CycleOutcome {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}
