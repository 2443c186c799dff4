//! # CDC Sync Engine
//!
//! Continuously replicates one SQL Server table into one PostgreSQL table.
//!
//! ## Architecture
//!
//! The engine does a one-time full copy, then polls a change-log table that
//! the source system writes on every insert, update and delete:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Source: SQL Server                        │
//! │  • Materialized table (SELECT * for the full copy)         │
//! │  • SyncChangesLog (LogID, type_id, stor_id, ChangeType)    │
//! │  • Refresh procedure rebuilding one materialized row       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                   (poll every sync_interval_ms)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Change-Log Processor                      │
//! │  • Dedup per entity key, DELETE wins                       │
//! │  • Partition into updates and deletes                      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                  (one transaction per cycle)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Target: PostgreSQL                        │
//! │  • DELETE ... WHERE unique_id = ANY($1)                    │
//! │  • Throttled multi-row INSERT ... ON CONFLICT DO UPDATE    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Progress (`lastSyncTime`, `isInitialSyncDone`) is persisted to a small
//! JSON file after each committed cycle. Lifecycle, progress and error
//! notifications are broadcast to any number of observers.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cdc_sync_engine::{EventBroadcaster, SyncEngine, SyncEngineConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SyncEngineConfig::from_file("config.json").expect("config");
//!     config.validate().expect("valid config");
//!
//!     let events = EventBroadcaster::default();
//!     let engine = SyncEngine::from_config(config, events.clone()).expect("engine");
//!
//!     // Waits for SQL Server, then runs the full copy if needed
//!     engine.start().await.expect("start");
//!
//!     let cancel = CancellationToken::new();
//!     engine.run(cancel).await;
//!     engine.shutdown().await;
//! }
//! ```
//!
//! ## Delivery
//!
//! At-least-once. Every target write is keyed on `unique_id`, so a replayed
//! cycle converges to the same target content.
//!
//! ## Modules
//!
//! - [`coordinator`]: The [`SyncEngine`] state machine and its cycles
//! - [`cdc`]: Change-log entries and deduplication
//! - [`batching`]: Throttled multi-row upserts
//! - [`storage`]: Source/target traits and their SQL Server, PostgreSQL and in-memory backends
//! - [`state`]: Persisted sync progress
//! - [`events`]: Observer notifications
//! - [`resilience`]: Retry and timeouts

pub mod batching;
pub mod cdc;
pub mod config;
pub mod coordinator;
pub mod events;
pub mod metrics;
pub mod record;
pub mod resilience;
pub mod state;
pub mod storage;

pub use batching::{BatchUpserter, UpsertConfig, UpsertReport, UpsertStatement};
pub use cdc::{
    dedup, ChangeLogEntry, ChangeSet, ChangeType, DedupedItem, EntityKey, UnknownChangeType,
};
pub use config::{ConfigError, SourceConfig, SyncEngineConfig};
pub use coordinator::{CycleOutcome, EngineState, IncrementalSummary, SyncEngine};
pub use events::{EventAction, EventBroadcaster, SyncEvent, SyncKind};
pub use record::{Record, SqlNullType, SqlValue};
pub use resilience::retry::RetryConfig;
pub use state::{StateError, SyncState, SyncStateStore};
pub use storage::traits::{SourceStore, StorageError, TargetStore, TargetTransaction, TargetWriter};
