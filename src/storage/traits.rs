use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::batching::UpsertStatement;
use crate::cdc::{ChangeLogEntry, EntityKey};
use crate::record::Record;

#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend unreachable. Retried by the caller, never fatal.
    #[error("Connection error: {0}")]
    Connection(String),
    /// Statement failed (malformed query, constraint violation, conflict).
    #[error("Query error: {0}")]
    Query(String),
    #[error("Operation '{operation}' timed out after {after:?}")]
    Timeout { operation: String, after: Duration },
    /// Records in one chunk cannot be bound into one statement.
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),
    #[error("Invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),
}

impl StorageError {
    /// Connectivity failures are worth retrying; everything else needs a new cycle.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

/// Read side: the source database holding the table, its change log and
/// the refresh procedure.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Ensure a live connection exists, establishing one if needed.
    async fn connect(&self) -> Result<(), StorageError>;

    /// Every row of the source table (initial full sync).
    async fn fetch_all_rows(&self) -> Result<Vec<Record>, StorageError>;

    /// Change-log rows not yet marked processed, in log order.
    async fn fetch_unprocessed_changes(&self) -> Result<Vec<ChangeLogEntry>, StorageError>;

    /// Materialize the denormalized row for one entity.
    async fn refresh_entity(&self, key: &EntityKey) -> Result<(), StorageError>;

    /// Source rows whose `unique_id` is in `ids`.
    async fn fetch_rows_by_unique_ids(&self, ids: &[String]) -> Result<Vec<Record>, StorageError>;

    /// Flag change-log rows as processed. Returns rows affected.
    async fn mark_processed(&self, log_ids: &[i64]) -> Result<u64, StorageError>;
}

/// Something that can run target-side writes: a pooled connection or an
/// open transaction.
#[async_trait]
pub trait TargetWriter: Send {
    /// Run one multi-row upsert. Returns rows affected.
    async fn execute_upsert(&mut self, statement: &UpsertStatement) -> Result<u64, StorageError>;

    /// Delete rows of `table` whose `unique_id` is in `ids`. Returns rows affected.
    async fn delete_unique_ids(&mut self, table: &str, ids: &[String]) -> Result<u64, StorageError>;
}

/// A target-side transaction. Dropping it without `commit` rolls it back.
#[async_trait]
pub trait TargetTransaction: TargetWriter {
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;
    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}

/// Write side: the target database pool.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// A pooled connection for non-transactional writes.
    async fn writer(&self) -> Result<Box<dyn TargetWriter>, StorageError>;

    /// Begin a transaction on a pooled connection.
    async fn begin(&self) -> Result<Box<dyn TargetTransaction>, StorageError>;
}
