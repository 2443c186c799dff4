// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory source and target stores.
//!
//! These back the unit and scenario tests. Both sides support failure
//! injection per operation name, so error paths can be driven precisely:
//!
//! | Store          | Operations                                                                 |
//! |----------------|----------------------------------------------------------------------------|
//! | `MemorySource` | `connect`, `fetch_all`, `fetch_changes`, `refresh`, `fetch_by_ids`, `mark_processed` |
//! | `MemoryTarget` | `begin`, `upsert`, `delete`, `commit`                                      |
//!
//! The source models the materialized-row pattern: base data is staged with
//! [`MemorySource::stage_row`] and only becomes visible in the synchronized
//! table once [`SourceStore::refresh_entity`] runs for its key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::traits::{SourceStore, StorageError, TargetStore, TargetTransaction, TargetWriter};
use crate::batching::UpsertStatement;
use crate::cdc::{ChangeLogEntry, ChangeType, EntityKey};
use crate::record::{Record, UNIQUE_ID_COLUMN};

/// Failure returned by an injected operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    /// Fails with [`StorageError::Connection`]
    Connection,
    /// Fails with [`StorageError::Query`]
    Query,
    /// Never completes (exercises timeouts)
    Stall,
}

#[derive(Default)]
struct FailureInjector {
    failures: Mutex<HashMap<&'static str, InjectedFailure>>,
    calls: DashMap<&'static str, usize>,
}

impl FailureInjector {
    fn set(&self, operation: &'static str, failure: InjectedFailure) {
        self.failures.lock().insert(operation, failure);
    }

    fn clear(&self) {
        self.failures.lock().clear();
    }

    fn calls(&self, operation: &str) -> usize {
        self.calls.get(operation).map(|c| *c).unwrap_or(0)
    }

    async fn check(&self, operation: &'static str) -> Result<(), StorageError> {
        *self.calls.entry(operation).or_insert(0) += 1;
        let failure = self.failures.lock().get(operation).copied();
        match failure {
            None => Ok(()),
            Some(InjectedFailure::Connection) => Err(StorageError::Connection(format!(
                "injected connection failure in {}",
                operation
            ))),
            Some(InjectedFailure::Query) => {
                Err(StorageError::Query(format!("injected failure in {}", operation)))
            }
            Some(InjectedFailure::Stall) => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SOURCE
// ═══════════════════════════════════════════════════════════════════════════

struct LogRow {
    entry: ChangeLogEntry,
    processed: bool,
}

/// In-memory [`SourceStore`].
pub struct MemorySource {
    /// Synchronized (materialized) table, in insertion order
    table: Mutex<Vec<Record>>,
    /// Base data the refresh procedure materializes from
    base: DashMap<String, Record>,
    log: Mutex<Vec<LogRow>>,
    next_log_id: AtomicI64,
    refreshed: Mutex<Vec<EntityKey>>,
    unavailable_for: AtomicUsize,
    failures: FailureInjector,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Vec::new()),
            base: DashMap::new(),
            log: Mutex::new(Vec::new()),
            next_log_id: AtomicI64::new(1),
            refreshed: Mutex::new(Vec::new()),
            unavailable_for: AtomicUsize::new(0),
            failures: FailureInjector::default(),
        }
    }

    /// Source preloaded with materialized rows.
    #[must_use]
    pub fn with_rows(rows: impl IntoIterator<Item = Record>) -> Self {
        let source = Self::new();
        for row in rows {
            source.insert_row(row);
        }
        source
    }

    /// Put a row into both the base data and the synchronized table.
    pub fn insert_row(&self, row: Record) {
        if let Some(id) = row.unique_id() {
            self.base.insert(id.to_string(), row.clone());
        }
        self.materialize(row);
    }

    /// Change base data only. Visible after the next refresh of its key.
    pub fn stage_row(&self, row: Record) {
        if let Some(id) = row.unique_id() {
            self.base.insert(id.to_string(), row);
        }
    }

    /// Remove base data only. The row disappears on the next refresh.
    pub fn unstage_row(&self, unique_id: &str) {
        self.base.remove(unique_id);
    }

    /// Append a change-log row. Returns its LogID.
    pub fn log_change(&self, type_id: i32, store_id: Option<i32>, change_type: ChangeType) -> i64 {
        let log_id = self.next_log_id.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(LogRow {
            entry: ChangeLogEntry::new(log_id, EntityKey::new(type_id, store_id), change_type),
            processed: false,
        });
        log_id
    }

    /// Fail the next `attempts` connection attempts.
    pub fn set_unavailable(&self, attempts: usize) {
        self.unavailable_for.store(attempts, Ordering::SeqCst);
    }

    pub fn fail_operation(&self, operation: &'static str, failure: InjectedFailure) {
        self.failures.set(operation, failure);
    }

    pub fn clear_failures(&self) {
        self.failures.clear();
    }

    /// Times `operation` was invoked, failed or not.
    #[must_use]
    pub fn calls(&self, operation: &str) -> usize {
        self.failures.calls(operation)
    }

    #[must_use]
    pub fn table_rows(&self) -> Vec<Record> {
        self.table.lock().clone()
    }

    #[must_use]
    pub fn refreshed_keys(&self) -> Vec<EntityKey> {
        self.refreshed.lock().clone()
    }

    #[must_use]
    pub fn processed_log_ids(&self) -> Vec<i64> {
        self.log
            .lock()
            .iter()
            .filter(|r| r.processed)
            .map(|r| r.entry.log_id)
            .collect()
    }

    #[must_use]
    pub fn unprocessed_count(&self) -> usize {
        self.log.lock().iter().filter(|r| !r.processed).count()
    }

    fn materialize(&self, row: Record) {
        let mut table = self.table.lock();
        match table.iter_mut().find(|r| r.unique_id() == row.unique_id()) {
            Some(existing) => *existing = row,
            None => table.push(row),
        }
    }
}

#[async_trait]
impl SourceStore for MemorySource {
    async fn connect(&self) -> Result<(), StorageError> {
        let failing = self
            .unavailable_for
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        self.failures.check("connect").await?;
        if failing {
            return Err(StorageError::Connection("source unavailable".into()));
        }
        Ok(())
    }

    async fn fetch_all_rows(&self) -> Result<Vec<Record>, StorageError> {
        self.failures.check("fetch_all").await?;
        Ok(self.table_rows())
    }

    async fn fetch_unprocessed_changes(&self) -> Result<Vec<ChangeLogEntry>, StorageError> {
        self.failures.check("fetch_changes").await?;
        Ok(self
            .log
            .lock()
            .iter()
            .filter(|r| !r.processed)
            .map(|r| r.entry)
            .collect())
    }

    async fn refresh_entity(&self, key: &EntityKey) -> Result<(), StorageError> {
        self.failures.check("refresh").await?;
        self.refreshed.lock().push(*key);

        let id = key.unique_id();
        let staged = self.base.get(&id).map(|r| r.value().clone());
        match staged {
            Some(row) => self.materialize(row),
            None => self.table.lock().retain(|r| r.unique_id() != Some(id.as_str())),
        }
        Ok(())
    }

    async fn fetch_rows_by_unique_ids(&self, ids: &[String]) -> Result<Vec<Record>, StorageError> {
        self.failures.check("fetch_by_ids").await?;
        Ok(self
            .table
            .lock()
            .iter()
            .filter(|r| r.unique_id().is_some_and(|id| ids.iter().any(|wanted| wanted == id)))
            .cloned()
            .collect())
    }

    async fn mark_processed(&self, log_ids: &[i64]) -> Result<u64, StorageError> {
        self.failures.check("mark_processed").await?;
        let mut affected = 0;
        for row in self.log.lock().iter_mut() {
            if log_ids.contains(&row.entry.log_id) {
                row.processed = true;
                affected += 1;
            }
        }
        Ok(affected)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TARGET
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct TargetInner {
    tables: DashMap<String, DashMap<String, Record>>,
    statements: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    failures: FailureInjector,
}

enum Write {
    Upsert { table: String, rows: Vec<Record>, do_nothing: bool },
    Delete { table: String, ids: Vec<String> },
}

impl TargetInner {
    fn apply(&self, write: Write) -> u64 {
        match write {
            Write::Upsert { table, rows, do_nothing } => {
                let table = self.tables.entry(table).or_default();
                let mut affected = 0;
                for row in rows {
                    let Some(id) = row.unique_id().map(str::to_string) else {
                        continue;
                    };
                    if do_nothing && table.contains_key(&id) {
                        continue;
                    }
                    table.insert(id, row);
                    affected += 1;
                }
                affected
            }
            Write::Delete { table, ids } => match self.tables.get(&table) {
                Some(table) => ids.iter().filter(|id| table.remove(*id).is_some()).count() as u64,
                None => 0,
            },
        }
    }
}

fn upsert_write(statement: &UpsertStatement) -> Result<Write, StorageError> {
    if !statement.columns.iter().any(|c| c == UNIQUE_ID_COLUMN) {
        return Err(StorageError::Query(format!(
            "column \"{}\" missing from upsert",
            UNIQUE_ID_COLUMN
        )));
    }
    let table = statement
        .sql
        .split_whitespace()
        .nth(2)
        .unwrap_or_default()
        .to_string();
    let rows = (0..statement.rows)
        .map(|i| {
            Record::from_pairs(
                statement
                    .columns
                    .iter()
                    .cloned()
                    .zip(statement.row(i).iter().cloned()),
            )
        })
        .collect();
    Ok(Write::Upsert {
        table,
        rows,
        do_nothing: statement.sql.ends_with("DO NOTHING"),
    })
}

/// In-memory [`TargetStore`]. Transactions stage writes until commit.
#[derive(Clone, Default)]
pub struct MemoryTarget {
    inner: Arc<TargetInner>,
}

impl MemoryTarget {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a committed row.
    pub fn insert_row(&self, table: &str, row: Record) {
        self.inner.apply(Write::Upsert {
            table: table.to_string(),
            rows: vec![row],
            do_nothing: false,
        });
    }

    #[must_use]
    pub fn get(&self, table: &str, unique_id: &str) -> Option<Record> {
        self.inner
            .tables
            .get(table)
            .and_then(|t| t.get(unique_id).map(|r| r.value().clone()))
    }

    #[must_use]
    pub fn row_count(&self, table: &str) -> usize {
        self.inner.tables.get(table).map(|t| t.len()).unwrap_or(0)
    }

    /// Committed unique ids of `table`, sorted.
    #[must_use]
    pub fn unique_ids(&self, table: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .tables
            .get(table)
            .map(|t| t.iter().map(|e| e.key().clone()).collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Upsert statements executed, committed or not.
    #[must_use]
    pub fn statement_count(&self) -> usize {
        self.inner.statements.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.inner.commits.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn rollback_count(&self) -> usize {
        self.inner.rollbacks.load(Ordering::SeqCst)
    }

    pub fn fail_operation(&self, operation: &'static str, failure: InjectedFailure) {
        self.inner.failures.set(operation, failure);
    }

    pub fn clear_failures(&self) {
        self.inner.failures.clear();
    }

    #[must_use]
    pub fn calls(&self, operation: &str) -> usize {
        self.inner.failures.calls(operation)
    }
}

#[async_trait]
impl TargetStore for MemoryTarget {
    async fn writer(&self) -> Result<Box<dyn TargetWriter>, StorageError> {
        Ok(Box::new(MemoryWriter {
            inner: self.inner.clone(),
        }))
    }

    async fn begin(&self) -> Result<Box<dyn TargetTransaction>, StorageError> {
        self.inner.failures.check("begin").await?;
        Ok(Box::new(MemoryTransaction {
            inner: self.inner.clone(),
            staged: Vec::new(),
            finished: false,
        }))
    }
}

struct MemoryWriter {
    inner: Arc<TargetInner>,
}

#[async_trait]
impl TargetWriter for MemoryWriter {
    async fn execute_upsert(&mut self, statement: &UpsertStatement) -> Result<u64, StorageError> {
        self.inner.failures.check("upsert").await?;
        let write = upsert_write(statement)?;
        self.inner.statements.fetch_add(1, Ordering::SeqCst);
        Ok(self.inner.apply(write))
    }

    async fn delete_unique_ids(&mut self, table: &str, ids: &[String]) -> Result<u64, StorageError> {
        self.inner.failures.check("delete").await?;
        Ok(self.inner.apply(Write::Delete {
            table: table.to_string(),
            ids: ids.to_vec(),
        }))
    }
}

struct MemoryTransaction {
    inner: Arc<TargetInner>,
    staged: Vec<Write>,
    finished: bool,
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.inner.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl TargetWriter for MemoryTransaction {
    async fn execute_upsert(&mut self, statement: &UpsertStatement) -> Result<u64, StorageError> {
        self.inner.failures.check("upsert").await?;
        let write = upsert_write(statement)?;
        self.inner.statements.fetch_add(1, Ordering::SeqCst);
        self.staged.push(write);
        Ok(statement.rows as u64)
    }

    async fn delete_unique_ids(&mut self, table: &str, ids: &[String]) -> Result<u64, StorageError> {
        self.inner.failures.check("delete").await?;
        let present = self
            .inner
            .tables
            .get(table)
            .map(|t| ids.iter().filter(|id| t.contains_key(*id)).count() as u64)
            .unwrap_or(0);
        self.staged.push(Write::Delete {
            table: table.to_string(),
            ids: ids.to_vec(),
        });
        Ok(present)
    }
}

#[async_trait]
impl TargetTransaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let mut this = self;
        this.inner.failures.check("commit").await?;
        for write in std::mem::take(&mut this.staged) {
            this.inner.apply(write);
        }
        this.finished = true;
        this.inner.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        let mut this = self;
        this.staged.clear();
        this.finished = true;
        this.inner.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SqlValue;

    fn product(id: &str, name: &str) -> Record {
        Record::new().with(UNIQUE_ID_COLUMN, id).with("name", name)
    }

    fn statement(rows: &[Record]) -> UpsertStatement {
        UpsertStatement::build("products", rows).unwrap()
    }

    #[tokio::test]
    async fn test_source_refresh_materializes_staged_row() {
        let source = MemorySource::new();
        source.stage_row(product("7-NULL", "Tea"));
        assert!(source.fetch_all_rows().await.unwrap().is_empty());

        source.refresh_entity(&EntityKey::new(7, None)).await.unwrap();

        let rows = source.fetch_rows_by_unique_ids(&["7-NULL".to_string()]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&SqlValue::Text("Tea".into())));
        assert_eq!(source.refreshed_keys(), vec![EntityKey::new(7, None)]);
    }

    #[tokio::test]
    async fn test_source_refresh_of_removed_base_drops_row() {
        let source = MemorySource::with_rows([product("7-3", "Tea")]);
        source.unstage_row("7-3");

        source.refresh_entity(&EntityKey::new(7, Some(3))).await.unwrap();

        assert!(source.table_rows().is_empty());
    }

    #[tokio::test]
    async fn test_source_change_log_lifecycle() {
        let source = MemorySource::new();
        let first = source.log_change(7, None, ChangeType::Update);
        let second = source.log_change(7, Some(3), ChangeType::Delete);

        let pending = source.fetch_unprocessed_changes().await.unwrap();
        assert_eq!(pending.iter().map(|e| e.log_id).collect::<Vec<_>>(), vec![first, second]);

        assert_eq!(source.mark_processed(&[first]).await.unwrap(), 1);
        assert_eq!(source.unprocessed_count(), 1);
        assert_eq!(source.processed_log_ids(), vec![first]);
    }

    #[tokio::test]
    async fn test_source_unavailable_then_recovers() {
        let source = MemorySource::new();
        source.set_unavailable(2);

        assert!(source.connect().await.unwrap_err().is_transient());
        assert!(source.connect().await.is_err());
        assert!(source.connect().await.is_ok());
        assert_eq!(source.calls("connect"), 3);
    }

    #[tokio::test]
    async fn test_writer_applies_immediately() {
        let target = MemoryTarget::new();
        let mut writer = target.writer().await.unwrap();

        writer
            .execute_upsert(&statement(&[product("1-1", "a"), product("2-1", "b")]))
            .await
            .unwrap();

        assert_eq!(target.unique_ids("products"), vec!["1-1", "2-1"]);
        assert_eq!(target.statement_count(), 1);
    }

    #[tokio::test]
    async fn test_transaction_invisible_until_commit() {
        let target = MemoryTarget::new();
        target.insert_row("products", product("7-3", "old"));

        let mut tx = target.begin().await.unwrap();
        tx.delete_unique_ids("products", &["7-3".to_string()]).await.unwrap();
        tx.execute_upsert(&statement(&[product("7-NULL", "new")])).await.unwrap();
        assert_eq!(target.unique_ids("products"), vec!["7-3"]);

        tx.commit().await.unwrap();
        assert_eq!(target.unique_ids("products"), vec!["7-NULL"]);
        assert_eq!(target.commit_count(), 1);
        assert_eq!(target.rollback_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let target = MemoryTarget::new();
        target.insert_row("products", product("7-3", "old"));

        {
            let mut tx = target.begin().await.unwrap();
            tx.delete_unique_ids("products", &["7-3".to_string()]).await.unwrap();
        }

        assert_eq!(target.unique_ids("products"), vec!["7-3"]);
        assert_eq!(target.rollback_count(), 1);
    }

    #[tokio::test]
    async fn test_upsert_updates_existing_row() {
        let target = MemoryTarget::new();
        target.insert_row("products", product("1-1", "old"));
        let mut writer = target.writer().await.unwrap();

        writer.execute_upsert(&statement(&[product("1-1", "new")])).await.unwrap();

        let row = target.get("products", "1-1").unwrap();
        assert_eq!(row.get("name"), Some(&SqlValue::Text("new".into())));
        assert_eq!(target.row_count("products"), 1);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let target = MemoryTarget::new();
        target.fail_operation("upsert", InjectedFailure::Query);
        let mut writer = target.writer().await.unwrap();

        let err = writer.execute_upsert(&statement(&[product("1-1", "a")])).await.unwrap_err();
        assert!(matches!(err, StorageError::Query(_)));
        assert_eq!(target.row_count("products"), 0);

        target.clear_failures();
        assert!(writer.execute_upsert(&statement(&[product("1-1", "a")])).await.is_ok());
        assert_eq!(target.calls("upsert"), 2);
    }
}
