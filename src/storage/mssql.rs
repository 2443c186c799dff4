// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL Server source backend.
//!
//! A single tiberius client is shared behind an async mutex and reused for
//! every operation. The client is established lazily on first use and
//! discarded whenever a statement fails at the transport level, so the next
//! caller reconnects.
//!
//! Statements issued per cycle:
//!
//! ```sql
//! SELECT LogID, type_id, stor_id, ChangeType FROM SyncChangesLog WHERE Processed = 0 ORDER BY LogID
//! EXEC sp_RefreshMaterializedRow @type_id = @P1, @stor_id = @P2
//! SELECT * FROM MaterializedProducts WHERE unique_id IN (@P1, @P2, ...)
//! UPDATE SyncChangesLog SET Processed = 1 WHERE LogID IN (@P1, @P2, ...)
//! ```

use std::ops::Range;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql, Row, SqlBrowser, ToSql};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, error, info, warn};

use super::traits::{SourceStore, StorageError};
use crate::cdc::{ChangeLogEntry, ChangeType, EntityKey};
use crate::config::{SourceConfig, SyncEngineConfig};
use crate::events::EventBroadcaster;
use crate::record::{Record, SqlNullType, SqlValue, UNIQUE_ID_COLUMN};

type SourceClient = Client<Compat<TcpStream>>;

/// SQL Server caps a request at 2100 parameters; stay well under it.
pub const MAX_IN_LIST_IDS: usize = 2000;

/// Owns the (re)established connection to the source database.
pub struct SourceConnectionManager {
    config: SourceConfig,
    events: EventBroadcaster,
    client: Mutex<Option<SourceClient>>,
}

impl SourceConnectionManager {
    pub fn new(config: SourceConfig, events: EventBroadcaster) -> Self {
        Self {
            config,
            events,
            client: Mutex::new(None),
        }
    }

    /// The live connection, establishing one if there is none.
    ///
    /// Failures are reported as an `error` event and returned as
    /// [`StorageError::Connection`]. The caller decides whether to retry.
    pub async fn acquire(&self) -> Result<SourceConnection<'_>, StorageError> {
        let mut guard = self.client.lock().await;

        if guard.is_none() {
            let start = Instant::now();
            match self.establish().await {
                Ok(client) => {
                    info!(
                        server = %self.config.server,
                        database = %self.config.database,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Connected to source database"
                    );
                    crate::metrics::set_backend_healthy("source", true);
                    self.events.info("Connected to source database (SQL Server).");
                    *guard = Some(client);
                }
                Err(e) => {
                    error!(server = %self.config.server, error = %e, "Source connection failed");
                    crate::metrics::set_backend_healthy("source", false);
                    crate::metrics::record_connection_error("source");
                    self.events.error("Source connection failed. Retrying.", &e);
                    return Err(e);
                }
            }
        }

        Ok(SourceConnection {
            guard,
            events: &self.events,
        })
    }

    /// Drop the current connection, if any.
    pub async fn disconnect(&self) {
        if self.client.lock().await.take().is_some() {
            info!("Source connection closed");
        }
    }

    async fn establish(&self) -> Result<SourceClient, StorageError> {
        let mut config = Config::new();
        config.host(&self.config.server);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(&self.config.user, &self.config.password));
        if self.config.options.trust_server_certificate {
            config.trust_cert();
        }
        config.encryption(if self.config.options.encrypt {
            EncryptionLevel::Required
        } else {
            EncryptionLevel::Off
        });
        if let Some(instance) = &self.config.options.instance_name {
            config.instance_name(instance);
        }

        let timeout = self.config.connect_timeout();
        let connect = async {
            let tcp = if self.config.options.instance_name.is_some() {
                TcpStream::connect_named(&config).await.map_err(connection_error)?
            } else {
                TcpStream::connect(config.get_addr())
                    .await
                    .map_err(|e| StorageError::Connection(e.to_string()))?
            };
            tcp.set_nodelay(true)
                .map_err(|e| StorageError::Connection(e.to_string()))?;
            Client::connect(config, tcp.compat_write())
                .await
                .map_err(connection_error)
        };

        match tokio::time::timeout(timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Connection(format!(
                "connection to {}:{} timed out after {:?}",
                self.config.server, self.config.port, timeout
            ))),
        }
    }
}

/// Exclusive use of the shared source client for one operation.
pub struct SourceConnection<'a> {
    guard: MutexGuard<'a, Option<SourceClient>>,
    events: &'a EventBroadcaster,
}

impl SourceConnection<'_> {
    fn client(&mut self) -> Result<&mut SourceClient, StorageError> {
        self.guard
            .as_mut()
            .ok_or_else(|| StorageError::Connection("source connection not established".into()))
    }

    /// Classify a statement outcome. Transport failures discard the client.
    fn check<T>(&mut self, result: tiberius::Result<T>) -> Result<T, StorageError> {
        match result {
            Ok(value) => Ok(value),
            Err(e) if is_connection_failure(&e) => {
                error!(error = %e, "Source connection error; discarding connection");
                crate::metrics::set_backend_healthy("source", false);
                crate::metrics::record_connection_error("source");
                self.events.error("Source connection error.", &e);
                *self.guard = None;
                Err(StorageError::Connection(e.to_string()))
            }
            Err(e) => Err(StorageError::Query(e.to_string())),
        }
    }
}

fn is_connection_failure(e: &tiberius::error::Error) -> bool {
    matches!(
        e,
        tiberius::error::Error::Io { .. }
            | tiberius::error::Error::Tls(_)
            | tiberius::error::Error::Protocol(_)
            | tiberius::error::Error::Routing { .. }
    )
}

fn connection_error(e: tiberius::error::Error) -> StorageError {
    StorageError::Connection(e.to_string())
}

/// [`SourceStore`] over SQL Server.
pub struct MssqlSource {
    manager: SourceConnectionManager,
    table: String,
    change_log_table: String,
    refresh_procedure: String,
    id_chunk_size: usize,
}

impl MssqlSource {
    /// Identifiers are taken as validated by [`SyncEngineConfig::validate`].
    pub fn new(config: &SyncEngineConfig, events: EventBroadcaster) -> Self {
        Self {
            manager: SourceConnectionManager::new(config.db_config.clone(), events),
            table: config.table_name.clone(),
            change_log_table: config.change_log_table.clone(),
            refresh_procedure: config.refresh_procedure.clone(),
            id_chunk_size: config.mark_processed_chunk_size.clamp(1, MAX_IN_LIST_IDS),
        }
    }

    pub fn connection_manager(&self) -> &SourceConnectionManager {
        &self.manager
    }

    async fn query_rows(
        &self,
        operation: &str,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> Result<Vec<Row>, StorageError> {
        let start = Instant::now();
        let mut conn = self.manager.acquire().await?;
        let client = conn.client()?;
        let result = match client.query(sql, params).await {
            Ok(stream) => stream.into_first_result().await,
            Err(e) => Err(e),
        };
        let result = conn.check(result);
        observe("source", operation, start, result.is_ok());
        result
    }

    async fn execute(&self, operation: &str, sql: &str, params: &[&dyn ToSql]) -> Result<u64, StorageError> {
        let start = Instant::now();
        let mut conn = self.manager.acquire().await?;
        let client = conn.client()?;
        let result = client.execute(sql, params).await.map(|r| r.total());
        let result = conn.check(result);
        observe("source", operation, start, result.is_ok());
        result
    }
}

fn observe(backend: &str, operation: &str, start: Instant, ok: bool) {
    crate::metrics::record_operation(backend, operation, if ok { "success" } else { "error" });
    crate::metrics::record_latency(backend, operation, start.elapsed());
}

/// `@P1, @P2, ..., @Pn`
fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("@P{}", i)).collect::<Vec<_>>().join(", ")
}

/// Split `len` ids into `<head> IN (@P1, ...)` statements of at most
/// `chunk_size` parameters, each paired with the slice range it binds.
fn in_list_statements(head: &str, len: usize, chunk_size: usize) -> Vec<(String, Range<usize>)> {
    let chunk_size = chunk_size.max(1);
    (0..len)
        .step_by(chunk_size)
        .map(|start| {
            let end = (start + chunk_size).min(len);
            (format!("{} IN ({})", head, placeholders(end - start)), start..end)
        })
        .collect()
}

#[async_trait]
impl SourceStore for MssqlSource {
    async fn connect(&self) -> Result<(), StorageError> {
        self.manager.acquire().await.map(|_| ())
    }

    async fn fetch_all_rows(&self) -> Result<Vec<Record>, StorageError> {
        let sql = format!("SELECT * FROM {}", self.table);
        let rows = self.query_rows("fetch_all", &sql, &[]).await?;
        info!(table = %self.table, rows = rows.len(), "Fetched source table");
        Ok(rows.into_iter().map(row_to_record).collect())
    }

    async fn fetch_unprocessed_changes(&self) -> Result<Vec<ChangeLogEntry>, StorageError> {
        let sql = format!(
            "SELECT LogID, type_id, stor_id, ChangeType FROM {} WHERE Processed = 0 ORDER BY LogID",
            self.change_log_table
        );
        let rows = self.query_rows("fetch_changes", &sql, &[]).await?;

        let mut entries = Vec::with_capacity(rows.len());
        let mut unknown = 0;
        for row in rows {
            match parse_change_row(&row_to_record(row)) {
                Ok(entry) => entries.push(entry),
                Err(reason) => {
                    unknown += 1;
                    warn!(reason = %reason, "Skipping unreadable change-log row");
                }
            }
        }
        if unknown > 0 {
            crate::metrics::record_cdc_unknown(unknown);
        }
        Ok(entries)
    }

    async fn refresh_entity(&self, key: &EntityKey) -> Result<(), StorageError> {
        let sql = format!("EXEC {} @type_id = @P1, @stor_id = @P2", self.refresh_procedure);
        debug!(key = %key, "Refreshing materialized row");
        self.execute("refresh", &sql, &[&key.type_id, &key.store_id]).await?;
        Ok(())
    }

    async fn fetch_rows_by_unique_ids(&self, ids: &[String]) -> Result<Vec<Record>, StorageError> {
        let head = format!("SELECT * FROM {} WHERE {}", self.table, UNIQUE_ID_COLUMN);
        let mut records = Vec::with_capacity(ids.len());
        for (sql, range) in in_list_statements(&head, ids.len(), self.id_chunk_size) {
            let params: Vec<&dyn ToSql> = ids[range].iter().map(|id| id as &dyn ToSql).collect();
            let rows = self.query_rows("fetch_by_ids", &sql, &params).await?;
            records.extend(rows.into_iter().map(row_to_record));
        }
        Ok(records)
    }

    async fn mark_processed(&self, log_ids: &[i64]) -> Result<u64, StorageError> {
        let head = format!("UPDATE {} SET Processed = 1 WHERE LogID", self.change_log_table);
        let mut affected = 0;
        for (sql, range) in in_list_statements(&head, log_ids.len(), self.id_chunk_size) {
            let params: Vec<&dyn ToSql> = log_ids[range].iter().map(|id| id as &dyn ToSql).collect();
            affected += self.execute("mark_processed", &sql, &params).await?;
        }
        Ok(affected)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ROW CONVERSION
// ═══════════════════════════════════════════════════════════════════════════

fn row_to_record(row: Row) -> Record {
    let names: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    Record::from_pairs(names.into_iter().zip(row.into_iter().map(column_to_value)))
}

/// Convert one SQL Server column value, keeping the type of NULLs.
fn column_to_value(data: ColumnData<'static>) -> SqlValue {
    match data {
        ColumnData::U8(v) => v.map_or(SqlValue::Null(SqlNullType::I16), |v| SqlValue::I16(v.into())),
        ColumnData::I16(v) => v.map_or(SqlValue::Null(SqlNullType::I16), SqlValue::I16),
        ColumnData::I32(v) => v.map_or(SqlValue::Null(SqlNullType::I32), SqlValue::I32),
        ColumnData::I64(v) => v.map_or(SqlValue::Null(SqlNullType::I64), SqlValue::I64),
        ColumnData::F32(v) => v.map_or(SqlValue::Null(SqlNullType::F32), SqlValue::F32),
        ColumnData::F64(v) => v.map_or(SqlValue::Null(SqlNullType::F64), SqlValue::F64),
        ColumnData::Bit(v) => v.map_or(SqlValue::Null(SqlNullType::Bool), SqlValue::Bool),
        ColumnData::String(v) => v.map_or(SqlValue::Null(SqlNullType::Text), |s| {
            SqlValue::Text(s.into_owned())
        }),
        ColumnData::Guid(v) => v.map_or(SqlValue::Null(SqlNullType::Uuid), SqlValue::Uuid),
        ColumnData::Binary(v) => v.map_or(SqlValue::Null(SqlNullType::Bytes), |b| {
            SqlValue::Bytes(b.into_owned())
        }),
        ColumnData::Numeric(v) => match v {
            None => SqlValue::Null(SqlNullType::Decimal),
            Some(n) => Decimal::try_from_i128_with_scale(n.value(), u32::from(n.scale()))
                .map(SqlValue::Decimal)
                .unwrap_or_else(|_| SqlValue::F64(f64::from(n))),
        },
        ColumnData::Xml(v) => v.map_or(SqlValue::Null(SqlNullType::Text), |x| {
            SqlValue::Text(x.into_owned().into_string())
        }),
        data @ (ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_)) => {
            temporal::<NaiveDateTime>(&data, SqlValue::DateTime, SqlNullType::DateTime)
        }
        data @ ColumnData::Date(_) => temporal::<NaiveDate>(&data, SqlValue::Date, SqlNullType::Date),
        data @ ColumnData::Time(_) => temporal::<NaiveTime>(&data, SqlValue::Time, SqlNullType::Time),
        data @ ColumnData::DateTimeOffset(_) => {
            temporal::<DateTime<Utc>>(&data, SqlValue::DateTimeUtc, SqlNullType::DateTimeUtc)
        }
    }
}

fn temporal<'a, T>(data: &'a ColumnData<'static>, wrap: fn(T) -> SqlValue, null: SqlNullType) -> SqlValue
where
    T: FromSql<'a>,
{
    match T::from_sql(data) {
        Ok(Some(v)) => wrap(v),
        Ok(None) => SqlValue::Null(null),
        Err(e) => {
            warn!(error = %e, "Unconvertible temporal value; writing NULL");
            SqlValue::Null(null)
        }
    }
}

fn integer(value: Option<&SqlValue>) -> Option<i64> {
    match value? {
        SqlValue::I16(v) => Some(i64::from(*v)),
        SqlValue::I32(v) => Some(i64::from(*v)),
        SqlValue::I64(v) => Some(*v),
        SqlValue::Decimal(d) if d.fract().is_zero() => d.to_i64(),
        _ => None,
    }
}

fn parse_change_row(record: &Record) -> Result<ChangeLogEntry, String> {
    let log_id = integer(record.get("LogID")).ok_or("missing LogID")?;
    let type_id = integer(record.get("type_id"))
        .and_then(|v| i32::try_from(v).ok())
        .ok_or_else(|| format!("LogID {}: missing type_id", log_id))?;
    // Only a real NULL means "no store"; anything else must be a valid id.
    let store_id = match record.get("stor_id") {
        Some(SqlValue::Null(_)) => None,
        value => Some(
            integer(value)
                .and_then(|v| i32::try_from(v).ok())
                .ok_or_else(|| format!("LogID {}: invalid stor_id", log_id))?,
        ),
    };
    let change_type = record
        .get("ChangeType")
        .and_then(SqlValue::as_str)
        .ok_or_else(|| format!("LogID {}: missing ChangeType", log_id))?
        .parse::<ChangeType>()
        .map_err(|e| format!("LogID {}: {}", log_id, e))?;

    Ok(ChangeLogEntry::new(log_id, EntityKey::new(type_id, store_id), change_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;
    use tiberius::numeric::Numeric;

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1), "@P1");
        assert_eq!(placeholders(3), "@P1, @P2, @P3");
    }

    #[test]
    fn test_in_list_statements_chunking() {
        let head = "UPDATE SyncChangesLog SET Processed = 1 WHERE LogID";

        assert!(in_list_statements(head, 0, MAX_IN_LIST_IDS).is_empty());

        let one = in_list_statements(head, 1, MAX_IN_LIST_IDS);
        assert_eq!(one, vec![(format!("{} IN (@P1)", head), 0..1)]);

        let full = in_list_statements(head, 2000, MAX_IN_LIST_IDS);
        assert_eq!(full.len(), 1);
        assert_eq!(full[0].1, 0..2000);
        assert!(full[0].0.ends_with("@P1999, @P2000)"));

        let over = in_list_statements(head, 2001, MAX_IN_LIST_IDS);
        assert_eq!(over.len(), 2);
        assert_eq!(over[0].1, 0..2000);
        assert_eq!(over[1], (format!("{} IN (@P1)", head), 2000..2001));
    }

    #[test]
    fn test_in_list_statements_cover_every_id() {
        let ranges: Vec<Range<usize>> = in_list_statements("x", 7, 3).into_iter().map(|(_, r)| r).collect();
        assert_eq!(ranges, vec![0..3, 3..6, 6..7]);
        // A zero chunk size degrades to one id per statement.
        assert_eq!(in_list_statements("x", 2, 0).len(), 2);
    }

    #[test]
    fn test_chunk_size_is_capped() {
        let mut config = crate::config::test_config();
        config.mark_processed_chunk_size = 5_000;
        assert_eq!(MssqlSource::new(&config, EventBroadcaster::default()).id_chunk_size, MAX_IN_LIST_IDS);

        config.mark_processed_chunk_size = 0;
        assert_eq!(MssqlSource::new(&config, EventBroadcaster::default()).id_chunk_size, 1);
    }

    fn unreachable_source() -> SourceConfig {
        let mut config = crate::config::test_config().db_config;
        config.server = "127.0.0.1".into();
        // Nothing listens on port 1.
        config.port = 1;
        config.connection_timeout = 500;
        config
    }

    #[tokio::test]
    async fn test_acquire_failure_reports_and_allows_retry() {
        let events = EventBroadcaster::default();
        let mut rx = events.subscribe();
        let manager = SourceConnectionManager::new(unreachable_source(), events);

        assert!(matches!(manager.acquire().await, Err(StorageError::Connection(_))));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.action, crate::events::EventAction::Error);
        assert_eq!(event.message(), Some("Source connection failed. Retrying."));

        // No half-open client is cached; the next call dials again.
        assert!(matches!(manager.acquire().await, Err(StorageError::Connection(_))));
        assert_eq!(rx.try_recv().unwrap().message(), Some("Source connection failed. Retrying."));
        assert!(manager.client.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_check_classifies_statement_errors() {
        use tiberius::error::Error;

        let events = EventBroadcaster::default();
        let mut rx = events.subscribe();
        let manager = SourceConnectionManager::new(unreachable_source(), events);
        let mut conn = SourceConnection {
            guard: manager.client.lock().await,
            events: &manager.events,
        };

        let query = conn.check::<()>(Err(Error::Conversion(Cow::Borrowed("bad cast"))));
        assert!(matches!(query, Err(StorageError::Query(_))));
        assert!(rx.try_recv().is_err());

        let transport = conn.check::<()>(Err(Error::Protocol(Cow::Borrowed("unexpected EOF"))));
        assert!(matches!(transport, Err(StorageError::Connection(_))));
        assert_eq!(rx.try_recv().unwrap().message(), Some("Source connection error."));
        assert!(conn.guard.is_none());
        assert!(matches!(conn.client(), Err(StorageError::Connection(_))));

        assert_eq!(conn.check(Ok(3u64)).ok(), Some(3));
    }

    #[test]
    fn test_transport_errors_drop_connection() {
        use tiberius::error::Error;

        assert!(is_connection_failure(&Error::Protocol(Cow::Borrowed("unexpected EOF"))));
        assert!(!is_connection_failure(&Error::Conversion(Cow::Borrowed("bad cast"))));
        assert!(connection_error(Error::Protocol(Cow::Borrowed("x"))).is_transient());
    }

    #[test]
    fn test_scalar_conversion() {
        assert_eq!(column_to_value(ColumnData::U8(Some(7))), SqlValue::I16(7));
        assert_eq!(column_to_value(ColumnData::I32(Some(-3))), SqlValue::I32(-3));
        assert_eq!(column_to_value(ColumnData::Bit(Some(true))), SqlValue::Bool(true));
        assert_eq!(
            column_to_value(ColumnData::String(Some(Cow::Borrowed("Tea")))),
            SqlValue::Text("Tea".into())
        );
    }

    #[test]
    fn test_nulls_keep_type() {
        assert_eq!(column_to_value(ColumnData::I64(None)), SqlValue::Null(SqlNullType::I64));
        assert_eq!(column_to_value(ColumnData::String(None)), SqlValue::Null(SqlNullType::Text));
        assert_eq!(column_to_value(ColumnData::Numeric(None)), SqlValue::Null(SqlNullType::Decimal));
    }

    #[test]
    fn test_numeric_becomes_decimal() {
        let value = column_to_value(ColumnData::Numeric(Some(Numeric::new_with_scale(12345, 2))));
        assert_eq!(value, SqlValue::Decimal(Decimal::new(12345, 2)));
    }

    #[test]
    fn test_parse_change_row() {
        let record = Record::new()
            .with("LogID", 41i64)
            .with("type_id", 7)
            .with("stor_id", SqlValue::Null(SqlNullType::I32))
            .with("ChangeType", "UPDATE");

        let entry = parse_change_row(&record).unwrap();
        assert_eq!(entry.log_id, 41);
        assert_eq!(entry.key.unique_id(), "7-NULL");
        assert_eq!(entry.change_type, ChangeType::Update);
    }

    #[test]
    fn test_parse_change_row_accepts_int_log_id() {
        let record = Record::new()
            .with("LogID", 5)
            .with("type_id", 7)
            .with("stor_id", 3)
            .with("ChangeType", "delete");

        let entry = parse_change_row(&record).unwrap();
        assert_eq!(entry.log_id, 5);
        assert_eq!(entry.key.unique_id(), "7-3");
        assert_eq!(entry.change_type, ChangeType::Delete);
    }

    fn change_row(stor_id: impl Into<SqlValue>) -> Record {
        Record::new()
            .with("LogID", 1i64)
            .with("type_id", 7)
            .with("stor_id", stor_id)
            .with("ChangeType", "DELETE")
    }

    #[test]
    fn test_parse_change_row_rejects_out_of_range_store() {
        let err = parse_change_row(&change_row(3_000_000_000i64)).unwrap_err();
        assert_eq!(err, "LogID 1: invalid stor_id");
    }

    #[test]
    fn test_parse_change_row_rejects_non_integer_store() {
        assert!(parse_change_row(&change_row(SqlValue::Decimal(Decimal::new(35, 1)))).is_err());
        assert!(parse_change_row(&change_row("3")).is_err());
        assert!(parse_change_row(&Record::new()
            .with("LogID", 1i64)
            .with("type_id", 7)
            .with("ChangeType", "DELETE"))
        .is_err());
    }

    #[test]
    fn test_parse_change_row_accepts_whole_decimal_store() {
        let entry = parse_change_row(&change_row(SqlValue::Decimal(Decimal::new(3, 0)))).unwrap();
        assert_eq!(entry.key.unique_id(), "7-3");

        let entry = parse_change_row(&change_row(SqlValue::Decimal(Decimal::new(300, 2)))).unwrap();
        assert_eq!(entry.key.unique_id(), "7-3");
    }

    #[test]
    fn test_parse_change_row_typed_null_store() {
        let entry = parse_change_row(&change_row(SqlValue::Null(SqlNullType::Decimal))).unwrap();
        assert_eq!(entry.key.unique_id(), "7-NULL");
    }

    #[test]
    fn test_parse_change_row_rejects_unknown_type() {
        let record = Record::new()
            .with("LogID", 9i64)
            .with("type_id", 7)
            .with("stor_id", 3)
            .with("ChangeType", "MERGE");

        let err = parse_change_row(&record).unwrap_err();
        assert!(err.starts_with("LogID 9"));
    }
}
