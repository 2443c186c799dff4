// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! PostgreSQL target backend.
//!
//! Writes go through a lazily connected `PgPool`. The initial full sync
//! uses a plain pooled connection; incremental cycles run every delete and
//! upsert on one transaction so a failed refresh leaves the target as it was.
//!
//! Id lists are bound as a single array parameter:
//!
//! ```sql
//! DELETE FROM products WHERE unique_id = ANY($1::varchar[])
//! ```

use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::{debug, warn};

use super::traits::{StorageError, TargetStore, TargetTransaction, TargetWriter};
use crate::batching::UpsertStatement;
use crate::config::SyncEngineConfig;
use crate::record::{is_valid_identifier, SqlNullType, SqlValue, UNIQUE_ID_COLUMN};
use crate::resilience::retry::{retry_when, RetryConfig};

/// Target pool settings
#[derive(Debug, Clone)]
pub struct PgPoolConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PgPoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&SyncEngineConfig> for PgPoolConfig {
    fn from(config: &SyncEngineConfig) -> Self {
        Self {
            max_connections: config.pg_max_connections.max(1),
            acquire_timeout: Duration::from_millis(config.pg_connect_timeout_ms),
            idle_timeout: Duration::from_millis(config.pg_idle_timeout_ms),
        }
    }
}

pub struct PostgresTarget {
    pool: PgPool,
}

impl PostgresTarget {
    /// Build the pool. No connection is opened until the first write.
    pub fn connect_lazy(url: &str, config: &PgPoolConfig) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .connect_lazy(url)
            .map_err(|e| StorageError::Connection(format!("Invalid target connection string: {}", e)))?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }
}

#[async_trait]
impl TargetStore for PostgresTarget {
    async fn writer(&self) -> Result<Box<dyn TargetWriter>, StorageError> {
        let conn = retry_when(
            "pg_acquire",
            &RetryConfig::acquire(),
            || async { self.pool.acquire().await.map_err(map_sqlx_error) },
            StorageError::is_transient,
        )
        .await
        .inspect_err(|_| report_unhealthy())?;

        crate::metrics::set_backend_healthy("target", true);
        Ok(Box::new(PgWriter { conn }))
    }

    async fn begin(&self) -> Result<Box<dyn TargetTransaction>, StorageError> {
        let tx = retry_when(
            "pg_begin",
            &RetryConfig::acquire(),
            || async { self.pool.begin().await.map_err(map_sqlx_error) },
            StorageError::is_transient,
        )
        .await
        .inspect_err(|_| report_unhealthy())?;

        crate::metrics::set_backend_healthy("target", true);
        debug!("Target transaction started");
        Ok(Box::new(PgTransaction { tx }))
    }
}

fn report_unhealthy() {
    crate::metrics::set_backend_healthy("target", false);
    crate::metrics::record_connection_error("target");
}

/// Non-transactional writes on one pooled connection.
pub struct PgWriter {
    conn: PoolConnection<Postgres>,
}

#[async_trait]
impl TargetWriter for PgWriter {
    async fn execute_upsert(&mut self, statement: &UpsertStatement) -> Result<u64, StorageError> {
        execute_upsert(&mut self.conn, statement).await
    }

    async fn delete_unique_ids(&mut self, table: &str, ids: &[String]) -> Result<u64, StorageError> {
        delete_unique_ids(&mut self.conn, table, ids).await
    }
}

/// Writes inside an open transaction. Dropped without commit = rolled back.
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl TargetWriter for PgTransaction {
    async fn execute_upsert(&mut self, statement: &UpsertStatement) -> Result<u64, StorageError> {
        execute_upsert(&mut self.tx, statement).await
    }

    async fn delete_unique_ids(&mut self, table: &str, ids: &[String]) -> Result<u64, StorageError> {
        delete_unique_ids(&mut self.tx, table, ids).await
    }
}

#[async_trait]
impl TargetTransaction for PgTransaction {
    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let this = *self;
        this.tx.commit().await.map_err(map_sqlx_error)?;
        debug!("Target transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        let this = *self;
        this.tx.rollback().await.map_err(map_sqlx_error)?;
        debug!("Target transaction rolled back");
        Ok(())
    }
}

async fn execute_upsert(conn: &mut PgConnection, statement: &UpsertStatement) -> Result<u64, StorageError> {
    let start = Instant::now();
    let mut query = sqlx::query(&statement.sql);
    for value in &statement.params {
        query = bind_value(query, value);
    }

    let result = query.execute(conn).await.map_err(map_sqlx_error);
    let status = if result.is_ok() { "success" } else { "error" };
    crate::metrics::record_operation("target", "upsert", status);
    crate::metrics::record_latency("target", "upsert", start.elapsed());

    Ok(result?.rows_affected())
}

async fn delete_unique_ids(conn: &mut PgConnection, table: &str, ids: &[String]) -> Result<u64, StorageError> {
    if ids.is_empty() {
        return Ok(0);
    }
    let sql = delete_sql(table)?;
    let start = Instant::now();

    let result = sqlx::query(&sql).bind(ids).execute(conn).await.map_err(map_sqlx_error);
    let status = if result.is_ok() { "success" } else { "error" };
    crate::metrics::record_operation("target", "delete", status);
    crate::metrics::record_latency("target", "delete", start.elapsed());

    let deleted = result?.rows_affected();
    crate::metrics::record_rows_deleted(deleted);
    Ok(deleted)
}

fn delete_sql(table: &str) -> Result<String, StorageError> {
    if !is_valid_identifier(table) {
        return Err(StorageError::InvalidIdentifier(table.to_string()));
    }
    Ok(format!(
        "DELETE FROM {} WHERE {} = ANY($1::varchar[])",
        table, UNIQUE_ID_COLUMN
    ))
}

/// Bind one value with its native PostgreSQL type. Nulls keep their type.
fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q SqlValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::I16(v) => query.bind(*v),
        SqlValue::I32(v) => query.bind(*v),
        SqlValue::I64(v) => query.bind(*v),
        SqlValue::F32(v) => query.bind(*v),
        SqlValue::F64(v) => query.bind(*v),
        SqlValue::Decimal(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
        SqlValue::Uuid(v) => query.bind(*v),
        SqlValue::Date(v) => query.bind(*v),
        SqlValue::Time(v) => query.bind(*v),
        SqlValue::DateTime(v) => query.bind(*v),
        SqlValue::DateTimeUtc(v) => query.bind(*v),
        SqlValue::Null(ty) => bind_null(query, *ty),
    }
}

fn bind_null(query: Query<'_, Postgres, PgArguments>, ty: SqlNullType) -> Query<'_, Postgres, PgArguments> {
    match ty {
        SqlNullType::Bool => query.bind(None::<bool>),
        SqlNullType::I16 => query.bind(None::<i16>),
        SqlNullType::I32 => query.bind(None::<i32>),
        SqlNullType::I64 => query.bind(None::<i64>),
        SqlNullType::F32 => query.bind(None::<f32>),
        SqlNullType::F64 => query.bind(None::<f64>),
        SqlNullType::Decimal => query.bind(None::<rust_decimal::Decimal>),
        SqlNullType::Text => query.bind(None::<String>),
        SqlNullType::Bytes => query.bind(None::<Vec<u8>>),
        SqlNullType::Uuid => query.bind(None::<uuid::Uuid>),
        SqlNullType::Date => query.bind(None::<chrono::NaiveDate>),
        SqlNullType::Time => query.bind(None::<chrono::NaiveTime>),
        SqlNullType::DateTime => query.bind(None::<chrono::NaiveDateTime>),
        SqlNullType::DateTimeUtc => query.bind(None::<chrono::DateTime<chrono::Utc>>),
    }
}

/// Pool and socket failures are connectivity; everything else failed the statement.
fn map_sqlx_error(e: sqlx::Error) -> StorageError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => {
            warn!(error = %e, "Target connection error");
            StorageError::Connection(e.to_string())
        }
        other => StorageError::Query(other.to_string()),
    }
}
