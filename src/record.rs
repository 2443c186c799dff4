// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Row data structure.
//!
//! A [`Record`] is one row of the synchronized table: an ordered list of
//! column name → [`SqlValue`]. Columns are not known statically; a chunk of
//! records takes its column list from the first record and every other
//! record must match it exactly.
//!
//! # Example
//!
//! ```
//! use cdc_sync_engine::{Record, SqlValue};
//!
//! let record = Record::new()
//!     .with("unique_id", SqlValue::Text("7-NULL".into()))
//!     .with("price", SqlValue::F64(9.5));
//!
//! assert_eq!(record.unique_id(), Some("7-NULL"));
//! assert_eq!(record.column_names().collect::<Vec<_>>(), vec!["unique_id", "price"]);
//! ```

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::storage::traits::StorageError;

/// Conflict key column shared by source and target tables.
pub const UNIQUE_ID_COLUMN: &str = "unique_id";

/// SQL type of a NULL value, so the target receives a typed parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlNullType {
    Bool,
    I16,
    I32,
    I64,
    F32,
    F64,
    Decimal,
    Text,
    Bytes,
    Uuid,
    Date,
    Time,
    DateTime,
    DateTimeUtc,
}

/// A single typed column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeUtc(DateTime<Utc>),
    Null(SqlNullType),
}

impl SqlValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null(_))
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        Self::I32(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::I64(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::F64(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// One row of the synchronized table, columns in source order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    columns: Vec<(String, SqlValue)>,
}

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from (column, value) pairs in order.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, SqlValue)>,
        S: Into<String>,
    {
        let mut record = Self::new();
        for (column, value) in pairs {
            record.insert(column, value);
        }
        record
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.insert(column, value.into());
        self
    }

    /// Set a column, replacing the value in place if it already exists.
    pub fn insert(&mut self, column: impl Into<String>, value: SqlValue) {
        let column = column.into();
        match self.columns.iter_mut().find(|(name, _)| *name == column) {
            Some((_, existing)) => *existing = value,
            None => self.columns.push((column, value)),
        }
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// The upsert conflict key, if present and textual.
    #[must_use]
    pub fn unique_id(&self) -> Option<&str> {
        self.get(UNIQUE_ID_COLUMN).and_then(SqlValue::as_str)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &SqlValue> {
        self.columns.iter().map(|(_, value)| value)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    fn has_columns(&self, expected: &[String]) -> bool {
        self.columns.len() == expected.len()
            && self.column_names().zip(expected).all(|(a, b)| a == b)
    }
}

/// Column list shared by every record of a chunk.
///
/// Columns come from the first record. A record with a different column
/// list, or one lacking a textual `unique_id`, rejects the whole chunk.
pub fn uniform_columns(chunk: &[Record]) -> Result<Vec<String>, StorageError> {
    let first = chunk
        .first()
        .ok_or_else(|| StorageError::InvalidBatch("empty chunk".to_string()))?;
    let columns: Vec<String> = first.column_names().map(String::from).collect();

    for column in &columns {
        if !is_valid_identifier(column) || column.contains('.') {
            return Err(StorageError::InvalidIdentifier(column.clone()));
        }
    }

    for (index, record) in chunk.iter().enumerate() {
        if !record.has_columns(&columns) {
            return Err(StorageError::InvalidBatch(format!(
                "record {} has columns [{}], expected [{}]",
                index,
                record.column_names().collect::<Vec<_>>().join(", "),
                columns.join(", ")
            )));
        }
        if record.unique_id().is_none() {
            return Err(StorageError::InvalidBatch(format!(
                "record {} has no textual '{}'",
                index, UNIQUE_ID_COLUMN
            )));
        }
    }

    Ok(columns)
}

/// True for `name` or `schema.name` made of `[A-Za-z_][A-Za-z0-9_]*` parts.
///
/// Identifiers are the only text spliced into SQL, so everything else is
/// refused.
#[must_use]
pub fn is_valid_identifier(value: &str) -> bool {
    let parts: Vec<&str> = value.split('.').collect();
    if parts.len() > 3 {
        return false;
    }
    parts.iter().all(|part| {
        let mut chars = part.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, name: &str) -> Record {
        Record::new().with(UNIQUE_ID_COLUMN, id).with("name", name)
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut record = row("1-NULL", "old");
        record.insert("name", SqlValue::from("new"));
        assert_eq!(record.len(), 2);
        assert_eq!(record.get("name"), Some(&SqlValue::Text("new".into())));
        assert_eq!(record.column_names().collect::<Vec<_>>(), vec!["unique_id", "name"]);
    }

    #[test]
    fn test_unique_id_must_be_text() {
        let record = Record::new().with(UNIQUE_ID_COLUMN, 42);
        assert_eq!(record.unique_id(), None);
    }

    #[test]
    fn test_uniform_columns_accepts_matching_chunk() {
        let chunk = vec![row("1-NULL", "a"), row("2-3", "b")];
        assert_eq!(uniform_columns(&chunk).unwrap(), vec!["unique_id", "name"]);
    }

    #[test]
    fn test_uniform_columns_rejects_mismatch() {
        let chunk = vec![
            row("1-NULL", "a"),
            Record::new().with("name", "b").with(UNIQUE_ID_COLUMN, "2-3"),
        ];
        let err = uniform_columns(&chunk).unwrap_err();
        assert!(matches!(err, StorageError::InvalidBatch(_)));
        assert!(err.to_string().contains("record 1"));
    }

    #[test]
    fn test_uniform_columns_rejects_missing_key() {
        let chunk = vec![Record::new().with("name", "a")];
        assert!(matches!(uniform_columns(&chunk), Err(StorageError::InvalidBatch(_))));
    }

    #[test]
    fn test_uniform_columns_rejects_bad_column_name() {
        let chunk = vec![Record::new()
            .with(UNIQUE_ID_COLUMN, "1-2")
            .with("name) VALUES (1); --", "x")];
        assert!(matches!(uniform_columns(&chunk), Err(StorageError::InvalidIdentifier(_))));
    }

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("products"));
        assert!(is_valid_identifier("dbo.SyncChangesLog"));
        assert!(is_valid_identifier("_tmp1"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("1abc"));
        assert!(!is_valid_identifier("a..b"));
        assert!(!is_valid_identifier("products;drop"));
        assert!(!is_valid_identifier("[dbo].[x]"));
    }
}
