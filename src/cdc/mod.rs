// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change Data Capture (CDC) change-log processing.
//!
//! The source system records every mutation of a denormalized entity in a
//! change-log table. One poll reads all unprocessed rows, collapses them to
//! one action per entity and splits the result into upserts and deletes.
//!
//! # Log Row Format
//!
//! ```text
//! LogID  type_id  stor_id  ChangeType  Processed
//! 101    7        NULL     UPDATE      0
//! 102    7        3        DELETE      0
//! ```
//!
//! `(type_id, stor_id)` is the entity key; it renders as `"7-NULL"` or
//! `"7-3"`, which is also the `unique_id` of the entity's row.
//!
//! # Dedup Rule
//!
//! DELETE dominates UPDATE for the same key regardless of arrival order.
//! Between entries of the same type the last one seen wins. Output keeps
//! the order in which each key was first seen.
//!
//! ```
//! use cdc_sync_engine::cdc::{ChangeLogEntry, ChangeSet, ChangeType, EntityKey};
//!
//! let key = EntityKey::new(7, Some(3));
//! let entries = vec![
//!     ChangeLogEntry::new(1, key, ChangeType::Delete),
//!     ChangeLogEntry::new(2, key, ChangeType::Update),
//! ];
//!
//! let set = ChangeSet::from_entries(&entries);
//! assert!(set.updates.is_empty());
//! assert_eq!(set.delete_ids(), vec!["7-3".to_string()]);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Change-log operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    Update,
    Delete,
}

impl ChangeType {
    /// Returns the string stored in the `ChangeType` column
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Update => "UPDATE",
            ChangeType::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `ChangeType` column value that is neither `UPDATE` nor `DELETE`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown change type {0:?}")]
pub struct UnknownChangeType(pub String);

impl FromStr for ChangeType {
    type Err = UnknownChangeType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("UPDATE") {
            Ok(ChangeType::Update)
        } else if trimmed.eq_ignore_ascii_case("DELETE") {
            Ok(ChangeType::Delete)
        } else {
            Err(UnknownChangeType(s.to_string()))
        }
    }
}

/// Logical entity identifier `(type_id, stor_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub type_id: i32,
    pub store_id: Option<i32>,
}

impl EntityKey {
    #[must_use]
    pub fn new(type_id: i32, store_id: Option<i32>) -> Self {
        Self { type_id, store_id }
    }

    /// `unique_id` of the entity's row in source and target tables.
    #[must_use]
    pub fn unique_id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.store_id {
            Some(store_id) => write!(f, "{}-{}", self.type_id, store_id),
            None => write!(f, "{}-NULL", self.type_id),
        }
    }
}

/// One raw change-log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeLogEntry {
    pub log_id: i64,
    pub key: EntityKey,
    pub change_type: ChangeType,
}

impl ChangeLogEntry {
    #[must_use]
    pub fn new(log_id: i64, key: EntityKey, change_type: ChangeType) -> Self {
        Self { log_id, key, change_type }
    }
}

/// The surviving action for one entity key in one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupedItem {
    pub key: EntityKey,
    pub change_type: ChangeType,
}

/// Collapse raw entries to at most one item per entity key.
#[must_use]
pub fn dedup(entries: &[ChangeLogEntry]) -> Vec<DedupedItem> {
    let mut index: HashMap<EntityKey, usize> = HashMap::with_capacity(entries.len());
    let mut items: Vec<DedupedItem> = Vec::with_capacity(entries.len());

    for entry in entries {
        match index.get(&entry.key) {
            Some(&pos) => {
                // A later UPDATE never replaces a DELETE.
                if entry.change_type == ChangeType::Delete
                    || items[pos].change_type == ChangeType::Update
                {
                    items[pos].change_type = entry.change_type;
                }
            }
            None => {
                index.insert(entry.key, items.len());
                items.push(DedupedItem {
                    key: entry.key,
                    change_type: entry.change_type,
                });
            }
        }
    }

    items
}

/// Deduplicated changes of one poll, split by action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub updates: Vec<DedupedItem>,
    pub deletes: Vec<DedupedItem>,
}

impl ChangeSet {
    #[must_use]
    pub fn from_entries(entries: &[ChangeLogEntry]) -> Self {
        let (updates, deletes) = dedup(entries)
            .into_iter()
            .partition(|item| item.change_type == ChangeType::Update);
        Self { updates, deletes }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.deletes.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.updates.len() + self.deletes.len()
    }

    #[must_use]
    pub fn update_ids(&self) -> Vec<String> {
        self.updates.iter().map(|item| item.key.unique_id()).collect()
    }

    #[must_use]
    pub fn delete_ids(&self) -> Vec<String> {
        self.deletes.iter().map(|item| item.key.unique_id()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(log_id: i64, type_id: i32, store_id: Option<i32>, change_type: ChangeType) -> ChangeLogEntry {
        ChangeLogEntry::new(log_id, EntityKey::new(type_id, store_id), change_type)
    }

    #[test]
    fn test_entity_key_format() {
        assert_eq!(EntityKey::new(7, None).unique_id(), "7-NULL");
        assert_eq!(EntityKey::new(7, Some(3)).unique_id(), "7-3");
        assert_eq!(EntityKey::new(-1, Some(0)).to_string(), "-1-0");
    }

    #[test]
    fn test_change_type_parse() {
        assert_eq!("UPDATE".parse::<ChangeType>(), Ok(ChangeType::Update));
        assert_eq!(" delete ".parse::<ChangeType>(), Ok(ChangeType::Delete));
        assert_eq!(
            "INSERT".parse::<ChangeType>(),
            Err(UnknownChangeType("INSERT".to_string()))
        );
        assert_eq!(
            "MERGE".parse::<ChangeType>().unwrap_err().to_string(),
            "unknown change type \"MERGE\""
        );
        assert_eq!(ChangeType::Delete.to_string(), "DELETE");
    }

    #[test]
    fn test_delete_after_update_wins() {
        let set = ChangeSet::from_entries(&[
            entry(1, 7, None, ChangeType::Update),
            entry(2, 7, None, ChangeType::Delete),
        ]);
        assert!(set.updates.is_empty());
        assert_eq!(set.delete_ids(), vec!["7-NULL"]);
    }

    #[test]
    fn test_update_after_delete_does_not_override() {
        let set = ChangeSet::from_entries(&[
            entry(1, 7, Some(3), ChangeType::Delete),
            entry(2, 7, Some(3), ChangeType::Update),
            entry(3, 7, Some(3), ChangeType::Update),
        ]);
        assert!(set.updates.is_empty());
        assert_eq!(set.delete_ids(), vec!["7-3"]);
    }

    #[test]
    fn test_duplicates_collapse_to_one() {
        let items = dedup(&[
            entry(1, 1, Some(1), ChangeType::Update),
            entry(2, 1, Some(1), ChangeType::Update),
            entry(3, 1, Some(1), ChangeType::Update),
        ]);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].change_type, ChangeType::Update);
    }

    #[test]
    fn test_null_and_zero_store_are_distinct_keys() {
        let set = ChangeSet::from_entries(&[
            entry(1, 5, None, ChangeType::Update),
            entry(2, 5, Some(0), ChangeType::Delete),
        ]);
        assert_eq!(set.update_ids(), vec!["5-NULL"]);
        assert_eq!(set.delete_ids(), vec!["5-0"]);
    }

    #[test]
    fn test_first_seen_order_preserved() {
        let set = ChangeSet::from_entries(&[
            entry(1, 3, None, ChangeType::Update),
            entry(2, 1, None, ChangeType::Update),
            entry(3, 3, None, ChangeType::Update),
            entry(4, 2, None, ChangeType::Update),
        ]);
        assert_eq!(set.update_ids(), vec!["3-NULL", "1-NULL", "2-NULL"]);
    }

    #[test]
    fn test_empty_input() {
        let set = ChangeSet::from_entries(&[]);
        assert!(set.is_empty());
        assert_eq!(set.len(), 0);
    }
}
