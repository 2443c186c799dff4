// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persisted sync progress.
//!
//! The state file is a small pretty-printed JSON document:
//!
//! ```text
//! {
//!   "lastSyncTime": "2026-03-01T08:15:02.417Z",
//!   "isInitialSyncDone": true
//! }
//! ```
//!
//! Saves go through a sibling temp file and a rename, so a crash mid-write
//! leaves the previous state intact. A file that exists but does not parse
//! is moved aside to `<name>.corrupt` and the engine starts fresh.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Failed to write sync state file at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to serialize sync state: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Sync state save task failed: {0}")]
    Task(String),
}

/// Sync progress owned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    #[serde(serialize_with = "serialize_iso_millis", deserialize_with = "deserialize_iso")]
    pub last_sync_time: DateTime<Utc>,
    pub is_initial_sync_done: bool,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            last_sync_time: DateTime::<Utc>::UNIX_EPOCH,
            is_initial_sync_done: false,
        }
    }
}

impl SyncState {
    /// State after a successful full sync at `now`.
    #[must_use]
    pub fn initial_sync_completed(self, now: DateTime<Utc>) -> Self {
        Self {
            last_sync_time: now,
            is_initial_sync_done: true,
        }
    }

    /// State after a successful incremental cycle at `now`.
    #[must_use]
    pub fn synced_at(self, now: DateTime<Utc>) -> Self {
        Self {
            last_sync_time: now,
            ..self
        }
    }
}

fn serialize_iso_millis<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn deserialize_iso<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(serde::de::Error::custom)
}

/// File-backed slot for [`SyncState`].
#[derive(Debug, Clone)]
pub struct SyncStateStore {
    path: PathBuf,
}

impl SyncStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state, or defaults if there is none.
    ///
    /// Unreadable or malformed files are not fatal: the bad file is moved
    /// aside and the engine starts fresh (which re-runs the full sync).
    pub fn load(&self) -> SyncState {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No sync state file found. Starting fresh.");
                return SyncState::default();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Sync state file unreadable. Starting fresh.");
                return SyncState::default();
            }
        };

        match serde_json::from_str::<SyncState>(&content) {
            Ok(state) => {
                info!(
                    path = %self.path.display(),
                    initial_sync_done = state.is_initial_sync_done,
                    last_sync_time = %state.last_sync_time,
                    "Sync state loaded"
                );
                state
            }
            Err(e) => {
                let aside = self.corrupt_path();
                warn!(
                    path = %self.path.display(),
                    moved_to = %aside.display(),
                    error = %e,
                    "Sync state file is malformed. Starting fresh."
                );
                if let Err(e) = std::fs::rename(&self.path, &aside) {
                    warn!(error = %e, "Failed to move malformed sync state aside");
                }
                SyncState::default()
            }
        }
    }

    /// Persist `state` atomically.
    pub fn save(&self, state: &SyncState) -> Result<(), StateError> {
        let content = serde_json::to_string_pretty(state)?;
        let io_err = |source| StateError::Io {
            path: self.path.display().to_string(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let tmp = self.tmp_path();
        std::fs::write(&tmp, content).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        with_suffix(&self.path, ".tmp")
    }

    fn corrupt_path(&self) -> PathBuf {
        with_suffix(&self.path, ".corrupt")
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
