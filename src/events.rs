// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Lifecycle, progress and error notifications for observers.
//!
//! Events are fanned out over a `tokio::sync::broadcast` channel. Delivery
//! is best-effort: with no subscribers an event is dropped, and a subscriber
//! that falls behind loses the oldest events instead of blocking the engine.
//!
//! Wire shape (what a monitoring page receives):
//!
//! ```text
//! {"action":"sync_start","payload":{"type":"Incremental Sync","message":"Processing changes...","counts":{"updates":1,"deletions":0}}}
//! {"action":"sync_end","payload":{"type":"Incremental Sync","status":"success"}}
//! {"action":"error","payload":{"message":"Source connection failed. Retrying.","details":"Connection error: ..."}}
//! ```

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;

/// Default number of buffered events per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Info,
    Error,
    SyncStart,
    SyncEnd,
}

/// Kind of sync cycle, reported as the `type` of start/end events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    InitialFull,
    Incremental,
}

impl SyncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::InitialFull => "Initial Full Sync",
            SyncKind::Incremental => "Incremental Sync",
        }
    }

    /// Short label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            SyncKind::InitialFull => "initial",
            SyncKind::Incremental => "incremental",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncEvent {
    pub action: EventAction,
    pub payload: Value,
}

impl SyncEvent {
    /// JSON text sent to observers.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// `payload.message`, if present.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.payload.get("message").and_then(Value::as_str)
    }
}

/// Fan-out point for [`SyncEvent`]s. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<SyncEvent>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBroadcaster {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Register a new observer.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Send to every current observer. Returns how many were reached.
    pub fn emit(&self, action: EventAction, payload: Value) -> usize {
        // Err only means nobody is listening.
        self.tx.send(SyncEvent { action, payload }).unwrap_or(0)
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(EventAction::Info, json!({ "message": message.into() }));
    }

    pub fn error(&self, message: impl Into<String>, details: impl ToString) {
        self.emit(
            EventAction::Error,
            json!({ "message": message.into(), "details": details.to_string() }),
        );
    }

    pub fn sync_start(&self, kind: SyncKind, message: impl Into<String>, counts: Option<Value>) {
        let mut payload = json!({ "type": kind.as_str(), "message": message.into() });
        if let (Some(counts), Some(map)) = (counts, payload.as_object_mut()) {
            map.insert("counts".to_string(), counts);
        }
        self.emit(EventAction::SyncStart, payload);
    }

    pub fn sync_success(&self, kind: SyncKind, details: Option<Value>) {
        let mut payload = json!({ "type": kind.as_str(), "status": "success" });
        if let (Some(details), Some(map)) = (details, payload.as_object_mut()) {
            map.insert("details".to_string(), details);
        }
        self.emit(EventAction::SyncEnd, payload);
    }

    pub fn sync_failure(&self, kind: SyncKind, error: impl ToString) {
        self.emit(
            EventAction::SyncEnd,
            json!({
                "type": kind.as_str(),
                "status": "error",
                "details": { "error": error.to_string() },
            }),
        );
    }
}
