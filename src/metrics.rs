// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the CDC sync engine.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host binary is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `sync_engine_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `backend`: source, target, state
//! - `kind`: initial, incremental
//! - `status`: success, error, skipped

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a backend operation outcome
pub fn record_operation(backend: &str, operation: &str, status: &str) {
    counter!(
        "sync_engine_operations_total",
        "backend" => backend.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(backend: &str, operation: &str, duration: Duration) {
    histogram!(
        "sync_engine_operation_seconds",
        "backend" => backend.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record rows per upsert statement
pub fn record_batch_size(backend: &str, count: usize) {
    histogram!(
        "sync_engine_batch_size",
        "backend" => backend.to_string()
    )
    .record(count as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// SYNC CYCLES - Initial and incremental runs
// ═══════════════════════════════════════════════════════════════════════════

/// Record a finished sync cycle
pub fn record_sync_cycle(kind: &str, status: &str) {
    counter!(
        "sync_engine_sync_cycles_total",
        "kind" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record sync cycle duration
pub fn record_sync_duration(kind: &str, duration: Duration) {
    histogram!(
        "sync_engine_sync_seconds",
        "kind" => kind.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a timer tick dropped because a cycle was still running
pub fn record_skipped_tick() {
    counter!("sync_engine_skipped_ticks_total").increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// THROUGHPUT - Rows moved
// ═══════════════════════════════════════════════════════════════════════════

/// Record rows upserted into the target
pub fn record_rows_upserted(count: usize) {
    counter!("sync_engine_rows_upserted_total").increment(count as u64);
}

/// Record rows deleted from the target
pub fn record_rows_deleted(count: u64) {
    counter!("sync_engine_rows_deleted_total").increment(count);
}

// ═══════════════════════════════════════════════════════════════════════════
// CDC - Change log consumption
// ═══════════════════════════════════════════════════════════════════════════

/// Record change-log entries after deduplication
pub fn record_cdc_entries(op: &str, count: usize) {
    counter!(
        "sync_engine_cdc_entries_total",
        "op" => op.to_string()
    )
    .increment(count as u64);
}

/// Record change-log rows flagged as processed
pub fn record_cdc_processed(count: u64) {
    counter!("sync_engine_cdc_processed_total").increment(count);
}

/// Record change-log rows with an unrecognized change type
pub fn record_cdc_unknown(count: usize) {
    counter!("sync_engine_cdc_unknown_total").increment(count as u64);
}

/// Set change-log backlog seen by the last cycle
pub fn set_cdc_backlog(count: usize) {
    gauge!("sync_engine_cdc_backlog").set(count as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// ERROR TRACKING - Categorized error counters for alerting
// ═══════════════════════════════════════════════════════════════════════════

/// Record an error with category for alerting
pub fn record_error(backend: &str, operation: &str, error_type: &str) {
    counter!(
        "sync_engine_errors_total",
        "backend" => backend.to_string(),
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Record a connection/backend error
pub fn record_connection_error(backend: &str) {
    counter!(
        "sync_engine_connection_errors_total",
        "backend" => backend.to_string()
    )
    .increment(1);
}

/// Record a timeout error
pub fn record_timeout(operation: &str) {
    counter!(
        "sync_engine_timeouts_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a failed sync state write
pub fn record_state_persist_failure() {
    counter!("sync_engine_state_persist_failures_total").increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// BACKEND HEALTH - Connection status
// ═══════════════════════════════════════════════════════════════════════════

/// Set backend health status (1 = healthy, 0 = unhealthy)
pub fn set_backend_healthy(backend: &str, healthy: bool) {
    gauge!(
        "sync_engine_backend_healthy",
        "backend" => backend.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}

// ═══════════════════════════════════════════════════════════════════════════
// STARTUP - Timing for cold start monitoring
// ═══════════════════════════════════════════════════════════════════════════

/// Record startup phase duration
pub fn record_startup_phase(phase: &str, duration: Duration) {
    histogram!(
        "sync_engine_startup_seconds",
        "phase" => phase.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Set engine state (for monitoring state machine transitions)
pub fn set_engine_state(state: &str) {
    counter!(
        "sync_engine_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}
