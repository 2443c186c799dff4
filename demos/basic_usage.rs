// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic cdc-sync-engine usage example.
//!
//! Demonstrates, against the in-memory stores (no databases needed):
//! 1. Building an engine and observing its events
//! 2. The initial full copy on first start
//! 3. An incremental cycle with one UPDATE and one DELETE
//! 4. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;

use cdc_sync_engine::storage::{MemorySource, MemoryTarget};
use cdc_sync_engine::{ChangeType, EngineState, EventBroadcaster, Record, SyncEngine, SyncEngineConfig};
use serde_json::json;

fn product(id: &str, name: &str, price: i64) -> Record {
    Record::new()
        .with("unique_id", id)
        .with("name", name)
        .with("price", price)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           cdc-sync-engine: Basic Usage Example                ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure the engine
    // ─────────────────────────────────────────────────────────────────────────
    let data_dir = std::env::temp_dir().join("cdc-sync-engine-demo");
    // Start from a clean slate so the full copy runs.
    let _ = std::fs::remove_dir_all(&data_dir);

    let config: SyncEngineConfig = serde_json::from_value(json!({
        "db_config": { "server": "localhost", "database": "Shop", "user": "sa", "password": "demo" },
        "table_name": "MaterializedProducts",
        "sync_interval_ms": 5000,
        "state_file": "sync_state.json",
        "pg_connection_string": "postgres://demo@localhost/shop",
        "upsert_throttle_ms": 0,
        "data_dir": data_dir,
    }))?;
    config.validate()?;

    let source = Arc::new(MemorySource::with_rows([
        product("1-NULL", "Tea", 300),
        product("2-NULL", "Coffee", 450),
        product("2-5", "Coffee (store 5)", 420),
    ]));
    let target = MemoryTarget::new();
    let events = EventBroadcaster::default();
    let mut rx = events.subscribe();

    let engine = SyncEngine::new(config, source.clone(), Arc::new(target.clone()), events);
    println!("📦 State: {:?}", engine.state());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Start: connect, then copy the whole source table
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🚀 Starting engine...");
    engine.start().await?;
    assert_eq!(engine.state(), EngineState::Idle);
    println!("   Target rows: {:?}", target.unique_ids("products"));

    // ─────────────────────────────────────────────────────────────────────────
    // 3. One incremental cycle
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔄 Logging an UPDATE for (1, NULL) and a DELETE for (2, 5)...");
    source.stage_row(product("1-NULL", "Black tea", 320));
    source.log_change(1, None, ChangeType::Update);
    source.unstage_row("2-5");
    source.log_change(2, Some(5), ChangeType::Delete);

    let outcome = engine.tick().await;
    println!("   Outcome: {:?}", outcome);
    println!("   Target rows: {:?}", target.unique_ids("products"));
    println!("   Unprocessed log rows: {}", source.unprocessed_count());

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Events seen by an observer, then shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📨 Events:");
    while let Ok(event) = rx.try_recv() {
        println!("   {}", event.to_json());
    }

    engine.shutdown().await;
    println!("\n✅ Shut down cleanly ({:?})", engine.state());
    Ok(())
}
