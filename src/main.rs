// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Service entry point.
//!
//! ```text
//! cdc-sync-engine [config.json]
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::process::ExitCode;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cdc_sync_engine::{EventAction, EventBroadcaster, SyncEngine, SyncEngineConfig};

const DEFAULT_CONFIG_PATH: &str = "config.json";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = match SyncEngineConfig::from_file(&config_path).and_then(|c| c.validate().map(|()| c)) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %config_path, error = %e, "FATAL: invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    info!(
        path = %config_path,
        table = %config.table_name,
        target_table = %config.target_table,
        state_file = %config.state_path().display(),
        "Configuration loaded"
    );

    let events = EventBroadcaster::default();
    let observer = tokio::spawn(log_events(events.clone()));

    let engine = match SyncEngine::from_config(config, events) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!(error = %e, "FATAL: cannot create target pool");
            return ExitCode::FAILURE;
        }
    };

    tokio::select! {
        result = engine.start() => {
            if let Err(e) = result {
                error!(error = %e, "Startup failed");
                return ExitCode::FAILURE;
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted during startup");
            return ExitCode::SUCCESS;
        }
    }

    let cancel = CancellationToken::new();
    let runner = {
        let engine = engine.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.run(cancel).await })
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C; shutting down");
    }
    cancel.cancel();
    if let Err(e) = runner.await {
        error!(error = %e, "Run loop panicked");
    }
    engine.shutdown().await;
    observer.abort();

    ExitCode::SUCCESS
}

/// Built-in observer: mirror every event into the log.
async fn log_events(events: EventBroadcaster) {
    let mut rx = events.subscribe();
    loop {
        match rx.recv().await {
            Ok(event) => match event.action {
                EventAction::Error => warn!(target: "events", "{}", event.to_json()),
                _ => info!(target: "events", "{}", event.to_json()),
            },
            Err(RecvError::Lagged(missed)) => warn!(target: "events", missed, "Observer lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
