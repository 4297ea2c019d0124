// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! stardb-starter - Cluster Bootstrap Supervisor
//!
//! Start one of these per host; they find each other, agree on a
//! bootstrap leader, and launch the local stardb engine processes once
//! the agency is full.

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use stardb_starter::{Config, Service};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before clap resolves env-var fallbacks.
    let _ = dotenvy::dotenv();

    let mut cfg = Config::parse();

    let default_filter = if cfg.verbose {
        "stardb_starter=debug"
    } else {
        "stardb_starter=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        build = option_env!("STARDB_STARTER_BUILD").unwrap_or("dev"),
        "Starting stardb-starter"
    );

    cfg.prepare()?;
    std::fs::create_dir_all(&cfg.data_dir)
        .map_err(|e| anyhow::anyhow!("cannot create data directory {}: {e}", cfg.data_dir.display()))?;

    let service = Service::new(cfg)?;
    info!(id = %service.id(), leader = service.is_leader(), "Service created");

    tokio::spawn(handle_signals(service.cancellation_token()));

    service.run().await?;

    info!("stardb-starter shut down");
    Ok(())
}

/// First termination signal shuts down gracefully; a second one exits
/// on the spot.
async fn handle_signals(token: CancellationToken) {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Cannot install SIGTERM handler");
            return;
        }
    };

    let mut received = 0u32;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        received += 1;
        if received > 1 {
            warn!("Second termination signal, exiting immediately");
            std::process::exit(1);
        }
        info!("Received termination signal, shutting down");
        token.cancel();
    }
}
