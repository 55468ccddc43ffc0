//! # bletrack-server
//!
//! HTTP server receiving BLE sighting reports from gateway routers.
//!
//! This binary provides:
//! - `POST /api/ingest` and `POST /api/ingest/batch` for gateways
//! - OpenAPI document at `/api/openapi.json`
//! - Structured logging to stdout, and to rolling files in production
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package bletrack-server
//!
//! # With a config file and overrides
//! BLETRACK_CONFIG=/etc/bletrack/bletrack.toml BLETRACK_LISTEN_PORT=8080 ./bletrack-server start
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;
use std::process::ExitCode;

use anyhow::Context;
use bletrack_core::{Ingestor, Settings, Storage, TagTable};
use bletrack_server::api::create_router;
use bletrack_server::logging;
use bletrack_server::state::AppState;
use tokio::net::TcpListener;
use tracing::{error, info};

const USAGE: &str = "usage: bletrack-server [start]";

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    match (args.next().as_deref(), args.next()) {
        (None | Some("start"), None) => {}
        _ => {
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    }

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = ?e, "bletrack-server failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn run() -> anyhow::Result<()> {
    let settings = Settings::load().context("Failed to load settings")?;

    logging::init(&settings)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        datastore = %settings.datastore_path.display(),
        dedup_interval_seconds = settings.dedup_interval_seconds,
        "Starting bletrack-server"
    );

    let storage = Storage::initialize(&settings.datastore_path)
        .context("Failed to initialize datastore")?;

    let tags = TagTable::load(settings.tag_table_path.as_deref())
        .context("Failed to load tag table")?;
    info!(entries = tags.len(), "Tag table loaded");

    let ingestor = Ingestor::from_settings(&settings, tags, storage.clone());
    let addr = settings.listen_addr();
    let request_timeout = settings.request_timeout();
    let state = AppState::new(ingestor, settings).shared();

    let app = create_router(state, request_timeout);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    storage.close();
    info!("Datastore closed, shutting down");

    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl-C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
