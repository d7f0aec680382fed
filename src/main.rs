//! Checkout completion service — entry point.
//!
//! Starts the REST API plus a background sweeper task that retries
//! undelivered attribution events. Shuts both down on Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use checkout_server::{api, config::Config, db, sweeper, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;

    // Outbound HTTP client shared by the gateway, attribution, and
    // notification calls.
    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let state = Arc::new(AppState {
        config,
        pool,
        client,
    });

    // ─── Background sweeper ───────────────────────────────
    let shutdown = CancellationToken::new();
    tokio::spawn(sweeper::run(state.clone(), shutdown.clone()));

    // ─── REST API ─────────────────────────────────────────
    let app = api::router(state.clone());

    let addr = format!("0.0.0.0:{}", state.config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
        shutdown.cancel();
    })
    .await?;

    Ok(())
}
