//! bpscan validation service.
//!
//! Exposes the engine over HTTP: `POST /validate` takes the collaborator
//! inputs (registration row, chain profile, version catalog, on-chain blobs)
//! and returns the full report as JSON. The crawler fans validations out
//! across many instances; they share nothing but the cache directory.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde_json::json;
use tracing::info;

use bpscan_validator::{ValidationInputs, Validator};

/// bpscan — block producer metadata and infrastructure validator.
#[derive(Parser)]
#[command(
    name = "bpscan",
    version,
    about = "Validates EOSIO block producer metadata and infrastructure"
)]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:9090")]
    listen: SocketAddr,

    /// Directory for the shared probe-result cache.
    #[arg(long, default_value = "./bpscan-cache")]
    cache_dir: PathBuf,

    /// Log filter (tracing env-filter syntax).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(cli.log_level.clone())
        .init();

    let validator = Arc::new(Validator::new(&cli.cache_dir)?);

    let app = Router::new()
        .route("/validate", post(validate_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(validator);

    info!("bpscan listening on {}", cli.listen);
    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn validate_handler(
    State(validator): State<Arc<Validator>>,
    Json(inputs): Json<ValidationInputs>,
) -> Json<bpscan_common::Report> {
    Json(validator.validate(inputs).await)
}

async fn healthz_handler() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}
