//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the REST API server on its own.
//!
//! ## Intended use
//! Development and debugging. Deployments normally run the workspace's
//! `paraphe-run` binary, which wires the same router.

use paraphe_api_rest::{build_router, build_state, ProviderSettings};
use paraphe_core::SignConfig;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Starts the REST server on the configured address.
///
/// # Environment Variables
/// - `PARAPHE_REST_ADDR`: server address (default: "0.0.0.0:3000")
/// - `PARAPHE_DATA_DIR`: data directory (default: "./paraphe-data")
/// - `PROVIDER_BASE_URL` / `PROVIDER_API_KEY`: e-signature provider
///   credentials; both absent selects the deterministic mock provider
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - the configuration is invalid,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("paraphe_api_rest=info".parse()?)
                .add_directive("paraphe_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("PARAPHE_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let data_dir = std::env::var("PARAPHE_DATA_DIR").unwrap_or_else(|_| "./paraphe-data".into());

    tracing::info!("-- Starting Paraphe REST API on {}", addr);

    let config = SignConfig::new(PathBuf::from(data_dir))?;
    let provider_settings = ProviderSettings {
        base_url: std::env::var("PROVIDER_BASE_URL").ok(),
        api_key: std::env::var("PROVIDER_API_KEY").ok(),
    };
    let state = build_state(config, provider_settings)?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
