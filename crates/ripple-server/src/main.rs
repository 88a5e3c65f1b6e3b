//! # Ripple Server
//!
//! Realtime page-update server built on the Ripple framework.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! ripple
//!
//! # Run with environment variables
//! RIPPLE_PORT=8080 RIPPLE_HOST=0.0.0.0 ripple
//! ```
//!
//! Browsers connect to the cable endpoint with the
//! `actioncable-v1-json` or `actioncable-v1-msgpack` sub-protocol and
//! subscribe to signed stream names.

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ripple=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Ripple server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
