//! # hubbub server
//!
//! Realtime chat rooms and post comment threads over WebSocket.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! hubbub
//!
//! # Run with a config file in the working directory
//! cp hubbub.example.toml hubbub.toml && hubbub
//!
//! # Run with environment variables
//! HUBBUB_PORT=8080 HUBBUB_HOST=0.0.0.0 hubbub
//! ```

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
                .unwrap_or_else(|_| "hubbub=debug,hubbub_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting hubbub server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
