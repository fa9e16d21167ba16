//! morphfeed server binary.
//!
//! # Startup Sequence
//!
//! 1. Resolve the config path (first argument, `MORPHFEED_CONFIG`, or
//!    `morphfeed.yaml`)
//! 2. Load configuration, falling back to defaults if the file is missing
//! 3. Initialize structured logging (tracing)
//! 4. Build the feed hub, rule binder and document store
//! 5. Serve until `Ctrl-C`

use std::path::PathBuf;
use std::sync::Arc;

use morphfeed_server::config::{LogFormat, LoggingConfig, MorphfeedConfig};
use morphfeed_server::{AppState, start_server};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "morphfeed.yaml";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path();
    let found = path.exists();
    let config = if found {
        MorphfeedConfig::from_file(&path)?
    } else {
        MorphfeedConfig::parse("")?
    };

    init_logging(&config.logging);
    info!("morphfeed-server starting");
    if found {
        info!(path = %path.display(), "configuration loaded");
    } else {
        warn!(path = %path.display(), "config file not found, using defaults");
    }
    info!(
        period_secs = config.feeds.period_secs,
        documents = config.documents.len(),
        rules = config.rules.len(),
        "feeds configured"
    );

    let state = Arc::new(AppState::new(&config, Some(path))?);
    start_server(&config.server, state).await?;

    info!("morphfeed-server shutdown complete");
    Ok(())
}

fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("MORPHFEED_CONFIG").ok())
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// `RUST_LOG` wins over the configured level.
fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    match config.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}
