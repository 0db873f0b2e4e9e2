mod mjpeg;
mod relay;

use frame_relay_common::config::Config;
use relay::RelayClient;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("HTTP stream error: {0}")]
    HttpStream(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("upload to relay failed: {0}")]
    Upload(reqwest::Error),
    #[error("relay rejected frame with status {0}")]
    RelayStatus(u16),
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let Some(producer) = config.producer.clone() else {
        error!("missing [producer] section in config");
        std::process::exit(1);
    };

    info!(
        source = producer.source_url,
        relay = producer.relay_url,
        mode = producer.mode,
        "starting frame-relay producer"
    );

    let relay = match RelayClient::new(
        &producer.relay_url,
        &config.auth.upload_token,
        &config.ingest.content_type,
    ) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "failed to create relay client");
            std::process::exit(1);
        }
    };

    match producer.mode.as_str() {
        "mjpeg" => {
            mjpeg::run_mjpeg_bridge(&producer.source_url, &relay).await;
        }
        "polling" => {
            let interval = Duration::from_secs_f64(1.0 / producer.fps.max(0.01));
            mjpeg::run_polling_bridge(&producer.source_url, &relay, interval).await;
        }
        other => {
            error!(mode = other, "unknown producer mode, expected 'mjpeg' or 'polling'");
            std::process::exit(1);
        }
    }
}
