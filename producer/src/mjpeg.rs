use bytes::Bytes;
use frame_relay_common::multipart::MultipartReader;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::relay::RelayClient;
use crate::ProducerError;

static FRAME_COUNTER: AtomicU64 = AtomicU64::new(0);

const DEFAULT_BOUNDARY: &str = "frame";

/// Consume the camera's MJPEG stream and forward every frame to the relay.
/// Reconnects with exponential backoff on failure.
pub async fn run_mjpeg_bridge(stream_url: &str, relay: &RelayClient) {
    let mut backoff = Duration::from_secs(2);
    let max_backoff = Duration::from_secs(30);

    loop {
        info!(url = stream_url, "connecting to MJPEG stream");
        match consume_stream(stream_url, relay).await {
            Ok(()) => {
                info!("stream ended cleanly, reconnecting");
                backoff = Duration::from_secs(2);
            }
            Err(e) => {
                error!(error = %e, "stream error, reconnecting in {:?}", backoff);
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(max_backoff);
    }
}

async fn consume_stream(url: &str, relay: &RelayClient) -> Result<(), ProducerError> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(ProducerError::HttpConnect)?;
    let response = client
        .get(url)
        .send()
        .await
        .map_err(ProducerError::HttpConnect)?;

    if !response.status().is_success() {
        return Err(ProducerError::HttpStatus(response.status().as_u16()));
    }

    let boundary = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(boundary_from_content_type)
        .unwrap_or_else(|| DEFAULT_BOUNDARY.to_string());
    info!(status = %response.status(), boundary, "connected to MJPEG stream");

    let mut byte_stream = response.bytes_stream();
    let mut reader = MultipartReader::new(&boundary);

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(ProducerError::HttpStream)?;
        reader.push(&chunk);
        while let Some(jpeg) = reader.next_part() {
            forward(relay, jpeg).await;
        }
    }

    Ok(())
}

/// Polling fallback: periodically fetch single frames. Every failure is
/// scoped to one tick.
pub async fn run_polling_bridge(frame_url: &str, relay: &RelayClient, interval: Duration) {
    let client = reqwest::Client::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        match client.get(frame_url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                Ok(jpeg) => forward(relay, jpeg).await,
                Err(e) => {
                    warn!(error = %e, "camera frame body incomplete");
                }
            },
            Ok(resp) => {
                warn!(status = %resp.status(), "non-success response from camera");
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch camera frame");
            }
        }
    }
}

async fn forward(relay: &RelayClient, jpeg: Bytes) {
    if jpeg.is_empty() {
        return;
    }
    let seq = FRAME_COUNTER.fetch_add(1, Ordering::Relaxed);
    let bytes = jpeg.len();
    match relay.upload(jpeg).await {
        Ok(()) => {
            if seq % 100 == 0 {
                debug!(seq, bytes, "frames forwarded");
            }
        }
        Err(e) => warn!(error = %e, seq, bytes, "failed to forward frame to relay"),
    }
}

/// Extract `boundary=...` from a multipart Content-Type, tolerating quotes and
/// a leading `--` that some cameras include.
fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        let value = value.strip_prefix("--").unwrap_or(value);
        (!value.is_empty()).then(|| value.to_string())
    })
}
