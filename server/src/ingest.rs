//! Producer-facing endpoints: single-frame HTTP upload and the persistent
//! WebSocket push connection. Both end in [`relay_frame`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::Response;
use axum::Json;
use bytes::Bytes;
use frame_relay_common::config::PushFormat;
use frame_relay_common::frame::Frame;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec::CodecError;
use crate::error::RelayError;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub ok: bool,
    pub bytes: usize,
    pub ts: f64,
}

#[derive(Debug, Deserialize)]
pub struct PushParams {
    token: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("empty binary message")]
    Empty,
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Publish a frame and fan it out to the WebSocket viewers.
pub async fn relay_frame(state: &AppState, payload: Bytes) -> Frame {
    let frame = state.store.publish_now(payload);
    let report = state.viewers.broadcast(frame.payload.clone()).await;
    debug!(
        version = frame.version,
        bytes = frame.len(),
        delivered = report.delivered,
        evicted = report.evicted,
        "frame relayed"
    );
    frame
}

/// POST /upload: one compressed image per request.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UploadResponse>, RelayError> {
    let token = headers.get("x-token").and_then(|v| v.to_str().ok());
    if !state.token_matches(token) {
        warn!("upload rejected: bad token");
        return Err(RelayError::Unauthorized);
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !content_type
        .to_ascii_lowercase()
        .contains(&state.ingest.content_type.to_ascii_lowercase())
    {
        return Err(RelayError::UnsupportedMediaType {
            expected: state.ingest.content_type.clone(),
            got: content_type.to_string(),
        });
    }

    if body.len() < state.ingest.min_upload_bytes.max(1) {
        return Err(RelayError::BadRequest(format!(
            "empty/too small: {} bytes",
            body.len()
        )));
    }

    let frame = relay_frame(&state, body).await;
    Ok(Json(UploadResponse {
        ok: true,
        bytes: frame.len(),
        ts: frame.timestamp_secs(),
    }))
}

/// GET /ws/upload?token=...: persistent push connection from the camera.
/// A bad token is refused with 403 before the handshake completes.
pub async fn push_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PushParams>,
) -> Result<Response, RelayError> {
    if !state.token_matches(params.token.as_deref()) {
        warn!("push ingest rejected: bad token");
        return Err(RelayError::Forbidden);
    }
    Ok(ws.on_upgrade(move |socket| push_session(socket, state)))
}

async fn push_session(mut socket: WebSocket, state: Arc<AppState>) {
    info!(format = ?state.ingest.push_format, "push ingest connected");
    let interval = Duration::from_secs(state.ingest.throughput_interval_secs.max(1));
    let mut meter = ThroughputMeter::new(interval, Instant::now());

    let mut shutdown = state.shutdown_listener();

    loop {
        let message = tokio::select! {
            _ = async { let _ = shutdown.wait_for(|closing| *closing).await; } => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            message = socket.recv() => match message {
                Some(Ok(m)) => m,
                Some(Err(e)) => {
                    warn!(error = %e, "push ingest receive failed");
                    break;
                }
                None => break,
            },
        };
        match message {
            Message::Binary(data) => match accept_push_message(&state, Bytes::from(data)).await {
                Ok(frame) => {
                    if let Some(frames) = meter.record(Instant::now()) {
                        info!(
                            frames,
                            interval_secs = interval.as_secs(),
                            bytes = frame.len(),
                            viewers = state.viewers.len(),
                            "push ingest throughput"
                        );
                    }
                }
                Err(e) => warn!(error = %e, "dropping push message"),
            },
            // Reserved for control messages.
            Message::Text(_) => {}
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
    info!("push ingest disconnected");
}

/// Turn one binary push message into a published frame. Failures only drop
/// the message; the connection stays open.
pub async fn accept_push_message(state: &AppState, data: Bytes) -> Result<Frame, PushError> {
    if data.is_empty() {
        return Err(PushError::Empty);
    }
    let payload = match state.ingest.push_format {
        PushFormat::Compressed => data,
        PushFormat::Raw => state.codec.decode_message(data).await?,
    };
    Ok(relay_frame(state, payload).await)
}

/// Rolling frames-per-interval counter.
#[derive(Debug)]
pub struct ThroughputMeter {
    interval: Duration,
    window_start: Instant,
    frames: u64,
}

impl ThroughputMeter {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            window_start: now,
            frames: 0,
        }
    }

    /// Count one frame. Returns the window's total and starts a new window
    /// once `interval` has elapsed.
    pub fn record(&mut self, now: Instant) -> Option<u64> {
        self.frames += 1;
        if now.duration_since(self.window_start) < self.interval {
            return None;
        }
        let frames = self.frames;
        self.frames = 0;
        self.window_start = now;
        Some(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_relay_common::config::Config;
    use frame_relay_common::frame::RawPixelPacket;

    fn state(format: PushFormat) -> Arc<AppState> {
        let mut config = Config::default();
        config.ingest.push_format = format;
        Arc::new(AppState::new(&config))
    }

    #[test]
    fn meter_reports_once_per_interval() {
        let start = Instant::now();
        let mut meter = ThroughputMeter::new(Duration::from_secs(1), start);
        for i in 1..=9 {
            assert_eq!(meter.record(start + Duration::from_millis(i * 100)), None);
        }
        assert_eq!(meter.record(start + Duration::from_millis(1000)), Some(10));
        assert_eq!(meter.record(start + Duration::from_millis(1500)), None);
        assert_eq!(meter.record(start + Duration::from_millis(2100)), Some(2));
    }

    #[tokio::test]
    async fn compressed_push_is_published_and_broadcast() {
        let state = state(PushFormat::Compressed);
        let mut viewer = state.viewers.subscribe();

        let frame = accept_push_message(&state, Bytes::from_static(b"\xFF\xD8jpeg"))
            .await
            .unwrap();
        assert_eq!(frame.version, 1);
        assert_eq!(state.store.read().unwrap().payload, Bytes::from_static(b"\xFF\xD8jpeg"));
        assert_eq!(viewer.recv().await.unwrap(), Bytes::from_static(b"\xFF\xD8jpeg"));
    }

    #[tokio::test]
    async fn raw_push_is_encoded_before_publish() {
        let state = state(PushFormat::Raw);
        let packet = RawPixelPacket {
            width: 4,
            height: 4,
            samples: Bytes::from(vec![200u8; 16]),
        };
        let frame = accept_push_message(&state, Bytes::from(packet.to_bytes()))
            .await
            .unwrap();
        assert_eq!(&frame.payload[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn malformed_raw_push_is_dropped_without_publish() {
        let state = state(PushFormat::Raw);
        let bad = RawPixelPacket {
            width: 10,
            height: 10,
            samples: Bytes::from(vec![0u8; 99]),
        };
        let err = accept_push_message(&state, Bytes::from(bad.to_bytes()))
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::Codec(CodecError::Validation(_))));
        assert!(state.store.read().is_none());
        assert_eq!(state.store.version(), 0);

        // The next good message still goes through.
        let good = RawPixelPacket {
            width: 2,
            height: 2,
            samples: Bytes::from(vec![0u8; 4]),
        };
        assert!(accept_push_message(&state, Bytes::from(good.to_bytes())).await.is_ok());
        assert_eq!(state.store.version(), 1);
    }

    #[tokio::test]
    async fn empty_push_is_dropped() {
        let state = state(PushFormat::Compressed);
        assert!(matches!(
            accept_push_message(&state, Bytes::new()).await,
            Err(PushError::Empty)
        ));
        assert!(state.store.read().is_none());
    }
}
