//! Viewer-facing endpoints: latest frame, multipart stream, WebSocket feed
//! and the health probe.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderName};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use frame_relay_common::multipart::{encode_part, stream_content_type};
use futures_util::{SinkExt, Stream, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, trace};

use crate::error::RelayError;
use crate::state::AppState;
use crate::store::{FrameStore, Wake};

pub const FRAME_TIMESTAMP: HeaderName = HeaderName::from_static("x-frame-timestamp");

const NO_CACHE: &str = "no-store, no-cache, must-revalidate, max-age=0";

#[derive(Debug, Serialize)]
pub struct Health {
    pub ok: bool,
    pub has_frame: bool,
    pub ts: f64,
    pub version: u64,
    pub viewers: usize,
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Health> {
    let frame = state.store.read();
    Json(Health {
        ok: true,
        has_frame: frame.is_some(),
        ts: frame.map(|f| f.timestamp_secs()).unwrap_or(0.0),
        version: state.store.version(),
        viewers: state.viewers.len(),
    })
}

/// GET /latest.jpg
pub async fn latest(State(state): State<Arc<AppState>>) -> Result<Response, RelayError> {
    let frame = state.store.read().ok_or(RelayError::NotFound)?;
    Ok((
        [
            (header::CONTENT_TYPE, state.ingest.content_type.clone()),
            (header::CACHE_CONTROL, NO_CACHE.to_string()),
            (header::PRAGMA, "no-cache".to_string()),
            (FRAME_TIMESTAMP, frame.timestamp_secs().to_string()),
        ],
        frame.payload,
    )
        .into_response())
}

/// GET /stream.mjpeg
pub async fn stream(State(state): State<Arc<AppState>>) -> Response {
    info!("multipart viewer connected");
    let parts = frame_parts(
        Arc::clone(&state.store),
        state.stream.boundary.clone(),
        state.ingest.content_type.clone(),
        state.keepalive(),
        state.shutdown_listener(),
    );
    (
        [
            (
                header::CONTENT_TYPE,
                stream_content_type(&state.stream.boundary),
            ),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
        Body::from_stream(parts),
    )
        .into_response()
}

/// Multipart parts for one connection: the current frame first, then one part
/// per newly published timestamp. Keep-alive ticks emit nothing. The stream
/// ends when `shutdown` flips or its sender goes away, otherwise only when the
/// response body is dropped.
pub fn frame_parts(
    store: Arc<FrameStore>,
    boundary: String,
    content_type: String,
    keepalive: Duration,
    shutdown: watch::Receiver<bool>,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    futures_util::stream::unfold(
        (store, shutdown, 0u64, None::<i64>),
        move |(store, mut shutdown, mut seen, mut last_sent)| {
            let boundary = boundary.clone();
            let content_type = content_type.clone();
            async move {
                loop {
                    if *shutdown.borrow_and_update() {
                        debug!("multipart stream closed for shutdown");
                        return None;
                    }
                    let wake = tokio::select! {
                        wake = store.await_after(seen, keepalive) => wake,
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                return None;
                            }
                            continue;
                        }
                    };
                    match wake {
                        Wake::Timeout => trace!("multipart keep-alive tick"),
                        Wake::Frame(frame) => {
                            seen = frame.version;
                            if last_sent == Some(frame.captured_at_us) {
                                continue;
                            }
                            last_sent = Some(frame.captured_at_us);
                            let part = encode_part(&boundary, &content_type, &frame.payload);
                            return Some((Ok(part), (store, shutdown, seen, last_sent)));
                        }
                    }
                }
            }
        },
    )
}

/// GET /ws/view: send-only WebSocket feed.
pub async fn view_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| view_session(socket, state))
}

async fn view_session(socket: WebSocket, state: Arc<AppState>) {
    // Dropping the subscription on any exit path unregisters the viewer.
    let mut subscription = state.viewers.subscribe();
    let viewer = subscription.id();
    let mut shutdown = state.shutdown_listener();
    let (mut outbound, mut inbound) = socket.split();

    loop {
        tokio::select! {
            _ = async { let _ = shutdown.wait_for(|closing| *closing).await; } => {
                let _ = outbound.send(Message::Close(None)).await;
                break;
            }
            frame = subscription.recv() => {
                let Some(payload) = frame else {
                    debug!(viewer, "viewer evicted");
                    break;
                };
                if outbound.send(Message::Binary(payload.to_vec())).await.is_err() {
                    break;
                }
            }
            message = inbound.next() => match message {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Inbound traffic is ignored.
                Some(Ok(_)) => {}
            },
        }
    }
}
