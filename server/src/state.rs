use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use frame_relay_common::config::{Config, IngestConfig, StreamConfig};
use tokio::sync::watch;
use tracing::info;

use crate::codec::JpegCodec;
use crate::store::FrameStore;
use crate::viewers::ViewerRegistry;

/// Everything a handler needs, constructed once in `main` and shared by `Arc`.
pub struct AppState {
    pub store: Arc<FrameStore>,
    /// WebSocket viewers of the live feed.
    pub viewers: Arc<ViewerRegistry<Bytes>>,
    /// WebSocket clients of the command relay.
    pub commands: Arc<ViewerRegistry<String>>,
    pub codec: JpegCodec,
    pub ingest: IngestConfig,
    pub stream: StreamConfig,
    upload_token: String,
    /// Flips to `true` once; long-lived responses end when it does.
    shutdown: watch::Sender<bool>,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        let send_timeout = Duration::from_millis(config.stream.viewer_send_timeout_ms);
        Self {
            store: Arc::new(FrameStore::new()),
            viewers: Arc::new(ViewerRegistry::new(
                "viewers",
                config.stream.viewer_queue,
                send_timeout,
            )),
            commands: Arc::new(ViewerRegistry::new(
                "commands",
                config.stream.viewer_queue,
                send_timeout,
            )),
            codec: JpegCodec::new(&config.codec),
            ingest: config.ingest.clone(),
            stream: config.stream.clone(),
            upload_token: config.auth.upload_token.clone(),
            shutdown: watch::Sender::new(false),
        }
    }

    /// Compare a caller-supplied token against the configured secret without
    /// short-circuiting on the first differing byte.
    pub fn token_matches(&self, provided: Option<&str>) -> bool {
        let Some(provided) = provided else {
            return false;
        };
        let expected = self.upload_token.as_bytes();
        let provided = provided.as_bytes();
        if expected.len() != provided.len() {
            return false;
        }
        expected
            .iter()
            .zip(provided)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }

    /// Ask every open stream and WebSocket session to finish so the server can
    /// drain. Calling it again is a no-op.
    pub fn begin_shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!("closing open viewer streams");
        }
    }

    pub fn shutdown_listener(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.stream.keepalive_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_comparison() {
        let mut config = Config::default();
        config.auth.upload_token = "abc".into();
        let state = AppState::new(&config);
        assert!(state.token_matches(Some("abc")));
        assert!(!state.token_matches(Some("abd")));
        assert!(!state.token_matches(Some("ab")));
        assert!(!state.token_matches(Some("")));
        assert!(!state.token_matches(None));
    }

    #[tokio::test]
    async fn shutdown_reaches_existing_and_late_listeners() {
        let state = AppState::new(&Config::default());
        let mut early = state.shutdown_listener();
        assert!(!*early.borrow());

        state.begin_shutdown();
        state.begin_shutdown();
        early.changed().await.unwrap();
        assert!(*early.borrow());
        assert!(*state.shutdown_listener().borrow());
    }
}
