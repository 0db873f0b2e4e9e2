use bytes::Bytes;
use std::time::Duration;
use tracing::debug;

use crate::ProducerError;

/// Pushes frames to the relay's `/upload` endpoint.
pub struct RelayClient {
    http: reqwest::Client,
    upload_url: String,
    token: String,
    content_type: String,
}

impl RelayClient {
    pub fn new(relay_url: &str, token: &str, content_type: &str) -> Result<Self, ProducerError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(ProducerError::HttpConnect)?;
        Ok(Self {
            http,
            upload_url: upload_url(relay_url),
            token: token.to_string(),
            content_type: content_type.to_string(),
        })
    }

    pub async fn upload(&self, payload: Bytes) -> Result<(), ProducerError> {
        let bytes = payload.len();
        let response = self
            .http
            .post(&self.upload_url)
            .header("x-token", &self.token)
            .header(reqwest::header::CONTENT_TYPE, &self.content_type)
            .body(payload)
            .send()
            .await
            .map_err(ProducerError::Upload)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProducerError::RelayStatus(status.as_u16()));
        }
        debug!(bytes, "frame uploaded");
        Ok(())
    }
}

fn upload_url(relay_url: &str) -> String {
    format!("{}/upload", relay_url.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_url_joins_cleanly() {
        assert_eq!(upload_url("http://relay:8000"), "http://relay:8000/upload");
        assert_eq!(upload_url("http://relay:8000/"), "http://relay:8000/upload");
    }
}
