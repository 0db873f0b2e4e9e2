use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub codec: CodecConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    /// Only the camera bridge needs this section.
    pub producer: Option<ProducerConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_upload_token")]
    pub upload_token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushFormat {
    /// Binary push messages are already-compressed images.
    Compressed,
    /// Binary push messages carry an 8-byte width/height header and raw grayscale samples.
    Raw,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default = "default_min_upload_bytes")]
    pub min_upload_bytes: usize,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    #[serde(default = "default_push_format")]
    pub push_format: PushFormat,
    #[serde(default = "default_throughput_interval")]
    pub throughput_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CodecConfig {
    #[serde(default = "default_max_dim")]
    pub max_dim: u32,
    #[serde(default = "default_quality")]
    pub quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_boundary")]
    pub boundary: String,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    #[serde(default = "default_viewer_queue")]
    pub viewer_queue: usize,
    #[serde(default = "default_viewer_send_timeout_ms")]
    pub viewer_send_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProducerConfig {
    pub source_url: String,
    pub relay_url: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_fps")]
    pub fps: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            upload_token: default_upload_token(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            content_type: default_content_type(),
            min_upload_bytes: default_min_upload_bytes(),
            max_upload_bytes: default_max_upload_bytes(),
            push_format: default_push_format(),
            throughput_interval_secs: default_throughput_interval(),
        }
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_dim: default_max_dim(),
            quality: default_quality(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            boundary: default_boundary(),
            keepalive_secs: default_keepalive_secs(),
            viewer_queue: default_viewer_queue(),
            viewer_send_timeout_ms: default_viewer_send_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

// Default value functions
fn default_bind() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}
fn default_upload_token() -> String {
    "change-me".into()
}
fn default_content_type() -> String {
    "image/jpeg".into()
}
fn default_min_upload_bytes() -> usize {
    100
}
fn default_max_upload_bytes() -> usize {
    8 * 1024 * 1024
}
fn default_push_format() -> PushFormat {
    PushFormat::Compressed
}
fn default_throughput_interval() -> u64 {
    1
}
fn default_max_dim() -> u32 {
    2000
}
fn default_quality() -> u8 {
    75
}
fn default_boundary() -> String {
    "frame".into()
}
fn default_keepalive_secs() -> u64 {
    10
}
fn default_viewer_queue() -> usize {
    4
}
fn default_viewer_send_timeout_ms() -> u64 {
    500
}
fn default_mode() -> String {
    "mjpeg".into()
}
fn default_fps() -> f64 {
    10.0
}
fn default_log_level() -> String {
    "info".into()
}
