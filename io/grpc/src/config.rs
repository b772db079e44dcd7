//! Server and client configuration.
//!
//! Both configs deserialize from TOML with serde defaults on every field,
//! so an empty file (or no file) yields a working configuration.

use serde::Deserialize;
use std::path::Path;

use http2::ConnectionSettings;

use crate::error::RpcError;

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Listen address.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// HTTP/2 transport knobs.
    #[serde(default)]
    pub http2: Http2Options,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            http2: Http2Options::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RpcError> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| RpcError::Config(e.to_string()))
    }
}

fn default_listen() -> String {
    "127.0.0.1:50051".to_string()
}

/// Client configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// `:authority` to send; defaults to the dial address.
    #[serde(default)]
    pub authority: Option<String>,

    /// HTTP/2 transport knobs.
    #[serde(default)]
    pub http2: Http2Options,
}

impl ClientConfig {
    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RpcError> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| RpcError::Config(e.to_string()))
    }
}

/// HTTP/2 transport knobs shared by both roles.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Http2Options {
    /// Initial stream flow control window.
    #[serde(default = "default_initial_window_size")]
    pub initial_window_size: u32,
    /// Largest frame payload we accept.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: u32,
    /// HPACK dynamic table size.
    #[serde(default = "default_header_table_size")]
    pub header_table_size: u32,
    /// Concurrent stream ceiling advertised to peers.
    #[serde(default = "default_max_concurrent_streams")]
    pub max_concurrent_streams: u32,
}

impl Default for Http2Options {
    fn default() -> Self {
        Self {
            initial_window_size: default_initial_window_size(),
            max_frame_size: default_max_frame_size(),
            header_table_size: default_header_table_size(),
            max_concurrent_streams: default_max_concurrent_streams(),
        }
    }
}

impl Http2Options {
    pub(crate) fn server_settings(&self) -> ConnectionSettings {
        ConnectionSettings::new()
            .initial_window_size(self.initial_window_size)
            .max_frame_size(self.max_frame_size)
            .header_table_size(self.header_table_size)
            .max_concurrent_streams(self.max_concurrent_streams)
    }

    pub(crate) fn client_settings(&self) -> ConnectionSettings {
        ConnectionSettings::client_default()
            .initial_window_size(self.initial_window_size)
            .header_table_size(self.header_table_size)
            .max_concurrent_streams(self.max_concurrent_streams)
    }
}

fn default_initial_window_size() -> u32 {
    65_535
}

fn default_max_frame_size() -> u32 {
    16_384
}

fn default_header_table_size() -> u32 {
    4_096
}

fn default_max_concurrent_streams() -> u32 {
    100
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level filter (overridden by RUST_LOG).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Whether to include timestamps.
    #[serde(default = "default_true")]
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            timestamps: true,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}
