use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use voxrelay_sfu::{BookkeepingConfig, SfuConfig};

use crate::logging::LogFormat;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub voice: VoiceConfig,
    pub sfu: SfuConfig,
    pub engine: BookkeepingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    /// Path the voice gateway websocket is served on
    pub ws_path: String,
    /// Largest accepted websocket message, in bytes
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 3004,
            ws_path: "/".to_string(),
            max_message_size: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Empty disables the database; voice sessions then come from
    /// `voice.static_sessions`
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
    /// Extra `target=level` directives, e.g. `voxrelay_sfu::reconciler=debug`
    pub targets: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
            targets: Vec::new(),
        }
    }
}

/// A voice session known without a database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticSession {
    pub server_id: String,
    pub user_id: String,
    pub session_id: String,
    pub token: String,
    pub channel_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Address reported to clients in Ready
    pub announced_ip: String,
    pub announced_port: u16,
    pub heartbeat_interval_ms: u64,
    /// Connections that do not identify in time are closed
    pub identify_timeout_ms: u64,
    pub experiments: Vec<String>,
    pub static_sessions: Vec<StaticSession>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            announced_ip: "127.0.0.1".to_string(),
            announced_port: 9009,
            heartbeat_interval_ms: 13_750,
            identify_timeout_ms: 10_000,
            experiments: vec!["fixed_keyframe_interval".to_string()],
            static_sessions: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // VOXRELAY_SERVER_HOST, VOXRELAY_VOICE_ANNOUNCED_IP, ...
        builder = builder.add_source(
            Environment::with_prefix("VOXRELAY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    #[must_use]
    pub fn has_database(&self) -> bool {
        !self.database.url.is_empty()
    }

    /// Check every setting and return all problems found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.host.trim().is_empty() {
            errors.push("server.host must not be empty".to_string());
        }
        if self.server.http_port == 0 {
            errors.push("server.http_port must not be 0".to_string());
        }
        if !self.server.ws_path.starts_with('/') {
            errors.push(format!(
                "server.ws_path must start with '/', got {:?}",
                self.server.ws_path
            ));
        }
        if self.server.max_message_size == 0 {
            errors.push("server.max_message_size must not be 0".to_string());
        }

        if self.logging.format.parse::<LogFormat>().is_err() {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got {:?}",
                self.logging.format
            ));
        }

        if self.has_database() && self.database.min_connections > self.database.max_connections {
            errors.push("database.min_connections exceeds database.max_connections".to_string());
        }

        if self.voice.heartbeat_interval_ms == 0 {
            errors.push("voice.heartbeat_interval_ms must not be 0".to_string());
        }
        if self.voice.identify_timeout_ms == 0 {
            errors.push("voice.identify_timeout_ms must not be 0".to_string());
        }
        if self.voice.announced_ip.trim().is_empty() {
            errors.push("voice.announced_ip must not be empty".to_string());
        }

        if self.sfu.peer_event_buffer == 0 {
            errors.push("sfu.peer_event_buffer must not be 0".to_string());
        }
        if self.sfu.video_scalability_mode.is_empty() {
            errors.push("sfu.video_scalability_mode must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
