//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms set these)
//! 2. Environment variables (APP_SERVER__PORT, APP_AUDIO__DEVICE, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! Nested keys use a double underscore so that field names may contain
//! single underscores: `APP_AUDIO__QUEUE_CAPACITY=40` sets `audio.queue_capacity`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, audio, transport,
/// performance) keeps each concern's knobs next to each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub transport: TransportConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`: IP address to bind to. The default `0.0.0.0` makes the stream
///   reachable from phones and other machines on the LAN
/// - `port`: TCP port number to listen on
/// - `client_page`: Optional path to an HTML file served at `/` instead of
///   the built-in player
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub client_page: Option<String>,
}

/// Audio capture settings.
///
/// ## Fields:
/// - `device`: Capture this device (case-insensitive name fragment) instead
///   of searching for a loopback device
/// - `queue_capacity`: 20ms buffers held between the capture thread and the
///   producer; the oldest is dropped when full
/// - `subscriber_queue_capacity`: Frames buffered per client before that
///   client starts losing its oldest frames
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default)]
    pub device: Option<String>,
    pub queue_capacity: usize,
    pub subscriber_queue_capacity: usize,
}

/// Media transport settings.
///
/// ## Fields:
/// - `ice_servers`: STUN/TURN URLs offered to the ICE agent
/// - `opus_bitrate`: Target Opus bitrate in bits per second
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub ice_servers: Vec<String>,
    pub opus_bitrate: i32,
}

/// Performance tuning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Maximum number of clients streaming at once
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                client_page: None,
            },
            audio: AudioConfig {
                device: None,
                queue_capacity: crate::audio::QUEUE_CAPACITY,
                subscriber_queue_capacity: 50,
            },
            transport: TransportConfig {
                ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
                opus_bitrate: 128_000,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 16,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_AUDIO__DEVICE="BlackHole"`: Capture a specific device
    /// - `APP_TRANSPORT__ICE_SERVERS=stun:a:3478,stun:b:3478`: Comma-separated list
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special case for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("transport.ice_servers"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Both queue capacities hold at least one item
    /// - At least one session is allowed
    /// - The Opus bitrate is inside the range libopus accepts
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.audio.queue_capacity == 0 {
            return Err(anyhow::anyhow!("Audio queue capacity must be greater than 0"));
        }

        if self.audio.subscriber_queue_capacity == 0 {
            return Err(anyhow::anyhow!(
                "Subscriber queue capacity must be greater than 0"
            ));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if !(6_000..=510_000).contains(&self.transport.opus_bitrate) {
            return Err(anyhow::anyhow!(
                "Opus bitrate must be between 6000 and 510000, got {}",
                self.transport.opus_bitrate
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.audio.queue_capacity, 20);
        assert!(config.audio.device.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.transport.opus_bitrate = 1_000_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults_survive_config_roundtrip() {
        let built = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default()).expect("serializable"))
            .build()
            .expect("buildable");
        let config: AppConfig = built.try_deserialize().expect("deserializable");

        assert_eq!(config.transport.ice_servers.len(), 1);
        assert_eq!(config.audio.subscriber_queue_capacity, 50);
    }
}
