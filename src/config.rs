//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{GaugeBridgeError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// MAVLink link and listener loop configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    /// Any address accepted by `mavlink::connect` (udpin:, udpout:, tcpout:, serial:)
    #[serde(default = "default_link_url")]
    pub url: String,

    #[serde(default = "default_recv_timeout_ms")]
    pub recv_timeout_ms: u64,

    #[serde(default = "default_publish_rate_hz")]
    pub publish_rate_hz: u32,

    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,

    /// MAV_TYPE the vehicle lock commits to (2 = quadrotor)
    #[serde(default = "default_target_mav_type")]
    pub target_mav_type: u8,

    #[serde(default = "default_forward_raw_frames")]
    pub forward_raw_frames: bool,

    #[serde(default = "default_initial_snapshot_delay_ms")]
    pub initial_snapshot_delay_ms: u64,

    /// Frames buffered between the MAVLink reader thread and the listener
    #[serde(default = "default_frame_buffer")]
    pub frame_buffer: usize,
}

/// Companion HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_server_bind")]
    pub bind: String,

    #[serde(default = "default_stream_capacity")]
    pub stream_capacity: usize,

    #[serde(default = "default_ws_capacity")]
    pub ws_capacity: usize,

    #[serde(default = "default_keepalive_s")]
    pub keepalive_s: u64,
}

/// Relay bridge configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    #[serde(default = "default_relay_bind")]
    pub bind: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_stream_path")]
    pub stream_path: String,

    #[serde(default = "default_reachability_path")]
    pub reachability_path: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_read_timeout_s")]
    pub read_timeout_s: u64,

    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,
}

/// Log output configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,

    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,

    #[serde(default = "default_log_file_enabled")]
    pub file_enabled: bool,
}

// Default value functions
fn default_link_url() -> String { "udpin:0.0.0.0:14540".to_string() }
fn default_recv_timeout_ms() -> u64 { 1000 }
fn default_publish_rate_hz() -> u32 { 10 }
fn default_restart_delay_ms() -> u64 { 5000 }
fn default_target_mav_type() -> u8 { 2 }
fn default_forward_raw_frames() -> bool { true }
fn default_initial_snapshot_delay_ms() -> u64 { 2000 }
fn default_frame_buffer() -> usize { 1024 }

fn default_server_bind() -> String { "0.0.0.0:3000".to_string() }
fn default_stream_capacity() -> usize { 256 }
fn default_ws_capacity() -> usize { 200 }
fn default_keepalive_s() -> u64 { 15 }

fn default_relay_bind() -> String { "0.0.0.0:8000".to_string() }
fn default_base_url() -> String { "http://10.13.0.3:3000".to_string() }
fn default_stream_path() -> String { "/telemetry/stream".to_string() }
fn default_reachability_path() -> String { "/config".to_string() }
fn default_namespace() -> String { "/".to_string() }
fn default_retry_delay_ms() -> u64 { 2000 }
fn default_read_timeout_s() -> u64 { 45 }
fn default_subscriber_capacity() -> usize { 256 }

fn default_log_dir() -> String { "./logs".to_string() }
fn default_log_file_prefix() -> String { "gauge-bridge.log".to_string() }
fn default_log_file_enabled() -> bool { true }

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            url: default_link_url(),
            recv_timeout_ms: default_recv_timeout_ms(),
            publish_rate_hz: default_publish_rate_hz(),
            restart_delay_ms: default_restart_delay_ms(),
            target_mav_type: default_target_mav_type(),
            forward_raw_frames: default_forward_raw_frames(),
            initial_snapshot_delay_ms: default_initial_snapshot_delay_ms(),
            frame_buffer: default_frame_buffer(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_server_bind(),
            stream_capacity: default_stream_capacity(),
            ws_capacity: default_ws_capacity(),
            keepalive_s: default_keepalive_s(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: default_relay_bind(),
            base_url: default_base_url(),
            stream_path: default_stream_path(),
            reachability_path: default_reachability_path(),
            namespace: default_namespace(),
            retry_delay_ms: default_retry_delay_ms(),
            read_timeout_s: default_read_timeout_s(),
            subscriber_capacity: default_subscriber_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            file_prefix: default_log_file_prefix(),
            file_enabled: default_log_file_enabled(),
        }
    }
}

impl RelayConfig {
    /// Full URL of the companion's event stream
    pub fn stream_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.stream_path)
    }

    /// Full URL of the reachability check
    pub fn reachability_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.reachability_path)
    }
}

fn invalid(msg: impl std::fmt::Display) -> GaugeBridgeError {
    GaugeBridgeError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use gauge_bridge::config::Config;
    ///
    /// let config = Config::load("config/gauge-bridge.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise run on defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            return Self::load(path);
        }
        let mut config = Config::default();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `COMPANION_*` environment overrides to the relay section
    fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("COMPANION_BASE_URL") {
            self.relay.base_url = url;
        }
        if let Some(path) = lookup("COMPANION_STREAM_PATH") {
            self.relay.stream_path = path;
        }
        if let Some(ns) = lookup("COMPANION_NS") {
            self.relay.namespace = ns;
        }
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        if self.link.url.is_empty() {
            return Err(invalid("link url cannot be empty"));
        }

        if self.link.recv_timeout_ms == 0 || self.link.recv_timeout_ms > 10000 {
            return Err(invalid("recv_timeout_ms must be between 1 and 10000"));
        }

        if self.link.publish_rate_hz == 0 || self.link.publish_rate_hz > 100 {
            return Err(invalid("publish_rate_hz must be between 1 and 100"));
        }

        if self.link.restart_delay_ms == 0 || self.link.restart_delay_ms > 60000 {
            return Err(invalid("restart_delay_ms must be between 1 and 60000"));
        }

        if self.link.initial_snapshot_delay_ms > 60000 {
            return Err(invalid("initial_snapshot_delay_ms must be at most 60000"));
        }

        if self.link.frame_buffer == 0 {
            return Err(invalid("frame_buffer must be greater than 0"));
        }

        for (name, value) in [
            ("stream_capacity", self.server.stream_capacity),
            ("ws_capacity", self.server.ws_capacity),
            ("subscriber_capacity", self.relay.subscriber_capacity),
        ] {
            if value == 0 {
                return Err(invalid(format!("{} must be greater than 0", name)));
            }
        }

        if self.server.keepalive_s == 0 || self.server.keepalive_s > 300 {
            return Err(invalid("keepalive_s must be between 1 and 300"));
        }

        for (name, bind) in [("server bind", &self.server.bind), ("relay bind", &self.relay.bind)] {
            if bind.parse::<std::net::SocketAddr>().is_err() {
                return Err(invalid(format!("{} '{}' is not a socket address", name, bind)));
            }
        }

        if !self.relay.base_url.starts_with("http://") {
            return Err(invalid("relay base_url must start with http://"));
        }

        for (name, path) in [
            ("stream_path", &self.relay.stream_path),
            ("reachability_path", &self.relay.reachability_path),
        ] {
            if !path.starts_with('/') {
                return Err(invalid(format!("{} must start with '/'", name)));
            }
        }

        if self.relay.retry_delay_ms == 0 || self.relay.retry_delay_ms > 60000 {
            return Err(invalid("retry_delay_ms must be between 1 and 60000"));
        }

        // The companion pings every keepalive_s; a shorter read timeout would
        // tear down healthy idle streams.
        if self.relay.read_timeout_s < self.server.keepalive_s {
            return Err(invalid("read_timeout_s must not be shorter than keepalive_s"));
        }

        if self.logging.file_enabled && self.logging.dir.is_empty() {
            return Err(invalid("logging dir cannot be empty when file logging is enabled"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[link]
url = "tcpout:127.0.0.1:5760"
publish_rate_hz = 20

[server]

[relay]
base_url = "http://127.0.0.1:3000"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.link.url, "tcpout:127.0.0.1:5760");
        assert_eq!(config.link.publish_rate_hz, 20);
        assert_eq!(config.link.recv_timeout_ms, 1000);
        assert_eq!(config.server.ws_capacity, 200);
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[link\nurl = ").unwrap();
        temp_file.flush().unwrap();

        assert!(matches!(
            Config::load(temp_file.path()),
            Err(GaugeBridgeError::Config(_))
        ));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:3000");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("COMPANION_BASE_URL", "http://192.168.13.1:3000"),
            ("COMPANION_NS", "/telemetry"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.relay.base_url, "http://192.168.13.1:3000");
        assert_eq!(config.relay.namespace, "/telemetry");
        assert_eq!(config.relay.stream_path, "/telemetry/stream");
    }

    #[test]
    fn test_shipped_config_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/gauge-bridge.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.link.target_mav_type, 2);
        assert_eq!(config.server.keepalive_s, 15);
        assert_eq!(config.relay.retry_delay_ms, 2000);
    }

    #[test]
    fn test_relay_urls() {
        let mut config = Config::default();
        config.relay.base_url = "http://companion:3000/".to_string();
        assert_eq!(config.relay.stream_url(), "http://companion:3000/telemetry/stream");
        assert_eq!(config.relay.reachability_url(), "http://companion:3000/config");
    }

    #[test]
    fn test_empty_link_url() {
        let mut config = Config::default();
        config.link.url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_recv_timeout_bounds() {
        let mut config = Config::default();
        config.link.recv_timeout_ms = 0;
        assert!(config.validate().is_err());
        config.link.recv_timeout_ms = 10001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_publish_rate_bounds() {
        let mut config = Config::default();
        config.link.publish_rate_hz = 0;
        assert!(config.validate().is_err());
        config.link.publish_rate_hz = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_restart_delay_zero() {
        let mut config = Config::default();
        config.link.restart_delay_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_capacities() {
        let mut config = Config::default();
        config.server.stream_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.ws_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.relay.subscriber_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_bind_address() {
        let mut config = Config::default();
        config.relay.bind = "localhost".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_base_url_scheme() {
        let mut config = Config::default();
        config.relay.base_url = "ws://10.13.0.3:3000".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_paths_need_leading_slash() {
        let mut config = Config::default();
        config.relay.stream_path = "telemetry/stream".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_read_timeout_shorter_than_keepalive() {
        let mut config = Config::default();
        config.relay.read_timeout_s = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_log_dir() {
        let mut config = Config::default();
        config.logging.dir = String::new();
        assert!(config.validate().is_err());
        config.logging.file_enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_functions() {
        assert_eq!(default_link_url(), "udpin:0.0.0.0:14540");
        assert_eq!(default_recv_timeout_ms(), 1000);
        assert_eq!(default_publish_rate_hz(), 10);
        assert_eq!(default_restart_delay_ms(), 5000);
        assert_eq!(default_target_mav_type(), 2);
        assert_eq!(default_stream_capacity(), 256);
        assert_eq!(default_ws_capacity(), 200);
        assert_eq!(default_keepalive_s(), 15);
        assert_eq!(default_retry_delay_ms(), 2000);
        assert_eq!(default_reachability_path(), "/config");
    }
}
