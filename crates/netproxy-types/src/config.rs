//! Configuration loading from `~/.netproxy/config.toml` with defaults.
//!
//! Every field has a default, so an empty or partial file is valid. A file
//! that is missing or fails to parse is logged and replaced by the defaults.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    pub mdns: MdnsConfig,
    pub tcp: TcpConfig,
    pub http: HttpConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            mdns: MdnsConfig::default(),
            tcp: TcpConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

/// Multicast name resolution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MdnsConfig {
    /// Multicast group queries are sent to.
    pub group: Ipv4Addr,
    /// UDP port for both binding and sending.
    pub port: u16,
    /// Session timeout when the caller does not override it.
    pub timeout_ms: u64,
    /// Fixed part of the retry interval.
    pub retry_base_ms: u64,
    /// Upper bound of the uniform random part of the retry interval.
    pub retry_jitter_ms: u64,
    /// Hostnames ending with this suffix are resolved over multicast.
    pub local_suffix: String,
}

impl Default for MdnsConfig {
    fn default() -> Self {
        Self {
            group: Ipv4Addr::new(224, 0, 0, 251),
            port: 5353,
            timeout_ms: 8000,
            retry_base_ms: 1000,
            retry_jitter_ms: 500,
            local_suffix: ".local".to_string(),
        }
    }
}

impl MdnsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// TCP entity settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Capacity of each read into a `Data` event.
    pub read_buffer_size: usize,
    /// Listen backlog when the caller passes none.
    pub default_backlog: u32,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 64 * 1024,
            default_backlog: 511,
        }
    }
}

/// HTTP server entity settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Requests with larger bodies are rejected with 413.
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Default config location: `~/.netproxy/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".netproxy"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("config.toml")
}

/// Load configuration from a TOML file, with defaults.
pub fn load_config(path: Option<&Path>) -> ProxyConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return ProxyConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<ProxyConfig>(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                ProxyConfig::default()
            }
        },
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            ProxyConfig::default()
        }
    }
}
