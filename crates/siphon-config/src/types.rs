//! Configuration types

use serde::{Deserialize, Serialize};
use siphon_compression::{GzipConfig, MAX_LEVEL};
use siphon_core::{skip_path_prefixes, Error, Result};
use siphon_proxy::{ProxyConfig, ProxyTarget, TransportConfig};
use std::net::SocketAddr;
use std::time::Duration;

/// Level value standing for the compressor's own default
pub const DEFAULT_LEVEL_ALIAS: i64 = -1;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Listener settings
    #[serde(default)]
    pub server: ServerSettings,

    /// Response compression
    #[serde(default)]
    pub gzip: GzipSettings,

    /// Backend the gateway forwards to
    pub proxy: ProxySettings,

    /// Log output
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSettings {
    /// Listen address
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Max request body size (bytes)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Graceful shutdown timeout (wait for in-flight requests)
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_body_size: default_max_body_size(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_max_body_size() -> usize {
    10 * 1024 * 1024 // 10MB
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Compression settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GzipSettings {
    /// Enable compression
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Compression level 0-9; omitted or -1 selects the compressor default
    #[serde(default)]
    pub level: Option<i64>,

    /// Path prefixes served uncompressed
    #[serde(default)]
    pub skip_paths: Vec<String>,
}

impl Default for GzipSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            level: None,
            skip_paths: Vec::new(),
        }
    }
}

impl GzipSettings {
    /// Compression level as the middleware expects it
    pub fn level(&self) -> Result<Option<u32>> {
        match self.level {
            None | Some(DEFAULT_LEVEL_ALIAS) => Ok(None),
            Some(level) if (0..=i64::from(MAX_LEVEL)).contains(&level) => {
                Ok(u32::try_from(level).ok())
            }
            Some(level) => Err(Error::Config(format!(
                "gzip.level must be between -1 and {MAX_LEVEL}, got {level}"
            ))),
        }
    }

    /// Build the middleware configuration
    pub fn to_gzip_config(&self) -> Result<GzipConfig> {
        let config = GzipConfig {
            level: self.level()?,
            ..GzipConfig::default()
        };
        if self.skip_paths.is_empty() {
            return Ok(config);
        }
        Ok(config.with_skipper(skip_path_prefixes(self.skip_paths.iter().cloned())))
    }
}

/// Reverse proxy settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProxySettings {
    /// Backend target
    pub target: TargetSettings,

    /// Round-trip timeout
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// TCP connect timeout
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Idle pooled connection lifetime
    #[serde(default = "default_pool_idle_timeout", with = "humantime_serde")]
    pub pool_idle_timeout: Duration,

    /// Forward the client's Host header unchanged
    #[serde(default)]
    pub preserve_host: bool,

    /// Add X-Forwarded-For / X-Forwarded-Proto
    #[serde(default = "default_true")]
    pub forwarded_headers: bool,
}

/// Backend target settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetSettings {
    /// Name shown in logs
    #[serde(default)]
    pub name: Option<String>,

    /// Absolute `http://` URL
    pub url: String,
}

impl ProxySettings {
    /// Build the backend target
    pub fn target(&self) -> Result<ProxyTarget> {
        let target = ProxyTarget::new(&self.target.url)?;
        Ok(match &self.target.name {
            Some(name) => target.with_name(name.clone()),
            None => target,
        })
    }

    /// Transport settings for the backend client
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            timeout: self.timeout,
            connect_timeout: Some(self.connect_timeout),
            pool_idle_timeout: self.pool_idle_timeout,
        }
    }

    /// Forwarding behaviour
    pub fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig {
            preserve_host: self.preserve_host,
            forwarded_headers: self.forwarded_headers,
        }
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_pool_idle_timeout() -> Duration {
    Duration::from_secs(90)
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of text
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}
