//! Configuration system for Tether.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $TETHER_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/tether/config.toml
//!   3. ~/.config/tether/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::WireFormat;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub messaging: MessagingConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Hostname every connector of this node reports. Sender of all outbound messages.
    pub hostname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the multi-client server listens on.
    pub listen_addr: String,
    pub wire_format: WireFormat,
    /// Remote endpoints dialled as single-link connectors.
    pub uplinks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Used when callers omit a timeout. Must be >= 0.
    pub default_timeout_secs: f64,
    /// Characters per chunk for split sends.
    pub chunk_size: usize,
    /// Pause between fire-and-forget chunks.
    pub chunk_delay_ms: u64,
    /// Partial reassemblies older than this are evicted.
    pub reassembly_ttl_secs: u64,
    /// Largest chunk count a peer may announce for one split message.
    pub max_chunks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// How often dead peer sessions are swept out.
    pub sweep_interval_secs: u64,
    /// How often each peer session polls its transport for liveness.
    pub liveness_interval_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "tether".to_string()),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7878".to_string(),
            wire_format: WireFormat::Socket,
            uplinks: Vec::new(),
        }
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 2.0,
            chunk_size: 200,
            chunk_delay_ms: 50,
            reassembly_ttl_secs: 30,
            max_chunks: 4096,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 5,
            liveness_interval_secs: 2,
        }
    }
}

impl MessagingConfig {
    /// The default timeout, or `None` if it is negative, not finite or does
    /// not fit a `Duration`.
    pub fn default_timeout(&self) -> Option<Duration> {
        if self.default_timeout_secs < 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(self.default_timeout_secs).ok()
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn reassembly_ttl(&self) -> Duration {
        Duration::from_secs(self.reassembly_ttl_secs)
    }
}

impl ServerConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs.max(1))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("tether")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl TetherConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            TetherConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("TETHER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&TetherConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject values the messaging layer cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity.hostname.is_empty() {
            return Err(ConfigError::Invalid("identity.hostname", "empty".into()));
        }
        if self.messaging.default_timeout().is_none() {
            return Err(ConfigError::Invalid(
                "messaging.default_timeout_secs",
                self.messaging.default_timeout_secs.to_string(),
            ));
        }
        if self.messaging.chunk_size == 0 {
            return Err(ConfigError::Invalid("messaging.chunk_size", "0".into()));
        }
        if self.messaging.max_chunks == 0 {
            return Err(ConfigError::Invalid("messaging.max_chunks", "0".into()));
        }
        Ok(())
    }

    /// Apply TETHER_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TETHER_IDENTITY__HOSTNAME") {
            self.identity.hostname = v;
        }
        if let Ok(v) = std::env::var("TETHER_NETWORK__LISTEN_ADDR") {
            self.network.listen_addr = v;
        }
        if let Ok(v) = std::env::var("TETHER_NETWORK__WIRE_FORMAT") {
            match v.as_str() {
                "socket" => self.network.wire_format = WireFormat::Socket,
                "serial" => self.network.wire_format = WireFormat::Serial,
                other => tracing::warn!(value = other, "unknown wire format override, ignoring"),
            }
        }
        if let Ok(v) = std::env::var("TETHER_MESSAGING__DEFAULT_TIMEOUT_SECS") {
            if let Ok(t) = v.parse() {
                self.messaging.default_timeout_secs = t;
            }
        }
        if let Ok(v) = std::env::var("TETHER_MESSAGING__CHUNK_SIZE") {
            if let Ok(n) = v.parse() {
                self.messaging.chunk_size = n;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = TetherConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.network.wire_format, WireFormat::Socket);
        assert!(config.network.uplinks.is_empty());
        assert_eq!(config.messaging.chunk_size, 200);
    }

    #[test]
    fn negative_timeout_is_rejected() {
        let mut config = TetherConfig::default();
        config.messaging.default_timeout_secs = -1.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid("messaging.default_timeout_secs", _))
        ));
    }

    #[test]
    fn timeout_beyond_duration_range_is_rejected() {
        let mut config = TetherConfig::default();
        config.messaging.default_timeout_secs = 1e30;
        assert!(config.messaging.default_timeout().is_none());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid("messaging.default_timeout_secs", _))
        ));

        config.messaging.default_timeout_secs = f64::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_max_chunks_is_rejected() {
        let mut config = TetherConfig::default();
        config.messaging.max_chunks = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid("messaging.max_chunks", _))
        ));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let text = r#"
            [identity]
            hostname = "attic-hub"

            [network]
            wire_format = "serial"
        "#;
        let config: TetherConfig = toml::from_str(text).unwrap();
        assert_eq!(config.identity.hostname, "attic-hub");
        assert_eq!(config.network.wire_format, WireFormat::Serial);
        assert_eq!(config.network.listen_addr, "127.0.0.1:7878");
        assert_eq!(config.server.sweep_interval_secs, 5);
    }

    #[test]
    fn write_default_if_missing_creates_file() {
        let tmp = std::env::temp_dir().join(format!("tether-config-test-{}", std::process::id()));
        let config_path = tmp.join("config.toml");
        std::fs::create_dir_all(&tmp).unwrap();

        // Set env to point to our temp path
        unsafe {
            std::env::set_var("TETHER_CONFIG", config_path.to_str().unwrap());
        }

        let path =
            TetherConfig::write_default_if_missing().expect("write_default_if_missing failed");
        assert!(path.exists());

        let config = TetherConfig::load().expect("load should succeed");
        assert_eq!(config.messaging.chunk_size, 200);

        unsafe {
            std::env::remove_var("TETHER_CONFIG");
        }
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
