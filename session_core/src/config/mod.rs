//! Configuration management for the session controller.
//!
//! Settings are read from a TOML file, then environment variables with the
//! `TUNNEL_` prefix are layered on top. Every field has a default, so an
//! empty file (or no file at all) yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Environment variable naming the configuration file to load.
pub const CONFIG_PATH_ENV: &str = "TUNNEL_CONFIG";

/// Identity token stamped on every interface this controller creates.
///
/// {AFE43773-E1F8-4EBB-8536-576AB86AFE9A}
pub const DEFAULT_INTERFACE_IDENTITY: Uuid =
    Uuid::from_u128(0xafe43773_e1f8_4ebb_8536_576ab86afe9a);

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] io::Error),

    /// Error parsing TOML configuration
    #[error("Failed to parse TOML config: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Error serializing configuration to TOML
    #[error("Failed to serialize config to TOML: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    /// Invalid configuration value
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),
}

/// Session bring-up policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// How long to wait for both address families to attach (default: 5000 ms)
    #[serde(default = "default_attachment_timeout_ms")]
    pub attachment_timeout_ms: u64,

    /// Identity token handed to the device driver
    #[serde(default = "default_interface_identity")]
    pub interface_identity: Uuid,

    /// Upper bound (exclusive) of the handle space (default: i32::MAX)
    #[serde(default = "default_max_handles")]
    pub max_handles: i32,
}

fn default_attachment_timeout_ms() -> u64 {
    5_000
}

fn default_interface_identity() -> Uuid {
    DEFAULT_INTERFACE_IDENTITY
}

fn default_max_handles() -> i32 {
    i32::MAX
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            attachment_timeout_ms: default_attachment_timeout_ms(),
            interface_identity: default_interface_identity(),
            max_handles: default_max_handles(),
        }
    }
}

impl SessionConfig {
    /// Returns the attachment timeout as a [`Duration`].
    pub fn attachment_timeout(&self) -> Duration {
        Duration::from_millis(self.attachment_timeout_ms)
    }
}

/// Control socket settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UapiConfig {
    /// Directory holding one `<interface>.sock` per session
    #[serde(default = "default_socket_dir")]
    pub socket_dir: PathBuf,
}

fn default_socket_dir() -> PathBuf {
    PathBuf::from("/var/run/wireguard")
}

impl Default for UapiConfig {
    fn default() -> Self {
        UapiConfig {
            socket_dir: default_socket_dir(),
        }
    }
}

/// Process-level logging settings (binaries only; sessions log where the
/// host tells them to).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (default: "info")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines (default: false)
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub uapi: UapiConfig,

    #[serde(default)]
    pub log: LogConfig,
}

impl ControllerConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        ControllerConfig::default()
    }

    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;

        Self::apply_env_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    /// Parse and validate configuration text without touching the environment.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ControllerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve configuration the way an embedded library does: the file named
    /// by `TUNNEL_CONFIG` when set, otherwise defaults plus overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::load(PathBuf::from(path)),
            None => {
                let mut config = Self::default();
                Self::apply_env_overrides(&mut config);
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.attachment_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "session.attachment_timeout_ms".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if self.session.max_handles <= 0 {
            return Err(ConfigError::InvalidValue {
                key: "session.max_handles".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if self.session.interface_identity.is_nil() {
            return Err(ConfigError::InvalidValue {
                key: "session.interface_identity".to_string(),
                message: "identity token cannot be nil".to_string(),
            });
        }

        if self.uapi.socket_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "uapi.socket_dir".to_string(),
                message: "socket directory cannot be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Apply environment variable overrides (prefix: TUNNEL_)
    ///
    /// Keys: TUNNEL_ATTACHMENT_TIMEOUT_MS, TUNNEL_INTERFACE_IDENTITY,
    /// TUNNEL_MAX_HANDLES, TUNNEL_SOCKET_DIR, TUNNEL_LOG_LEVEL, TUNNEL_JSON_LOGS
    fn apply_env_overrides(cfg: &mut ControllerConfig) {
        use std::env;

        fn parse_bool(s: &str) -> Option<bool> {
            match s.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "y" => Some(true),
                "false" | "0" | "no" | "n" => Some(false),
                _ => None,
            }
        }

        if let Ok(v) = env::var("TUNNEL_ATTACHMENT_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                cfg.session.attachment_timeout_ms = n;
            }
        }
        if let Ok(v) = env::var("TUNNEL_INTERFACE_IDENTITY") {
            if let Ok(id) = Uuid::parse_str(v.trim()) {
                cfg.session.interface_identity = id;
            }
        }
        if let Ok(v) = env::var("TUNNEL_MAX_HANDLES") {
            if let Ok(n) = v.parse() {
                cfg.session.max_handles = n;
            }
        }
        if let Ok(v) = env::var("TUNNEL_SOCKET_DIR") {
            if !v.is_empty() {
                cfg.uapi.socket_dir = PathBuf::from(v);
            }
        }
        if let Ok(v) = env::var("TUNNEL_LOG_LEVEL") {
            cfg.log.level = v;
        }
        if let Ok(v) = env::var("TUNNEL_JSON_LOGS") {
            if let Some(b) = parse_bool(&v) {
                cfg.log.json = b;
            }
        }
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("tunnel").join("config.toml")
        } else {
            PathBuf::from("config.toml")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_path_is_per_user_toml() {
        let path = ControllerConfig::default_path();
        assert_eq!(path.file_name().unwrap(), "config.toml");
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ControllerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.attachment_timeout(), Duration::from_secs(5));
        assert_eq!(
            config.session.interface_identity.to_string(),
            "afe43773-e1f8-4ebb-8536-576ab86afe9a"
        );
        assert_eq!(config.session.max_handles, i32::MAX);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = ControllerConfig::from_toml_str("").unwrap();
        assert_eq!(config.uapi.socket_dir, PathBuf::from("/var/run/wireguard"));
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = ControllerConfig::from_toml_str(
            r#"
            [session]
            attachment_timeout_ms = 0
            "#,
        );
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "session.attachment_timeout_ms"
        ));
    }
}
