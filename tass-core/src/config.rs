//! Client configuration.
//!
//! `ServerConfig` is the immutable connection descriptor handed to a session:
//! API base URL, client credentials, company code, token expiry offset and
//! transport retry settings. Configuration can be persisted as TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{TassError, TassResult};

/// Top-level client configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server connection settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// API base URL (e.g. "https://tass.example.edu/tassapi/api/v1").
    #[serde(default)]
    pub base: String,

    /// Client key used for the credential exchange.
    #[serde(default)]
    pub key: String,

    /// Client secret used for the credential exchange.
    #[serde(default)]
    pub secret: String,

    /// Company code inserted after the base URL on every resource call.
    #[serde(default)]
    pub cmpy_code: String,

    /// Seconds subtracted from the server-declared token expiry.
    #[serde(default = "default_token_expire_offset")]
    pub token_expire_offset: i64,

    /// Directory downloads are written to when no destination is given.
    #[serde(default = "default_attachment_dest")]
    pub attachment_dest: PathBuf,

    /// Transport retry attempts.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// HTTP status codes that trigger a transport retry.
    #[serde(default = "default_status_forcelist")]
    pub status_forcelist: Vec<u16>,

    /// Request timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Authentication endpoint relative to `base`.
    #[serde(default = "default_auth_endpoint")]
    pub auth_endpoint: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, a `tassapi-logs` folder in the temp directory.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output.
    #[serde(default)]
    pub json_output: bool,
}

// Default value functions for serde

fn default_token_expire_offset() -> i64 {
    constants::DEFAULT_TOKEN_EXPIRE_OFFSET_SECS
}

fn default_attachment_dest() -> PathBuf {
    std::env::temp_dir()
}

fn default_retries() -> u32 {
    constants::DEFAULT_RETRIES
}

fn default_status_forcelist() -> Vec<u16> {
    constants::DEFAULT_STATUS_FORCELIST.to_vec()
}

fn default_timeout() -> u64 {
    constants::DEFAULT_TIMEOUT_MS
}

fn default_auth_endpoint() -> String {
    constants::DEFAULT_AUTH_ENDPOINT.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base: String::new(),
            key: String::new(),
            secret: String::new(),
            cmpy_code: String::new(),
            token_expire_offset: default_token_expire_offset(),
            attachment_dest: default_attachment_dest(),
            retries: default_retries(),
            status_forcelist: default_status_forcelist(),
            timeout_ms: default_timeout(),
            auth_endpoint: default_auth_endpoint(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl ServerConfig {
    /// Create a configuration with the required connection fields and defaults for the rest.
    pub fn new(
        base: impl AsRef<str>,
        key: impl Into<String>,
        secret: impl Into<String>,
        cmpy_code: impl Into<String>,
    ) -> Self {
        Self {
            base: Self::sanitize_base(base.as_ref()),
            key: key.into(),
            secret: secret.into(),
            cmpy_code: cmpy_code.into(),
            ..Self::default()
        }
    }

    /// Check that every field needed to talk to the API is present.
    pub fn validate(&self) -> TassResult<()> {
        let missing: Vec<&str> = [
            ("base", self.base.is_empty()),
            ("key", self.key.is_empty()),
            ("secret", self.secret.is_empty()),
            ("cmpy_code", self.cmpy_code.is_empty()),
        ]
        .into_iter()
        .filter_map(|(name, empty)| empty.then_some(name))
        .collect();

        if !missing.is_empty() {
            return Err(TassError::Config(format!(
                "missing server settings: {}",
                missing.join(", ")
            )));
        }

        if self.token_expire_offset < 0 || chrono::TimeDelta::try_seconds(self.token_expire_offset).is_none() {
            return Err(TassError::Config(format!(
                "token_expire_offset must be a non-negative number of seconds, got {}",
                self.token_expire_offset
            )));
        }
        Ok(())
    }

    /// Trim whitespace, surrounding quotes and trailing slashes from a base URL.
    pub fn sanitize_base(base: &str) -> String {
        base.trim()
            .trim_matches('"')
            .trim()
            .trim_end_matches('/')
            .to_string()
    }
}

impl LoggingConfig {
    /// The configured log directory, or the default one.
    pub fn effective_directory(&self) -> PathBuf {
        if self.directory.is_empty() {
            std::env::temp_dir().join("tassapi-logs")
        } else {
            PathBuf::from(&self.directory)
        }
    }
}

impl AppConfig {
    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> TassResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: AppConfig = toml::from_str(&contents)?;
        config.server.base = ServerConfig::sanitize_base(&config.server.base);
        Ok(config)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> TassResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| TassError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
