//! Configuration file support.
//!
//! Loads add-on backend configuration from a TOML file with per-field
//! defaults, then applies environment variable overrides.
//! Default location: /etc/addons/addon-migrate.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::{AddonError, AddonResult};

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/addons/addon-migrate.toml";

/// Environment variable overriding `paths.state_dir`.
pub const ENV_STATE_DIR: &str = "ADDON_STATE_DIR";
/// Environment variable overriding `paths.cache_dir`.
pub const ENV_CACHE_DIR: &str = "ADDON_CACHE_DIR";
/// Environment variable overriding `paths.credentials_file`.
pub const ENV_CREDENTIALS_FILE: &str = "ADDON_CREDENTIALS_FILE";
/// Environment variable overriding `legacy.host`.
pub const ENV_LEGACY_HOST: &str = "ADDON_LEGACY_HOST";
/// Environment variable overriding `legacy.port`.
pub const ENV_LEGACY_PORT: &str = "ADDON_LEGACY_PORT";

/// File-system locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Persistent state (volume registries, rendered stacks)
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Scratch area for volume staging
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Local administrator credentials for the legacy service
    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,
}

/// Legacy stack-management service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyConfig {
    /// Service host
    #[serde(default = "default_legacy_host")]
    pub host: String,

    /// Service port
    #[serde(default = "default_legacy_port")]
    pub port: u16,

    /// Endpoint (environment) id the add-on stacks belong to
    #[serde(default = "default_endpoint_id")]
    pub endpoint_id: u64,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Liveness probe attempts before giving up
    #[serde(default = "default_probe_attempts")]
    pub probe_attempts: u32,

    /// Delay between liveness probe attempts in milliseconds
    #[serde(default = "default_probe_delay")]
    pub probe_delay_millis: u64,

    /// Re-authenticate when the token expires within this many seconds
    #[serde(default = "default_token_refresh_window")]
    pub token_refresh_window_secs: u64,
}

/// Current backend (compose engine)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Container runtime CLI
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,

    /// Product version stamped on created objects
    #[serde(default = "default_product_version")]
    pub product_version: String,
}

/// Complete add-on backend configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddonConfig {
    /// File-system locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Legacy service configuration
    #[serde(default)]
    pub legacy: LegacyConfig,

    /// Compose engine configuration
    #[serde(default)]
    pub engine: EngineConfig,
}

// Default functions
fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/addons")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("/var/cache/addons")
}

fn default_credentials_file() -> PathBuf {
    PathBuf::from("/etc/addons/legacy-admin.env")
}

fn default_legacy_host() -> String {
    "127.0.0.1".to_string()
}

fn default_legacy_port() -> u16 {
    9000
}

fn default_endpoint_id() -> u64 {
    1
}

fn default_request_timeout() -> u64 {
    30
}

fn default_probe_attempts() -> u32 {
    5
}

fn default_probe_delay() -> u64 {
    2000
}

fn default_token_refresh_window() -> u64 {
    30 * 60
}

fn default_docker_binary() -> String {
    "/usr/bin/docker".to_string()
}

fn default_product_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

// Default implementations
impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            cache_dir: default_cache_dir(),
            credentials_file: default_credentials_file(),
        }
    }
}

impl Default for LegacyConfig {
    fn default() -> Self {
        Self {
            host: default_legacy_host(),
            port: default_legacy_port(),
            endpoint_id: default_endpoint_id(),
            request_timeout_secs: default_request_timeout(),
            probe_attempts: default_probe_attempts(),
            probe_delay_millis: default_probe_delay(),
            token_refresh_window_secs: default_token_refresh_window(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            docker_binary: default_docker_binary(),
            product_version: default_product_version(),
        }
    }
}

impl LegacyConfig {
    /// Base URL of the legacy REST API.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}/api", self.host, self.port)
    }

    /// Per-request timeout as Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Probe retry delay as Duration.
    pub fn probe_delay(&self) -> Duration {
        Duration::from_millis(self.probe_delay_millis)
    }

    /// Token refresh safety window as Duration.
    pub fn token_refresh_window(&self) -> Duration {
        Duration::from_secs(self.token_refresh_window_secs)
    }
}

impl AddonConfig {
    /// Load configuration from file, falling back to defaults if file not found.
    pub fn load_or_default(path: impl AsRef<Path>) -> AddonResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content).map_err(|e| match e {
                AddonError::InvalidConfig { message, .. } => {
                    AddonError::invalid_config(path.display().to_string(), message)
                }
                other => other,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(AddonError::io("read config", path, e)),
        }
    }

    /// Parses configuration from TOML text.
    pub fn from_toml_str(content: &str) -> AddonResult<Self> {
        toml::from_str(content).map_err(|e| AddonError::invalid_config("config", e.to_string()))
    }

    /// Loads from `path`, applies environment overrides and validates.
    pub fn load(path: impl AsRef<Path>) -> AddonResult<Self> {
        let mut config = Self::load_or_default(path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from a variable lookup (the process environment in
    /// production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> AddonResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_STATE_DIR) {
            self.paths.state_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_CACHE_DIR) {
            self.paths.cache_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_CREDENTIALS_FILE) {
            self.paths.credentials_file = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_LEGACY_HOST) {
            self.legacy.host = v;
        }
        if let Some(v) = lookup(ENV_LEGACY_PORT) {
            self.legacy.port = v.parse().map_err(|_| {
                AddonError::invalid_config(ENV_LEGACY_PORT, format!("'{}' is not a port", v))
            })?;
        }
        Ok(())
    }

    /// Checks value constraints.
    pub fn validate(&self) -> AddonResult<()> {
        for (field, dir) in [
            ("paths.state_dir", &self.paths.state_dir),
            ("paths.cache_dir", &self.paths.cache_dir),
        ] {
            if !dir.is_absolute() {
                return Err(AddonError::invalid_config(
                    field,
                    format!("'{}' must be an absolute path", dir.display()),
                ));
            }
        }
        if self.legacy.host.trim().is_empty() {
            return Err(AddonError::invalid_config("legacy.host", "must not be empty"));
        }
        if self.legacy.probe_attempts == 0 {
            return Err(AddonError::invalid_config(
                "legacy.probe_attempts",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Directory holding rendered stack definitions.
    pub fn stacks_dir(&self) -> PathBuf {
        self.paths.state_dir.join("stacks")
    }
}
