//! Application configuration management.
//!
//! Handles loading, saving, and validating the simulator configuration:
//! - Payload framing and broadcast parameters shared by every beacon
//! - Radio call deadlines
//! - Radio backend and adapter selection
//! - Initial advertising permission
//! - HTTP server settings

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::codec::PayloadFraming;
use crate::radio::{AdvertiseMode, BroadcastParameters, TxPower};
use crate::registry::RegistrySettings;

/// Environment variable that overrides the configuration file path.
pub const CONFIG_PATH_ENV: &str = "OPERAS_CONFIG";

/// Prefix of per-key environment overrides, e.g. `OPERAS__RADIO__BACKEND`.
pub const ENV_PREFIX: &str = "OPERAS";

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The configuration file could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    ReadError {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be written.
    #[error("Failed to write {}: {source}", path.display())]
    WriteError {
        /// File that was being written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`Config`].
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// The configuration could not be serialized.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Merging the file with environment overrides failed.
    #[error("Failed to merge configuration sources: {0}")]
    Layered(#[from] ::config::ConfigError),

    /// No per-user configuration directory exists on this platform.
    #[error("Cannot determine config directory")]
    NoConfigDir,

    /// A single field holds an invalid value.
    #[error("Invalid value for '{field}': {message}")]
    ValidationError {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields hold invalid values.
    #[error("{} configuration errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Specialized result for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How beacons are framed and broadcast.
    pub advertising: AdvertisingConfig,
    /// Which radio to drive.
    pub radio: RadioConfig,
    /// Advertising permission held by the host.
    pub permission: PermissionConfig,
    /// HTTP server settings.
    pub server: ServerConfig,
}

/// Framing, broadcast parameters and radio deadlines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvertisingConfig {
    /// On-air layout of artifact beacons.
    pub framing: PayloadFraming,
    /// Advertising cadence.
    pub mode: AdvertiseMode,
    /// Transmit power.
    pub tx_power: TxPower,
    /// How long a start may take before the record fails with a timeout.
    pub start_timeout_ms: u64,
    /// How long a stop may take before the record fails with a timeout.
    pub stop_timeout_ms: u64,
}

impl Default for AdvertisingConfig {
    fn default() -> Self {
        Self {
            framing: PayloadFraming::default(),
            mode: AdvertiseMode::default(),
            tx_power: TxPower::default(),
            start_timeout_ms: 10_000,
            stop_timeout_ms: 5_000,
        }
    }
}

impl AdvertisingConfig {
    /// Broadcast parameters for the radio.
    #[must_use]
    pub const fn broadcast_parameters(&self) -> BroadcastParameters {
        BroadcastParameters {
            mode: self.mode,
            tx_power: self.tx_power,
        }
    }

    /// Registry settings derived from this section.
    #[must_use]
    pub const fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            framing: self.framing,
            params: self.broadcast_parameters(),
            start_timeout: Duration::from_millis(self.start_timeout_ms),
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
        }
    }
}

/// Radio backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RadioBackend {
    /// BlueZ through D-Bus.
    Bluez,
    /// In-memory mock radio.
    Mock,
}

impl Default for RadioBackend {
    fn default() -> Self {
        if cfg!(feature = "bluetooth") {
            Self::Bluez
        } else {
            Self::Mock
        }
    }
}

/// Radio configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Backend to drive.
    pub backend: RadioBackend,
    /// Adapter name such as `hci0`; the default adapter when unset.
    pub adapter: Option<String>,
}

/// Initial advertising permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionConfig {
    /// Whether advertising is permitted at startup.
    pub initially_granted: bool,
    /// Also require the adapter to be powered (BlueZ backend only).
    pub require_powered_adapter: bool,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            initially_granted: false,
            require_powered_adapter: true,
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP API binds to.
    pub bind_address: String,
    /// JSON file logging instead of pretty console output.
    pub production: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".into(),
            production: false,
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file does not exist, or a
    /// read or parse error.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Loads configuration from `path`, falling back to defaults if the file
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        match Self::load(path) {
            Err(ConfigError::NotFound(path)) => {
                debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Loads `path` (optional) and applies `OPERAS__SECTION__KEY` environment
    /// overrides on top, then validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the merged
    /// configuration is invalid.
    pub fn load_layered(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let merged = ::config::Config::builder()
            .add_source(::config::File::from(path).required(false))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: Self = merged.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Writes configuration to `path` as TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Checks every field and reports all problems at once.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for a single problem and
    /// [`ConfigError::MultipleValidationErrors`] for several.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if self.advertising.start_timeout_ms == 0 {
            errors.push(invalid("advertising.start_timeout_ms", "must be greater than 0"));
        }
        if self.advertising.stop_timeout_ms == 0 {
            errors.push(invalid("advertising.stop_timeout_ms", "must be greater than 0"));
        }
        if let Some(adapter) = &self.radio.adapter {
            if adapter.trim().is_empty() {
                errors.push(invalid("radio.adapter", "must not be empty when set"));
            }
        }
        if self.radio.backend == RadioBackend::Bluez && !cfg!(feature = "bluetooth") {
            errors.push(invalid(
                "radio.backend",
                "bluez backend requires the 'bluetooth' feature",
            ));
        }
        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(invalid(
                "server.bind_address",
                &format!("'{}' is not a socket address", self.server.bind_address),
            ));
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Default configuration file path.
    ///
    /// `$OPERAS_CONFIG` when set; otherwise `/etc/operas/config.toml` on Linux
    /// and the per-user config directory elsewhere.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoConfigDir`] if no config directory exists.
    pub fn default_path() -> ConfigResult<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }
        #[cfg(target_os = "linux")]
        {
            Ok(PathBuf::from("/etc/operas/config.toml"))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let dirs = directories::ProjectDirs::from("", "", "operas")
                .ok_or(ConfigError::NoConfigDir)?;
            Ok(dirs.config_dir().join("config.toml"))
        }
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        message: message.to_string(),
    }
}
