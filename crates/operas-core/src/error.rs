//! Unified error types for the operas core library.
//!
//! [`OperasError`] covers every failure a caller of the core can observe
//! synchronously. Module-specific errors ([`EncodingError`], [`ConfigError`],
//! [`RadioError`]) convert into it.
//!
//! Radio failures reported *after* a start or stop was issued are not errors
//! in this sense: they are recorded on the advertisement record as
//! [`AdvertiseFailure`](crate::types::AdvertiseFailure) values.
//!
//! # Example
//!
//! ```rust
//! use operas_core::error::{OperasError, Result};
//! use std::path::PathBuf;
//!
//! fn load_config(path: &PathBuf) -> Result<()> {
//!     if !path.exists() {
//!         return Err(OperasError::ConfigNotFound(path.clone()));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! [`EncodingError`]: crate::codec::EncodingError
//! [`ConfigError`]: crate::config::ConfigError
//! [`RadioError`]: crate::radio::RadioError

use std::path::PathBuf;
use thiserror::Error;

use crate::codec::EncodingError;

/// The unified error type for all operas operations.
#[derive(Debug, Error)]
pub enum OperasError {
    // =========================================================================
    // ENCODING ERRORS
    // =========================================================================
    /// An artifact id, UUID fragment, or frame could not be encoded.
    #[error("Invalid beacon data: {0}")]
    Encoding(#[from] EncodingError),

    // =========================================================================
    // AUTHORIZATION ERRORS
    // =========================================================================
    /// The capability gate refused the radio operation.
    #[error("Advertising permission not granted. Grant it via PUT /api/permission.")]
    PermissionDenied,

    // =========================================================================
    // RADIO ERRORS
    // =========================================================================
    /// No Bluetooth adapter was found on this system.
    #[error(
        "No Bluetooth adapter found. Ensure Bluetooth hardware is present and drivers are loaded."
    )]
    RadioAdapterNotFound,

    /// The Bluetooth adapter exists but is powered off.
    #[error("Bluetooth adapter is powered off. Run 'bluetoothctl power on' to enable.")]
    RadioAdapterPoweredOff,

    /// The radio backend could not be brought up.
    #[error("Radio unavailable: {0}")]
    RadioUnavailable(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading data.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for operas operations.
pub type Result<T> = std::result::Result<T, OperasError>;

/// Short alias for [`OperasError`].
pub type Error = OperasError;

impl OperasError {
    /// Returns `true` if the request carried data that cannot be encoded.
    #[inline]
    #[must_use]
    pub const fn is_encoding_error(&self) -> bool {
        matches!(self, Self::Encoding(_))
    }

    /// Returns `true` if a capability gate refused the operation.
    #[inline]
    #[must_use]
    pub const fn is_permission_error(&self) -> bool {
        matches!(self, Self::PermissionDenied)
    }

    /// Returns `true` if this error is related to the radio backend.
    #[inline]
    #[must_use]
    pub const fn is_radio_error(&self) -> bool {
        matches!(
            self,
            Self::RadioAdapterNotFound | Self::RadioAdapterPoweredOff | Self::RadioUnavailable(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::PersistenceError(_) | Self::IoError(_))
    }

    /// Returns `true` if retrying later may succeed without changing the request.
    ///
    /// A revoked permission or a powered-off adapter can come back; malformed
    /// identifiers never will.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::PermissionDenied | Self::RadioAdapterPoweredOff)
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - malformed input
            Self::Encoding(_) => 400,

            // 403 Forbidden - understood but refused
            Self::PermissionDenied => 403,

            // 404 Not Found
            Self::ConfigNotFound(_) => 404,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,

            // 500 Internal Server Error - server-side issues
            Self::PersistenceError(_) | Self::IoError(_) => 500,

            // 503 Service Unavailable - radio hardware issues
            Self::RadioAdapterNotFound
            | Self::RadioAdapterPoweredOff
            | Self::RadioUnavailable(_) => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Encoding(EncodingError::Empty | EncodingError::WrongLength { .. }) => {
                "INVALID_ID_LENGTH"
            }
            Self::Encoding(EncodingError::NotHex { .. }) => "INVALID_ID_CHARACTER",
            Self::Encoding(EncodingError::BadFragment(_)) => "INVALID_UUID_FRAGMENT",
            Self::Encoding(EncodingError::FrameTooLarge { .. }) => "FRAME_TOO_LARGE",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::RadioAdapterNotFound => "RADIO_ADAPTER_NOT_FOUND",
            Self::RadioAdapterPoweredOff => "RADIO_ADAPTER_POWERED_OFF",
            Self::RadioUnavailable(_) => "RADIO_UNAVAILABLE",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for OperasError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::ReadError { path, source } => {
                Self::PersistenceError(format!("Failed to read {}: {}", path.display(), source))
            }
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {}: {}", path.display(), source))
            }
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::Layered(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::NoConfigDir => {
                Self::ConfigValidationError("Cannot determine config directory".into())
            }
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::radio::RadioError> for OperasError {
    fn from(err: crate::radio::RadioError) -> Self {
        use crate::radio::RadioError;
        match err {
            RadioError::AdapterNotFound => Self::RadioAdapterNotFound,
            RadioError::AdapterPoweredOff => Self::RadioAdapterPoweredOff,
            RadioError::NamedAdapterNotFound { name } => {
                Self::RadioUnavailable(format!("Bluetooth adapter '{name}' not found"))
            }
            RadioError::SessionInitFailed { message } => Self::RadioUnavailable(message),
            err @ RadioError::BackendUnavailable { .. } => Self::RadioUnavailable(err.to_string()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
