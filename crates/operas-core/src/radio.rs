//! The radio that actually puts advertisements on air.
//!
//! The advertising core never talks to Bluetooth directly. It drives a
//! [`Radio`], which starts a broadcast for a frame and later stops it again.
//! Backends:
//!
//! - [`BluezRadio`] - BlueZ via `bluer` (feature `bluetooth`, Linux only)
//! - [`MockRadio`] - scriptable in-memory radio for tests and machines without BlueZ

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::codec::AdvertisementFrame;
use crate::types::AdvertiseFailure;

#[cfg(feature = "bluetooth")]
mod bluez;
mod mock;

#[cfg(feature = "bluetooth")]
pub use bluez::{AdapterPoweredGate, BluezRadio};
pub use mock::{MockCall, MockRadio, MockReply};

/// Status code reported by the radio when an operation fails.
///
/// The code space is the one advertised by mobile BLE stacks; backends
/// translate their native errors into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RadioStatus(pub i32);

impl RadioStatus {
    /// The frame is larger than the advertisement can carry.
    pub const DATA_TOO_LARGE: Self = Self(1);
    /// No advertising instance is free.
    pub const TOO_MANY_ADVERTISERS: Self = Self(2);
    /// The same advertisement is already running.
    pub const ALREADY_STARTED: Self = Self(3);
    /// Internal stack failure.
    pub const INTERNAL_ERROR: Self = Self(4);
    /// The adapter does not support advertising.
    pub const FEATURE_UNSUPPORTED: Self = Self(5);
    /// The backend could not classify the error.
    pub const UNRECOGNIZED: Self = Self(-1);
}

impl fmt::Display for RadioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "radio status {}", self.0)
    }
}

impl From<RadioStatus> for AdvertiseFailure {
    fn from(status: RadioStatus) -> Self {
        match status {
            RadioStatus::ALREADY_STARTED => Self::AlreadyStarted,
            RadioStatus::TOO_MANY_ADVERTISERS => Self::TooManyAdvertisers,
            RadioStatus::DATA_TOO_LARGE => Self::DataTooLarge,
            RadioStatus::INTERNAL_ERROR => Self::InternalError,
            RadioStatus::FEATURE_UNSUPPORTED => Self::FeatureUnsupported,
            RadioStatus(code) => Self::UnknownError { code },
        }
    }
}

/// Opaque token for one running broadcast, issued by the radio on start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BroadcastHandle(pub u64);

impl fmt::Display for BroadcastHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "broadcast#{}", self.0)
    }
}

/// Advertising cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AdvertiseMode {
    /// About one advertisement per second.
    LowPower,
    /// About four advertisements per second.
    Balanced,
    /// About ten advertisements per second.
    #[default]
    LowLatency,
}

impl AdvertiseMode {
    /// Advertising interval for this mode.
    #[must_use]
    pub const fn interval(self) -> Duration {
        match self {
            Self::LowPower => Duration::from_millis(1000),
            Self::Balanced => Duration::from_millis(250),
            Self::LowLatency => Duration::from_millis(100),
        }
    }
}

/// Transmit power level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TxPower {
    /// -21 dBm.
    UltraLow,
    /// -15 dBm.
    Low,
    /// -7 dBm.
    #[default]
    Medium,
    /// +1 dBm.
    High,
}

impl TxPower {
    /// Power level in dBm.
    #[must_use]
    pub const fn dbm(self) -> i16 {
        match self {
            Self::UltraLow => -21,
            Self::Low => -15,
            Self::Medium => -7,
            Self::High => 1,
        }
    }
}

/// Broadcast parameters shared by every beacon of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BroadcastParameters {
    /// Advertising cadence.
    pub mode: AdvertiseMode,
    /// Transmit power.
    pub tx_power: TxPower,
}

/// A radio able to run several independent broadcasts.
///
/// Implementations must be cheap to share: the advertising core keeps one
/// `Arc<dyn Radio>` and calls it from spawned tasks.
#[async_trait]
pub trait Radio: Send + Sync + 'static {
    /// Short backend name for logs and status output.
    fn name(&self) -> &'static str;

    /// Starts broadcasting `frame`.
    ///
    /// Resolves once the radio confirmed the broadcast, or with the status
    /// code it reported.
    async fn start_advertising(
        &self,
        frame: &AdvertisementFrame,
        params: &BroadcastParameters,
    ) -> Result<BroadcastHandle, RadioStatus>;

    /// Stops the broadcast identified by `handle`.
    ///
    /// Stopping a handle the radio no longer knows is not an error.
    async fn stop_advertising(&self, handle: BroadcastHandle) -> Result<(), RadioStatus>;
}

/// Errors raised while bringing a radio backend up.
#[derive(Debug, Error)]
pub enum RadioError {
    /// No adapter is present.
    #[error("No Bluetooth adapter found")]
    AdapterNotFound,

    /// The named adapter does not exist.
    #[error("Bluetooth adapter '{name}' not found")]
    NamedAdapterNotFound {
        /// Requested adapter name.
        name: String,
    },

    /// The adapter is present but switched off.
    #[error("Bluetooth adapter is powered off")]
    AdapterPoweredOff,

    /// The connection to the Bluetooth daemon failed.
    #[error("Failed to open Bluetooth session: {message}")]
    SessionInitFailed {
        /// Backend error text.
        message: String,
    },

    /// The configured backend was not compiled into this build.
    #[error("Radio backend '{backend}' is not available in this build")]
    BackendUnavailable {
        /// Requested backend name.
        backend: String,
    },
}

/// Specialized result for radio setup.
pub type RadioResult<T> = std::result::Result<T, RadioError>;
