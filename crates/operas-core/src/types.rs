//! Shared types and OpenAPI schemas.
//!
//! These are the read-only shapes the registry hands out: advertisement
//! states, radio failure reasons, and record views.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::codec::ArtifactId;

/// Reason a broadcast could not be started or stopped.
///
/// The radio-reported variants mirror the platform status codes one to one.
/// Codes without a dedicated variant land in [`AdvertiseFailure::UnknownError`]
/// with the raw code preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AdvertiseFailure {
    /// An advertisement with the same data is already running.
    #[error("Advertising already started")]
    AlreadyStarted,

    /// The controller has no free advertising instance.
    #[error("Too many advertisers")]
    TooManyAdvertisers,

    /// The frame does not fit the advertisement.
    #[error("Advertisement data too large")]
    DataTooLarge,

    /// The radio stack failed internally.
    #[error("Internal radio error")]
    InternalError,

    /// The adapter cannot advertise.
    #[error("Advertising feature unsupported")]
    FeatureUnsupported,

    /// The radio reported a code outside the known set.
    #[error("Unknown radio error (code {code})")]
    UnknownError {
        /// Raw status code.
        code: i32,
    },

    /// The radio did not answer within the configured deadline.
    #[error("Radio did not answer in time")]
    Timeout,
}

/// Lifecycle state of one artifact's broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AdvertisementState {
    /// Nothing is broadcasting for this artifact.
    #[default]
    Idle,

    /// A start was issued and the radio has not answered yet.
    Starting,

    /// The radio is broadcasting.
    Active,

    /// A stop was issued and the radio has not acknowledged it yet.
    Stopping,

    /// The last radio operation failed.
    Failed {
        /// Why it failed.
        #[serde(flatten)]
        reason: AdvertiseFailure,
    },
}

impl AdvertisementState {
    /// `true` while a broadcast exists or is being set up.
    ///
    /// A second start for a live artifact is a no-op.
    #[inline]
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Starting | Self::Active)
    }

    /// `true` while waiting for the radio.
    #[inline]
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }

    /// The failure reason, if this is [`AdvertisementState::Failed`].
    #[inline]
    #[must_use]
    pub const fn failure(&self) -> Option<AdvertiseFailure> {
        match self {
            Self::Failed { reason } => Some(*reason),
            _ => None,
        }
    }
}

impl fmt::Display for AdvertisementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Starting => write!(f, "starting"),
            Self::Active => write!(f, "active"),
            Self::Stopping => write!(f, "stopping"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Read-only view of one advertisement record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "00112233445566778899aabbccddeeff00ff10ab",
    "uuid": "00000001-0000-1000-8000-00805f9b34fb",
    "payload_hex": "00112233445566778899aabbccddeeff00ff10ab",
    "state": { "state": "active" },
    "last_error": null,
    "updated_at_utc": "2025-01-15T03:30:00Z"
}))]
pub struct AdvertisementRecordView {
    /// Artifact identifier (lowercase hex).
    #[schema(value_type = String, example = "00112233445566778899aabbccddeeff00ff10ab")]
    pub id: ArtifactId,

    /// Service UUID the artifact is advertised under.
    pub uuid: Uuid,

    /// Broadcast payload as lowercase hex.
    pub payload_hex: String,

    /// Current lifecycle state.
    pub state: AdvertisementState,

    /// Most recent radio failure for this artifact, kept across retries.
    #[schema(nullable)]
    pub last_error: Option<AdvertiseFailure>,

    /// When the state last changed.
    pub updated_at_utc: DateTime<Utc>,
}
