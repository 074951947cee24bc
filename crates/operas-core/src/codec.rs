//! Artifact identifier encoding.
//!
//! Turns an artifact identifier (a hex string) into the bytes a beacon
//! broadcasts, and a short UUID fragment into a full 128-bit service UUID on
//! the Bluetooth base template.
//!
//! Everything in this module is pure: no I/O, no state, same input same output.
//!
//! # Framing
//!
//! Several on-air layouts have been used for artifact beacons over time. The
//! layout is a deployment choice expressed by [`PayloadFraming`]:
//!
//! | Framing               | Id width | Carried as                      | Legacy size |
//! |-----------------------|----------|---------------------------------|-------------|
//! | `service_data`        | 40 hex   | 20 bytes of service data        | 28 bytes    |
//! | `museum_service_data` | 32 hex   | id + major + minor service data | 28 bytes    |
//! | `i_beacon`            | 32 hex   | Apple iBeacon manufacturer data | 27 bytes    |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

/// Length in bytes of an encoded artifact payload.
pub const PAYLOAD_LEN: usize = 20;

/// Length in hex characters of an artifact id under the default framing.
pub const ARTIFACT_ID_HEX_LEN: usize = PAYLOAD_LEN * 2;

/// Length in hex characters of a museum id (a 128-bit proximity UUID).
pub const MUSEUM_ID_HEX_LEN: usize = 32;

/// Maximum length in hex characters of a UUID fragment.
pub const FRAGMENT_HEX_LEN: usize = 4;

/// The Bluetooth base UUID, `00000000-0000-1000-8000-00805F9B34FB`.
///
/// 16-bit service UUIDs are aliases of this template with the alias placed in
/// bits 96..112. Only such UUIDs fit a legacy frame next to a 20-byte payload.
pub const BLUETOOTH_BASE_UUID: Uuid = Uuid::from_u128(0x0000_0000_0000_1000_8000_0080_5F9B_34FB);

/// Raw payload budget of a legacy advertising PDU.
pub const LEGACY_ADVERTISEMENT_MAX: usize = 31;

/// Bluetooth SIG company identifier of Apple, used by iBeacon frames.
pub const APPLE_COMPANY_ID: u16 = 0x004C;

const SHORT_UUID_SHIFT: u32 = 96;
const SHORT_UUID_MASK: u128 = 0xFFFF << SHORT_UUID_SHIFT;

// iBeacon type (0x02) and remaining length (0x15 = 21 bytes).
const IBEACON_PREFIX: [u8; 2] = [0x02, 0x15];

/// Errors raised while encoding identifiers, fragments, or frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    /// The identifier is empty.
    #[error("Identifier is empty")]
    Empty,

    /// The identifier does not have the length the framing requires.
    #[error("Identifier must be {expected} hex characters, got {actual}")]
    WrongLength {
        /// Required number of hex characters.
        expected: usize,
        /// Number of characters supplied.
        actual: usize,
    },

    /// The identifier contains a character outside `[0-9a-fA-F]`.
    #[error("Identifier contains non-hex character '{character}' at position {index}")]
    NotHex {
        /// Offending character.
        character: char,
        /// Character index within the identifier.
        index: usize,
    },

    /// The UUID fragment is empty, longer than 4 characters, or not hex.
    #[error("UUID fragment '{0}' must be 1 to 4 hex characters")]
    BadFragment(String),

    /// The assembled frame does not fit a legacy advertisement.
    #[error("Advertisement frame needs {size} bytes, legacy advertisements carry at most {limit}")]
    FrameTooLarge {
        /// Computed on-air size of the frame.
        size: usize,
        /// Legacy advertisement budget.
        limit: usize,
    },
}

// =============================================================================
// ARTIFACT ID
// =============================================================================

/// Identifier of one simulated museum artifact.
///
/// Holds a non-empty, lowercase hex string. Width is not checked here because
/// it depends on the [`PayloadFraming`] in use.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Parses and normalizes an artifact identifier.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::Empty`] for an empty string and
    /// [`EncodingError::NotHex`] for any non-hex character.
    pub fn parse(raw: &str) -> Result<Self, EncodingError> {
        if raw.is_empty() {
            return Err(EncodingError::Empty);
        }
        if let Some((index, character)) = raw.chars().enumerate().find(|(_, c)| !c.is_ascii_hexdigit()) {
            return Err(EncodingError::NotHex { character, index });
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    /// Returns the normalized hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of hex characters in the identifier.
    #[must_use]
    pub fn hex_len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ArtifactId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ArtifactId {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ArtifactId {
    type Error = EncodingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ArtifactId> for String {
    fn from(id: ArtifactId) -> Self {
        id.0
    }
}

// =============================================================================
// PAYLOAD AND UUID
// =============================================================================

/// Decodes a 40-character hex identifier into its 20-byte payload.
///
/// Each pair of characters becomes one byte, high nibble first. Case is
/// ignored.
///
/// # Errors
///
/// Returns [`EncodingError::WrongLength`] unless `id` has exactly 40
/// characters, and [`EncodingError::NotHex`] for any non-hex character.
pub fn encode_payload(id: impl AsRef<str>) -> Result<[u8; PAYLOAD_LEN], EncodingError> {
    let mut payload = [0u8; PAYLOAD_LEN];
    decode_exact(id.as_ref(), &mut payload)?;
    Ok(payload)
}

/// Builds the service UUID `0000XXXX-0000-1000-8000-00805F9B34FB`.
///
/// Fragments shorter than four characters are left-padded with zeros, so
/// `"1"` and `"0001"` compose the same UUID.
///
/// # Errors
///
/// Returns [`EncodingError::BadFragment`] when the fragment is empty, longer
/// than four characters, or contains non-hex characters.
pub fn compose_uuid(fragment: &str) -> Result<Uuid, EncodingError> {
    let valid = !fragment.is_empty()
        && fragment.len() <= FRAGMENT_HEX_LEN
        && fragment.bytes().all(|b| b.is_ascii_hexdigit());
    if !valid {
        return Err(EncodingError::BadFragment(fragment.to_string()));
    }

    let alias = u16::from_str_radix(fragment, 16)
        .map_err(|_| EncodingError::BadFragment(fragment.to_string()))?;

    Ok(Uuid::from_u128(
        BLUETOOTH_BASE_UUID.as_u128() | (u128::from(alias) << SHORT_UUID_SHIFT),
    ))
}

/// Returns the 16-bit alias of `uuid` if it lies on the Bluetooth base template.
#[must_use]
pub fn short_uuid(uuid: Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    if value & !SHORT_UUID_MASK == BLUETOOTH_BASE_UUID.as_u128() {
        u16::try_from((value & SHORT_UUID_MASK) >> SHORT_UUID_SHIFT).ok()
    } else {
        None
    }
}

fn decode_exact(hex_str: &str, out: &mut [u8]) -> Result<(), EncodingError> {
    let expected = out.len() * 2;
    let actual = hex_str.chars().count();
    if actual != expected {
        return Err(EncodingError::WrongLength { expected, actual });
    }

    hex::decode_to_slice(hex_str, out).map_err(|err| match err {
        hex::FromHexError::InvalidHexCharacter { c, index } => EncodingError::NotHex {
            character: c,
            index,
        },
        hex::FromHexError::OddLength | hex::FromHexError::InvalidStringLength => {
            EncodingError::WrongLength { expected, actual }
        }
    })
}

// =============================================================================
// FRAMES
// =============================================================================

/// The data one beacon puts on air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementFrame {
    /// Service UUID listed in the advertisement, if any.
    pub service_uuid: Option<Uuid>,

    /// Service data, keyed by `service_uuid`.
    pub service_data: Option<Vec<u8>>,

    /// Manufacturer specific data: company identifier and bytes.
    pub manufacturer_data: Option<(u16, Vec<u8>)>,
}

impl AdvertisementFrame {
    /// The opaque bytes scanners read: service data, else manufacturer data.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        self.service_data
            .as_deref()
            .or_else(|| self.manufacturer_data.as_ref().map(|(_, data)| data.as_slice()))
            .unwrap_or_default()
    }

    /// Size of the frame as legacy AD structures (length + type + value each).
    ///
    /// Non-connectable broadcasts carry no flags structure.
    #[must_use]
    pub fn legacy_size(&self) -> usize {
        let uuid_len = match self.service_uuid {
            Some(uuid) if short_uuid(uuid).is_some() => 2,
            Some(_) => 16,
            None => 0,
        };

        let mut size = 0;
        if self.service_uuid.is_some() {
            size += 2 + uuid_len;
        }
        if let Some(data) = &self.service_data {
            size += 2 + uuid_len + data.len();
        }
        if let Some((_, data)) = &self.manufacturer_data {
            size += 2 + 2 + data.len();
        }
        size
    }
}

/// On-air layout used for artifact beacons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayloadFraming {
    /// 40-hex artifact id as 20 bytes of service data under the service UUID.
    #[default]
    ServiceData,

    /// 32-hex museum id followed by major and minor, as 20 bytes of service data.
    MuseumServiceData {
        /// Major number appended after the museum id.
        major: u16,
        /// Minor number appended after the major.
        minor: u16,
    },

    /// 32-hex id as the proximity UUID of an Apple iBeacon record.
    IBeacon {
        /// iBeacon major number.
        major: u16,
        /// iBeacon minor number.
        minor: u16,
        /// Calibrated RSSI at one metre, in dBm.
        measured_power: i8,
    },
}

impl PayloadFraming {
    /// Number of hex characters this framing expects in an artifact id.
    #[must_use]
    pub const fn id_hex_len(&self) -> usize {
        match self {
            Self::ServiceData => ARTIFACT_ID_HEX_LEN,
            Self::MuseumServiceData { .. } | Self::IBeacon { .. } => MUSEUM_ID_HEX_LEN,
        }
    }

    /// Short name used in logs and status responses.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ServiceData => "service_data",
            Self::MuseumServiceData { .. } => "museum_service_data",
            Self::IBeacon { .. } => "i_beacon",
        }
    }

    /// Builds the frame for `id` advertised under `uuid`.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::WrongLength`] or [`EncodingError::NotHex`] when
    /// the id does not fit this framing, and [`EncodingError::FrameTooLarge`]
    /// when the result would not fit a legacy advertisement.
    pub fn frame(&self, id: &ArtifactId, uuid: Uuid) -> Result<AdvertisementFrame, EncodingError> {
        let frame = match *self {
            Self::ServiceData => AdvertisementFrame {
                service_uuid: Some(uuid),
                service_data: Some(encode_payload(id)?.to_vec()),
                manufacturer_data: None,
            },
            Self::MuseumServiceData { major, minor } => {
                ensure_width(id, MUSEUM_ID_HEX_LEN)?;
                let framed = format!("{id}{major:04x}{minor:04x}");
                AdvertisementFrame {
                    service_uuid: Some(uuid),
                    service_data: Some(encode_payload(framed)?.to_vec()),
                    manufacturer_data: None,
                }
            }
            Self::IBeacon {
                major,
                minor,
                measured_power,
            } => {
                let mut proximity = [0u8; MUSEUM_ID_HEX_LEN / 2];
                decode_exact(id.as_str(), &mut proximity)?;

                let mut data = Vec::with_capacity(23);
                data.extend_from_slice(&IBEACON_PREFIX);
                data.extend_from_slice(&proximity);
                data.extend_from_slice(&major.to_be_bytes());
                data.extend_from_slice(&minor.to_be_bytes());
                data.extend_from_slice(&measured_power.to_be_bytes());

                AdvertisementFrame {
                    service_uuid: None,
                    service_data: None,
                    manufacturer_data: Some((APPLE_COMPANY_ID, data)),
                }
            }
        };

        let size = frame.legacy_size();
        if size > LEGACY_ADVERTISEMENT_MAX {
            return Err(EncodingError::FrameTooLarge {
                size,
                limit: LEGACY_ADVERTISEMENT_MAX,
            });
        }
        Ok(frame)
    }
}

fn ensure_width(id: &ArtifactId, expected: usize) -> Result<(), EncodingError> {
    if id.hex_len() == expected {
        Ok(())
    } else {
        Err(EncodingError::WrongLength {
            expected,
            actual: id.hex_len(),
        })
    }
}
