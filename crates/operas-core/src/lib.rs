//! # operas-core
//!
//! Core advertising lifecycle for the operas museum beacon simulator.
//!
//! Each simulated artifact is a BLE beacon broadcasting a fixed frame derived
//! from the artifact's hex identifier. This crate provides:
//! - Identifier encoding into payloads, service UUIDs and on-air frames
//! - A per-artifact advertisement state machine driven by radio completions
//! - A registry that owns every broadcast and guards each radio operation
//! - Capability gates (advertising permission, adapter power)
//! - Configuration loading, saving, and validation
//!
//! ## Architecture
//!
//! - [`codec`] - Identifier, UUID and frame encoding (pure)
//! - [`radio`] - The [`Radio`] trait and its BlueZ and mock backends
//! - [`gate`] - Authorization checks consulted before every radio operation
//! - [`registry`] - The [`Registry`] of live advertisements
//! - [`config`] - Application configuration
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared types and OpenAPI schemas

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod codec;
pub mod config;
mod controller;
pub mod error;
pub mod gate;
pub mod radio;
pub mod registry;
pub mod types;

// Re-export primary types for convenience
pub use codec::{
    compose_uuid, encode_payload, short_uuid, AdvertisementFrame, ArtifactId, EncodingError,
    PayloadFraming,
};
pub use config::{
    AdvertisingConfig, Config, ConfigError, ConfigResult, PermissionConfig, RadioBackend,
    RadioConfig, ServerConfig,
};
pub use error::{Error, OperasError, Result};
pub use gate::{AllOf, CapabilityGate, Permission};
#[cfg(feature = "bluetooth")]
pub use radio::{AdapterPoweredGate, BluezRadio};
pub use radio::{
    AdvertiseMode, BroadcastHandle, BroadcastParameters, MockRadio, Radio, RadioError,
    RadioResult, RadioStatus, TxPower,
};
pub use registry::{
    Registry, RegistryEvent, RegistrySettings, StartOutcome, StopAllReport, StopOutcome,
};
pub use types::{AdvertiseFailure, AdvertisementRecordView, AdvertisementState};
