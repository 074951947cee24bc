//! System status endpoint.

use std::sync::OnceLock;
use std::time::Instant;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use operas_core::{AdvertiseMode, AdvertisementState, PayloadFraming, TxPower};

use crate::state::SharedState;

/// Creates the system router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/status", get(get_status))
}

/// System status response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "version": "0.1.0",
    "uptime_secs": 3600,
    "radio": "bluez",
    "framing": { "kind": "service_data" },
    "mode": "low_latency",
    "tx_power": "medium",
    "permission_granted": true,
    "beacons": 3,
    "active_beacons": 2,
    "failed_beacons": 1
}))]
pub struct SystemStatusResponse {
    /// Server version.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Server uptime in seconds.
    #[schema(example = 3600)]
    pub uptime_secs: u64,

    /// Radio backend in use.
    #[schema(example = "bluez")]
    pub radio: String,

    /// On-air layout of artifact beacons.
    pub framing: PayloadFraming,

    /// Advertising cadence.
    pub mode: AdvertiseMode,

    /// Transmit power.
    pub tx_power: TxPower,

    /// Whether advertising is granted.
    #[schema(example = true)]
    pub permission_granted: bool,

    /// Number of advertisement records.
    #[schema(example = 3)]
    pub beacons: usize,

    /// Records currently on air.
    #[schema(example = 2)]
    pub active_beacons: usize,

    /// Records whose last radio operation failed.
    #[schema(example = 1)]
    pub failed_beacons: usize,
}

// ============================================================================
// Uptime tracking
// ============================================================================

static SERVER_START_TIME: OnceLock<Instant> = OnceLock::new();

/// Records the server start time. Later calls keep the first value.
pub fn init_start_time() {
    SERVER_START_TIME.get_or_init(Instant::now);
}

fn uptime_secs() -> u64 {
    SERVER_START_TIME
        .get()
        .map_or(0, |start| start.elapsed().as_secs())
}

// ============================================================================
// Handlers
// ============================================================================

/// Get system status.
#[utoipa::path(
    get,
    path = "/api/system/status",
    tag = "system",
    operation_id = "getSystemStatus",
    summary = "Get system status",
    description = "Returns version, uptime, radio backend, broadcast settings and \
        beacon counts.",
    responses(
        (status = 200, description = "System status retrieved", body = SystemStatusResponse)
    )
)]
pub async fn get_status(State(state): State<SharedState>) -> Json<SystemStatusResponse> {
    let records = state.registry.snapshot();
    let active_beacons = records
        .iter()
        .filter(|r| r.state == AdvertisementState::Active)
        .count();
    let failed_beacons = records.iter().filter(|r| r.state.failure().is_some()).count();
    let advertising = &state.config.advertising;

    Json(SystemStatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: uptime_secs(),
        radio: state.registry.radio_name().to_string(),
        framing: state.registry.framing(),
        mode: advertising.mode,
        tx_power: advertising.tx_power,
        permission_granted: state.permission.is_granted(),
        beacons: records.len(),
        active_beacons,
        failed_beacons,
    })
}
