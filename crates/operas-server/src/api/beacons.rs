//! Beacon API endpoints.
//!
//! Each simulated artifact is addressed by its hex identifier. Starting a
//! beacon returns as soon as the radio was asked; the record then moves to
//! `active` or `failed` once the radio answers, which clients observe by
//! polling `GET /api/beacons/{id}`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use operas_core::{
    AdvertisementRecordView, AdvertisementState, ArtifactId, OperasError, StartOutcome,
    StopOutcome,
};

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the beacons router with all endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_beacons).delete(stop_all_beacons))
        .route(
            "/{id}",
            get(get_beacon).put(start_beacon).delete(stop_beacon),
        )
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Every advertisement record.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BeaconListResponse {
    /// Records ordered by artifact id.
    pub beacons: Vec<AdvertisementRecordView>,

    /// Number of records.
    #[schema(example = 1)]
    pub count: usize,
}

/// Request body for starting a beacon.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "uuid_fragment": "0001"
}))]
pub struct StartBeaconRequest {
    /// 1 to 4 hex characters placed in the 16-bit alias field of the
    /// Bluetooth base UUID.
    #[schema(example = "0001", min_length = 1, max_length = 4)]
    pub uuid_fragment: String,
}

/// Response after a start request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "00112233445566778899aabbccddeeff00ff10ab",
    "outcome": "started",
    "state": { "state": "starting" }
}))]
pub struct StartBeaconResponse {
    /// Normalized artifact id.
    #[schema(example = "00112233445566778899aabbccddeeff00ff10ab")]
    pub id: String,

    /// Whether a new broadcast was requested.
    pub outcome: StartOutcome,

    /// State right after the request.
    pub state: AdvertisementState,
}

/// Response after a stop request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "00112233445566778899aabbccddeeff00ff10ab",
    "outcome": "issued",
    "state": { "state": "stopping" }
}))]
pub struct StopBeaconResponse {
    /// Artifact id as requested.
    #[schema(example = "00112233445566778899aabbccddeeff00ff10ab")]
    pub id: String,

    /// What the stop did.
    pub outcome: StopOutcome,

    /// State right after the request.
    pub state: AdvertisementState,
}

/// A stop that went through during stop-all.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoppedBeacon {
    /// Artifact id.
    pub id: String,
    /// What the stop did.
    pub outcome: StopOutcome,
}

/// A stop that was refused during stop-all.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StopFailure {
    /// Artifact id.
    pub id: String,
    /// Machine-readable error code.
    #[schema(example = "permission_denied")]
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

/// Result of stopping every beacon.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "attempted": 2,
    "stopped": [
        { "id": "00112233445566778899aabbccddeeff00ff10ab", "outcome": "issued" },
        { "id": "ffeeddccbbaa99887766554433221100ffeeddcc", "outcome": "removed" }
    ],
    "failures": []
}))]
pub struct StopAllResponse {
    /// Number of records the stop was attempted for.
    #[schema(example = 2)]
    pub attempted: usize,

    /// Stops that went through.
    pub stopped: Vec<StoppedBeacon>,

    /// Stops that were refused.
    pub failures: Vec<StopFailure>,
}

// ============================================================================
// Handlers
// ============================================================================

/// List every advertisement record.
#[utoipa::path(
    get,
    path = "/api/beacons",
    tag = "beacons",
    operation_id = "listBeacons",
    summary = "List beacons",
    description = "Returns every advertisement record, including failed ones, ordered \
        by artifact id. Stopped beacons have no record.",
    responses(
        (status = 200, description = "Records retrieved", body = BeaconListResponse)
    )
)]
pub async fn list_beacons(State(state): State<SharedState>) -> Json<BeaconListResponse> {
    let beacons = state.registry.snapshot();
    Json(BeaconListResponse {
        count: beacons.len(),
        beacons,
    })
}

/// Get one advertisement record.
#[utoipa::path(
    get,
    path = "/api/beacons/{id}",
    tag = "beacons",
    operation_id = "getBeacon",
    summary = "Get a beacon",
    description = "Returns the advertisement record of one artifact. An artifact that \
        is not advertising has no record.",
    params(("id" = String, Path, description = "Artifact id (hex)")),
    responses(
        (status = 200, description = "Record retrieved", body = AdvertisementRecordView),
        (status = 400, description = "Malformed artifact id", body = super::error::ErrorResponse),
        (status = 404, description = "No record for this artifact", body = super::error::ErrorResponse)
    )
)]
pub async fn get_beacon(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<AdvertisementRecordView>> {
    let id = ArtifactId::parse(&id)?;
    state
        .registry
        .record(id.as_str())
        .map(Json)
        .ok_or_else(|| ApiError::NotFound {
            error_code: "beacon_not_found".to_string(),
            message: format!("No beacon is advertising for artifact {id}"),
        })
}

/// Start advertising an artifact.
#[utoipa::path(
    put,
    path = "/api/beacons/{id}",
    tag = "beacons",
    operation_id = "startBeacon",
    summary = "Start a beacon",
    description = "Asks the radio to start broadcasting the artifact under the service \
        UUID built from `uuid_fragment`. Returns 202 while the radio works on it, \
        200 if the artifact is already starting or active, and 409 while an earlier \
        broadcast of the artifact is still being released.",
    params(("id" = String, Path, description = "Artifact id (hex)")),
    request_body = StartBeaconRequest,
    responses(
        (status = 202, description = "Start requested", body = StartBeaconResponse),
        (status = 200, description = "Already advertising", body = StartBeaconResponse),
        (status = 409, description = "Previous broadcast still being released", body = StartBeaconResponse),
        (status = 400, description = "Malformed id or fragment", body = super::error::ErrorResponse),
        (status = 403, description = "Advertising not permitted", body = super::error::ErrorResponse)
    )
)]
pub async fn start_beacon(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(request): Json<StartBeaconRequest>,
) -> ApiResult<(StatusCode, Json<StartBeaconResponse>)> {
    let outcome = state
        .registry
        .start(&id, &request.uuid_fragment)
        .map_err(|e| refused(&state, e))?;

    let id = ArtifactId::parse(&id)?;
    let status = match outcome {
        StartOutcome::Started => StatusCode::ACCEPTED,
        StartOutcome::AlreadyLive => StatusCode::OK,
        StartOutcome::PendingStop => StatusCode::CONFLICT,
    };

    Ok((
        status,
        Json(StartBeaconResponse {
            state: state.registry.state_of(id.as_str()),
            id: id.into(),
            outcome,
        }),
    ))
}

/// Stop advertising an artifact.
#[utoipa::path(
    delete,
    path = "/api/beacons/{id}",
    tag = "beacons",
    operation_id = "stopBeacon",
    summary = "Stop a beacon",
    description = "Asks the radio to stop broadcasting the artifact. Stopping an \
        artifact that is not advertising does nothing and reports `not_found`. A stop \
        sent while the start is still pending is queued.",
    params(("id" = String, Path, description = "Artifact id (hex)")),
    responses(
        (status = 200, description = "Stop handled", body = StopBeaconResponse),
        (status = 403, description = "Advertising not permitted", body = super::error::ErrorResponse)
    )
)]
pub async fn stop_beacon(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StopBeaconResponse>> {
    let outcome = state.registry.stop(&id).map_err(|e| refused(&state, e))?;

    Ok(Json(StopBeaconResponse {
        state: state.registry.state_of(&id),
        id: id.to_ascii_lowercase(),
        outcome,
    }))
}

/// Stop every beacon.
#[utoipa::path(
    delete,
    path = "/api/beacons",
    tag = "beacons",
    operation_id = "stopAllBeacons",
    summary = "Stop all beacons",
    description = "Stops every record. A refused stop does not abort the others; \
        refusals are listed in `failures`.",
    responses(
        (status = 200, description = "Stop-all report", body = StopAllResponse)
    )
)]
pub async fn stop_all_beacons(State(state): State<SharedState>) -> Json<StopAllResponse> {
    let report = state.registry.stop_all();

    Json(StopAllResponse {
        attempted: report.attempted(),
        stopped: report
            .stopped
            .into_iter()
            .map(|(id, outcome)| StoppedBeacon {
                id: id.into(),
                outcome,
            })
            .collect(),
        failures: report
            .failures
            .into_iter()
            .map(|(id, err)| StopFailure {
                id: id.into(),
                error: err.error_code().to_ascii_lowercase(),
                message: err.to_string(),
            })
            .collect(),
    })
}

// ============================================================================
// Helpers
// ============================================================================

/// Converts a registry error, naming the closed gates on a refusal.
fn refused(state: &SharedState, err: OperasError) -> ApiError {
    let closed = state.gate.closed();
    ApiError::from(err).with_closed_gates(&closed)
}
