//! Advertising permission endpoints.
//!
//! The host grants or revokes advertising here. Requesting the permission from
//! a user is not this server's job; it only holds the answer.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use operas_core::CapabilityGate;

use crate::state::SharedState;

/// Creates the permission router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(get_permission).put(set_permission))
}

/// Current permission and gate state.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "granted": true,
    "gate_open": false,
    "closed_gates": ["adapter_powered"]
}))]
pub struct PermissionResponse {
    /// Whether the host granted advertising.
    #[schema(example = true)]
    pub granted: bool,

    /// Whether every gate is open, so radio operations may run.
    #[schema(example = true)]
    pub gate_open: bool,

    /// Names of the gates that are currently closed.
    pub closed_gates: Vec<String>,
}

/// Request body for granting or revoking advertising.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({ "granted": true }))]
pub struct SetPermissionRequest {
    /// New grant state.
    pub granted: bool,
}

/// Get the advertising permission.
#[utoipa::path(
    get,
    path = "/api/permission",
    tag = "permission",
    operation_id = "getPermission",
    summary = "Get advertising permission",
    description = "Returns whether advertising is granted and which gates, if any, \
        currently block radio operations.",
    responses(
        (status = 200, description = "Permission retrieved", body = PermissionResponse)
    )
)]
pub async fn get_permission(State(state): State<SharedState>) -> Json<PermissionResponse> {
    Json(describe(&state))
}

/// Grant or revoke advertising.
#[utoipa::path(
    put,
    path = "/api/permission",
    tag = "permission",
    operation_id = "setPermission",
    summary = "Grant or revoke advertising",
    description = "Sets the advertising grant. Revoking does not stop running beacons; \
        it blocks further starts and stops until granted again.",
    request_body = SetPermissionRequest,
    responses(
        (status = 200, description = "Permission updated", body = PermissionResponse)
    )
)]
pub async fn set_permission(
    State(state): State<SharedState>,
    Json(request): Json<SetPermissionRequest>,
) -> Json<PermissionResponse> {
    state.permission.set(request.granted);
    Json(describe(&state))
}

fn describe(state: &SharedState) -> PermissionResponse {
    PermissionResponse {
        granted: state.permission.is_granted(),
        gate_open: state.gate.check(),
        closed_gates: state
            .gate
            .closed()
            .into_iter()
            .map(String::from)
            .collect(),
    }
}
