//! OpenAPI specification generation for the operas API.
//!
//! Served at `/api/openapi.json`, browsable through Swagger UI, and written to
//! disk by the `gen-openapi` binary for client generation.

use axum::Json;
use utoipa::OpenApi;

use operas_core::{
    AdvertiseFailure, AdvertiseMode, AdvertisementRecordView, AdvertisementState, PayloadFraming,
    StartOutcome, StopOutcome, TxPower,
};

use super::beacons::{
    BeaconListResponse, StartBeaconRequest, StartBeaconResponse, StopAllResponse,
    StopBeaconResponse, StopFailure, StoppedBeacon,
};
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::permission::{PermissionResponse, SetPermissionRequest};
use super::system::SystemStatusResponse;

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> serde_json::Result<String> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for operas.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "operas API",
        version = "0.1.0",
        description = r#"
# operas API

operas turns a Linux machine with a Bluetooth adapter into a set of museum
artifact beacons, one BLE broadcast per artifact.

## Overview

1. **Beacons**: Start and stop the broadcast of an artifact by its hex id.
   Starts are asynchronous: a `202` means the radio was asked, and the record
   then moves to `active` or `failed`.
2. **Permission**: The host grants or revokes advertising. While revoked,
   starts and stops are refused with `403`.
3. **System**: Health, uptime, radio backend and broadcast settings.

## Record states

`starting` -> `active` -> `stopping` -> (removed). Radio failures and timeouts
leave the record in `failed` with a reason until it is retried or stopped.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local operas server")
    ),
    tags(
        (
            name = "system",
            description = "Health checks and system status"
        ),
        (
            name = "beacons",
            description = "Start, stop and inspect artifact beacons"
        ),
        (
            name = "permission",
            description = "Advertising permission held on behalf of the host"
        )
    ),
    paths(
        // Health endpoints
        super::health::health_check,
        // Beacon endpoints
        super::beacons::list_beacons,
        super::beacons::get_beacon,
        super::beacons::start_beacon,
        super::beacons::stop_beacon,
        super::beacons::stop_all_beacons,
        // Permission endpoints
        super::permission::get_permission,
        super::permission::set_permission,
        // System endpoints
        super::system::get_status,
    ),
    components(
        schemas(
            // Error types
            ErrorResponse,
            // Health types
            HealthResponse,
            // Beacon types
            AdvertisementRecordView,
            AdvertisementState,
            AdvertiseFailure,
            BeaconListResponse,
            StartBeaconRequest,
            StartBeaconResponse,
            StartOutcome,
            StopBeaconResponse,
            StopOutcome,
            StopAllResponse,
            StoppedBeacon,
            StopFailure,
            // Permission types
            PermissionResponse,
            SetPermissionRequest,
            // System types
            SystemStatusResponse,
            PayloadFraming,
            AdvertiseMode,
            TxPower,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "operas API");
        assert!(spec.paths.paths.contains_key("/api/beacons/{id}"));
        assert!(spec.paths.paths.contains_key("/api/permission"));
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"operas API\""));
        assert!(json.contains("startBeacon"));
    }
}
