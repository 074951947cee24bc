//! HTTP API routes and handlers.
//!
//! Endpoints are organized by domain:
//! - `beacons` - Start, stop and inspect artifact beacons
//! - `permission` - Advertising permission
//! - `health` - Service health checks
//! - `system` - System status
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::SharedState;

pub mod beacons;
pub mod error;
pub mod health;
pub mod openapi;
pub mod permission;
pub mod system;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                - Health check
/// /api
/// ├── /beacons           - List, start, stop beacons
/// ├── /permission        - Advertising permission
/// ├── /system/status     - System status
/// └── /openapi.json      - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    system::init_start_time();

    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .nest("/beacons", beacons::router())
                .nest("/permission", permission::router())
                .nest("/system", system::router()),
        )
        .with_state(state)
}

/// Creates the full application: API routes, Swagger UI, tracing and CORS.
pub fn create_app(state: SharedState) -> Router {
    create_router(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::http::StatusCode;
    use axum_test::TestServer;
    use operas_core::radio::{MockRadio, MockReply, RadioStatus};
    use operas_core::{AdvertiseFailure, AdvertisementState, Config, PayloadFraming, RadioBackend};
    use serde_json::{json, Value};

    use super::*;
    use crate::state::AppState;

    const ID: &str = "00112233445566778899aabbccddeeff00ff10ab";
    const OTHER: &str = "ffeeddccbbaa99887766554433221100ffeeddcc";

    struct Harness {
        server: TestServer,
        state: SharedState,
        radio: Arc<MockRadio>,
    }

    fn harness_with(config: Config) -> Harness {
        let radio = Arc::new(MockRadio::new());
        let state = Arc::new(AppState::with_radio(config, radio.clone(), Vec::new()));
        let server = TestServer::new(create_app(state.clone())).unwrap();
        Harness {
            server,
            state,
            radio,
        }
    }

    fn harness() -> Harness {
        let mut config = Config::default();
        config.radio.backend = RadioBackend::Mock;
        config.permission.initially_granted = true;
        harness_with(config)
    }

    async fn wait_for(state: &SharedState, id: &str, expected: AdvertisementState) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while state.registry.state_of(id) != expected {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("state not reached");
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness();
        let response = h.server.get("/health").await;
        response.assert_status_ok();

        let body: Value = response.json();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["radio"], "mock");
    }

    #[tokio::test]
    async fn test_start_then_get_beacon() {
        let h = harness();

        let response = h
            .server
            .put(&format!("/api/beacons/{ID}"))
            .json(&json!({ "uuid_fragment": "0001" }))
            .await;
        response.assert_status(StatusCode::ACCEPTED);
        let body: Value = response.json();
        assert_eq!(body["outcome"], "started");

        wait_for(&h.state, ID, AdvertisementState::Active).await;

        let response = h.server.get(&format!("/api/beacons/{ID}")).await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["state"]["state"], "active");
        assert_eq!(body["uuid"], "00000001-0000-1000-8000-00805f9b34fb");
        assert_eq!(body["payload_hex"], ID);
    }

    #[tokio::test]
    async fn test_duplicate_start_returns_ok() {
        let h = harness();
        let path = format!("/api/beacons/{ID}");

        h.server
            .put(&path)
            .json(&json!({ "uuid_fragment": "0001" }))
            .await
            .assert_status(StatusCode::ACCEPTED);

        let response = h
            .server
            .put(&path)
            .json(&json!({ "uuid_fragment": "0001" }))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["outcome"], "already_live");
        assert_eq!(h.radio.start_calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_requests_are_bad_requests() {
        let h = harness();

        let response = h
            .server
            .put("/api/beacons/0011")
            .json(&json!({ "uuid_fragment": "0001" }))
            .await;
        response.assert_status_bad_request();
        let body: Value = response.json();
        assert_eq!(body["error"], "invalid_id_length");

        let response = h
            .server
            .put(&format!("/api/beacons/{ID}"))
            .json(&json!({ "uuid_fragment": "12345" }))
            .await;
        response.assert_status_bad_request();
        let body: Value = response.json();
        assert_eq!(body["error"], "invalid_uuid_fragment");

        h.server
            .get("/api/beacons/not-hex")
            .await
            .assert_status_bad_request();
        assert!(h.state.registry.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_beacon_is_not_found() {
        let h = harness();
        h.server
            .get(&format!("/api/beacons/{ID}"))
            .await
            .assert_status_not_found();

        let response = h.server.delete(&format!("/api/beacons/{ID}")).await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["outcome"], "not_found");
    }

    #[tokio::test]
    async fn test_revoked_permission_is_forbidden() {
        let h = harness();

        let response = h
            .server
            .put("/api/permission")
            .json(&json!({ "granted": false }))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["granted"], false);
        assert_eq!(body["closed_gates"], json!(["permission"]));

        let response = h
            .server
            .put(&format!("/api/beacons/{ID}"))
            .json(&json!({ "uuid_fragment": "0001" }))
            .await;
        response.assert_status(StatusCode::FORBIDDEN);
        let body: Value = response.json();
        assert_eq!(body["error"], "permission_denied");
        assert_eq!(body["details"]["closed_gates"], json!(["permission"]));

        assert!(h.state.registry.is_empty());
        assert_eq!(h.radio.start_calls(), 0);
    }

    #[tokio::test]
    async fn test_start_during_failed_stop_is_conflict() {
        let h = harness();
        h.state.registry.start(ID, "0001").unwrap();
        wait_for(&h.state, ID, AdvertisementState::Active).await;

        h.radio
            .set_stop_reply(MockReply::Fail(RadioStatus::INTERNAL_ERROR));
        h.server
            .delete(&format!("/api/beacons/{ID}"))
            .await
            .assert_status_ok();
        wait_for(
            &h.state,
            ID,
            AdvertisementState::Failed {
                reason: AdvertiseFailure::InternalError,
            },
        )
        .await;

        let response = h
            .server
            .put(&format!("/api/beacons/{ID}"))
            .json(&json!({ "uuid_fragment": "0001" }))
            .await;
        response.assert_status(StatusCode::CONFLICT);
        let body: Value = response.json();
        assert_eq!(body["outcome"], "pending_stop");
        assert_eq!(h.radio.start_calls(), 1);
    }

    #[tokio::test]
    async fn test_stop_beacon() {
        let h = harness();
        h.state.registry.start(ID, "0001").unwrap();
        wait_for(&h.state, ID, AdvertisementState::Active).await;

        let response = h.server.delete(&format!("/api/beacons/{ID}")).await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["outcome"], "issued");

        wait_for(&h.state, ID, AdvertisementState::Idle).await;
        assert_eq!(h.radio.active_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_all_beacons() {
        let h = harness();
        h.state.registry.start(ID, "0001").unwrap();
        h.state.registry.start(OTHER, "0002").unwrap();
        wait_for(&h.state, ID, AdvertisementState::Active).await;
        wait_for(&h.state, OTHER, AdvertisementState::Active).await;

        let response = h.server.delete("/api/beacons").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["attempted"], 2);
        assert_eq!(body["failures"], json!([]));

        wait_for(&h.state, ID, AdvertisementState::Idle).await;
        wait_for(&h.state, OTHER, AdvertisementState::Idle).await;
        assert_eq!(h.radio.stop_calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_start_is_listed() {
        let h = harness();
        h.radio
            .push_start_reply(MockReply::Fail(RadioStatus::TOO_MANY_ADVERTISERS));
        h.state.registry.start(ID, "0001").unwrap();
        wait_for(
            &h.state,
            ID,
            AdvertisementState::Failed {
                reason: AdvertiseFailure::TooManyAdvertisers,
            },
        )
        .await;

        let response = h.server.get("/api/beacons").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["count"], 1);
        assert_eq!(body["beacons"][0]["state"]["state"], "failed");
        assert_eq!(body["beacons"][0]["state"]["reason"], "too_many_advertisers");
        assert_eq!(body["beacons"][0]["last_error"]["reason"], "too_many_advertisers");
    }

    #[tokio::test]
    async fn test_system_status() {
        let mut config = Config::default();
        config.radio.backend = RadioBackend::Mock;
        config.permission.initially_granted = true;
        config.advertising.framing = PayloadFraming::MuseumServiceData { major: 0, minor: 1 };
        let h = harness_with(config);

        let response = h.server.get("/api/system/status").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["radio"], "mock");
        assert_eq!(body["framing"]["kind"], "museum_service_data");
        assert_eq!(body["permission_granted"], true);
        assert_eq!(body["beacons"], 0);
    }

    #[tokio::test]
    async fn test_openapi_is_served() {
        let h = harness();
        let response = h.server.get("/api/openapi.json").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["info"]["title"], "operas API");
    }
}
