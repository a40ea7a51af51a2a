//! HTTP API route definitions.

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::handlers::{
    self, health, metrics, ready, status, AppState, HealthResponse, ReadyResponse,
    StatsResponse, StatusResponse,
};

/// OpenAPI document for the bot's HTTP surface.
#[derive(OpenApi)]
#[openapi(
    paths(handlers::health, handlers::ready, handlers::status),
    components(schemas(HealthResponse, ReadyResponse, StatusResponse, StatsResponse)),
    tags((name = "hierarchy-arb", description = "Hierarchical arbitrage bot status"))
)]
pub struct ApiDoc;

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Status endpoint
        .route("/api/v1/status", get(status))
        .route("/metrics", get(metrics))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn get_status(state: AppState, uri: &str) -> StatusCode {
        create_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        assert_eq!(get_status(AppState::new(true), "/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_endpoint_returns_503_when_not_ready() {
        assert_eq!(
            get_status(AppState::new(true), "/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn ready_endpoint_returns_200_when_ready() {
        let state = AppState::new(true);
        state.set_ready(true);

        assert_eq!(get_status(state, "/ready").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn status_reports_mode_and_counters() {
        let state = AppState::new(true);
        state.stats.record_price_update();
        state.stats.set_active_pairs(2);

        let response = create_router(state)
            .oneshot(Request::builder().uri("/api/v1/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["mode"], "simulation");
        assert_eq!(json["status"], "starting");
        assert_eq!(json["stats"]["price_updates"], 1);
        assert_eq!(json["stats"]["active_pairs"], 2);
    }

    #[tokio::test]
    async fn metrics_disabled_is_not_found() {
        assert_eq!(
            get_status(AppState::new(true), "/metrics").await,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        assert_eq!(
            get_status(AppState::new(true), "/api-docs/openapi.json").await,
            StatusCode::OK
        );
    }
}
