//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: repositories, pipeline stages and the job processor
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .route("/metrics", get(routes::system::metrics))
        .nest("/jobs", routes::jobs::router())
        .fallback(errors::not_found)
        .layer(Extension(services))
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use itsm_reporting_infra::config::Config;

    async fn app() -> Router {
        let services = services::build_services(&Config::default()).await.unwrap();
        build_app(Arc::new(services))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unknown_route_is_json_404() {
        let response = app()
            .await
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"error": "404 page not found"})
        );
    }

    #[tokio::test]
    async fn health_is_ok() {
        let response = app()
            .await
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_job_type_is_rejected() {
        let response = app()
            .await
            .oneshot(
                Request::post("/jobs")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"type":"weekly"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["error"],
            "unknown 'weekly' job type"
        );
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let response = app()
            .await
            .oneshot(
                Request::post("/jobs")
                    .header("content-type", "application/json")
                    .body(Body::from("{"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"].is_string());
    }
}
