use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{StatusCode, header},
    response::IntoResponse,
};

use crate::app::errors;
use crate::app::services::AppServices;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Prometheus text exposition of the pipeline counters.
pub async fn metrics(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to render metrics");
            errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
