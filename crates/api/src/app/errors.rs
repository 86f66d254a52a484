use axum::http::{HeaderValue, StatusCode, header};
use axum::response::IntoResponse;
use serde_json::json;

use itsm_reporting_core::DomainError;
use itsm_reporting_infra::repository::RepositoryError;

/// Seconds a rejected client should wait before submitting again.
pub const RETRY_AFTER_SECS: u64 = 600;

pub fn json_error(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (status, axum::Json(json!({ "error": message.into() }))).into_response()
}

/// 429 telling the client the processor is busy.
pub fn busy(message: impl Into<String>) -> axum::response::Response {
    let mut response = json_error(StatusCode::TOO_MANY_REQUESTS, message);
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
    response
}

pub fn repository_error_to_response(err: RepositoryError) -> axum::response::Response {
    match err {
        RepositoryError::NotFound(_) => json_error(StatusCode::NOT_FOUND, err.to_string()),
        RepositoryError::Domain(e) => domain_error_to_response(e),
        RepositoryError::Empty | RepositoryError::Storage(_) => {
            tracing::error!(error = %err, "job storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

/// Client mistakes carry their bare message; everything else its full text.
pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
            json_error(StatusCode::BAD_REQUEST, msg)
        }
        DomainError::NotFound => json_error(StatusCode::NOT_FOUND, err.to_string()),
        DomainError::InvariantViolation(_) => {
            tracing::error!(error = %err, "job invariant violated");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

pub async fn not_found() -> axum::response::Response {
    json_error(StatusCode::NOT_FOUND, "404 page not found")
}
