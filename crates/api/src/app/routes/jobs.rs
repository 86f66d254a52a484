use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, rejection::JsonRejection},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use tracing::{error, info};

use itsm_reporting_core::{JobId, JobType};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_job).get(list_jobs))
        .route("/:id", get(get_job))
}

/// Create a job and hand it to the processor. A busy processor turns the
/// job into a rejected one and answers 429.
pub async fn create_job(
    Extension(services): Extension<Arc<AppServices>>,
    payload: Result<Json<dto::CreateJobRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => {
            return errors::json_error(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    let job_type: JobType = match body.job_type.parse() {
        Ok(t) => t,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let id = match services.jobs.create_job(job_type).await {
        Ok(id) => id,
        Err(e) => return errors::repository_error_to_response(e),
    };

    if let Err(e) = services.processor.enqueue(id) {
        services.metrics.jobs_rejected().inc();
        info!(job_id = %id, reason = %e, "job rejected");
        if let Err(mark) = services.jobs.mark_rejected(id, &e.to_string()).await {
            error!(job_id = %id, error = %mark, "could not store job rejection");
        }
        return errors::busy(e.to_string());
    }

    let location = format!("{}/jobs/{}", services.external_location_address, id);
    (StatusCode::CREATED, [(header::LOCATION, location)]).into_response()
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: JobId = match id.parse() {
        Ok(id) => id,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.jobs.get_job(id).await {
        Ok(job) => Json(dto::job_to_json(&job)).into_response(),
        Err(e) => errors::repository_error_to_response(e),
    }
}

pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListJobsQuery>,
) -> axum::response::Response {
    let page = match dto::parse_page(query.page.as_deref()) {
        Ok(page) => page,
        Err(response) => return response,
    };

    match services.jobs.list_jobs(page).await {
        Ok(jobs) => Json(jobs.iter().map(dto::job_to_json).collect::<Vec<_>>()).into_response(),
        Err(e) => errors::repository_error_to_response(e),
    }
}
