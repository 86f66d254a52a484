use axum::http::StatusCode;
use serde::Deserialize;

use itsm_reporting_core::Job;

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    #[serde(rename = "type")]
    pub job_type: String,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub page: Option<String>,
}

/// 1-based page number; absent means the first page.
pub fn parse_page(raw: Option<&str>) -> Result<u32, axum::response::Response> {
    let Some(raw) = raw else {
        return Ok(1);
    };
    match raw.parse::<u32>() {
        Ok(page) if page >= 1 => Ok(page),
        _ => Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            format!("invalid page '{raw}': must be a positive integer"),
        )),
    }
}

// -------------------------
// Response mapping
// -------------------------

/// Job as served by the API. Unset timestamps and a missing final status
/// are left out.
pub fn job_to_json(job: &Job) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    if let Some(id) = job.id() {
        body.insert("uuid".into(), id.to_string().into());
    }
    body.insert("type".into(), job.job_type().as_str().into());
    body.insert("created_at".into(), job.created_at().to_rfc3339().into());

    for (phase, times) in job.phases() {
        if let Some(ts) = times.started_at {
            body.insert(format!("{phase}_started_at"), ts.to_rfc3339().into());
        }
        if let Some(ts) = times.finished_at {
            body.insert(format!("{phase}_finished_at"), ts.to_rfc3339().into());
        }
    }

    if let Some(status) = job.final_status() {
        body.insert("final_status".into(), status.to_string().into());
    }
    serde_json::Value::Object(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    use itsm_reporting_core::{FinalStatus, JobId, JobType, Phase};

    #[test]
    fn fresh_job_omits_progress_fields() {
        let mut job = Job::new(JobType::ServiceDesk);
        job.assign_id(JobId::new()).unwrap();

        let json = job_to_json(&job);
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 3);
        assert_eq!(json["type"], "SD report only");
        assert!(json.get("final_status").is_none());
    }

    #[test]
    fn progress_fields_use_phase_names() {
        let mut job = Job::new(JobType::All);
        job.assign_id(JobId::new()).unwrap();
        job.start_phase(Phase::ChannelsDownload).unwrap();
        job.finish_phase(Phase::ChannelsDownload).unwrap();
        job.start_phase(Phase::UsersDownload).unwrap();
        job.finish(FinalStatus::error("boom")).unwrap();

        let json = job_to_json(&job);
        assert!(json["channels_download_started_at"].is_string());
        assert!(json["channels_download_finished_at"].is_string());
        assert!(json["users_download_started_at"].is_string());
        assert!(json.get("users_download_finished_at").is_none());
        assert_eq!(json["final_status"], "Error: boom");
    }

    #[test]
    fn page_must_be_positive() {
        assert_eq!(parse_page(None).unwrap(), 1);
        assert_eq!(parse_page(Some("3")).unwrap(), 3);
        assert!(parse_page(Some("0")).is_err());
        assert!(parse_page(Some("-1")).is_err());
        assert!(parse_page(Some("two")).is_err());
    }
}
