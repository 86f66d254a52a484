//! Job bookkeeping used by the HTTP layer.

use std::sync::Arc;

use tracing::{info, instrument};

use itsm_reporting_core::{FinalStatus, Job, JobId, JobType};

use crate::repository::{JobRepository, Page, RepositoryError};

#[derive(Clone)]
pub struct JobService {
    jobs: Arc<dyn JobRepository>,
}

impl JobService {
    pub fn new(jobs: Arc<dyn JobRepository>) -> Self {
        Self { jobs }
    }

    #[instrument(skip(self), err)]
    pub async fn create_job(&self, job_type: JobType) -> Result<JobId, RepositoryError> {
        let id = self.jobs.add_job(Job::new(job_type)).await?;
        info!(job_id = %id, "job created");
        Ok(id)
    }

    pub async fn get_job(&self, id: JobId) -> Result<Job, RepositoryError> {
        self.jobs.get_job(id).await
    }

    /// 1-based page of jobs, most recent first.
    pub async fn list_jobs(&self, page: u32) -> Result<Vec<Job>, RepositoryError> {
        let page = Page::of_jobs(page)?;
        self.jobs.list_jobs(page).await
    }

    pub async fn update_job(&self, job: &Job) -> Result<(), RepositoryError> {
        self.jobs.update_job(job).await
    }

    /// Close a job whose admission was refused with `Error: <reason>`.
    #[instrument(skip(self), err)]
    pub async fn mark_rejected(&self, id: JobId, reason: &str) -> Result<(), RepositoryError> {
        let mut job = self.jobs.get_job(id).await?;
        job.finish(FinalStatus::error(reason))?;
        self.jobs.update_job(&job).await
    }
}
