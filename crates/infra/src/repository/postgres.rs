//! Postgres-backed job repository.
//!
//! One row per job in the `jobs` table. The table is created on startup when
//! missing; there is no migration tooling beyond that.
//!
//! ## Error Mapping
//!
//! | SQLx Error | RepositoryError |
//! |------------|-----------------|
//! | Database (unique violation `23505`) | `Domain(InvariantViolation)` |
//! | PoolClosed / other | `Storage` |
//! | Row that does not decode into a job | `Storage` |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use tracing::instrument;

use itsm_reporting_core::{DomainError, FinalStatus, Job, JobId, JobType, PhaseTimes};

use super::memory::phase_times;
use super::{JobRepository, Page, RepositoryError};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS jobs (
        uuid UUID PRIMARY KEY,
        job_type TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        final_status TEXT NULL,
        channels_download_started_at TIMESTAMPTZ NULL,
        channels_download_finished_at TIMESTAMPTZ NULL,
        users_download_started_at TIMESTAMPTZ NULL,
        users_download_finished_at TIMESTAMPTZ NULL,
        tickets_download_started_at TIMESTAMPTZ NULL,
        tickets_download_finished_at TIMESTAMPTZ NULL,
        excel_files_generation_started_at TIMESTAMPTZ NULL,
        excel_files_generation_finished_at TIMESTAMPTZ NULL,
        emails_sending_started_at TIMESTAMPTZ NULL,
        emails_sending_finished_at TIMESTAMPTZ NULL
    )
"#;

const SELECT_COLUMNS: &str = r#"
    uuid,
    job_type,
    created_at,
    final_status,
    channels_download_started_at,
    channels_download_finished_at,
    users_download_started_at,
    users_download_finished_at,
    tickets_download_started_at,
    tickets_download_finished_at,
    excel_files_generation_started_at,
    excel_files_generation_finished_at,
    emails_sending_started_at,
    emails_sending_finished_at
"#;

/// Postgres job store, shared through the SQLx connection pool.
#[derive(Debug, Clone)]
pub struct PostgresJobRepository {
    pool: Arc<PgPool>,
}

impl PostgresJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect and make sure the `jobs` table exists.
    pub async fn connect(database_url: &str) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let repo = Self::new(pool);
        repo.ensure_schema().await?;
        Ok(repo)
    }

    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), RepositoryError> {
        sqlx::query(CREATE_TABLE)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

/// Bind final status and the ten phase stamps, in column order.
fn bind_progress<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    job: &Job,
) -> Query<'q, Postgres, PgArguments> {
    query = query.bind(job.final_status().map(ToString::to_string));
    for times in phase_times(job) {
        query = query.bind(times.started_at).bind(times.finished_at);
    }
    query
}

#[async_trait::async_trait]
impl JobRepository for PostgresJobRepository {
    #[instrument(skip(self, job), fields(job_type = %job.job_type()), err)]
    async fn add_job(&self, mut job: Job) -> Result<JobId, RepositoryError> {
        let id = JobId::new();
        job.assign_id(id)?;

        let insert = sqlx::query(
            r#"
            INSERT INTO jobs (
                uuid, job_type, created_at, final_status,
                channels_download_started_at, channels_download_finished_at,
                users_download_started_at, users_download_finished_at,
                tickets_download_started_at, tickets_download_finished_at,
                excel_files_generation_started_at, excel_files_generation_finished_at,
                emails_sending_started_at, emails_sending_finished_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(*id.as_uuid())
        .bind(job.job_type().as_str())
        .bind(job.created_at());

        bind_progress(insert, &job)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("add_job", e))?;

        Ok(id)
    }

    /// `job_type` and `created_at` are fixed at creation and never written.
    #[instrument(skip(self, job), fields(job_id = ?job.id()), err)]
    async fn update_job(&self, job: &Job) -> Result<(), RepositoryError> {
        let id = job
            .id()
            .ok_or_else(|| DomainError::invariant("cannot update a job without an id"))?;

        let update = sqlx::query(
            r#"
            UPDATE jobs SET
                final_status = $2,
                channels_download_started_at = $3,
                channels_download_finished_at = $4,
                users_download_started_at = $5,
                users_download_finished_at = $6,
                tickets_download_started_at = $7,
                tickets_download_finished_at = $8,
                excel_files_generation_started_at = $9,
                excel_files_generation_finished_at = $10,
                emails_sending_started_at = $11,
                emails_sending_finished_at = $12
            WHERE uuid = $1
            "#,
        )
        .bind(*id.as_uuid());

        let updated = bind_progress(update, job)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_job", e))?
            .rows_affected();

        if updated == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn get_job(&self, id: JobId) -> Result<Job, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM jobs WHERE uuid = $1"))
            .bind(*id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_job", e))?;

        match row {
            Some(row) => job_from_row(&row),
            None => Err(RepositoryError::NotFound(id)),
        }
    }

    #[instrument(skip(self), err)]
    async fn get_last_job(&self) -> Result<Job, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM jobs ORDER BY created_at DESC, uuid DESC LIMIT 1"
        ))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_last_job", e))?;

        match row {
            Some(row) => job_from_row(&row),
            None => Err(RepositoryError::Empty),
        }
    }

    #[instrument(skip(self), err)]
    async fn running_jobs(&self) -> Result<Vec<Job>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM jobs WHERE final_status IS NULL ORDER BY created_at, uuid"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("running_jobs", e))?;

        rows.iter().map(job_from_row).collect()
    }

    #[instrument(skip(self), fields(page = page.number()), err)]
    async fn list_jobs(&self, page: Page) -> Result<Vec<Job>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM jobs ORDER BY created_at DESC, uuid DESC LIMIT $1 OFFSET $2"
        ))
        .bind(i64::from(page.size()))
        .bind(page.offset() as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_jobs", e))?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in &rows {
            jobs.push(job_from_row(row)?);
        }
        Ok(jobs)
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, RepositoryError> {
    decode_row(row).map_err(|e| RepositoryError::Storage(format!("failed to decode job row: {e}")))
}

fn decode_row(row: &PgRow) -> Result<Job, Box<dyn std::error::Error + Send + Sync>> {
    let uuid: uuid::Uuid = row.try_get("uuid")?;
    let job_type: JobType = row.try_get::<String, _>("job_type")?.parse()?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let final_status = row
        .try_get::<Option<String>, _>("final_status")?
        .map(|s| s.parse::<FinalStatus>())
        .transpose()?;

    let mut phases = [PhaseTimes::default(); 5];
    for (times, prefix) in phases.iter_mut().zip([
        "channels_download",
        "users_download",
        "tickets_download",
        "excel_files_generation",
        "emails_sending",
    ]) {
        times.started_at = row.try_get(format!("{prefix}_started_at").as_str())?;
        times.finished_at = row.try_get(format!("{prefix}_finished_at").as_str())?;
    }

    Ok(Job::restore(
        JobId::from_uuid(uuid),
        job_type,
        created_at,
        phases,
        final_status,
    ))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => RepositoryError::Domain(DomainError::invariant(msg)),
                _ => RepositoryError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            RepositoryError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => RepositoryError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itsm_reporting_core::Phase;

    /// Needs a reachable database: `DATABASE_URL=... cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn job_round_trips_through_postgres() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL not set");
        let repo = PostgresJobRepository::connect(&url).await.unwrap();

        let id = repo.add_job(Job::new(JobType::FieldEngineers)).await.unwrap();
        let mut job = repo.get_job(id).await.unwrap();
        job.start_phase(Phase::ChannelsDownload).unwrap();
        job.finish_phase(Phase::ChannelsDownload).unwrap();
        repo.update_job(&job).await.unwrap();

        assert!(
            repo.running_jobs()
                .await
                .unwrap()
                .iter()
                .any(|j| j.id() == Some(id))
        );
        job.finish(FinalStatus::error("boom")).unwrap();
        repo.update_job(&job).await.unwrap();
        assert!(
            repo.running_jobs()
                .await
                .unwrap()
                .iter()
                .all(|j| j.id() != Some(id))
        );

        let stored = repo.get_last_job().await.unwrap();
        assert_eq!(stored.id(), Some(id));
        assert_eq!(stored.job_type(), JobType::FieldEngineers);
        assert_eq!(stored.final_status(), Some(&FinalStatus::error("boom")));
        assert!(stored.phase(Phase::ChannelsDownload).finished_at.is_some());

        let missing = JobId::new();
        assert_eq!(
            repo.get_job(missing).await.unwrap_err(),
            RepositoryError::NotFound(missing)
        );
    }
}
