use std::sync::Arc;

use secrecy::ExposeSecret;
use tracing::info;

use itsm_reporting_infra::{
    config::Config,
    jobs::{JobProcessor, JobService, PipelineStages, StageBuildError},
    repository::{
        JobRepository, MemoryChannelRepository, MemoryJobRepository, MemoryTicketRepository,
        MemoryUserRepository, PostgresJobRepository, RepositoryError,
    },
};
use itsm_reporting_observability::{Metrics, MetricsError};

#[derive(Debug, thiserror::Error)]
pub enum ServicesError {
    #[error("job repository: {0}")]
    Repository(#[from] RepositoryError),
    #[error("pipeline: {0}")]
    Stages(#[from] StageBuildError),
    #[error("metrics: {0}")]
    Metrics(#[from] MetricsError),
}

/// Everything the handlers reach through `Extension<Arc<AppServices>>`.
pub struct AppServices {
    pub jobs: JobService,
    pub processor: Arc<JobProcessor>,
    pub metrics: Metrics,
    /// Base of the `Location` header returned for new jobs.
    pub external_location_address: String,
}

/// Wire repositories, pipeline stages and the (not yet started) processor.
///
/// Jobs go to Postgres when `DATABASE_URL` is set, otherwise to a capped
/// in-memory history. Channels, users and tickets are always in memory.
pub async fn build_services(config: &Config) -> Result<AppServices, ServicesError> {
    let jobs: Arc<dyn JobRepository> = match &config.database_url {
        Some(url) => {
            info!("using postgres job repository");
            Arc::new(PostgresJobRepository::connect(url.expose_secret()).await?)
        }
        None => {
            info!(
                capacity = config.job_history_limit,
                "using in-memory job repository"
            );
            Arc::new(MemoryJobRepository::with_capacity(config.job_history_limit))
        }
    };

    let stages = PipelineStages::from_config(
        config,
        MemoryChannelRepository::arc(),
        MemoryUserRepository::arc(),
        MemoryTicketRepository::arc(),
    )?;
    let metrics = Metrics::new()?;
    let processor = Arc::new(JobProcessor::new(
        jobs.clone(),
        stages,
        metrics.clone(),
        config.pipeline_timeout,
    ));

    Ok(AppServices {
        jobs: JobService::new(jobs),
        processor,
        metrics,
        external_location_address: config.server.external_location_address.clone(),
    })
}
