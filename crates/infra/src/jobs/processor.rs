//! Single-flight job processor.
//!
//! Admission is decided synchronously by [`JobProcessor::enqueue`]: at most one
//! job is accepted until the current run finishes. Accepted job ids travel
//! through a capacity-1 mailbox to a single worker task that runs the
//! download → report → email pipeline and records progress on the job.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use itsm_reporting_core::{DomainResult, FinalStatus, Job, JobId, JobType, Phase};
use itsm_reporting_observability::Metrics;

use crate::client::{ClientError, ItsmClient, StaticTokenSource, TokenSource};
use crate::config::Config;
use crate::downloader::{
    ChannelDownloader, DownloadError, HttpChannelDownloader, HttpTicketDownloader,
    HttpUserDownloader, TicketDownloader, UserDownloader,
};
use crate::email::{EmailError, EmailSender, PostmarkEmailSender};
use crate::report::{ReportError, ReportGenerator, XlsxReportGenerator};
use crate::repository::{ChannelRepository, JobRepository, TicketRepository, UserRepository};

/// Final status detail of a job left running by a previous process.
pub const INTERRUPTED: &str = "interrupted before completion";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessorError {
    #[error("job is being processed, try it later")]
    Busy,
    #[error("job processor already started")]
    AlreadyStarted,
    #[error("job processor worker stopped before becoming ready")]
    WorkerStopped,
}

/// Error of one pipeline operation.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error(transparent)]
    Email(#[from] EmailError),
}

#[derive(Debug, thiserror::Error)]
#[error("{source}")]
struct PhaseFailure {
    phase: Phase,
    source: StageError,
}

/// Collaborators the pipeline drives, in phase order.
#[derive(Clone)]
pub struct PipelineStages {
    pub channels: Arc<dyn ChannelDownloader>,
    pub users: Arc<dyn UserDownloader>,
    pub tickets: Arc<dyn TicketDownloader>,
    pub reports: Arc<dyn ReportGenerator>,
    pub emails: Arc<dyn EmailSender>,
}

/// Failure wiring the HTTP-backed stages.
#[derive(Debug, thiserror::Error)]
pub enum StageBuildError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Email(#[from] EmailError),
}

impl PipelineStages {
    /// ITSM downloaders, Excel generator and Postmark sender sharing the
    /// given scratch repositories.
    pub fn from_config(
        config: &Config,
        channels: Arc<dyn ChannelRepository>,
        users: Arc<dyn UserRepository>,
        tickets: Arc<dyn TicketRepository>,
    ) -> Result<Self, StageBuildError> {
        let itsm = &config.itsm;
        let token: Arc<dyn TokenSource> = Arc::new(StaticTokenSource::new(itsm.auth_token.clone()));
        let client = |url: &str| {
            ItsmClient::new(url, itsm.retry, itsm.request_timeout, token.clone())
        };

        Ok(Self {
            channels: Arc::new(HttpChannelDownloader::new(
                client(&itsm.channel_endpoint)?,
                channels.clone(),
            )),
            users: Arc::new(HttpUserDownloader::new(
                client(&itsm.user_endpoint)?,
                channels.clone(),
                users.clone(),
            )),
            tickets: Arc::new(HttpTicketDownloader::new(
                client(&itsm.incident_endpoint)?,
                client(&itsm.request_endpoint)?,
                channels,
                users,
                tickets.clone(),
            )),
            reports: Arc::new(XlsxReportGenerator::new(
                &config.reports.output_dir,
                tickets.clone(),
            )),
            emails: Arc::new(PostmarkEmailSender::new(
                config.email.clone(),
                &config.reports.output_dir,
                tickets,
                itsm.request_timeout,
            )?),
        })
    }
}

struct State {
    ready: bool,
}

pub struct JobProcessor {
    state: Mutex<State>,
    sender: mpsc::Sender<JobId>,
    receiver: Mutex<Option<mpsc::Receiver<JobId>>>,
    jobs: Arc<dyn JobRepository>,
    stages: PipelineStages,
    metrics: Metrics,
    pipeline_timeout: Duration,
}

impl JobProcessor {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        stages: PipelineStages,
        metrics: Metrics,
        pipeline_timeout: Duration,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(1);
        Self {
            state: Mutex::new(State { ready: false }),
            sender,
            receiver: Mutex::new(Some(receiver)),
            jobs,
            stages,
            metrics,
            pipeline_timeout,
        }
    }

    /// Hand `id` to the worker, or fail with [`ProcessorError::Busy`] while a
    /// run is in flight. Never blocks.
    pub fn enqueue(&self, id: JobId) -> Result<(), ProcessorError> {
        let mut state = self.state.lock().unwrap();
        if !state.ready {
            return Err(ProcessorError::Busy);
        }
        self.sender.try_send(id).map_err(|_| ProcessorError::Busy)?;
        state.ready = false;
        info!(job_id = %id, "job accepted for processing");
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().unwrap().ready
    }

    /// Spawn the worker. Returns once it is listening for jobs.
    pub async fn start(self: &Arc<Self>) -> Result<ProcessorHandle, ProcessorError> {
        let receiver = self
            .receiver
            .lock()
            .unwrap()
            .take()
            .ok_or(ProcessorError::AlreadyStarted)?;

        let shutdown = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let worker = tokio::spawn(self.clone().work(receiver, shutdown.clone(), ready_tx));
        ready_rx.await.map_err(|_| ProcessorError::WorkerStopped)?;

        Ok(ProcessorHandle {
            shutdown,
            worker,
            processor: self.clone(),
        })
    }

    fn set_ready(&self, ready: bool) {
        self.state.lock().unwrap().ready = ready;
    }

    async fn work(
        self: Arc<Self>,
        mut receiver: mpsc::Receiver<JobId>,
        shutdown: CancellationToken,
        ready_tx: oneshot::Sender<()>,
    ) {
        self.reclaim_stranded_jobs().await;
        self.set_ready(true);
        let _ = ready_tx.send(());
        info!("job processor ready");

        loop {
            let id = tokio::select! {
                _ = shutdown.cancelled() => break,
                id = receiver.recv() => match id {
                    Some(id) => id,
                    None => break,
                },
            };

            // Each run gets its own task so a panicking collaborator only
            // fails that job.
            let run = tokio::spawn({
                let processor = self.clone();
                let cancel = shutdown.child_token();
                async move { processor.process(id, cancel).await }
            });
            if let Err(e) = run.await {
                self.metrics.processing_failed().inc();
                error!(job_id = %id, error = %e, "job run aborted");
                self.finish_job(id, FinalStatus::error(format!("job run aborted: {e}")))
                    .await;
            }

            self.run_completed(&shutdown);
        }

        self.set_ready(false);
        info!("job processor stopped");
    }

    /// Mark every unfinished job failed: only a previous process that died
    /// mid-run leaves one behind.
    async fn reclaim_stranded_jobs(&self) {
        let stranded = match self.jobs.running_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "could not look up unfinished jobs");
                return;
            }
        };
        for mut job in stranded {
            if let Err(e) = job.finish(FinalStatus::error(INTERRUPTED)) {
                error!(job_id = ?job.id(), error = %e, "could not reclaim stranded job");
                continue;
            }
            match self.jobs.update_job(&job).await {
                Ok(()) => warn!(job_id = ?job.id(), "stranded job marked as interrupted"),
                Err(e) => error!(job_id = ?job.id(), error = %e, "could not reclaim stranded job"),
            }
        }
    }

    /// Re-open admission after a run, unless the processor is shutting down.
    fn run_completed(&self, shutdown: &CancellationToken) {
        if !shutdown.is_cancelled() {
            self.set_ready(true);
        }
    }

    #[instrument(skip_all, fields(job_id = %id))]
    async fn process(&self, id: JobId, cancel: CancellationToken) {
        let job_type = match self.jobs.get_job(id).await {
            Ok(job) => job.job_type(),
            Err(e) => {
                error!(error = %e, "could not load job, generating every report");
                JobType::All
            }
        };
        info!(job_type = %job_type, "job started");

        let timer = tokio::spawn({
            let cancel = cancel.clone();
            let timeout = self.pipeline_timeout;
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(timeout) => {
                        warn!(timeout_secs = timeout.as_secs(), "job exceeded its time limit, cancelling");
                        cancel.cancel();
                    }
                }
            }
        });

        let outcome = self.run_phases(id, job_type, &cancel).await;
        cancel.cancel();
        let _ = timer.await;

        let status = match outcome {
            Ok(()) => {
                self.metrics.jobs_succeeded().inc();
                info!("job finished successfully");
                FinalStatus::Success
            }
            Err(failure) => {
                self.metrics.processing_failed().inc();
                error!(phase = %failure.phase, error = %failure, "job failed");
                FinalStatus::error(failure.to_string())
            }
        };
        self.finish_job(id, status).await;
    }

    async fn run_phases(
        &self,
        id: JobId,
        job_type: JobType,
        cancel: &CancellationToken,
    ) -> Result<(), PhaseFailure> {
        let stages = &self.stages;
        stages.users.reset();
        stages.tickets.reset();

        self.timed(id, Phase::ChannelsDownload, async {
            stages.channels.download_channels(cancel).await
        })
        .await?;

        self.timed(id, Phase::UsersDownload, async {
            stages.users.download_users(cancel).await
        })
        .await?;

        self.timed(id, Phase::TicketsDownload, async {
            stages.tickets.download_tickets(cancel).await
        })
        .await?;

        self.timed(id, Phase::ExcelFilesGeneration, async {
            for audience in job_type.audiences() {
                stages.reports.generate(cancel, audience).await?;
            }
            Ok::<_, ReportError>(())
        })
        .await?;

        self.timed(id, Phase::EmailsSending, async {
            for audience in job_type.audiences() {
                stages.emails.send(cancel, audience).await?;
            }
            Ok::<_, EmailError>(())
        })
        .await
    }

    /// Stamp `phase` around `operation`. A failed operation leaves the phase
    /// started but not finished.
    async fn timed<F, E>(&self, id: JobId, phase: Phase, operation: F) -> Result<(), PhaseFailure>
    where
        F: Future<Output = Result<(), E>>,
        E: Into<StageError>,
    {
        self.record(id, |job| job.start_phase(phase)).await;
        operation.await.map_err(|e| PhaseFailure {
            phase,
            source: e.into(),
        })?;
        self.record(id, |job| job.finish_phase(phase)).await;
        info!(phase = %phase, "phase finished");
        Ok(())
    }

    async fn finish_job(&self, id: JobId, status: FinalStatus) {
        self.record(id, |job| job.finish(status)).await;
    }

    /// Load, change and persist the job. Failures are logged, never raised.
    async fn record(&self, id: JobId, change: impl FnOnce(&mut Job) -> DomainResult<()>) {
        let mut job = match self.jobs.get_job(id).await {
            Ok(job) => job,
            Err(e) => {
                error!(job_id = %id, error = %e, "could not load job to record progress");
                return;
            }
        };
        if let Err(e) = change(&mut job) {
            error!(job_id = %id, error = %e, "could not record job progress");
            return;
        }
        if let Err(e) = self.jobs.update_job(&job).await {
            error!(job_id = %id, error = %e, "could not persist job progress");
        }
    }

    fn close(&self) {
        self.stages.channels.close();
        self.stages.users.close();
        self.stages.tickets.close();
    }
}

/// Handle to a started [`JobProcessor`].
pub struct ProcessorHandle {
    shutdown: CancellationToken,
    worker: JoinHandle<()>,
    processor: Arc<JobProcessor>,
}

impl ProcessorHandle {
    /// Stop accepting jobs, cancel an in-flight run and wait for the worker.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.worker.await {
            error!(error = %e, "job processor worker failed");
        }
        self.processor.close();
    }
}
