//! Report jobs and the pipeline phases they move through.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::JobId;

/// Which reports a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    #[serde(rename = "all")]
    All,
    #[serde(rename = "FE report only")]
    FieldEngineers,
    #[serde(rename = "SD report only")]
    ServiceDesk,
}

impl JobType {
    pub const ALL: [JobType; 3] = [JobType::All, JobType::FieldEngineers, JobType::ServiceDesk];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::All => "all",
            JobType::FieldEngineers => "FE report only",
            JobType::ServiceDesk => "SD report only",
        }
    }

    /// Whether reports for `audience` are generated and sent by this job.
    pub fn includes(&self, audience: Audience) -> bool {
        match self {
            JobType::All => true,
            JobType::FieldEngineers => audience == Audience::FieldEngineers,
            JobType::ServiceDesk => audience == Audience::ServiceDesk,
        }
    }

    /// Audiences covered by this job, field engineers first.
    pub fn audiences(self) -> impl Iterator<Item = Audience> {
        Audience::ALL.into_iter().filter(move |a| self.includes(*a))
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown '{s}' job type")))
    }
}

/// Recipients of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Audience {
    /// Each engineer receives the open tickets assigned to them.
    FieldEngineers,
    /// The service desk receives every open ticket.
    ServiceDesk,
}

impl Audience {
    pub const ALL: [Audience; 2] = [Audience::FieldEngineers, Audience::ServiceDesk];

    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::FieldEngineers => "field engineers",
            Audience::ServiceDesk => "service desk",
        }
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timed stages of a report job, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    ChannelsDownload,
    UsersDownload,
    TicketsDownload,
    ExcelFilesGeneration,
    EmailsSending,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::ChannelsDownload,
        Phase::UsersDownload,
        Phase::TicketsDownload,
        Phase::ExcelFilesGeneration,
        Phase::EmailsSending,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::ChannelsDownload => "channels_download",
            Phase::UsersDownload => "users_download",
            Phase::TicketsDownload => "tickets_download",
            Phase::ExcelFilesGeneration => "excel_files_generation",
            Phase::EmailsSending => "emails_sending",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Start/finish stamps of one phase. Both are empty until the phase runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseTimes {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Terminal outcome of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalStatus {
    Success,
    Error(String),
}

impl FinalStatus {
    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error(msg.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FinalStatus::Success)
    }
}

impl fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalStatus::Success => f.write_str("Success"),
            FinalStatus::Error(msg) => write!(f, "Error: {msg}"),
        }
    }
}

impl FromStr for FinalStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "Success" {
            return Ok(FinalStatus::Success);
        }
        s.strip_prefix("Error: ")
            .map(FinalStatus::error)
            .ok_or_else(|| DomainError::validation(format!("unknown final status '{s}'")))
    }
}

/// One report-generation run.
///
/// The id is assigned by the job repository when the job is first stored and
/// never changes afterwards. Phase stamps and the final status are written by
/// the job processor only.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    id: Option<JobId>,
    job_type: JobType,
    created_at: DateTime<Utc>,
    phases: [PhaseTimes; 5],
    final_status: Option<FinalStatus>,
}

impl Job {
    pub fn new(job_type: JobType) -> Self {
        Self {
            id: None,
            job_type,
            created_at: Utc::now(),
            phases: [PhaseTimes::default(); 5],
            final_status: None,
        }
    }

    /// Rebuild a stored job (repositories only).
    pub fn restore(
        id: JobId,
        job_type: JobType,
        created_at: DateTime<Utc>,
        phases: [PhaseTimes; 5],
        final_status: Option<FinalStatus>,
    ) -> Self {
        Self {
            id: Some(id),
            job_type,
            created_at,
            phases,
            final_status,
        }
    }

    pub fn id(&self) -> Option<JobId> {
        self.id
    }

    /// Set the identity. Fails if the job already has one.
    pub fn assign_id(&mut self, id: JobId) -> DomainResult<()> {
        if let Some(existing) = self.id {
            return Err(DomainError::invariant(format!(
                "job id already assigned ({existing})"
            )));
        }
        self.id = Some(id);
        Ok(())
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn phase(&self, phase: Phase) -> &PhaseTimes {
        &self.phases[phase.index()]
    }

    pub fn phases(&self) -> impl Iterator<Item = (Phase, &PhaseTimes)> {
        Phase::ALL.into_iter().zip(self.phases.iter())
    }

    pub fn final_status(&self) -> Option<&FinalStatus> {
        self.final_status.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.final_status.is_none()
    }

    pub fn start_phase(&mut self, phase: Phase) -> DomainResult<()> {
        self.ensure_running()?;
        self.phases[phase.index()] = PhaseTimes {
            started_at: Some(Utc::now()),
            finished_at: None,
        };
        Ok(())
    }

    pub fn finish_phase(&mut self, phase: Phase) -> DomainResult<()> {
        self.ensure_running()?;
        let times = &mut self.phases[phase.index()];
        if times.started_at.is_none() {
            return Err(DomainError::invariant(format!(
                "phase {phase} finished before it started"
            )));
        }
        times.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Record the terminal outcome. Can only happen once.
    pub fn finish(&mut self, status: FinalStatus) -> DomainResult<()> {
        self.ensure_running()?;
        self.final_status = Some(status);
        Ok(())
    }

    fn ensure_running(&self) -> DomainResult<()> {
        match &self.final_status {
            None => Ok(()),
            Some(status) => Err(DomainError::invariant(format!(
                "job already finished with status '{status}'"
            ))),
        }
    }
}
