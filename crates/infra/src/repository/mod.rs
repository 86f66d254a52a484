//! Storage for jobs and the data downloaded during a run.
//!
//! Jobs live behind the async [`JobRepository`] (memory or Postgres). Channels,
//! users and tickets are per-run scratch data and only ever kept in memory.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use itsm_reporting_core::{Channel, DomainError, Job, JobId, Ticket, User};

pub use memory::{
    MemoryChannelRepository, MemoryJobRepository, MemoryTicketRepository, MemoryUserRepository,
};
pub use postgres::PostgresJobRepository;

/// Fixed number of jobs per listing page.
pub const JOBS_PER_PAGE: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("no jobs in queue")]
    Empty,
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("storage error: {0}")]
    Storage(String),
}

/// 1-based page of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    number: u32,
    size: u32,
}

impl Page {
    pub fn new(number: u32, size: u32) -> Result<Self, DomainError> {
        if number == 0 {
            return Err(DomainError::validation("page number must be at least 1"));
        }
        if size == 0 {
            return Err(DomainError::validation("page size must be at least 1"));
        }
        Ok(Self { number, size })
    }

    /// Page `number` with [`JOBS_PER_PAGE`] entries.
    pub fn of_jobs(number: u32) -> Result<Self, DomainError> {
        Self::new(number, JOBS_PER_PAGE)
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.number - 1) * u64::from(self.size)
    }
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Store a new job and assign its id.
    async fn add_job(&self, job: Job) -> Result<JobId, RepositoryError>;

    /// Overwrite phase stamps and final status. `created_at` never changes.
    async fn update_job(&self, job: &Job) -> Result<(), RepositoryError>;

    async fn get_job(&self, id: JobId) -> Result<Job, RepositoryError>;

    /// Most recently created job; [`RepositoryError::Empty`] when there is none.
    async fn get_last_job(&self) -> Result<Job, RepositoryError>;

    /// Jobs without a final status, oldest first.
    async fn running_jobs(&self) -> Result<Vec<Job>, RepositoryError>;

    /// Jobs ordered most recent first.
    async fn list_jobs(&self, page: Page) -> Result<Vec<Job>, RepositoryError>;
}

pub trait ChannelRepository: Send + Sync {
    /// Replace the stored list.
    fn store_channel_list(&self, channels: Vec<Channel>);

    fn get_channel_list(&self) -> Vec<Channel>;
}

pub trait UserRepository: Send + Sync {
    fn add_user_list(&self, users: Vec<User>);

    fn get_user_in_channel(&self, channel_id: &str, user_id: &str) -> Option<User>;

    fn list_users(&self) -> Vec<User>;

    fn truncate(&self);
}

pub trait TicketRepository: Send + Sync {
    fn add_ticket_list(&self, tickets: Vec<Ticket>);

    /// Tickets assigned to `email`, incidents first.
    fn get_tickets_by_email(&self, email: &str) -> Vec<Ticket>;

    /// Tickets of one channel grouped by assignee email, incidents first
    /// within each group.
    fn get_tickets_by_channel(&self, channel_id: &str) -> Vec<Ticket>;

    /// Non-empty assignee emails, sorted.
    fn get_distinct_emails(&self) -> Vec<String>;

    /// Channels that have at least one ticket, sorted.
    fn get_distinct_channel_ids(&self) -> Vec<String>;

    fn list_tickets(&self) -> Vec<Ticket>;

    fn truncate(&self);
}
