//! In-memory repositories. Each collection sits behind its own lock, so HTTP
//! handlers can read jobs while the pipeline writes tickets.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use itsm_reporting_core::{Channel, DomainError, Job, JobId, Phase, PhaseTimes, Ticket, User};

use super::{
    ChannelRepository, JobRepository, Page, RepositoryError, TicketRepository, UserRepository,
};

/// Job history capped at `capacity` entries. The oldest finished job is
/// evicted first; jobs without a final status are never evicted.
#[derive(Debug)]
pub struct MemoryJobRepository {
    jobs: RwLock<VecDeque<Job>>,
    capacity: usize,
}

impl MemoryJobRepository {
    pub const DEFAULT_CAPACITY: usize = 10;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            jobs: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryJobRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn add_job(&self, mut job: Job) -> Result<JobId, RepositoryError> {
        let id = JobId::new();
        job.assign_id(id)?;

        let mut jobs = self.jobs.write().unwrap();
        jobs.push_back(job);
        while jobs.len() > self.capacity {
            match jobs.iter().position(|j| !j.is_running()) {
                Some(oldest_finished) => {
                    jobs.remove(oldest_finished);
                }
                None => break,
            }
        }
        Ok(id)
    }

    async fn update_job(&self, job: &Job) -> Result<(), RepositoryError> {
        let id = job
            .id()
            .ok_or_else(|| DomainError::invariant("cannot update a job without an id"))?;

        let mut jobs = self.jobs.write().unwrap();
        let stored = jobs
            .iter_mut()
            .find(|j| j.id() == Some(id))
            .ok_or(RepositoryError::NotFound(id))?;
        *stored = Job::restore(
            id,
            stored.job_type(),
            stored.created_at(),
            phase_times(job),
            job.final_status().cloned(),
        );
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<Job, RepositoryError> {
        self.jobs
            .read()
            .unwrap()
            .iter()
            .find(|j| j.id() == Some(id))
            .cloned()
            .ok_or(RepositoryError::NotFound(id))
    }

    async fn get_last_job(&self) -> Result<Job, RepositoryError> {
        self.jobs
            .read()
            .unwrap()
            .back()
            .cloned()
            .ok_or(RepositoryError::Empty)
    }

    async fn running_jobs(&self) -> Result<Vec<Job>, RepositoryError> {
        Ok(self
            .jobs
            .read()
            .unwrap()
            .iter()
            .filter(|j| j.is_running())
            .cloned()
            .collect())
    }

    async fn list_jobs(&self, page: Page) -> Result<Vec<Job>, RepositoryError> {
        let jobs = self.jobs.read().unwrap();
        Ok(jobs
            .iter()
            .rev()
            .skip(page.offset() as usize)
            .take(page.size() as usize)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryChannelRepository {
    channels: RwLock<Vec<Channel>>,
}

impl MemoryChannelRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl ChannelRepository for MemoryChannelRepository {
    fn store_channel_list(&self, channels: Vec<Channel>) {
        *self.channels.write().unwrap() = channels;
    }

    fn get_channel_list(&self) -> Vec<Channel> {
        self.channels.read().unwrap().clone()
    }
}

#[derive(Debug, Default)]
pub struct MemoryUserRepository {
    users: RwLock<Vec<User>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl UserRepository for MemoryUserRepository {
    fn add_user_list(&self, users: Vec<User>) {
        self.users.write().unwrap().extend(users);
    }

    fn get_user_in_channel(&self, channel_id: &str, user_id: &str) -> Option<User> {
        self.users
            .read()
            .unwrap()
            .iter()
            .find(|u| u.channel_id == channel_id && u.user_id == user_id)
            .cloned()
    }

    fn list_users(&self) -> Vec<User> {
        self.users.read().unwrap().clone()
    }

    fn truncate(&self) {
        self.users.write().unwrap().clear();
    }
}

#[derive(Debug, Default)]
pub struct MemoryTicketRepository {
    tickets: RwLock<Vec<Ticket>>,
}

impl MemoryTicketRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl TicketRepository for MemoryTicketRepository {
    fn add_ticket_list(&self, tickets: Vec<Ticket>) {
        self.tickets.write().unwrap().extend(tickets);
    }

    fn get_tickets_by_email(&self, email: &str) -> Vec<Ticket> {
        let mut found: Vec<Ticket> = self
            .tickets
            .read()
            .unwrap()
            .iter()
            .filter(|t| t.user_email == email)
            .cloned()
            .collect();
        found.sort_by_key(|t| t.kind);
        found
    }

    fn get_tickets_by_channel(&self, channel_id: &str) -> Vec<Ticket> {
        let mut found: Vec<Ticket> = self
            .tickets
            .read()
            .unwrap()
            .iter()
            .filter(|t| t.channel_id == channel_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| (&a.user_email, a.kind).cmp(&(&b.user_email, b.kind)));
        found
    }

    fn get_distinct_emails(&self) -> Vec<String> {
        self.tickets
            .read()
            .unwrap()
            .iter()
            .filter(|t| !t.user_email.is_empty())
            .map(|t| t.user_email.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn get_distinct_channel_ids(&self) -> Vec<String> {
        self.tickets
            .read()
            .unwrap()
            .iter()
            .map(|t| t.channel_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn list_tickets(&self) -> Vec<Ticket> {
        self.tickets.read().unwrap().clone()
    }

    fn truncate(&self) {
        self.tickets.write().unwrap().clear();
    }
}

/// Stamps copied out of a job, in phase order.
pub(crate) fn phase_times(job: &Job) -> [PhaseTimes; 5] {
    Phase::ALL.map(|p| *job.phase(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use itsm_reporting_core::{FinalStatus, JobType, TicketData, TicketKind};

    fn ticket(kind: TicketKind, channel: &str, email: &str, number: &str) -> Ticket {
        let mut t = Ticket::new(
            kind,
            channel,
            format!("{channel} name"),
            "",
            TicketData {
                number: number.to_string(),
                short_description: String::new(),
                state_id: 1,
                location: String::new(),
                created_at: None,
            },
        );
        t.user_email = email.to_string();
        t
    }

    #[tokio::test]
    async fn add_job_assigns_id_and_get_last_returns_newest() {
        let repo = MemoryJobRepository::new();
        assert_eq!(repo.get_last_job().await.unwrap_err(), RepositoryError::Empty);

        let first = repo.add_job(Job::new(JobType::All)).await.unwrap();
        let second = repo.add_job(Job::new(JobType::ServiceDesk)).await.unwrap();
        assert_ne!(first, second);

        let last = repo.get_last_job().await.unwrap();
        assert_eq!(last.id(), Some(second));
        assert_eq!(last.job_type(), JobType::ServiceDesk);
    }

    #[tokio::test]
    async fn job_with_id_cannot_be_added_again() {
        let repo = MemoryJobRepository::new();
        let id = repo.add_job(Job::new(JobType::All)).await.unwrap();
        let stored = repo.get_job(id).await.unwrap();

        let err = repo.add_job(stored).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Domain(DomainError::InvariantViolation(_))));
    }

    #[tokio::test]
    async fn update_keeps_created_at_and_type() {
        let repo = MemoryJobRepository::new();
        let id = repo.add_job(Job::new(JobType::All)).await.unwrap();
        let original = repo.get_job(id).await.unwrap();

        let mut changed = Job::restore(
            id,
            JobType::ServiceDesk,
            original.created_at() + chrono::Duration::hours(1),
            phase_times(&original),
            None,
        );
        changed.start_phase(Phase::ChannelsDownload).unwrap();
        changed.finish(FinalStatus::Success).unwrap();
        repo.update_job(&changed).await.unwrap();

        let stored = repo.get_job(id).await.unwrap();
        assert_eq!(stored.created_at(), original.created_at());
        assert_eq!(stored.job_type(), JobType::All);
        assert!(stored.phase(Phase::ChannelsDownload).started_at.is_some());
        assert_eq!(stored.final_status(), Some(&FinalStatus::Success));
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let repo = MemoryJobRepository::new();
        let id = JobId::new();
        assert_eq!(repo.get_job(id).await.unwrap_err(), RepositoryError::NotFound(id));

        let orphan = Job::restore(id, JobType::All, chrono::Utc::now(), Default::default(), None);
        assert_eq!(
            repo.update_job(&orphan).await.unwrap_err(),
            RepositoryError::NotFound(id)
        );
    }

    fn finished(status: FinalStatus) -> Job {
        let mut job = Job::new(JobType::All);
        job.finish(status).unwrap();
        job
    }

    #[tokio::test]
    async fn oldest_jobs_are_evicted_beyond_capacity() {
        let repo = MemoryJobRepository::with_capacity(3);
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(repo.add_job(finished(FinalStatus::Success)).await.unwrap());
        }

        assert_eq!(repo.len(), 3);
        assert!(repo.get_job(ids[0]).await.is_err());
        assert!(repo.get_job(ids[1]).await.is_err());
        assert!(repo.get_job(ids[4]).await.is_ok());
    }

    #[tokio::test]
    async fn running_job_outlives_a_burst_of_rejections() {
        let repo = MemoryJobRepository::with_capacity(10);
        let running = repo.add_job(Job::new(JobType::All)).await.unwrap();

        for _ in 0..10 {
            let id = repo.add_job(Job::new(JobType::All)).await.unwrap();
            let mut rejected = repo.get_job(id).await.unwrap();
            rejected
                .finish(FinalStatus::error("job is being processed, try it later"))
                .unwrap();
            repo.update_job(&rejected).await.unwrap();
        }

        assert_eq!(repo.len(), 10);
        let stored = repo.get_job(running).await.unwrap();
        assert!(stored.is_running());

        let mut done = stored;
        done.finish(FinalStatus::Success).unwrap();
        repo.update_job(&done).await.unwrap();
        assert_eq!(
            repo.get_job(running).await.unwrap().final_status(),
            Some(&FinalStatus::Success)
        );
    }

    #[tokio::test]
    async fn running_jobs_lists_unfinished_oldest_first() {
        let repo = MemoryJobRepository::new();
        let a = repo.add_job(Job::new(JobType::All)).await.unwrap();
        repo.add_job(finished(FinalStatus::Success)).await.unwrap();
        let b = repo.add_job(Job::new(JobType::ServiceDesk)).await.unwrap();
        repo.add_job(finished(FinalStatus::error("boom"))).await.unwrap();

        let running: Vec<_> = repo
            .running_jobs()
            .await
            .unwrap()
            .iter()
            .map(|j| j.id())
            .collect();
        assert_eq!(running, vec![Some(a), Some(b)]);
    }

    #[tokio::test]
    async fn list_is_most_recent_first_and_paginated() {
        let repo = MemoryJobRepository::with_capacity(25);
        let mut ids = Vec::new();
        for _ in 0..12 {
            ids.push(repo.add_job(Job::new(JobType::All)).await.unwrap());
        }

        let first = repo.list_jobs(Page::of_jobs(1).unwrap()).await.unwrap();
        assert_eq!(first.len(), 10);
        assert_eq!(first[0].id(), Some(ids[11]));

        let second = repo.list_jobs(Page::of_jobs(2).unwrap()).await.unwrap();
        let second_ids: Vec<_> = second.iter().filter_map(|j| j.id()).collect();
        assert_eq!(second_ids, vec![ids[1], ids[0]]);

        assert!(repo.list_jobs(Page::of_jobs(3).unwrap()).await.unwrap().is_empty());
    }

    #[test]
    fn channel_list_is_replaced_not_merged() {
        let repo = MemoryChannelRepository::new();
        repo.store_channel_list(vec![Channel::new("a", "A"), Channel::new("b", "B")]);
        repo.store_channel_list(vec![Channel::new("c", "C")]);
        assert_eq!(repo.get_channel_list(), vec![Channel::new("c", "C")]);
    }

    #[test]
    fn users_are_looked_up_per_channel() {
        let repo = MemoryUserRepository::new();
        let user = User {
            channel_id: "c1".into(),
            user_id: "u1".into(),
            email: "ann@example.com".into(),
            name: "Ann".into(),
            org_name: "Ops".into(),
            kind: "agent".into(),
        };
        repo.add_user_list(vec![user.clone()]);

        assert_eq!(repo.get_user_in_channel("c1", "u1"), Some(user));
        assert_eq!(repo.get_user_in_channel("c2", "u1"), None);

        repo.truncate();
        assert!(repo.list_users().is_empty());
    }

    #[test]
    fn tickets_by_email_put_incidents_first() {
        let repo = MemoryTicketRepository::new();
        repo.add_ticket_list(vec![
            ticket(TicketKind::Request, "c1", "ann@example.com", "REQ-1"),
            ticket(TicketKind::Incident, "c2", "ann@example.com", "INC-1"),
            ticket(TicketKind::Incident, "c1", "bob@example.com", "INC-2"),
        ]);

        let numbers: Vec<_> = repo
            .get_tickets_by_email("ann@example.com")
            .into_iter()
            .map(|t| t.data.number)
            .collect();
        assert_eq!(numbers, vec!["INC-1", "REQ-1"]);
    }

    #[test]
    fn tickets_by_channel_are_grouped_by_email() {
        let repo = MemoryTicketRepository::new();
        repo.add_ticket_list(vec![
            ticket(TicketKind::Request, "c1", "bob@example.com", "REQ-1"),
            ticket(TicketKind::Incident, "c1", "ann@example.com", "INC-1"),
            ticket(TicketKind::Incident, "c1", "bob@example.com", "INC-2"),
            ticket(TicketKind::Incident, "c2", "ann@example.com", "INC-3"),
        ]);

        let numbers: Vec<_> = repo
            .get_tickets_by_channel("c1")
            .into_iter()
            .map(|t| t.data.number)
            .collect();
        assert_eq!(numbers, vec!["INC-1", "INC-2", "REQ-1"]);
    }

    #[test]
    fn distinct_emails_skip_unassigned_tickets() {
        let repo = MemoryTicketRepository::new();
        repo.add_ticket_list(vec![
            ticket(TicketKind::Incident, "c2", "bob@example.com", "INC-1"),
            ticket(TicketKind::Incident, "c1", "", "INC-2"),
            ticket(TicketKind::Request, "c1", "bob@example.com", "REQ-1"),
            ticket(TicketKind::Request, "c1", "ann@example.com", "REQ-2"),
        ]);

        assert_eq!(
            repo.get_distinct_emails(),
            vec!["ann@example.com".to_string(), "bob@example.com".to_string()]
        );
        assert_eq!(
            repo.get_distinct_channel_ids(),
            vec!["c1".to_string(), "c2".to_string()]
        );

        repo.truncate();
        assert!(repo.list_tickets().is_empty());
    }
}
