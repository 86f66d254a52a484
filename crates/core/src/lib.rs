//! `itsm-reporting-core`: domain model for the ticket reporting service.
//!
//! This crate contains **pure domain** types (no infrastructure concerns):
//! report jobs and their pipeline phases, plus the channel/user/ticket records
//! downloaded from the ITSM service.

pub mod channel;
pub mod error;
pub mod id;
pub mod job;
pub mod ticket;
pub mod user;

pub use channel::Channel;
pub use error::{DomainError, DomainResult};
pub use id::JobId;
pub use job::{Audience, FinalStatus, Job, JobType, Phase, PhaseTimes};
pub use ticket::{Ticket, TicketData, TicketKind};
pub use user::User;
