//! Engineers known to a channel.

use serde::{Deserialize, Serialize};

/// An engineer belonging to one channel.
///
/// Only users with an email address are ever stored: reports are delivered by
/// mail, so anyone without one is dropped at ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub channel_id: String,
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub org_name: String,
    /// ITSM user type (agent, end user, ...), kept as reported.
    pub kind: String,
}

impl User {
    pub fn has_email(&self) -> bool {
        !self.email.trim().is_empty()
    }
}
