//! Open incidents and requests.

use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::user::User;

/// Ticket flavour. Incidents sort before requests in every report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketKind {
    Incident,
    Request,
}

impl TicketKind {
    pub const ALL: [TicketKind; 2] = [TicketKind::Incident, TicketKind::Request];

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketKind::Incident => "incident",
            TicketKind::Request => "request",
        }
    }
}

impl fmt::Display for TicketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ticket payload as reported by the ITSM service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketData {
    pub number: String,
    pub short_description: String,
    pub state_id: i32,
    pub location: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// One open ticket plus the resolved identity of its assignee.
///
/// `user_name`, `user_email` and `user_org_name` stay blank when the ticket is
/// unassigned or the assignee is unknown in the ticket's channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub kind: TicketKind,
    pub channel_id: String,
    pub channel_name: String,
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub user_org_name: String,
    pub data: TicketData,
}

impl Ticket {
    pub fn new(
        kind: TicketKind,
        channel_id: impl Into<String>,
        channel_name: impl Into<String>,
        user_id: impl Into<String>,
        data: TicketData,
    ) -> Self {
        Self {
            kind,
            channel_id: channel_id.into(),
            channel_name: channel_name.into(),
            user_id: user_id.into(),
            user_name: String::new(),
            user_email: String::new(),
            user_org_name: String::new(),
            data,
        }
    }

    /// Copy the assignee's identity onto the ticket.
    pub fn assign_to(&mut self, user: &User) {
        self.user_name = user.name.clone();
        self.user_email = user.email.clone();
        self.user_org_name = user.org_name.clone();
    }

    pub fn is_assigned(&self) -> bool {
        !self.user_email.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(number: &str) -> TicketData {
        TicketData {
            number: number.to_string(),
            short_description: "printer on fire".to_string(),
            state_id: 2,
            location: "HQ".to_string(),
            created_at: None,
        }
    }

    #[test]
    fn incidents_sort_before_requests() {
        let mut kinds = vec![TicketKind::Request, TicketKind::Incident];
        kinds.sort();
        assert_eq!(kinds, TicketKind::ALL.to_vec());
    }

    #[test]
    fn new_ticket_is_unassigned_until_resolved() {
        let mut ticket = Ticket::new(TicketKind::Incident, "c1", "Channel 1", "u1", data("INC-1"));
        assert!(!ticket.is_assigned());

        ticket.assign_to(&User {
            channel_id: "c1".into(),
            user_id: "u1".into(),
            email: "ann@example.com".into(),
            name: "Ann".into(),
            org_name: "Ops".into(),
            kind: "agent".into(),
        });

        assert!(ticket.is_assigned());
        assert_eq!(ticket.user_name, "Ann");
        assert_eq!(ticket.user_org_name, "Ops");
    }
}
