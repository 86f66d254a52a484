use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use itsm_reporting_core::{Channel, Ticket, TicketData, TicketKind};

use super::{DownloadError, PAGE_SIZE, TicketDownloader, query_page};
use crate::client::ItsmClient;
use crate::repository::{ChannelRepository, TicketRepository, UserRepository};

#[derive(Debug, Deserialize)]
struct TicketRecord {
    number: String,
    #[serde(default)]
    short_description: Option<String>,
    #[serde(default)]
    state_id: Option<i32>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    assigned_to: Option<String>,
}

impl TicketRecord {
    fn into_ticket(self, kind: TicketKind, channel: &Channel) -> Ticket {
        let created_at = self.created_at.as_deref().and_then(parse_timestamp);
        let data = TicketData {
            number: self.number,
            short_description: self.short_description.unwrap_or_default(),
            state_id: self.state_id.unwrap_or_default(),
            location: self.location.unwrap_or_default(),
            created_at,
        };
        Ticket::new(
            kind,
            &channel.channel_id,
            &channel.name,
            self.assigned_to.unwrap_or_default(),
            data,
        )
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            debug!(raw, error = %e, "ignoring unparseable ticket timestamp");
            None
        }
    }
}

/// Open tickets only: 4 = resolved, 5 = closed, 6 = cancelled.
fn ticket_query(bookmark: &str) -> serde_json::Value {
    json!({
        "selector": {
            "$and": [
                {"state_id": {"$ne": 4}},
                {"state_id": {"$ne": 5}},
                {"state_id": {"$ne": 6}},
            ]
        },
        "fields": [
            "uuid",
            "number",
            "short_description",
            "state_id",
            "location",
            "created_at",
            "assigned_to",
        ],
        "bookmark": bookmark,
    })
}

/// Downloads incidents and requests through two clients, one per endpoint.
pub struct HttpTicketDownloader {
    incidents: ItsmClient,
    requests: ItsmClient,
    channels: Arc<dyn ChannelRepository>,
    users: Arc<dyn UserRepository>,
    tickets: Arc<dyn TicketRepository>,
}

impl HttpTicketDownloader {
    pub fn new(
        incidents: ItsmClient,
        requests: ItsmClient,
        channels: Arc<dyn ChannelRepository>,
        users: Arc<dyn UserRepository>,
        tickets: Arc<dyn TicketRepository>,
    ) -> Self {
        Self {
            incidents,
            requests,
            channels,
            users,
            tickets,
        }
    }

    fn client(&self, kind: TicketKind) -> &ItsmClient {
        match kind {
            TicketKind::Incident => &self.incidents,
            TicketKind::Request => &self.requests,
        }
    }

    async fn download_kind(
        &self,
        cancel: &CancellationToken,
        channel: &Channel,
        kind: TicketKind,
    ) -> Result<usize, DownloadError> {
        let what = match kind {
            TicketKind::Incident => "incidents",
            TicketKind::Request => "requests",
        };
        let mut bookmark = String::new();
        let mut stored = 0usize;

        loop {
            let page = query_page::<TicketRecord>(
                self.client(kind),
                cancel,
                &channel.channel_id,
                &ticket_query(&bookmark),
                what,
            )
            .await?;

            let raw = page.result.len();
            let mut unresolved = 0usize;
            let tickets: Vec<Ticket> = page
                .result
                .into_iter()
                .map(|record| {
                    let mut ticket = record.into_ticket(kind, channel);
                    match self
                        .users
                        .get_user_in_channel(&channel.channel_id, &ticket.user_id)
                    {
                        Some(user) => ticket.assign_to(&user),
                        None => unresolved += 1,
                    }
                    ticket
                })
                .collect();

            if unresolved > 0 {
                warn!(
                    channel_id = %channel.channel_id,
                    kind = %kind,
                    unresolved,
                    "tickets without a known assignee"
                );
            }
            stored += raw;
            self.tickets.add_ticket_list(tickets);

            if raw < PAGE_SIZE {
                break;
            }
            bookmark = page.bookmark.unwrap_or_default();
        }

        Ok(stored)
    }
}

#[async_trait]
impl TicketDownloader for HttpTicketDownloader {
    async fn download_tickets(&self, cancel: &CancellationToken) -> Result<(), DownloadError> {
        for channel in self.channels.get_channel_list() {
            for kind in TicketKind::ALL {
                let stored = self.download_kind(cancel, &channel, kind).await?;
                info!(
                    channel_id = %channel.channel_id,
                    channel = %channel.name,
                    kind = %kind,
                    tickets = stored,
                    "tickets downloaded"
                );
            }
        }
        Ok(())
    }

    fn reset(&self) {
        self.tickets.truncate();
    }

    fn close(&self) {
        self.incidents.close();
        self.requests.close();
    }
}
