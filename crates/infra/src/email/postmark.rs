//! Postmark batch API sender.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use maud::html;
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use itsm_reporting_core::{Audience, Ticket};

use super::{EmailError, EmailSender};
use crate::config::EmailConfig;
use crate::report::{
    ASSIGNEE_HEADER, TICKET_HEADER, assignee_cells, field_engineer_file, service_desk_file,
    ticket_cells,
};
use crate::repository::TicketRepository;

const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const SERVER_TOKEN_HEADER: &str = "X-Postmark-Server-Token";

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Email {
    from: String,
    to: String,
    subject: String,
    html_body: String,
    text_body: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    message_stream: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Attachment {
    name: String,
    content: String,
    content_type: String,
}

/// Postmark's per-message (or whole-request) reply.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct PostmarkReply {
    to: String,
    #[serde(rename = "MessageID")]
    message_id: String,
    error_code: i64,
    message: String,
}

pub struct PostmarkEmailSender {
    http: reqwest::Client,
    config: EmailConfig,
    reports_dir: PathBuf,
    tickets: Arc<dyn TicketRepository>,
}

impl PostmarkEmailSender {
    pub fn new(
        config: EmailConfig,
        reports_dir: impl Into<PathBuf>,
        tickets: Arc<dyn TicketRepository>,
        request_timeout: Duration,
    ) -> Result<Self, EmailError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(EmailError::Build)?;
        Ok(Self {
            http,
            config,
            reports_dir: reports_dir.into(),
            tickets,
        })
    }

    async fn field_engineer_emails(&self) -> Result<Vec<Email>, EmailError> {
        let mut emails = Vec::new();
        for address in self.tickets.get_distinct_emails() {
            let tickets = self.tickets.get_tickets_by_email(&address);
            let subject = format!("Open tickets assigned to {address}");
            let html = html_body(
                "Hi, below are open tickets currently assigned to you.",
                &TICKET_HEADER,
                tickets.iter().map(|t| ticket_cells(t).to_vec()),
            );
            let attachment = attach(&field_engineer_file(&self.reports_dir, &address)).await?;
            emails.push(self.email(address, subject, html, attachment));
        }
        Ok(emails)
    }

    async fn service_desk_emails(&self) -> Result<Vec<Email>, EmailError> {
        let recipients = &self.config.service_desk_recipients;
        if recipients.is_empty() {
            warn!("no service desk recipients configured, skipping service desk emails");
            return Ok(Vec::new());
        }

        let tickets = self.tickets.list_tickets();
        let header: Vec<&str> = TICKET_HEADER.iter().chain(&ASSIGNEE_HEADER).copied().collect();
        let html = html_body(
            "Hi, below are all open tickets.",
            &header,
            tickets.iter().map(service_desk_cells),
        );
        let attachment = attach(&service_desk_file(&self.reports_dir)).await?;

        Ok(recipients
            .iter()
            .map(|to| {
                self.email(
                    to.clone(),
                    "Open tickets of all channels".to_string(),
                    html.clone(),
                    attachment.clone(),
                )
            })
            .collect())
    }

    fn email(&self, to: String, subject: String, html_body: String, attachment: Attachment) -> Email {
        Email {
            from: self.config.from_address.clone(),
            to,
            text_body: subject.clone(),
            subject,
            html_body,
            message_stream: self.config.message_stream.clone(),
            attachments: vec![attachment],
        }
    }

    async fn send_batch(
        &self,
        cancel: &CancellationToken,
        emails: &[Email],
    ) -> Result<(), EmailError> {
        let request = self
            .http
            .post(&self.config.server_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(
                SERVER_TOKEN_HEADER,
                self.config
                    .server_token
                    .as_ref()
                    .map(|t| t.expose_secret())
                    .unwrap_or_default(),
            )
            .json(emails);

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(EmailError::Cancelled),
            response = request.send() => response?,
        };

        let status = response.status();
        if status != StatusCode::OK {
            let reply: PostmarkReply = response.json().await.unwrap_or_default();
            return Err(EmailError::Rejected {
                status: status.as_u16(),
                code: reply.error_code,
                message: reply.message,
            });
        }

        let replies: Vec<PostmarkReply> = response.json().await?;
        for reply in &replies {
            if reply.error_code == 0 {
                debug!(to = %reply.to, message_id = %reply.message_id, "email accepted");
            } else {
                warn!(
                    to = %reply.to,
                    error_code = reply.error_code,
                    message = %reply.message,
                    "email not accepted"
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EmailSender for PostmarkEmailSender {
    #[instrument(skip(self, cancel), fields(audience = %audience), err)]
    async fn send(&self, cancel: &CancellationToken, audience: Audience) -> Result<(), EmailError> {
        let emails = match audience {
            Audience::FieldEngineers => self.field_engineer_emails().await?,
            Audience::ServiceDesk => self.service_desk_emails().await?,
        };
        if emails.is_empty() {
            info!("nothing to send");
            return Ok(());
        }

        self.send_batch(cancel, &emails).await?;
        info!(emails = emails.len(), "emails sent");
        Ok(())
    }
}

async fn attach(path: &Path) -> Result<Attachment, EmailError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| EmailError::Attachment {
            path: path.to_path_buf(),
            source,
        })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Attachment {
        name,
        content: STANDARD.encode(bytes),
        content_type: XLSX_CONTENT_TYPE.to_string(),
    })
}

fn service_desk_cells(ticket: &Ticket) -> Vec<String> {
    let mut cells = ticket_cells(ticket).to_vec();
    cells.extend(assignee_cells(ticket));
    cells
}

fn html_body(
    caption: &str,
    header: &[&str],
    rows: impl Iterator<Item = Vec<String>>,
) -> String {
    html! {
        b { (caption) }
        br;
        br;
        table border="1" {
            tr {
                @for title in header {
                    th { (title) }
                }
            }
            @for row in rows {
                tr {
                    @for cell in &row {
                        td { (cell) }
                    }
                }
            }
        }
    }
    .into_string()
}
