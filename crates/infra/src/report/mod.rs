//! Excel reports built from the downloaded tickets.
//!
//! Field engineers get one workbook each, named after their email. The
//! service desk gets a single workbook covering every ticket.

pub mod xlsx;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use itsm_reporting_core::{Audience, Ticket};

pub use xlsx::XlsxReportGenerator;

/// File name of the service-desk workbook.
pub const SERVICE_DESK_FILE: &str = "service-desk.xlsx";

/// Columns shared by both reports.
pub const TICKET_HEADER: [&str; 7] = [
    "Type",
    "Channel",
    "Number",
    "Short description",
    "State",
    "Location",
    "Created at",
];

/// Extra columns of the service-desk report.
pub const ASSIGNEE_HEADER: [&str; 3] = ["Engineer", "Email", "Organization"];

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("could not prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not write workbook: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("report generation cancelled")]
    Cancelled,

    #[error("report task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait ReportGenerator: Send + Sync {
    /// Write the workbooks for `audience` from the stored tickets.
    async fn generate(
        &self,
        cancel: &CancellationToken,
        audience: Audience,
    ) -> Result<(), ReportError>;
}

/// Workbook path of one field engineer. The email comes from the ITSM
/// service, so anything outside a conservative character set (path
/// separators included) is replaced with `_`.
pub fn field_engineer_file(dir: &Path, email: &str) -> PathBuf {
    let name: String = email
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '@' | '.' | '_' | '-' | '+' => c,
            _ => '_',
        })
        .collect();
    dir.join(format!("{name}.xlsx"))
}

pub fn service_desk_file(dir: &Path) -> PathBuf {
    dir.join(SERVICE_DESK_FILE)
}

/// Cells of one ticket, in [`TICKET_HEADER`] order.
pub fn ticket_cells(ticket: &Ticket) -> [String; 7] {
    [
        ticket.kind.to_string(),
        ticket.channel_name.clone(),
        ticket.data.number.clone(),
        ticket.data.short_description.clone(),
        ticket.data.state_id.to_string(),
        ticket.data.location.clone(),
        ticket
            .data
            .created_at
            .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default(),
    ]
}

/// Cells of a ticket's assignee, in [`ASSIGNEE_HEADER`] order.
pub fn assignee_cells(ticket: &Ticket) -> [String; 3] {
    [
        ticket.user_name.clone(),
        ticket.user_email.clone(),
        ticket.user_org_name.clone(),
    ]
}
