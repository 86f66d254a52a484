use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use itsm_reporting_core::{Audience, Ticket};

use super::{
    ASSIGNEE_HEADER, ReportError, ReportGenerator, TICKET_HEADER, assignee_cells,
    field_engineer_file, service_desk_file, ticket_cells,
};
use crate::repository::TicketRepository;

/// Writes `.xlsx` workbooks into one output directory.
///
/// Workbook encoding is CPU-bound and done on the blocking pool.
pub struct XlsxReportGenerator {
    dir: PathBuf,
    tickets: Arc<dyn TicketRepository>,
}

impl XlsxReportGenerator {
    pub fn new(dir: impl Into<PathBuf>, tickets: Arc<dyn TicketRepository>) -> Self {
        Self {
            dir: dir.into(),
            tickets,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ReportGenerator for XlsxReportGenerator {
    #[instrument(skip(self, cancel), fields(audience = %audience), err)]
    async fn generate(
        &self,
        cancel: &CancellationToken,
        audience: Audience,
    ) -> Result<(), ReportError> {
        let dir = self.dir.clone();
        let tickets = self.tickets.clone();
        let cancel = cancel.clone();

        tokio::task::spawn_blocking(move || match audience {
            Audience::FieldEngineers => write_field_engineer_reports(&dir, &*tickets, &cancel),
            Audience::ServiceDesk => write_service_desk_report(&dir, &*tickets, &cancel),
        })
        .await?
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ReportError + '_ {
    move |source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Start from an empty directory so files of engineers who no longer have
/// tickets do not linger.
fn recreate_dir(dir: &Path) -> Result<(), ReportError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_error(dir)(e)),
    }
    std::fs::create_dir_all(dir).map_err(io_error(dir))
}

fn write_field_engineer_reports(
    dir: &Path,
    tickets: &dyn TicketRepository,
    cancel: &CancellationToken,
) -> Result<(), ReportError> {
    recreate_dir(dir)?;

    let emails = tickets.get_distinct_emails();
    for email in &emails {
        if cancel.is_cancelled() {
            return Err(ReportError::Cancelled);
        }

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name("Tickets")?;
        sheet.write_string_with_format(0, 0, format!("Tickets for {email}"), &bold())?;
        write_header(sheet, 1, &TICKET_HEADER)?;

        for (row, ticket) in (2u32..).zip(tickets.get_tickets_by_email(email).iter()) {
            write_cells(sheet, row, 0, &ticket_cells(ticket))?;
        }
        sheet.autofit();

        workbook.save(field_engineer_file(dir, email))?;
    }

    info!(files = emails.len(), dir = %dir.display(), "field engineer reports written");
    Ok(())
}

fn write_service_desk_report(
    dir: &Path,
    tickets: &dyn TicketRepository,
    cancel: &CancellationToken,
) -> Result<(), ReportError> {
    std::fs::create_dir_all(dir).map_err(io_error(dir))?;

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Open tickets")?;
    sheet.write_string_with_format(0, 0, "Open tickets", &bold())?;
    write_header(sheet, 1, &TICKET_HEADER)?;
    write_header_at(sheet, 1, TICKET_HEADER.len() as u16, &ASSIGNEE_HEADER)?;

    let mut row = 2u32;
    for channel_id in tickets.get_distinct_channel_ids() {
        if cancel.is_cancelled() {
            return Err(ReportError::Cancelled);
        }
        for ticket in tickets.get_tickets_by_channel(&channel_id) {
            write_service_desk_row(sheet, row, &ticket)?;
            row += 1;
        }
    }
    sheet.autofit();

    workbook.save(service_desk_file(dir))?;
    info!(tickets = row - 2, dir = %dir.display(), "service desk report written");
    Ok(())
}

fn write_service_desk_row(sheet: &mut Worksheet, row: u32, ticket: &Ticket) -> Result<(), XlsxError> {
    write_cells(sheet, row, 0, &ticket_cells(ticket))?;
    write_cells(sheet, row, TICKET_HEADER.len() as u16, &assignee_cells(ticket))
}

fn bold() -> Format {
    Format::new().set_bold()
}

fn write_header(sheet: &mut Worksheet, row: u32, titles: &[&str]) -> Result<(), XlsxError> {
    write_header_at(sheet, row, 0, titles)
}

fn write_header_at(
    sheet: &mut Worksheet,
    row: u32,
    first_col: u16,
    titles: &[&str],
) -> Result<(), XlsxError> {
    let format = bold();
    for (col, title) in (first_col..).zip(titles) {
        sheet.write_string_with_format(row, col, *title, &format)?;
    }
    Ok(())
}

fn write_cells(
    sheet: &mut Worksheet,
    row: u32,
    first_col: u16,
    cells: &[String],
) -> Result<(), XlsxError> {
    for (col, value) in (first_col..).zip(cells) {
        sheet.write_string(row, col, value)?;
    }
    Ok(())
}
