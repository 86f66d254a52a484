//! Outbound email carrying the generated reports.

pub mod postmark;

use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use itsm_reporting_core::Audience;

pub use postmark::PostmarkEmailSender;

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("could not read attachment {path}: {source}")]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("email request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("email server rejected the batch ({status}): error code {code}: {message}")]
    Rejected {
        status: u16,
        code: i64,
        message: String,
    },

    #[error("email sending cancelled")]
    Cancelled,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Send the reports of `audience` generated by the current run.
    async fn send(&self, cancel: &CancellationToken, audience: Audience)
    -> Result<(), EmailError>;
}
