//! Downloaders: page ITSM responses into the channel/user/ticket repositories.
//!
//! Every query endpoint pages with an opaque `bookmark`. A page holding fewer
//! than [`PAGE_SIZE`] results is the last one. Each page is stored as soon as
//! it arrives.

pub mod channel;
pub mod ticket;
pub mod user;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::client::{ClientError, ItsmClient};

pub use channel::HttpChannelDownloader;
pub use ticket::HttpTicketDownloader;
pub use user::HttpUserDownloader;

/// Results per page returned by the ITSM query API.
pub const PAGE_SIZE: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("could not retrieve {what}: {source}")]
    Client {
        what: &'static str,
        #[source]
        source: ClientError,
    },

    #[error("could not decode {what} response: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

#[async_trait]
pub trait ChannelDownloader: Send + Sync {
    /// Fetch the channel list and replace the stored one.
    async fn download_channels(&self, cancel: &CancellationToken) -> Result<(), DownloadError>;

    fn close(&self);
}

#[async_trait]
pub trait UserDownloader: Send + Sync {
    /// Fetch and store the users of every stored channel.
    async fn download_users(&self, cancel: &CancellationToken) -> Result<(), DownloadError>;

    /// Drop every stored user.
    fn reset(&self);

    fn close(&self);
}

#[async_trait]
pub trait TicketDownloader: Send + Sync {
    /// Fetch and store open incidents, then open requests, of every stored
    /// channel, resolving assignees against the stored users.
    async fn download_tickets(&self, cancel: &CancellationToken) -> Result<(), DownloadError>;

    /// Drop every stored ticket.
    fn reset(&self);

    fn close(&self);
}

/// One page of a bookmark-paginated query.
#[derive(Debug, Deserialize)]
struct BookmarkPage<T> {
    #[serde(default)]
    bookmark: Option<String>,
    #[serde(default = "Vec::new")]
    result: Vec<T>,
}

async fn query_page<T: DeserializeOwned>(
    client: &ItsmClient,
    cancel: &CancellationToken,
    channel_id: &str,
    body: &serde_json::Value,
    what: &'static str,
) -> Result<BookmarkPage<T>, DownloadError> {
    let response = client
        .query(cancel, channel_id, body)
        .await
        .map_err(|source| DownloadError::Client { what, source })?;
    response
        .json::<BookmarkPage<T>>()
        .await
        .map_err(|source| DownloadError::Decode { what, source })
}
