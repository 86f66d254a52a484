use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use itsm_reporting_core::Channel;

use super::{ChannelDownloader, DownloadError};
use crate::client::ItsmClient;
use crate::repository::ChannelRepository;

#[derive(Debug, Deserialize)]
struct SpacesResponse {
    #[serde(default)]
    spaces: Vec<SpaceRecord>,
}

#[derive(Debug, Deserialize)]
struct SpaceRecord {
    space: String,
    #[serde(default)]
    name: Option<String>,
}

pub struct HttpChannelDownloader {
    client: ItsmClient,
    channels: Arc<dyn ChannelRepository>,
}

impl HttpChannelDownloader {
    pub fn new(client: ItsmClient, channels: Arc<dyn ChannelRepository>) -> Self {
        Self { client, channels }
    }
}

#[async_trait]
impl ChannelDownloader for HttpChannelDownloader {
    async fn download_channels(&self, cancel: &CancellationToken) -> Result<(), DownloadError> {
        let what = "channels";
        let response = self
            .client
            .get(cancel, "")
            .await
            .map_err(|source| DownloadError::Client { what, source })?;
        let payload: SpacesResponse = response
            .json()
            .await
            .map_err(|source| DownloadError::Decode { what, source })?;

        let channels: Vec<Channel> = payload
            .spaces
            .into_iter()
            .map(|s| Channel::new(s.space, s.name.unwrap_or_default()))
            .collect();
        info!(channels = channels.len(), "channels downloaded");
        self.channels.store_channel_list(channels);
        Ok(())
    }

    fn close(&self) {
        self.client.close();
    }
}
