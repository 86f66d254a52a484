use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use itsm_reporting_core::User;

use super::{DownloadError, PAGE_SIZE, UserDownloader, query_page};
use crate::client::ItsmClient;
use crate::repository::{ChannelRepository, UserRepository};

#[derive(Debug, Deserialize)]
struct UserRecord {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    org_display_name: Option<String>,
}

impl UserRecord {
    fn into_user(self, channel_id: &str) -> User {
        User {
            channel_id: channel_id.to_string(),
            user_id: self.uuid.unwrap_or_default(),
            email: self.email.unwrap_or_default(),
            name: self.full_name.unwrap_or_default(),
            org_name: self.org_display_name.unwrap_or_default(),
            kind: self.kind.unwrap_or_default(),
        }
    }
}

fn user_query(bookmark: &str) -> serde_json::Value {
    json!({
        "fields": ["uuid", "full_name", "email", "type", "org_display_name"],
        "bookmark": bookmark,
    })
}

pub struct HttpUserDownloader {
    client: ItsmClient,
    channels: Arc<dyn ChannelRepository>,
    users: Arc<dyn UserRepository>,
}

impl HttpUserDownloader {
    pub fn new(
        client: ItsmClient,
        channels: Arc<dyn ChannelRepository>,
        users: Arc<dyn UserRepository>,
    ) -> Self {
        Self {
            client,
            channels,
            users,
        }
    }
}

#[async_trait]
impl UserDownloader for HttpUserDownloader {
    async fn download_users(&self, cancel: &CancellationToken) -> Result<(), DownloadError> {
        for channel in self.channels.get_channel_list() {
            let mut bookmark = String::new();
            let mut stored = 0usize;

            loop {
                let page = query_page::<UserRecord>(
                    &self.client,
                    cancel,
                    &channel.channel_id,
                    &user_query(&bookmark),
                    "users",
                )
                .await?;

                // Short page check counts raw results, before email filtering.
                let raw = page.result.len();
                let users: Vec<User> = page
                    .result
                    .into_iter()
                    .map(|r| r.into_user(&channel.channel_id))
                    .filter(User::has_email)
                    .collect();
                stored += users.len();
                self.users.add_user_list(users);

                debug!(channel_id = %channel.channel_id, raw, "user page stored");
                if raw < PAGE_SIZE {
                    break;
                }
                bookmark = page.bookmark.unwrap_or_default();
            }

            info!(channel_id = %channel.channel_id, users = stored, "users downloaded");
        }
        Ok(())
    }

    fn reset(&self) {
        self.users.truncate();
    }

    fn close(&self) {
        self.client.close();
    }
}
