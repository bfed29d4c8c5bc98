//! Discord application emoji uploads.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serenity::http::Http;
use tokio::sync::OnceCell;
use tracing::info;

use crate::bridge::platform::{EmojiRegistry, UploadedEmoji};
use crate::common::error::{PlatformError, PlatformResult};

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

#[derive(Debug, Serialize)]
struct CreateEmoji<'a> {
    name: &'a str,
    image: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmojiResponse {
    id: String,
    name: String,
}

/// Creates application-owned emojis, usable by the bot in any guild.
pub struct ApplicationEmojiRegistry {
    http: reqwest::Client,
    discord: Arc<Http>,
    token: String,
    application_id: OnceCell<u64>,
}

impl ApplicationEmojiRegistry {
    pub fn new(http: reqwest::Client, discord: Arc<Http>, token: &str) -> Self {
        Self {
            http,
            discord,
            token: token.to_string(),
            application_id: OnceCell::new(),
        }
    }

    async fn application_id(&self) -> PlatformResult<u64> {
        let id = self
            .application_id
            .get_or_try_init(|| async {
                let info = self.discord.get_current_application_info().await?;
                info!("Uploading emojis to application {}", info.id);
                Ok::<_, PlatformError>(info.id.get())
            })
            .await?;
        Ok(*id)
    }
}

#[async_trait]
impl EmojiRegistry for ApplicationEmojiRegistry {
    async fn upload(&self, name: &str, image_data_uri: &str) -> PlatformResult<UploadedEmoji> {
        let application_id = self.application_id().await?;
        let response = self
            .http
            .post(format!("{}/applications/{}/emojis", DISCORD_API_BASE, application_id))
            .header("Authorization", format!("Bot {}", self.token))
            .json(&CreateEmoji {
                name,
                image: image_data_uri,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::Status {
                endpoint: "applications/emojis".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let emoji: EmojiResponse = response.json().await?;
        Ok(UploadedEmoji {
            id: emoji.id,
            name: emoji.name,
        })
    }
}
