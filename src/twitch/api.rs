//! Twitch Helix API and emote CDN clients.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::bridge::platform::{EmoteAssetProvider, UserDirectory};
use crate::common::error::{PlatformError, PlatformResult};
use crate::common::UserProfile;
use crate::config::types::TwitchConfig;
use crate::emotes::pipeline::emote_image_url;

const HELIX_BASE: &str = "https://api.twitch.tv/helix";
const VALIDATE_URL: &str = "https://id.twitch.tv/oauth2/validate";

/// Build the HTTP client shared by the Twitch and emoji clients.
pub fn build_http_client() -> PlatformResult<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .connect_timeout(Duration::from_secs(10))
        .build()?;
    Ok(client)
}

/// Access token without the `oauth:` prefix IRC uses.
pub fn bare_token(token: &str) -> &str {
    token.strip_prefix("oauth:").unwrap_or(token)
}

async fn check_status(
    endpoint: &str,
    response: reqwest::Response,
) -> PlatformResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PlatformError::Status {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        body,
    })
}

#[derive(Debug, Deserialize)]
struct ValidateResponse {
    user_id: String,
    login: String,
}

#[derive(Debug, Deserialize)]
struct HelixList<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct HelixUser {
    id: String,
    login: String,
    display_name: String,
    #[serde(default)]
    profile_image_url: String,
}

/// IDs needed to moderate the bridged channel.
#[derive(Debug, Clone)]
struct ModerationIds {
    broadcaster_id: String,
    moderator_id: String,
}

/// Helix client acting as the bot account.
pub struct HelixClient {
    http: reqwest::Client,
    client_id: String,
    access_token: String,
    channel_login: String,
    ids: OnceCell<ModerationIds>,
}

impl HelixClient {
    pub fn new(http: reqwest::Client, config: &TwitchConfig) -> Self {
        Self {
            http,
            client_id: config.client_id.clone(),
            access_token: bare_token(&config.access_token).to_string(),
            channel_login: config.channel_login(),
            ids: OnceCell::new(),
        }
    }

    /// User ID of the token owner.
    async fn validate_token(&self) -> PlatformResult<String> {
        let response = self
            .http
            .get(VALIDATE_URL)
            .header("Authorization", format!("OAuth {}", self.access_token))
            .send()
            .await?;
        let validated: ValidateResponse = check_status("oauth2/validate", response)
            .await?
            .json()
            .await?;
        debug!("Twitch token belongs to {}", validated.login);
        Ok(validated.user_id)
    }

    async fn get_user(&self, login: &str) -> PlatformResult<Option<HelixUser>> {
        let response = self
            .http
            .get(format!("{}/users", HELIX_BASE))
            .query(&[("login", login)])
            .header("Client-Id", &self.client_id)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let users: HelixList<HelixUser> = check_status("helix/users", response).await?.json().await?;
        Ok(users.data.into_iter().next())
    }

    async fn moderation_ids(&self) -> PlatformResult<&ModerationIds> {
        self.ids
            .get_or_try_init(|| async {
                let moderator_id = self.validate_token().await?;
                let broadcaster = self.get_user(&self.channel_login).await?.ok_or_else(|| {
                    PlatformError::Status {
                        endpoint: "helix/users".to_string(),
                        status: 404,
                        body: format!("channel {} not found", self.channel_login),
                    }
                })?;
                info!(
                    "Moderating #{} (broadcaster {}) as user {}",
                    broadcaster.login, broadcaster.id, moderator_id
                );
                Ok::<_, PlatformError>(ModerationIds {
                    broadcaster_id: broadcaster.id,
                    moderator_id,
                })
            })
            .await
    }

    /// Delete a chat message in the bridged channel.
    pub async fn delete_chat_message(&self, message_id: &str) -> PlatformResult<()> {
        let ids = self.moderation_ids().await?;
        let response = self
            .http
            .delete(format!("{}/moderation/chat", HELIX_BASE))
            .query(&[
                ("broadcaster_id", ids.broadcaster_id.as_str()),
                ("moderator_id", ids.moderator_id.as_str()),
                ("message_id", message_id),
            ])
            .header("Client-Id", &self.client_id)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        check_status("helix/moderation/chat", response).await?;
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for HelixClient {
    async fn lookup(&self, username: &str) -> PlatformResult<Option<UserProfile>> {
        Ok(self.get_user(username).await?.map(|user| UserProfile {
            username: user.login,
            display_name: user.display_name,
            avatar_url: Some(user.profile_image_url).filter(|url| !url.is_empty()),
        }))
    }
}

/// Emote images from the Twitch CDN.
pub struct EmoteCdn {
    http: reqwest::Client,
}

impl EmoteCdn {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl EmoteAssetProvider for EmoteCdn {
    async fn fetch_image(&self, emote_id: &str) -> PlatformResult<Vec<u8>> {
        let response = self.http.get(emote_image_url(emote_id)).send().await?;
        let bytes = check_status("emote cdn", response).await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}
