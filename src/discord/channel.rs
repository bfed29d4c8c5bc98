//! Posting and deleting in the bridged Discord channel.

use std::sync::Arc;

use async_trait::async_trait;
use serenity::builder::{CreateAllowedMentions, CreateMessage, ExecuteWebhook};
use serenity::http::Http;
use serenity::model::id::{ChannelId, MessageId, WebhookId};
use serenity::model::webhook::Webhook;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::bridge::platform::PlatformChannel;
use crate::bridge::strategy::DiscordStrategy;
use crate::common::error::{PlatformError, PlatformResult};
use crate::common::{Identity, OutboundMessage};

/// Webhook credentials from configuration.
#[derive(Debug, Clone)]
struct WebhookCredentials {
    id: WebhookId,
    token: String,
}

pub struct DiscordChannel {
    http: Arc<Http>,
    channel_id: ChannelId,
    credentials: Option<WebhookCredentials>,
    webhook: OnceCell<Webhook>,
}

impl DiscordChannel {
    pub fn new(
        http: Arc<Http>,
        channel_id: ChannelId,
        strategy: &DiscordStrategy,
    ) -> PlatformResult<Self> {
        let credentials = match strategy {
            DiscordStrategy::Webhook {
                webhook_id,
                webhook_token,
            } => Some(WebhookCredentials {
                id: WebhookId::new(parse_id(webhook_id)?),
                token: webhook_token.clone(),
            }),
            _ => None,
        };

        Ok(Self {
            http,
            channel_id,
            credentials,
            webhook: OnceCell::new(),
        })
    }

    async fn webhook(&self, credentials: &WebhookCredentials) -> PlatformResult<&Webhook> {
        self.webhook
            .get_or_try_init(|| async {
                let webhook =
                    Webhook::from_id_with_token(&self.http, credentials.id, &credentials.token)
                        .await?;
                debug!("Resolved webhook {}", webhook.id);
                Ok::<_, PlatformError>(webhook)
            })
            .await
    }
}

/// Relayed chat never pings: `@everyone`, roles and users stay plain text.
fn relay_mentions() -> CreateAllowedMentions {
    CreateAllowedMentions::new()
}

/// Parse a Discord snowflake.
pub fn parse_id(id: &str) -> PlatformResult<u64> {
    match id.parse::<u64>() {
        Ok(value) if value != 0 => Ok(value),
        _ => Err(PlatformError::InvalidId { id: id.to_string() }),
    }
}

#[async_trait]
impl PlatformChannel for DiscordChannel {
    async fn send(&self, message: &OutboundMessage) -> PlatformResult<Option<String>> {
        let sent = match (&message.identity, &self.credentials) {
            (
                Identity::Impersonated {
                    username,
                    avatar_url,
                },
                Some(credentials),
            ) => {
                let webhook = self.webhook(credentials).await?;
                let mut builder = ExecuteWebhook::new()
                    .content(&message.content)
                    .username(username)
                    .allowed_mentions(relay_mentions());
                if let Some(avatar_url) = avatar_url {
                    builder = builder.avatar_url(avatar_url);
                }
                webhook.execute(&self.http, true, builder).await?
            }
            _ => {
                let builder = CreateMessage::new()
                    .content(&message.content)
                    .allowed_mentions(relay_mentions());
                Some(self.channel_id.send_message(&self.http, builder).await?)
            }
        };

        Ok(sent.map(|message| message.id.to_string()))
    }

    async fn delete_message(&self, id: &str) -> PlatformResult<()> {
        let message_id = MessageId::new(parse_id(id)?);

        if let Some(credentials) = &self.credentials {
            let webhook = self.webhook(credentials).await?;
            match webhook.delete_message(&self.http, None, message_id).await {
                Ok(()) => return Ok(()),
                // Not a webhook message: fall back to deleting as the bot.
                Err(e) => debug!("Webhook delete of {} failed: {}", id, e),
            }
        }

        self.channel_id.delete_message(&self.http, message_id).await?;
        Ok(())
    }
}
