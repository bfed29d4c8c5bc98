//! Outbound message rendering.
//!
//! Discord-bound messages are rendered by a [`DiscordStrategy`] selected once
//! from configuration. Twitch-bound messages always use the `[D] user: text`
//! form. Both renderings can be parsed back into `(username, text)` so the
//! bridge can recognise its own echoes.

use crate::common::error::ConfigError;
use crate::common::{Identity, OutboundMessage};
use crate::config::types::DiscordConfig;

/// Prefix marking messages relayed from Discord into Twitch chat.
pub const TWITCH_RELAY_PREFIX: &str = "[D] ";

/// Twitch rejects chat messages of 500 characters or more.
pub const MAX_TWITCH_MESSAGE_LENGTH: usize = 500;

/// How relayed messages are posted to Discord.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscordStrategy {
    /// Post through a webhook under the author's name and avatar.
    Webhook {
        webhook_id: String,
        webhook_token: String,
    },
    /// Post as the bot with a static emoji icon in front.
    Emoji {
        emoji_id: String,
        emoji_name: String,
    },
    /// Post as the bot with a bold username.
    Regular,
}

impl DiscordStrategy {
    /// Pick the strategy from configuration.
    ///
    /// Enabling the webhook without both its ID and token is fatal.
    pub fn from_config(config: &DiscordConfig) -> Result<Self, ConfigError> {
        if config.use_webhook.unwrap_or(false) {
            let webhook_id = non_empty(&config.webhook_id).ok_or_else(|| ConfigError::MissingField {
                field: "discord.webhookId (required when discord.useWebhook is true)".to_string(),
            })?;
            let webhook_token =
                non_empty(&config.webhook_token).ok_or_else(|| ConfigError::MissingField {
                    field: "discord.webhookToken (required when discord.useWebhook is true)"
                        .to_string(),
                })?;
            return Ok(DiscordStrategy::Webhook {
                webhook_id,
                webhook_token,
            });
        }

        match (non_empty(&config.emoji_id), non_empty(&config.emoji_name)) {
            (Some(emoji_id), Some(emoji_name)) => Ok(DiscordStrategy::Emoji {
                emoji_id,
                emoji_name,
            }),
            _ => Ok(DiscordStrategy::Regular),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DiscordStrategy::Webhook { .. } => "Webhook",
            DiscordStrategy::Emoji { .. } => "Emoji",
            DiscordStrategy::Regular => "Regular",
        }
    }

    /// Whether rendering needs the author's avatar.
    pub fn uses_avatar(&self) -> bool {
        matches!(self, DiscordStrategy::Webhook { .. })
    }

    /// Render a Twitch message for Discord.
    pub fn render(&self, username: &str, text: &str, avatar_url: Option<&str>) -> OutboundMessage {
        match self {
            DiscordStrategy::Webhook { .. } => OutboundMessage {
                identity: Identity::Impersonated {
                    username: username.to_string(),
                    avatar_url: avatar_url.map(str::to_string),
                },
                content: text.to_string(),
            },
            DiscordStrategy::Emoji {
                emoji_id,
                emoji_name,
            } => OutboundMessage::as_bot(format!(
                "<:{}:{}> **{}**: {}",
                emoji_name, emoji_id, username, text
            )),
            DiscordStrategy::Regular => {
                OutboundMessage::as_bot(format!("**{}**: {}", username, text))
            }
        }
    }

    /// Recover `(username, text)` from a message the bridge posted to Discord.
    ///
    /// `author_name` is the name the message was posted under, which is the
    /// original author for webhook posts.
    pub fn parse_echo(&self, author_name: &str, content: &str) -> Option<(String, String)> {
        match self {
            DiscordStrategy::Webhook { .. } => Some((author_name.to_string(), content.to_string())),
            DiscordStrategy::Emoji {
                emoji_id,
                emoji_name,
            } => {
                let prefix = format!("<:{}:{}> ", emoji_name, emoji_id);
                parse_bold_user(content.strip_prefix(&prefix)?)
            }
            DiscordStrategy::Regular => parse_bold_user(content),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

fn parse_bold_user(content: &str) -> Option<(String, String)> {
    let rest = content.strip_prefix("**")?;
    let (username, text) = rest.split_once("**: ")?;
    Some((username.to_string(), text.to_string()))
}

/// Truncate to at most `max_chars` characters, respecting char boundaries.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Render a Discord message for Twitch chat.
///
/// IRC messages are single lines, so line breaks become spaces.
pub fn render_for_twitch(username: &str, text: &str) -> OutboundMessage {
    let text = text.replace(['\r', '\n'], " ");
    let full = format!("{}{}: {}", TWITCH_RELAY_PREFIX, username, text);
    OutboundMessage::as_bot(truncate_chars(&full, MAX_TWITCH_MESSAGE_LENGTH - 1))
}

/// Recover `(username, text)` from a message the bridge posted to Twitch.
pub fn parse_twitch_echo(content: &str) -> Option<(String, String)> {
    let rest = content.strip_prefix(TWITCH_RELAY_PREFIX)?;
    let (username, text) = rest.split_once(": ")?;
    Some((username.to_string(), text.to_string()))
}
