//! Configuration validation.
//!
//! Validates configuration values and provides helpful error messages.

use crate::bridge::strategy::DiscordStrategy;
use crate::common::error::ConfigError;
use crate::config::types::Config;

/// Validate a configuration and return detailed errors.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    // Discord
    if config.discord.bot_token.is_empty() {
        errors.push("discord.botToken is required".to_string());
    }
    if config.discord.channel_id.is_empty() {
        errors.push("discord.channelId is required".to_string());
    } else if config.discord.channel_id.parse::<u64>().is_err() {
        errors.push(format!(
            "discord.channelId must be a numeric channel ID (got '{}')",
            config.discord.channel_id
        ));
    }
    if let Some(ref webhook_id) = config.discord.webhook_id {
        if webhook_id.parse::<u64>().is_err() {
            errors.push(format!(
                "discord.webhookId must be a numeric webhook ID (got '{}')",
                webhook_id
            ));
        }
    }
    if config.discord.char_limit == Some(0) {
        errors.push("discord.charLimit must be greater than zero".to_string());
    }
    if let Err(e) = DiscordStrategy::from_config(&config.discord) {
        errors.push(e.to_string());
    }

    // Twitch
    if config.twitch.username.is_empty() {
        errors.push("twitch.username is required".to_string());
    }
    if config.twitch.channel_login().is_empty() {
        errors.push("twitch.channel is required".to_string());
    }
    if config.twitch.client_id.is_empty() {
        errors.push("twitch.clientId is required".to_string());
    }
    if config.twitch.access_token.is_empty() {
        errors.push("twitch.accessToken is required".to_string());
    }

    // Bridge
    if config.bridge.message_cache_size == 0 {
        errors.push("bridge.messageCacheSize must be greater than zero".to_string());
    }
    if config.bridge.correlation_cache_size == 0 {
        errors.push("bridge.correlationCacheSize must be greater than zero".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            message: errors.join("\n"),
        })
    }
}
