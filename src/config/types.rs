//! Configuration type definitions.

use serde::Deserialize;

/// Default number of messages remembered per platform.
pub const DEFAULT_MESSAGE_CACHE_SIZE: usize = 100;

/// Default number of correlation entries kept before the oldest is dropped.
pub const DEFAULT_CORRELATION_CACHE_SIZE: usize = 200;

/// Default SQLite database holding provisioned emojis.
pub const DEFAULT_DATABASE_PATH: &str = "database.db";

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub discord: DiscordConfig,
    pub twitch: TwitchConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

/// Discord bot configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordConfig {
    /// ID of the bridged text channel.
    pub channel_id: String,
    pub bot_token: String,
    /// Maximum length of a relayed Discord message.
    #[serde(default)]
    pub char_limit: Option<usize>,
    /// Static emoji prefixed to every relayed message (Emoji strategy).
    #[serde(default)]
    pub emoji_id: Option<String>,
    #[serde(default)]
    pub emoji_name: Option<String>,
    /// Post relayed messages through a webhook under the author's identity.
    #[serde(default)]
    pub use_webhook: Option<bool>,
    #[serde(default)]
    pub webhook_id: Option<String>,
    #[serde(default)]
    pub webhook_token: Option<String>,
}

/// Twitch chat configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwitchConfig {
    /// Login of the bot account used to send messages.
    pub username: String,
    /// Channel (broadcaster login) to bridge.
    pub channel: String,
    pub client_id: String,
    /// User access token of the bot account (`chat:edit`, `moderator:manage:chat_messages`).
    pub access_token: String,
}

/// Relay engine tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    #[serde(default = "default_message_cache_size")]
    pub message_cache_size: usize,
    #[serde(default = "default_correlation_cache_size")]
    pub correlation_cache_size: usize,
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            message_cache_size: DEFAULT_MESSAGE_CACHE_SIZE,
            correlation_cache_size: DEFAULT_CORRELATION_CACHE_SIZE,
            database_path: DEFAULT_DATABASE_PATH.to_string(),
        }
    }
}

fn default_message_cache_size() -> usize {
    DEFAULT_MESSAGE_CACHE_SIZE
}

fn default_correlation_cache_size() -> usize {
    DEFAULT_CORRELATION_CACHE_SIZE
}

fn default_database_path() -> String {
    DEFAULT_DATABASE_PATH.to_string()
}

impl TwitchConfig {
    /// Channel login without a leading `#`, lowercased as IRC expects.
    pub fn channel_login(&self) -> String {
        self.channel.trim_start_matches('#').to_lowercase()
    }
}
