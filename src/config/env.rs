//! Environment variable overrides for configuration.
//!
//! Supports overriding config values with environment variables:
//! - `T2D_CONFIG` - Path to the configuration file
//! - `T2D_DISCORD_TOKEN` - Discord bot token
//! - `T2D_DISCORD_WEBHOOK_TOKEN` - Discord webhook token
//! - `T2D_TWITCH_TOKEN` - Twitch user access token
//! - `T2D_TWITCH_CLIENT_ID` - Twitch application client ID
//! - `T2D_DATABASE_PATH` - SQLite database for provisioned emojis

use std::env;

use crate::config::types::Config;

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "T2D";

/// Apply environment variable overrides to a config.
///
/// This allows secrets to be provided via environment variables
/// instead of the config file.
pub fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(token) = env::var(format!("{}_DISCORD_TOKEN", ENV_PREFIX)) {
        config.discord.bot_token = token;
    }
    if let Ok(token) = env::var(format!("{}_DISCORD_WEBHOOK_TOKEN", ENV_PREFIX)) {
        config.discord.webhook_token = Some(token);
    }

    if let Ok(token) = env::var(format!("{}_TWITCH_TOKEN", ENV_PREFIX)) {
        config.twitch.access_token = token;
    }
    if let Ok(client_id) = env::var(format!("{}_TWITCH_CLIENT_ID", ENV_PREFIX)) {
        config.twitch.client_id = client_id;
    }

    if let Ok(path) = env::var(format!("{}_DATABASE_PATH", ENV_PREFIX)) {
        config.bridge.database_path = path;
    }

    config
}

/// Check if any secret environment variables are set but empty.
///
/// Returns a list of variable names that are set but empty.
pub fn check_empty_env_vars() -> Vec<String> {
    let vars = [
        format!("{}_DISCORD_TOKEN", ENV_PREFIX),
        format!("{}_TWITCH_TOKEN", ENV_PREFIX),
    ];

    vars.into_iter()
        .filter(|var| env::var(var).map(|v| v.is_empty()).unwrap_or(false))
        .collect()
}

/// Get the config file path from environment or use default.
///
/// Checks `T2D_CONFIG` environment variable, otherwise returns "config.json".
pub fn get_config_path() -> String {
    env::var(format!("{}_CONFIG", ENV_PREFIX)).unwrap_or_else(|_| "config.json".to_string())
}
