//! Discord side of the bridge.
//!
//! - `channel`: posting and deleting, as the bot or through a webhook
//! - `client`: gateway connection and inbound events
//! - `emoji`: application emoji uploads for mirrored Twitch emotes
//! - `resolver`: message text cleanup for Twitch

pub mod channel;
pub mod client;
pub mod emoji;
pub mod resolver;

pub use channel::DiscordChannel;
pub use client::{DiscordBot, DiscordSettings};
pub use emoji::ApplicationEmojiRegistry;
