//! Canonical message types for bridge communication.
//!
//! This module defines the single source of truth for the values that flow
//! between the platform adapters and the relay controller.

use std::fmt;

use chrono::{DateTime, Utc};

/// One of the two bridged chat platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Discord,
    Twitch,
}

impl Platform {
    /// The platform on the other side of the bridge.
    pub fn other(self) -> Self {
        match self {
            Platform::Discord => Platform::Twitch,
            Platform::Twitch => Platform::Discord,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Discord => f.write_str("Discord"),
            Platform::Twitch => f.write_str("Twitch"),
        }
    }
}

/// A chat message observed on one of the platforms.
///
/// Immutable once observed. `text` is the inbound text after Discord markup
/// cleanup; Twitch emote substitution and truncation happen when rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub platform: Platform,
    pub channel_id: String,
    pub author_id: String,
    /// Account name used for lookups (Twitch login, Discord username).
    pub author_login: String,
    /// Name shown on the other side.
    pub username: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Posted by the bridge itself (bot account or webhook).
    pub self_originated: bool,
}

/// Cached Twitch profile used for webhook identities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Who a relayed message is posted as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// The bridge's own bot account.
    Bot,
    /// A webhook identity carrying the source author's name and avatar.
    Impersonated {
        username: String,
        avatar_url: Option<String>,
    },
}

/// A fully rendered message ready to be posted on the target platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub identity: Identity,
    pub content: String,
}

impl OutboundMessage {
    /// A message posted under the bot's own account.
    pub fn as_bot(content: impl Into<String>) -> Self {
        Self {
            identity: Identity::Bot,
            content: content.into(),
        }
    }
}

/// Character range of an emote inside a Twitch message (`end` inclusive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmoteRange {
    pub emote_id: String,
    pub start: usize,
    pub end: usize,
}

/// An inbound platform event delivered to the relay loop.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// A message was posted on the bridged channel.
    MessageCreate {
        message: ChatMessage,
        /// Emote positions supplied by Twitch alongside the text.
        emotes: Vec<EmoteRange>,
    },
    /// A message was deleted on the bridged channel.
    MessageDelete { platform: Platform, id: String },
}
