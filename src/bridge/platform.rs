//! Contracts between the relay engine and the platform adapters.
//!
//! Inbound traffic reaches the engine as [`BridgeEvent`](crate::common::BridgeEvent)
//! values; outbound calls go through these traits so the engine can be driven
//! by the real Discord/Twitch adapters or by in-process fakes.

use async_trait::async_trait;

use crate::common::error::PlatformResult;
use crate::common::{OutboundMessage, UserProfile};

/// The bridged channel on one platform.
#[async_trait]
pub trait PlatformChannel: Send + Sync {
    /// Post a rendered message.
    ///
    /// Returns the ID of the created message when the platform reports it.
    async fn send(&self, message: &OutboundMessage) -> PlatformResult<Option<String>>;

    /// Delete a message from the channel.
    async fn delete_message(&self, id: &str) -> PlatformResult<()>;
}

/// Profile lookup for source-platform users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn lookup(&self, username: &str) -> PlatformResult<Option<UserProfile>>;
}

/// Source of emote images.
#[async_trait]
pub trait EmoteAssetProvider: Send + Sync {
    async fn fetch_image(&self, emote_id: &str) -> PlatformResult<Vec<u8>>;
}

/// A custom emoji created on the target platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedEmoji {
    pub id: String,
    pub name: String,
}

/// Target-platform custom emoji registry.
#[async_trait]
pub trait EmojiRegistry: Send + Sync {
    /// Create an emoji from a `data:` URI holding the base64 image.
    async fn upload(&self, name: &str, image_data_uri: &str) -> PlatformResult<UploadedEmoji>;
}
