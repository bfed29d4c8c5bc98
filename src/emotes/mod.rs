//! Twitch emote mirroring.
//!
//! - `pipeline`: extraction, background provisioning and substitution
//! - `store`: SQLite persistence and the in-memory emote cache

pub mod pipeline;
pub mod store;

pub use pipeline::{extract_emotes, EmoteTranslator};
pub use store::SqliteEmoteStore;
