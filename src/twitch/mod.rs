//! Twitch side of the bridge.
//!
//! - `api`: Helix REST calls and emote images
//! - `client`: IRC reader and writer sessions
//! - `irc`: IRC line parsing and codec

pub mod api;
pub mod client;
pub mod irc;

pub use api::{EmoteCdn, HelixClient};
pub use client::TwitchChat;
