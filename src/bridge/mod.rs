//! Relay engine shared by both directions of the bridge.
//!
//! ## Module Structure
//!
//! - `cache`: bounded per-platform history of observed messages
//! - `channels`: communication channel structures
//! - `correlation`: links between messages and their mirrors
//! - `orchestrator`: the relay controller (`RelayController`)
//! - `platform`: traits implemented by the platform adapters
//! - `strategy`: outbound rendering and echo parsing

pub mod cache;
pub mod channels;
pub mod correlation;
pub mod orchestrator;
pub mod platform;
pub mod strategy;

pub use channels::ChannelBundle;
pub use orchestrator::{PlatformHandles, RelayController};
