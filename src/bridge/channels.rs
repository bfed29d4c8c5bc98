//! Bridge channel management.
//!
//! Both platform adapters push their inbound events into one channel drained
//! by the relay loop, and watch a shared flag for shutdown.

use tokio::sync::{mpsc, watch};

use crate::common::BridgeEvent;

/// Channels handed to each platform adapter.
#[derive(Clone)]
pub struct AdapterChannels {
    /// Sender for inbound platform events.
    pub event_tx: mpsc::UnboundedSender<BridgeEvent>,
    /// Receiver for the shutdown signal.
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Control channels for shutdown coordination.
pub struct ControlChannels {
    /// Sender to trigger shutdown.
    pub shutdown_tx: watch::Sender<bool>,
}

/// Bundle of all channels created for one bridge instance.
pub struct ChannelBundle {
    pub adapters: AdapterChannels,
    /// Receiver drained by the relay loop.
    pub event_rx: mpsc::UnboundedReceiver<BridgeEvent>,
    pub control: ControlChannels,
}

impl ChannelBundle {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            adapters: AdapterChannels {
                event_tx,
                shutdown_rx,
            },
            event_rx,
            control: ControlChannels { shutdown_tx },
        }
    }
}

impl Default for ChannelBundle {
    fn default() -> Self {
        Self::new()
    }
}
