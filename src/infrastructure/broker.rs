//! Publish/subscribe bridge over the message broker.
//!
//! The pipeline only ever touches the broker through `publish` and
//! `subscribe` on named channels. Delivery is at-most-once with no
//! ordering guarantee across subscribers and no acknowledgment or
//! redelivery semantics; durability and idempotency live in the stores
//! and the execution worker, not here.
//!
//! This in-process implementation backs each channel with a broadcast
//! fan-out. A deployment against an external broker replaces this type
//! while keeping the same two operations.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Channel carrying order command payloads.
pub const COMMAND_CHANNEL: &str = "commands:order:submit";

/// Channel carrying order event payloads.
pub const EVENT_CHANNEL: &str = "events:order:status";

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Publish to '{channel}' failed: {reason}")]
    PublishFailed { channel: String, reason: String },
}

/// Broker bridge with named channels carrying JSON string payloads.
#[derive(Debug)]
pub struct Broker {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl Broker {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().expect("broker channel map poisoned");
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Publish a payload to every current subscriber of the channel.
    ///
    /// A channel with no subscribers drops the payload; that is the
    /// broker contract, not an error worth failing the caller over.
    pub fn publish(&self, channel: &str, payload: String) -> Result<(), BrokerError> {
        match self.sender(channel).send(payload) {
            Ok(subscriber_count) => {
                debug!(channel, subscriber_count, "Published message");
                Ok(())
            }
            Err(_) => {
                warn!(channel, "No subscribers on channel, message dropped");
                Ok(())
            }
        }
    }

    /// Subscribe to a channel. Only messages published after this call
    /// are delivered.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        debug!(channel, "New subscriber");
        self.sender(channel).subscribe()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}
