// crates/core/src/bridge.rs
//! In-process fan-out of channel messages to live subscribers.
//!
//! One broadcast sender per channel, created on first subscribe and dropped
//! when its last subscriber leaves or the registry closes it. Delivery
//! is best-effort: no replay for late subscribers, and a subscriber that falls
//! more than `capacity` messages behind skips what it missed.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tracing::{debug, warn};

use crate::message::ChannelMessage;

#[derive(Debug, Clone, Copy)]
pub struct BridgeConfig {
    /// Per-channel buffer before slow subscribers start skipping messages.
    pub capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

/// Shared channel bridge. Cheap to clone.
#[derive(Clone)]
pub struct ChannelBridge {
    channels: Arc<DashMap<String, broadcast::Sender<ChannelMessage>>>,
    capacity: usize,
}

impl ChannelBridge {
    pub fn new() -> Self {
        Self::with_config(BridgeConfig::default())
    }

    pub fn with_config(config: BridgeConfig) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: config.capacity.max(1),
        }
    }

    /// Start receiving messages published to `channel` from now on.
    pub fn subscribe(&self, channel: &str) -> Subscription {
        let rx = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        debug!(channel, "subscribed");
        Subscription {
            channel: channel.to_string(),
            rx: Some(rx),
            bridge: self.clone(),
        }
    }

    /// Deliver `message` to every current subscriber of its channel.
    /// Returns how many subscribers it reached; zero is not an error.
    ///
    /// Payloads are never interpreted; a message shaped like a removal
    /// notice is delivered like any other and leaves the channel open.
    pub fn publish(&self, message: ChannelMessage) -> usize {
        match self.channels.get(&message.channel) {
            Some(tx) => tx.send(message).unwrap_or(0),
            None => 0,
        }
    }

    /// End `channel` for its current subscribers. They drain what is
    /// buffered, then see end-of-stream. Only the registry calls this, once
    /// the job behind the channel has been removed.
    pub fn close(&self, channel: &str) -> bool {
        let closed = self.channels.remove(channel).is_some();
        if closed {
            debug!(channel, "channel closed");
        }
        closed
    }

    /// Number of channels with at least one live subscriber.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Live subscribers across every channel.
    pub fn total_subscribers(&self) -> usize {
        self.channels.iter().map(|tx| tx.receiver_count()).sum()
    }

    fn prune(&self, channel: &str) {
        self.channels
            .remove_if(channel, |_, tx| tx.receiver_count() == 0);
    }
}

impl Default for ChannelBridge {
    fn default() -> Self {
        Self::new()
    }
}

/// A live view of one channel. Dropping it unsubscribes.
pub struct Subscription {
    channel: String,
    rx: Option<broadcast::Receiver<ChannelMessage>>,
    bridge: ChannelBridge,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_active(&self) -> bool {
        self.rx.is_some()
    }

    /// Wait for the next message. `None` once the channel has ended or the
    /// subscription was cancelled.
    pub async fn next(&mut self) -> Option<ChannelMessage> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(channel = %self.channel, skipped, "subscriber lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.unsubscribe();
                    return None;
                }
            }
        }
    }

    /// Stop receiving. Safe to call repeatedly or after the channel ended.
    pub fn unsubscribe(&mut self) {
        if let Some(rx) = self.rx.take() {
            drop(rx);
            self.bridge.prune(&self.channel);
            debug!(channel = %self.channel, "unsubscribed");
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = ChannelMessage> {
        async_stream::stream! {
            let mut subscription = self;
            while let Some(message) = subscription.next().await {
                yield message;
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
