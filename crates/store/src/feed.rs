// crates/store/src/feed.rs
//! Forward Redis pub/sub traffic into the local [`ChannelBridge`].
//!
//! One pattern subscription covers every job channel, so relays in this
//! process see messages published by any producer or any other instance.
//! The same subscription carries the registry's control channel; a close
//! announced there is honoured only once the job's record is gone.

use std::time::Duration;

use evalhub_core::{ChannelBridge, ChannelMessage, KeyLayout, RegistryError};
use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry_error;

pub struct RedisFeed {
    client: Client,
    layout: KeyLayout,
    pattern: String,
    control: String,
    bridge: ChannelBridge,
    max_reconnect_delay: Duration,
}

impl RedisFeed {
    /// Subscribe to every channel under the layout's channel prefix.
    pub fn new(client: Client, layout: KeyLayout, bridge: ChannelBridge) -> Self {
        Self {
            client,
            pattern: format!("{}*", layout.channel_prefix()),
            control: layout.control_channel(),
            layout,
            bridge,
            max_reconnect_delay: Duration::from_secs(30),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Run until `shutdown` fires, reconnecting with exponential backoff.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(pattern = %self.pattern, "redis feed starting");
        let mut backoff = Duration::from_secs(1);

        loop {
            match self.forward(&shutdown).await {
                Ok(()) => {
                    info!("redis feed stopped");
                    return;
                }
                Err(e) => {
                    warn!(backoff_secs = backoff.as_secs(), "redis feed interrupted: {e}");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.max_reconnect_delay);
        }
    }

    /// Returns `Ok` only on shutdown.
    async fn forward(&self, shutdown: &CancellationToken) -> Result<(), RegistryError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(registry_error)?;
        pubsub
            .psubscribe(&self.pattern)
            .await
            .map_err(registry_error)?;
        let mut messages = pubsub.on_message();
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(registry_error)?;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                next = messages.next() => {
                    let Some(msg) = next else {
                        return Err(RegistryError::Unavailable("pub/sub stream ended".into()));
                    };
                    let payload: String = match msg.get_payload() {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(channel = msg.get_channel_name(), "dropping undecodable payload: {e}");
                            continue;
                        }
                    };
                    let channel = msg.get_channel_name().to_string();
                    if channel == self.control {
                        self.close_if_removed(&mut conn, &payload).await?;
                        continue;
                    }
                    let delivered = self.bridge.publish(ChannelMessage::new(channel.clone(), payload));
                    debug!(channel = %channel, delivered, "relayed shared-store message");
                }
            }
        }
    }

    /// Close `channel` locally if the registry no longer holds its job.
    async fn close_if_removed(
        &self,
        conn: &mut MultiplexedConnection,
        channel: &str,
    ) -> Result<bool, RegistryError> {
        let Some(job) = self.layout.job_for_channel(channel) else {
            warn!(channel, "close announced for a channel outside this layout");
            return Ok(false);
        };
        let exists: bool = conn
            .exists(self.layout.meta_key(&job))
            .await
            .map_err(registry_error)?;
        if exists {
            warn!(channel, "ignoring close for a job that is still registered");
            return Ok(false);
        }
        Ok(self.bridge.close(channel))
    }
}
