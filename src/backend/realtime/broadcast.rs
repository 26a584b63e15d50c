/**
 * In-Process Pub/Sub
 *
 * `MemoryPubSub` implements the `PubSub` substrate on top of
 * `tokio::sync::broadcast`, one broadcast channel per named channel. Several
 * backplane nodes sharing one `MemoryPubSub` behave like several servers
 * sharing one Redis instance, which is what the tests and the demo binary
 * rely on.
 *
 * # Delivery
 *
 * Each subscription owns a broadcast receiver drained by its own task, so
 * one slow handler never stalls another. If a handler falls more than
 * `CHANNEL_CAPACITY` messages behind, the skipped messages are lost and a
 * warning is logged, the same as a Redis client dropping on overflow.
 */

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::error::BackplaneError;
use crate::backend::realtime::bus::{MessageHandler, PubSub, SubscriptionHandle};

/// Buffered messages per channel before slow subscribers start lagging
pub const CHANNEL_CAPACITY: usize = 1024;

struct ActiveSubscription {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// Broadcast-channel backed message bus
#[derive(Default)]
pub struct MemoryPubSub {
    channels: DashMap<String, broadcast::Sender<Bytes>>,
    subscriptions: DashMap<u64, ActiveSubscription>,
    next_id: AtomicU64,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Names of channels with at least one live subscription
    pub fn active_channels(&self) -> Vec<String> {
        self.channels
            .iter()
            .filter(|entry| entry.value().receiver_count() > 0)
            .map(|entry| entry.key().clone())
            .collect()
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<usize, BackplaneError> {
        let Some(sender) = self.channels.get(channel) else {
            tracing::trace!("[PubSub] No subscribers on '{}'", channel);
            return Ok(0);
        };
        // send only fails when there are no receivers
        Ok(sender.send(payload).unwrap_or(0))
    }

    async fn subscribe(
        &self,
        channel: &str,
        handler: MessageHandler,
    ) -> Result<SubscriptionHandle, BackplaneError> {
        let mut receiver = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stop = CancellationToken::new();
        let token = stop.clone();
        let name = channel.to_string();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = receiver.recv() => match received {
                        Ok(payload) => handler(payload).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!("[PubSub] Subscriber on '{}' lagged, {} messages dropped", name, skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        self.subscriptions.insert(id, ActiveSubscription { stop, task });
        tracing::debug!("[PubSub] Subscription {} on '{}'", id, channel);

        Ok(SubscriptionHandle {
            id,
            channel: channel.to_string(),
        })
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), BackplaneError> {
        let Some((_, subscription)) = self.subscriptions.remove(&handle.id) else {
            return Err(BackplaneError::subscription(
                handle.channel,
                format!("unknown subscription {}", handle.id),
            ));
        };

        subscription.stop.cancel();
        // Waiting for the task drops its receiver before we return
        if let Err(e) = subscription.task.await {
            tracing::warn!("[PubSub] Subscription task for '{}' ended abnormally: {}", handle.channel, e);
        }

        self.channels
            .remove_if(&handle.channel, |_, sender| sender.receiver_count() == 0);
        tracing::debug!("[PubSub] Unsubscribed {} from '{}'", handle.id, handle.channel);
        Ok(())
    }
}
