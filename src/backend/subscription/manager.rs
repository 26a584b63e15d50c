/**
 * Subscription Reference Counting
 *
 * Many local consumers (connections) can be interested in the same channel,
 * but the substrate should only carry one subscription per channel per
 * server. `SubscriptionManager` counts interest per channel and calls out
 * to establish the remote subscription when the first consumer arrives and
 * to tear it down when the last one leaves.
 *
 * # Concurrency
 *
 * One async gate covers the whole manager, and the subscribe/unsubscribe
 * callback is awaited while it is held. That makes "count, mutate, call
 * out" a single step: two first-subscribes (or a first-subscribe racing a
 * last-unsubscribe) for the same channel can never overlap. The number of
 * channels a server manages is modest, so one gate is enough.
 *
 * # Failure
 *
 * If establishing the subscription fails, the channel is not recorded and
 * the error is returned; the next `add_subscription` retries from scratch.
 * If tearing it down fails, the channel is still forgotten locally and the
 * error is returned to the caller.
 */

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::Mutex;

use crate::backend::error::BackplaneError;

/// Live set of consumers registered on one channel
///
/// Receive handlers hold a clone and read it on every message; it is only
/// mutated under the manager's gate.
pub type ConsumerSet<C> = Arc<DashSet<C>>;

struct ChannelEntry<C, H> {
    consumers: ConsumerSet<C>,
    handle: H,
}

/// Reference-counts consumer interest per channel
///
/// `C` identifies a consumer (a connection id in the backplane), `H` is
/// whatever the subscribe callback returns to represent the remote
/// subscription; it is handed back to the unsubscribe callback.
pub struct SubscriptionManager<C, H> {
    channels: Mutex<HashMap<String, ChannelEntry<C, H>>>,
}

impl<C, H> Default for SubscriptionManager<C, H> {
    fn default() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }
}

impl<C, H> SubscriptionManager<C, H>
where
    C: Eq + Hash + Clone + Send + Sync + std::fmt::Debug,
    H: Send,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `consumer` on `channel`
    ///
    /// If it is the first consumer, `on_first_subscribe` is awaited with the
    /// channel name and the live consumer set before this returns.
    ///
    /// # Errors
    ///
    /// Returns the callback's error; the channel is then left unregistered.
    pub async fn add_subscription<F, Fut>(
        &self,
        channel: &str,
        consumer: C,
        on_first_subscribe: F,
    ) -> Result<(), BackplaneError>
    where
        F: FnOnce(String, ConsumerSet<C>) -> Fut,
        Fut: Future<Output = Result<H, BackplaneError>>,
    {
        let mut channels = self.channels.lock().await;

        if let Some(entry) = channels.get(channel) {
            entry.consumers.insert(consumer);
            return Ok(());
        }

        let consumers: ConsumerSet<C> = Arc::new(DashSet::new());
        consumers.insert(consumer.clone());

        match on_first_subscribe(channel.to_string(), consumers.clone()).await {
            Ok(handle) => {
                tracing::info!("[Subscriptions] Subscribed to '{}' for {:?}", channel, consumer);
                channels.insert(channel.to_string(), ChannelEntry { consumers, handle });
                Ok(())
            }
            Err(e) => {
                tracing::warn!("[Subscriptions] Subscribing to '{}' failed: {}", channel, e);
                Err(e)
            }
        }
    }

    /// Deregister `consumer` from `channel`
    ///
    /// If it was the last consumer, the channel is forgotten and
    /// `on_last_unsubscribe` is awaited with the channel name and the handle
    /// returned by the subscribe callback. Unknown channels and consumers are
    /// ignored.
    pub async fn remove_subscription<F, Fut>(
        &self,
        channel: &str,
        consumer: &C,
        on_last_unsubscribe: F,
    ) -> Result<(), BackplaneError>
    where
        F: FnOnce(String, H) -> Fut,
        Fut: Future<Output = Result<(), BackplaneError>>,
    {
        let mut channels = self.channels.lock().await;

        let Some(entry) = channels.get(channel) else {
            return Ok(());
        };
        entry.consumers.remove(consumer);
        if !entry.consumers.is_empty() {
            return Ok(());
        }

        let Some(entry) = channels.remove(channel) else {
            return Ok(());
        };
        tracing::info!("[Subscriptions] Last consumer left '{}', unsubscribing", channel);
        on_last_unsubscribe(channel.to_string(), entry.handle).await
    }

    pub async fn is_subscribed(&self, channel: &str) -> bool {
        self.channels.lock().await.contains_key(channel)
    }

    /// Snapshot of the consumers registered on `channel`
    pub async fn consumers(&self, channel: &str) -> Vec<C> {
        self.channels
            .lock()
            .await
            .get(channel)
            .map(|entry| entry.consumers.iter().map(|c| c.key().clone()).collect())
            .unwrap_or_default()
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.lock().await.len()
    }

    /// Forget every channel and return their handles for teardown
    pub async fn drain(&self) -> Vec<(String, H)> {
        self.channels
            .lock()
            .await
            .drain()
            .map(|(channel, entry)| (channel, entry.handle))
            .collect()
    }
}
