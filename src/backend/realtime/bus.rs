/**
 * Pub/Sub Substrate Abstraction
 *
 * The backplane only needs three things from the shared message bus:
 * publish bytes to a named channel, subscribe a handler to a channel, and
 * drop that subscription again. Anything that can do those (a Redis client,
 * an in-process broadcast hub) plugs in behind `PubSub`.
 *
 * # Delivery Contract
 *
 * - A handler sees the messages of its channel in publish order and is
 *   awaited one message at a time.
 * - Messages published after `subscribe` returns are delivered to it.
 * - After `unsubscribe` returns the handler is not called again.
 * - `publish` reports how many subscriptions the message reached, across
 *   every server on the bus.
 */

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::BoxFuture;

use crate::backend::error::BackplaneError;

/// Callback invoked for each message received on a subscribed channel
pub type MessageHandler = Arc<dyn Fn(Bytes) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a [`MessageHandler`]
pub fn handler<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    Arc::new(move |payload| Box::pin(f(payload)))
}

/// Identifies one live subscription returned by [`PubSub::subscribe`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub id: u64,
    pub channel: String,
}

/// Shared message bus used to reach every server in the deployment
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publish `payload` on `channel`
    ///
    /// Returns the number of subscriptions that received it.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<usize, BackplaneError>;

    /// Start delivering messages on `channel` to `handler`
    async fn subscribe(
        &self,
        channel: &str,
        handler: MessageHandler,
    ) -> Result<SubscriptionHandle, BackplaneError>;

    /// Stop a subscription created by `subscribe`
    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), BackplaneError>;
}
