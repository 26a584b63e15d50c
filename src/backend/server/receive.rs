/**
 * Backplane Receive Paths
 *
 * Handlers for every channel a node subscribes to. They run on the pub/sub
 * substrate's delivery tasks, one message at a time per channel.
 *
 * Malformed envelopes only affect themselves: the decode error is logged
 * and the message dropped, and the subscription keeps running.
 *
 * # Channels
 *
 * - connection / group / user - deliver to the channel's local consumers
 * - all - deliver to every local connection
 * - group management - apply commands for local connections, then ack
 * - ack - resolve the matching pending group command
 * - return results - resolve the matching pending client result
 */

use std::sync::{Arc, Weak};

use bytes::Bytes;
use tokio::time::Instant;

use crate::backend::error::BackplaneError;
use crate::backend::protocol::{
    decode_ack, decode_completion, decode_group_command, decode_invocation, encode_ack, Ack,
    BackplaneInvocation, GroupAction,
};
use crate::backend::realtime::{handler, MessageHandler, SubscriptionHandle};
use crate::backend::server::node::{NodeInner, ReturnRoute};
use crate::backend::subscription::ConsumerSet;

/// Build a handler that runs `on_message` against the node while it exists
pub(crate) fn node_handler<F>(node: Weak<NodeInner>, on_message: F) -> MessageHandler
where
    F: Fn(Arc<NodeInner>, Bytes) -> futures_util::future::BoxFuture<'static, ()> + Send + Sync + 'static,
{
    let on_message = Arc::new(on_message);
    handler(move |payload| {
        let node = node.clone();
        let on_message = on_message.clone();
        async move {
            if let Some(node) = node.upgrade() {
                on_message(node, payload).await;
            }
        }
    })
}

impl NodeInner {
    /// Register `connection_id` on a connection, user or group channel
    pub(crate) async fn subscribe_consumer(
        &self,
        channel: &str,
        connection_id: &str,
    ) -> Result<(), BackplaneError> {
        self.subscriptions
            .add_subscription(channel, connection_id.to_string(), |channel, consumers| {
                let node = self.me.clone();
                let on_message = node_handler(node, move |node, payload| {
                    let consumers = consumers.clone();
                    Box::pin(async move { node.on_targeted_invocation(&consumers, payload) })
                });
                async move { self.bus.subscribe(&channel, on_message).await }
            })
            .await
    }

    pub(crate) async fn unsubscribe_consumer(
        &self,
        channel: &str,
        connection_id: &str,
    ) -> Result<(), BackplaneError> {
        self.subscriptions
            .remove_subscription(channel, &connection_id.to_string(), |_, handle| {
                self.bus.unsubscribe(handle)
            })
            .await
    }

    /// Subscribe the all, group-management, ack and return-results channels
    pub(crate) async fn subscribe_internal(&self) -> Result<(), BackplaneError> {
        let server_name = &self.config.server_name;
        let subscriptions: [(String, MessageHandler); 4] = [
            (
                self.channels.all(),
                node_handler(self.me.clone(), |node, payload| {
                    Box::pin(async move { node.on_broadcast_invocation(payload) })
                }),
            ),
            (
                self.channels.group_management(),
                node_handler(self.me.clone(), |node, payload| {
                    Box::pin(async move { node.on_group_command(payload).await })
                }),
            ),
            (
                self.channels.ack(server_name),
                node_handler(self.me.clone(), |node, payload| {
                    Box::pin(async move { node.on_ack(payload) })
                }),
            ),
            (
                self.channels.return_results(server_name),
                node_handler(self.me.clone(), |node, payload| {
                    Box::pin(async move { node.on_completion(payload) })
                }),
            ),
        ];

        for (channel, on_message) in subscriptions {
            match self.bus.subscribe(&channel, on_message).await {
                Ok(handle) => self.internal.lock().push(handle),
                Err(e) => {
                    tracing::error!("[Backplane] Failed to subscribe to '{}': {}", channel, e);
                    self.unsubscribe_internal().await;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    pub(crate) async fn unsubscribe_internal(&self) {
        let handles: Vec<SubscriptionHandle> = std::mem::take(&mut *self.internal.lock());
        for handle in handles {
            let channel = handle.channel.clone();
            if let Err(e) = self.bus.unsubscribe(handle).await {
                tracing::warn!("[Backplane] Unsubscribing '{}' failed: {}", channel, e);
            }
        }
    }

    fn decode_invocation_or_log(&self, payload: Bytes) -> Option<BackplaneInvocation> {
        match decode_invocation(payload) {
            Ok(invocation) => Some(invocation),
            Err(e) => {
                tracing::warn!("[Backplane] Dropping malformed invocation: {}", e);
                None
            }
        }
    }

    fn on_targeted_invocation(&self, consumers: &ConsumerSet<String>, payload: Bytes) {
        let Some(invocation) = self.decode_invocation_or_log(payload) else {
            return;
        };
        let targets: Vec<String> = consumers.iter().map(|id| id.key().clone()).collect();
        self.deliver(&invocation, targets);
    }

    fn on_broadcast_invocation(&self, payload: Bytes) {
        let Some(invocation) = self.decode_invocation_or_log(payload) else {
            return;
        };
        self.deliver(&invocation, self.connections.ids());
    }

    /// Write the matching payload to each target connection
    ///
    /// Excluded connections, connections that are gone, and connections
    /// whose protocol has no payload in the envelope are skipped.
    fn deliver(&self, invocation: &BackplaneInvocation, targets: Vec<String>) -> usize {
        let return_route = invocation
            .invocation_id
            .as_ref()
            .zip(invocation.return_channel.as_ref());

        let mut delivered = 0;
        for connection_id in targets {
            if invocation.is_excluded(&connection_id) {
                continue;
            }
            let Some(connection) = self.connections.get(&connection_id) else {
                continue;
            };
            let Some(payload) = invocation.payload_for(&connection.protocol) else {
                tracing::trace!(
                    "[Backplane] No '{}' payload for connection '{}', skipping",
                    connection.protocol,
                    connection_id
                );
                continue;
            };

            // The client may answer before `send` returns
            if let Some((invocation_id, return_channel)) = return_route {
                self.remote_invocations.insert(
                    invocation_id.clone(),
                    ReturnRoute {
                        connection_id: connection_id.clone(),
                        return_channel: return_channel.clone(),
                        delivered: Instant::now(),
                    },
                );
            }

            if connection.send(payload.clone()) {
                delivered += 1;
            } else {
                if let Some((invocation_id, _)) = return_route {
                    self.remote_invocations
                        .remove_if(invocation_id, |_, route| route.connection_id == connection_id);
                }
                tracing::debug!("[Backplane] Connection '{}' closed, message dropped", connection_id);
            }
        }
        delivered
    }

    async fn on_group_command(&self, payload: Bytes) {
        let command = match decode_group_command(payload) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!("[Backplane] Dropping malformed group command: {}", e);
                return;
            }
        };

        if !self.connections.contains(&command.connection_id) {
            return;
        }

        let applied = match command.action {
            GroupAction::Add => self.add_local_group(&command.connection_id, &command.group_name).await,
            GroupAction::Remove => {
                self.remove_local_group(&command.connection_id, &command.group_name)
                    .await
            }
        };
        if let Err(e) = applied {
            // No ack; the sender's wait times out
            tracing::error!(
                "[Backplane] Group command {} from '{}' failed: {}",
                command.id,
                command.server_name,
                e
            );
            return;
        }

        let channel = self.channels.ack(&command.server_name);
        if let Err(e) = self.bus.publish(&channel, encode_ack(Ack { id: command.id })).await {
            tracing::error!("[Backplane] Failed to ack group command {}: {}", command.id, e);
        }
    }

    fn on_ack(&self, payload: Bytes) {
        match decode_ack(payload) {
            Ok(ack) => {
                self.acks.trigger_ack(ack.id);
            }
            Err(e) => tracing::warn!("[Backplane] Dropping malformed ack: {}", e),
        }
    }

    fn on_completion(&self, payload: Bytes) {
        let envelope = match decode_completion(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("[Backplane] Dropping malformed completion: {}", e);
                return;
            }
        };

        let Some(protocol) = self.registry.get(&envelope.protocol_name) else {
            tracing::warn!(
                "[Backplane] {}",
                BackplaneError::protocol_mismatch(&envelope.protocol_name)
            );
            return;
        };

        let completion = match protocol.read_completion(&envelope.completion) {
            Ok(completion) => completion,
            Err(e) => {
                tracing::warn!("[Backplane] Unreadable '{}' completion: {}", envelope.protocol_name, e);
                return;
            }
        };

        match self.pending_results.remove(&completion.invocation_id) {
            Some((_, waiter)) => {
                let _ = waiter.send(completion);
            }
            None => tracing::debug!(
                "[Backplane] Completion for unknown invocation {}, ignoring",
                completion.invocation_id
            ),
        }
    }
}
