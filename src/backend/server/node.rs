/**
 * Backplane Node
 *
 * One `BackplaneNode` runs per server process. The hub layer calls it to
 * fan messages out to connections, groups and users anywhere in the
 * deployment, to manage group membership, and to ask a single client for a
 * result.
 *
 * # Routing
 *
 * Every target maps to one channel (see `ChannelNamer`). Sending means
 * serializing the message once per configured sub-protocol, wrapping the
 * payloads in an invocation envelope and publishing it on the target's
 * channel. Whichever server holds a subscription on that channel delivers
 * it to its own connections.
 *
 * # Group membership
 *
 * Only the server that owns a connection can change its groups. For a local
 * connection the change is applied directly; for a remote one a group
 * command goes out on the group-management channel and the caller waits
 * for the owner's ack.
 *
 * # Client results
 *
 * `invoke_connection` tags the invocation with an id and this server's
 * return channel. The owning server remembers where to send the answer;
 * `complete_client_result` publishes it there and the waiting call resumes.
 * Routes for answers that never come are dropped when their connection
 * disconnects or, at the latest, once the client-result timeout has passed.
 */

use std::sync::{Arc, Weak};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backend::ack::{AckHandler, CommandIdGenerator};
use crate::backend::channels::ChannelNamer;
use crate::backend::error::BackplaneError;
use crate::backend::protocol::{
    encode_completion, encode_group_command, serialize_invocation, BackplaneCompletion,
    GroupAction, GroupCommand, MessageSerializer, ProtocolRegistry,
};
use crate::backend::realtime::{PubSub, SubscriptionHandle};
use crate::backend::server::state::{ConnectionStore, LocalConnection};
use crate::backend::subscription::SubscriptionManager;
use crate::shared::config::BackplaneConfig;
use crate::shared::{CompletionMessage, HubMessage, InvocationMessage};

/// State shared by the node handle and its receive handlers
pub(crate) struct NodeInner {
    /// Handed to receive handlers so subscriptions do not keep the node alive
    pub(crate) me: Weak<NodeInner>,
    pub(crate) config: BackplaneConfig,
    pub(crate) channels: ChannelNamer,
    pub(crate) bus: Arc<dyn PubSub>,
    pub(crate) registry: ProtocolRegistry,
    pub(crate) serializer: MessageSerializer,
    pub(crate) acks: AckHandler,
    pub(crate) ids: Arc<CommandIdGenerator>,
    pub(crate) connections: ConnectionStore,
    /// Connection, user and group channels, counted per local connection
    pub(crate) subscriptions: SubscriptionManager<String, SubscriptionHandle>,
    /// All, group-management, ack and return-results channels
    pub(crate) internal: Mutex<Vec<SubscriptionHandle>>,
    /// Client-result waits started here, by invocation id
    pub(crate) pending_results: DashMap<String, oneshot::Sender<CompletionMessage>>,
    /// Return routes for invocations delivered to local connections
    pub(crate) remote_invocations: DashMap<String, ReturnRoute>,
    pub(crate) stop: CancellationToken,
    pub(crate) sweeper: Mutex<Option<JoinHandle<()>>>,
}

/// Where a local connection's answer to a client-result invocation goes
#[derive(Debug, Clone)]
pub(crate) struct ReturnRoute {
    pub(crate) connection_id: String,
    pub(crate) return_channel: String,
    pub(crate) delivered: Instant,
}

/// A running backplane participant
///
/// Cheap to clone; all clones drive the same node.
#[derive(Clone)]
pub struct BackplaneNode {
    pub(crate) inner: Arc<NodeInner>,
}

impl BackplaneNode {
    pub fn server_name(&self) -> &str {
        &self.inner.config.server_name
    }

    pub fn config(&self) -> &BackplaneConfig {
        &self.inner.config
    }

    pub fn channels(&self) -> &ChannelNamer {
        &self.inner.channels
    }

    /// Protocols invocations are serialized for
    pub fn protocols(&self) -> Vec<&str> {
        self.inner.serializer.protocol_names()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    pub fn is_local(&self, connection_id: &str) -> bool {
        self.inner.connections.contains(connection_id)
    }

    /// Groups a local connection belongs to
    pub fn groups_of(&self, connection_id: &str) -> Vec<String> {
        self.inner.connections.groups_of(connection_id)
    }

    /// Client-result invocations delivered here and not yet answered
    pub fn unanswered_invocations(&self) -> usize {
        self.inner.remote_invocations.len()
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Register a connection that just connected to this server
    ///
    /// Subscribes its connection channel and, if it has a user, its user
    /// channel. On failure nothing stays registered.
    pub async fn on_connected(&self, connection: LocalConnection) -> Result<(), BackplaneError> {
        let connection_id = connection.connection_id.clone();
        let user_id = connection.user_id.clone();
        self.inner.connections.insert(connection);

        let connection_channel = self.inner.channels.connection(&connection_id);
        if let Err(e) = self.inner.subscribe_consumer(&connection_channel, &connection_id).await {
            self.inner.connections.remove(&connection_id);
            return Err(e);
        }

        if let Some(user_id) = user_id {
            let user_channel = self.inner.channels.user(&user_id);
            if let Err(e) = self.inner.subscribe_consumer(&user_channel, &connection_id).await {
                let _ = self
                    .inner
                    .unsubscribe_consumer(&connection_channel, &connection_id)
                    .await;
                self.inner.connections.remove(&connection_id);
                return Err(e);
            }
        }

        tracing::debug!("[Backplane] Connection '{}' registered", connection_id);
        Ok(())
    }

    /// Forget a connection that left this server
    ///
    /// Leaves every group it joined, forgets client-result invocations it
    /// never answered, and drops its connection and user subscriptions. All
    /// steps run even if one fails; the first error is returned.
    pub async fn on_disconnected(&self, connection_id: &str) -> Result<(), BackplaneError> {
        let Some((connection, groups)) = self.inner.connections.remove(connection_id) else {
            return Ok(());
        };
        self.inner
            .remote_invocations
            .retain(|_, route| route.connection_id != connection_id);

        let mut first_error = None;
        let mut channels: Vec<String> = groups
            .iter()
            .map(|group| self.inner.channels.group(group))
            .collect();
        channels.push(self.inner.channels.connection(connection_id));
        if let Some(user_id) = &connection.user_id {
            channels.push(self.inner.channels.user(user_id));
        }

        for channel in channels {
            if let Err(e) = self.inner.unsubscribe_consumer(&channel, connection_id).await {
                tracing::warn!("[Backplane] Cleanup of '{}' for '{}' failed: {}", channel, connection_id, e);
                first_error.get_or_insert(e);
            }
        }

        tracing::debug!("[Backplane] Connection '{}' removed", connection_id);
        first_error.map_or(Ok(()), Err)
    }

    // -----------------------------------------------------------------------
    // Fan-out
    // -----------------------------------------------------------------------

    /// Send to every connection on every server
    pub async fn send_all(&self, message: InvocationMessage) -> Result<(), BackplaneError> {
        self.send_all_except(message, &[]).await
    }

    /// Send to every connection except `excluded_connection_ids`
    pub async fn send_all_except(
        &self,
        message: InvocationMessage,
        excluded_connection_ids: &[String],
    ) -> Result<(), BackplaneError> {
        let channel = self.inner.channels.all();
        self.inner
            .publish_invocation(&[channel], message, excluded_connection_ids)
            .await
    }

    pub async fn send_connection(
        &self,
        connection_id: &str,
        message: InvocationMessage,
    ) -> Result<(), BackplaneError> {
        self.send_connections(&[connection_id.to_string()], message).await
    }

    pub async fn send_connections(
        &self,
        connection_ids: &[String],
        message: InvocationMessage,
    ) -> Result<(), BackplaneError> {
        let channels: Vec<String> = connection_ids
            .iter()
            .map(|id| self.inner.channels.connection(id))
            .collect();
        self.inner.publish_invocation(&channels, message, &[]).await
    }

    pub async fn send_group(&self, group: &str, message: InvocationMessage) -> Result<(), BackplaneError> {
        self.send_group_except(group, message, &[]).await
    }

    /// Send to a group, skipping `excluded_connection_ids`
    pub async fn send_group_except(
        &self,
        group: &str,
        message: InvocationMessage,
        excluded_connection_ids: &[String],
    ) -> Result<(), BackplaneError> {
        let channel = self.inner.channels.group(group);
        self.inner
            .publish_invocation(&[channel], message, excluded_connection_ids)
            .await
    }

    pub async fn send_groups(&self, groups: &[String], message: InvocationMessage) -> Result<(), BackplaneError> {
        let channels: Vec<String> = groups.iter().map(|g| self.inner.channels.group(g)).collect();
        self.inner.publish_invocation(&channels, message, &[]).await
    }

    pub async fn send_user(&self, user_id: &str, message: InvocationMessage) -> Result<(), BackplaneError> {
        self.send_users(&[user_id.to_string()], message).await
    }

    pub async fn send_users(&self, user_ids: &[String], message: InvocationMessage) -> Result<(), BackplaneError> {
        let channels: Vec<String> = user_ids.iter().map(|u| self.inner.channels.user(u)).collect();
        self.inner.publish_invocation(&channels, message, &[]).await
    }

    // -----------------------------------------------------------------------
    // Group membership
    // -----------------------------------------------------------------------

    /// Add a connection, local or remote, to a group
    ///
    /// # Errors
    ///
    /// `AckCanceled` if the connection is remote and its owner does not ack
    /// within the ack timeout.
    pub async fn add_to_group(&self, connection_id: &str, group: &str) -> Result<(), BackplaneError> {
        if self.is_local(connection_id) {
            return self.inner.add_local_group(connection_id, group).await;
        }
        self.inner
            .send_group_command(GroupAction::Add, group, connection_id)
            .await
    }

    /// Remove a connection, local or remote, from a group
    pub async fn remove_from_group(&self, connection_id: &str, group: &str) -> Result<(), BackplaneError> {
        if self.is_local(connection_id) {
            return self.inner.remove_local_group(connection_id, group).await;
        }
        self.inner
            .send_group_command(GroupAction::Remove, group, connection_id)
            .await
    }

    // -----------------------------------------------------------------------
    // Client results
    // -----------------------------------------------------------------------

    /// Invoke a method on one client and wait for its completion
    ///
    /// # Errors
    ///
    /// - `ConnectionNotFound` if no server holds the connection
    /// - `ClientResultTimeout` if no completion arrives in time
    /// - `Shutdown` if the node shuts down while waiting
    pub async fn invoke_connection(
        &self,
        connection_id: &str,
        message: InvocationMessage,
    ) -> Result<CompletionMessage, BackplaneError> {
        let inner = &self.inner;
        let invocation_id = uuid::Uuid::new_v4().simple().to_string();
        let message = message.with_invocation_id(invocation_id.clone());
        let return_channel = inner.channels.return_results(&inner.config.server_name);

        let payload = serialize_invocation(
            &HubMessage::Invocation(message),
            &inner.serializer,
            &[],
            Some((&invocation_id, &return_channel)),
        )?;

        let (tx, rx) = oneshot::channel();
        inner.pending_results.insert(invocation_id.clone(), tx);

        let channel = inner.channels.connection(connection_id);
        let reached = match inner.bus.publish(&channel, payload).await {
            Ok(reached) => reached,
            Err(e) => {
                inner.pending_results.remove(&invocation_id);
                return Err(e);
            }
        };
        if reached == 0 {
            inner.pending_results.remove(&invocation_id);
            return Err(BackplaneError::ConnectionNotFound {
                connection_id: connection_id.to_string(),
            });
        }

        match tokio::time::timeout(inner.config.client_result_timeout, rx).await {
            Ok(Ok(completion)) => Ok(completion),
            Ok(Err(_)) => Err(BackplaneError::Shutdown),
            Err(_) => {
                inner.pending_results.remove(&invocation_id);
                tracing::warn!(
                    "[Backplane] No result from '{}' for invocation {}",
                    connection_id,
                    invocation_id
                );
                Err(BackplaneError::ClientResultTimeout { invocation_id })
            }
        }
    }

    /// Route a client's completion back to the server that invoked it
    ///
    /// `completion` is the raw message the client sent, in `protocol_name`.
    ///
    /// # Errors
    ///
    /// `UnknownInvocation` if no invocation with that id was delivered here.
    pub async fn complete_client_result(
        &self,
        invocation_id: &str,
        protocol_name: &str,
        completion: Bytes,
    ) -> Result<(), BackplaneError> {
        let Some((_, route)) = self.inner.remote_invocations.remove(invocation_id) else {
            return Err(BackplaneError::UnknownInvocation {
                invocation_id: invocation_id.to_string(),
            });
        };

        let envelope = encode_completion(&BackplaneCompletion {
            protocol_name: protocol_name.to_string(),
            completion,
        });
        self.inner.bus.publish(&route.return_channel, envelope).await?;
        Ok(())
    }

    /// Stop the node
    ///
    /// Cancels pending acks and client-result waits and drops every
    /// subscription this node holds.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.acks.shutdown().await;
        inner.stop_sweeper().await;
        inner.pending_results.clear();
        inner.remote_invocations.clear();

        let internal: Vec<SubscriptionHandle> = std::mem::take(&mut *inner.internal.lock());
        let consumers = inner.subscriptions.drain().await;
        for handle in internal.into_iter().chain(consumers.into_iter().map(|(_, h)| h)) {
            let channel = handle.channel.clone();
            if let Err(e) = inner.bus.unsubscribe(handle).await {
                tracing::warn!("[Backplane] Unsubscribing '{}' during shutdown failed: {}", channel, e);
            }
        }

        tracing::info!("[Backplane] Node '{}' shut down", inner.config.server_name);
    }
}

impl NodeInner {
    /// Drop return routes older than the client-result timeout
    ///
    /// By then the invoking server has given up on the answer.
    pub(crate) fn expire_return_routes(&self) -> usize {
        let timeout = self.config.client_result_timeout;
        let mut expired = 0;
        self.remote_invocations.retain(|invocation_id, route| {
            let keep = route.delivered.elapsed() <= timeout;
            if !keep {
                tracing::debug!(
                    "[Backplane] Invocation {} for '{}' went unanswered, dropping its route",
                    invocation_id,
                    route.connection_id
                );
                expired += 1;
            }
            keep
        });
        expired
    }

    pub(crate) async fn stop_sweeper(&self) {
        self.stop.cancel();
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            if let Err(e) = sweeper.await {
                tracing::warn!("[Backplane] Route sweep task ended abnormally: {:?}", e);
            }
        }
    }

    /// Serialize once and publish the same envelope on every channel
    async fn publish_invocation(
        &self,
        channels: &[String],
        message: InvocationMessage,
        excluded_connection_ids: &[String],
    ) -> Result<(), BackplaneError> {
        let payload = serialize_invocation(
            &HubMessage::Invocation(message),
            &self.serializer,
            excluded_connection_ids,
            None,
        )?;
        for channel in channels {
            let reached = self.bus.publish(channel, payload.clone()).await?;
            tracing::trace!("[Backplane] Published invocation on '{}' to {} subscribers", channel, reached);
        }
        Ok(())
    }

    async fn send_group_command(
        &self,
        action: GroupAction,
        group: &str,
        connection_id: &str,
    ) -> Result<(), BackplaneError> {
        let id = self.ids.next_id();
        let command = GroupCommand {
            id,
            server_name: self.config.server_name.clone(),
            action,
            group_name: group.to_string(),
            connection_id: connection_id.to_string(),
        };

        // Register before publishing so a fast ack is not missed
        let waiter = self.acks.create_ack(id);
        self.bus
            .publish(&self.channels.group_management(), encode_group_command(&command))
            .await?;
        tracing::debug!(
            "[Backplane] Sent group command {} ({:?} '{}' to '{}'), awaiting ack",
            id,
            action,
            connection_id,
            group
        );
        waiter.await
    }

    pub(crate) async fn add_local_group(&self, connection_id: &str, group: &str) -> Result<(), BackplaneError> {
        let channel = self.channels.group(group);
        self.subscribe_consumer(&channel, connection_id).await?;
        if !self.connections.contains(connection_id) {
            // Disconnected while we were subscribing
            return self.unsubscribe_consumer(&channel, connection_id).await;
        }
        self.connections.join_group(connection_id, group);
        Ok(())
    }

    pub(crate) async fn remove_local_group(&self, connection_id: &str, group: &str) -> Result<(), BackplaneError> {
        self.connections.leave_group(connection_id, group);
        let channel = self.channels.group(group);
        self.unsubscribe_consumer(&channel, connection_id).await
    }
}
