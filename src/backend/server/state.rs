/**
 * Local Connection State
 *
 * This module defines the connections a backplane node owns and the store
 * that tracks them.
 *
 * # Architecture
 *
 * A `LocalConnection` is what the hub layer registers when a client
 * connects to this server: its id, optional user id, the sub-protocol it
 * negotiated, and an outbound queue. The backplane writes already-serialized
 * payloads into that queue; the transport that owns the receiving half
 * forwards them to the client.
 *
 * `ConnectionStore` keeps the connections by id, plus the groups each one
 * has joined so they can all be left on disconnect.
 *
 * # Thread Safety
 *
 * Both maps are `DashMap`s, so receive handlers on different channels can
 * look connections up concurrently without a global lock.
 */

use std::collections::HashSet;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

/// Receiving half of a connection's outbound queue
pub type ConnectionReceiver = mpsc::UnboundedReceiver<Bytes>;

/// A client connection owned by this server
#[derive(Debug, Clone)]
pub struct LocalConnection {
    pub connection_id: String,
    pub user_id: Option<String>,
    /// Negotiated sub-protocol name, e.g. "json"
    pub protocol: String,
    sender: mpsc::UnboundedSender<Bytes>,
}

impl LocalConnection {
    /// Create a connection and the receiver its transport should drain
    ///
    /// ```rust
    /// use bytes::Bytes;
    /// use xfbackplane::backend::server::LocalConnection;
    ///
    /// let (connection, mut outbound) = LocalConnection::new("conn-1", "json");
    /// assert!(connection.send(Bytes::from_static(b"{}")));
    /// assert_eq!(outbound.try_recv().unwrap(), Bytes::from_static(b"{}"));
    /// ```
    pub fn new(
        connection_id: impl Into<String>,
        protocol: impl Into<String>,
    ) -> (Self, ConnectionReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let connection = Self {
            connection_id: connection_id.into(),
            user_id: None,
            protocol: protocol.into(),
            sender,
        };
        (connection, receiver)
    }

    /// Associate the connection with an authenticated user
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Queue a payload for the client; false if the transport has gone away
    pub fn send(&self, payload: Bytes) -> bool {
        self.sender.send(payload).is_ok()
    }
}

/// Connections owned by this server and their group memberships
#[derive(Debug, Default)]
pub struct ConnectionStore {
    connections: DashMap<String, LocalConnection>,
    groups: DashMap<String, HashSet<String>>,
}

impl ConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, replacing any earlier one with the same id
    pub fn insert(&self, connection: LocalConnection) -> Option<LocalConnection> {
        self.connections
            .insert(connection.connection_id.clone(), connection)
    }

    /// Remove a connection and return it along with the groups it was in
    pub fn remove(&self, connection_id: &str) -> Option<(LocalConnection, Vec<String>)> {
        let (_, connection) = self.connections.remove(connection_id)?;
        let groups = self
            .groups
            .remove(connection_id)
            .map(|(_, groups)| groups.into_iter().collect())
            .unwrap_or_default();
        Some((connection, groups))
    }

    pub fn get(&self, connection_id: &str) -> Option<LocalConnection> {
        self.connections
            .get(connection_id)
            .map(|entry| entry.value().clone())
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Record that a local connection joined `group`; false if already a member
    pub fn join_group(&self, connection_id: &str, group: &str) -> bool {
        self.groups
            .entry(connection_id.to_string())
            .or_default()
            .insert(group.to_string())
    }

    /// Record that a local connection left `group`; false if it was not a member
    pub fn leave_group(&self, connection_id: &str, group: &str) -> bool {
        let left = self
            .groups
            .get_mut(connection_id)
            .map(|mut groups| groups.remove(group))
            .unwrap_or(false);
        self.groups
            .remove_if(connection_id, |_, groups| groups.is_empty());
        left
    }

    pub fn groups_of(&self, connection_id: &str) -> Vec<String> {
        self.groups
            .get(connection_id)
            .map(|groups| groups.iter().cloned().collect())
            .unwrap_or_default()
    }
}
