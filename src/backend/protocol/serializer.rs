/**
 * Hub Message Serializer
 *
 * Turns one hub message into one payload per configured sub-protocol, so the
 * receiving server can hand each client the bytes for the protocol that
 * client negotiated without re-serializing anything.
 *
 * Protocols are looked up by name in a `ProtocolRegistry`. A configured name
 * with no registered encoder is skipped: in a rolling deployment not every
 * server supports every protocol, and a partial set of payloads is still
 * useful to the servers that do.
 */

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::backend::error::BackplaneError;
use crate::shared::{CompletionMessage, HubMessage, SerializedMessage};

/// A client wire sub-protocol ("json", "messagepack", ...)
pub trait HubProtocol: Send + Sync {
    /// Name negotiated with clients and written into backplane envelopes
    fn name(&self) -> &str;

    /// Serialize a hub message as it would be written to a client
    fn write_message(&self, message: &HubMessage) -> Result<Bytes, BackplaneError>;

    /// Parse a completion a client sent in this protocol
    fn read_completion(&self, payload: &[u8]) -> Result<CompletionMessage, BackplaneError>;
}

/// Name-indexed set of available sub-protocols
#[derive(Clone, Default)]
pub struct ProtocolRegistry {
    protocols: HashMap<String, Arc<dyn HubProtocol>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a protocol, replacing any earlier one with the same name
    pub fn register(&mut self, protocol: Arc<dyn HubProtocol>) -> &mut Self {
        self.protocols.insert(protocol.name().to_string(), protocol);
        self
    }

    pub fn with(mut self, protocol: Arc<dyn HubProtocol>) -> Self {
        self.register(protocol);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn HubProtocol>> {
        self.protocols.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.protocols.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.protocols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.protocols.is_empty()
    }
}

impl std::fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.protocols.keys().collect();
        names.sort();
        f.debug_struct("ProtocolRegistry").field("protocols", &names).finish()
    }
}

/// Serializes hub messages for a fixed, ordered list of protocols
#[derive(Clone)]
pub struct MessageSerializer {
    protocols: Vec<Arc<dyn HubProtocol>>,
}

impl MessageSerializer {
    /// Resolve `configured` against `registry` once
    ///
    /// The result keeps the configured order, drops repeated names, and skips
    /// names the registry cannot serve.
    pub fn new<S: AsRef<str>>(registry: &ProtocolRegistry, configured: &[S]) -> Self {
        let mut protocols: Vec<Arc<dyn HubProtocol>> = Vec::with_capacity(configured.len());
        for name in configured {
            let name = name.as_ref();
            if protocols.iter().any(|p| p.name() == name) {
                continue;
            }
            match registry.get(name) {
                Some(protocol) => protocols.push(protocol),
                None => {
                    tracing::debug!("[Serializer] No encoder for protocol '{}', skipping", name);
                }
            }
        }
        Self { protocols }
    }

    /// Names of the protocols this serializer writes, in order
    pub fn protocol_names(&self) -> Vec<&str> {
        self.protocols.iter().map(|p| p.name()).collect()
    }

    /// Produce one `SerializedMessage` per resolved protocol
    pub fn serialize(&self, message: &HubMessage) -> Result<Vec<SerializedMessage>, BackplaneError> {
        self.protocols
            .iter()
            .map(|protocol| {
                let payload = protocol.write_message(message)?;
                Ok(SerializedMessage::new(protocol.name(), payload))
            })
            .collect()
    }
}

impl std::fmt::Debug for MessageSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSerializer")
            .field("protocols", &self.protocol_names())
            .finish()
    }
}

/// One-shot form of [`MessageSerializer::serialize`]
///
/// ```rust
/// use std::sync::Arc;
/// use xfbackplane::backend::protocol::{serialize_message, JsonHubProtocol, ProtocolRegistry};
/// use xfbackplane::shared::{HubMessage, InvocationMessage};
///
/// let registry = ProtocolRegistry::new().with(Arc::new(JsonHubProtocol));
/// let message = HubMessage::from(InvocationMessage::new("ping", vec![]));
/// let payloads = serialize_message(&message, &["json", "messagepack"], &registry).unwrap();
/// assert_eq!(payloads.len(), 1);
/// assert_eq!(payloads[0].protocol_name, "json");
/// ```
pub fn serialize_message<S: AsRef<str>>(
    message: &HubMessage,
    configured: &[S],
    registry: &ProtocolRegistry,
) -> Result<Vec<SerializedMessage>, BackplaneError> {
    MessageSerializer::new(registry, configured).serialize(message)
}
