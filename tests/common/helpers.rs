//! Node fixtures shared by the integration tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use xfbackplane::backend::error::BackplaneError;
use xfbackplane::backend::protocol::{HubProtocol, JsonHubProtocol, ProtocolRegistry};
use xfbackplane::backend::realtime::{handler, MemoryPubSub, MessageHandler, PubSub, SubscriptionHandle};
use xfbackplane::backend::server::{BackplaneNode, ConnectionReceiver};
use xfbackplane::shared::{BackplaneConfig, CompletionMessage, HubMessage};

/// Prefix every test node uses
pub const PREFIX: &str = "test";

/// Upper bound on waiting for something that should happen
pub const WAIT: Duration = Duration::from_secs(2);

/// How long to watch for something that should not happen
pub const QUIET: Duration = Duration::from_millis(100);

/// Stand-in for a binary sub-protocol such as "messagepack"
///
/// Invocations are written as `name|target`, completions as
/// `name|invocation_id`, which makes it obvious which protocol produced a
/// payload.
pub struct TaggedProtocol {
    name: &'static str,
}

impl TaggedProtocol {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self { name })
    }
}

impl HubProtocol for TaggedProtocol {
    fn name(&self) -> &str {
        self.name
    }

    fn write_message(&self, message: &HubMessage) -> Result<Bytes, BackplaneError> {
        let body = match message {
            HubMessage::Invocation(invocation) => format!("{}|{}", self.name, invocation.target),
            HubMessage::Completion(completion) => format!("{}|{}", self.name, completion.invocation_id),
        };
        Ok(Bytes::from(body))
    }

    fn read_completion(&self, payload: &[u8]) -> Result<CompletionMessage, BackplaneError> {
        let text = std::str::from_utf8(payload).map_err(|e| BackplaneError::transport(e.to_string()))?;
        match text.split_once('|') {
            Some((name, invocation_id)) if name == self.name => {
                Ok(CompletionMessage::with_result(invocation_id, Value::Null))
            }
            _ => Err(BackplaneError::transport(format!("not a {} completion", self.name))),
        }
    }
}

/// Registry holding JSON plus a tagged protocol for every other name
pub fn registry(names: &[&'static str]) -> ProtocolRegistry {
    let mut registry = ProtocolRegistry::new();
    for name in names {
        if *name == "json" {
            registry.register(Arc::new(JsonHubProtocol));
        } else {
            registry.register(TaggedProtocol::new(*name));
        }
    }
    registry
}

pub fn config(server_name: &str, protocols: &[&str]) -> BackplaneConfig {
    BackplaneConfig::builder()
        .channel_prefix(PREFIX)
        .server_name(server_name)
        .ack_timeout(Duration::from_millis(500))
        .ack_sweep_interval(Duration::from_millis(50))
        .client_result_timeout(Duration::from_millis(500))
        .protocols(protocols.iter().copied())
        .build()
        .expect("valid test config")
}

/// Start a node serializing and understanding `protocols`
pub async fn start_node(bus: &Arc<MemoryPubSub>, server_name: &str, protocols: &[&'static str]) -> BackplaneNode {
    let bus: Arc<dyn PubSub> = bus.clone();
    BackplaneNode::start(config(server_name, protocols), bus, registry(protocols))
        .await
        .expect("node starts")
}

/// Start a node from a customised test config
pub async fn start_node_with(
    bus: &Arc<MemoryPubSub>,
    config: BackplaneConfig,
    protocols: &[&'static str],
) -> BackplaneNode {
    let bus: Arc<dyn PubSub> = bus.clone();
    BackplaneNode::start(config, bus, registry(protocols))
        .await
        .expect("node starts")
}

/// Wait until `condition` holds, failing after `WAIT`
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Next payload queued for a connection
pub async fn recv(rx: &mut ConnectionReceiver) -> Bytes {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a payload")
        .expect("connection queue closed")
}

/// Assert nothing reaches a connection for a short while
pub async fn assert_silent(rx: &mut ConnectionReceiver) {
    if let Ok(Some(payload)) = tokio::time::timeout(QUIET, rx.recv()).await {
        panic!("unexpected payload: {:?}", payload);
    }
}

/// Parse a JSON protocol payload
pub fn json_body(payload: &Bytes) -> Value {
    let body = payload.strip_suffix(&[0x1e]).unwrap_or(&payload[..]);
    serde_json::from_slice(body).expect("json payload")
}

/// Client method named by a JSON protocol payload
pub fn json_target(payload: &Bytes) -> String {
    json_body(payload)["target"]
        .as_str()
        .expect("target field")
        .to_string()
}

/// Subscribe a raw listener to a channel and collect what it sees
pub async fn tap(bus: &MemoryPubSub, channel: &str) -> mpsc::UnboundedReceiver<Bytes> {
    let (tx, rx) = mpsc::unbounded_channel();
    let listener: MessageHandler = handler(move |payload| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(payload);
        }
    });
    bus.subscribe(channel, listener).await.expect("tap subscribes");
    rx
}

/// A `MemoryPubSub` that refuses subscriptions to chosen channels
#[derive(Default)]
pub struct FlakyPubSub {
    pub inner: MemoryPubSub,
    refused: Mutex<Vec<String>>,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
}

impl FlakyPubSub {
    pub fn refuse(&self, channel: impl Into<String>) {
        self.refused.lock().push(channel.into());
    }

    pub fn subscribes(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    pub fn unsubscribes(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PubSub for FlakyPubSub {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<usize, BackplaneError> {
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(
        &self,
        channel: &str,
        handler: MessageHandler,
    ) -> Result<SubscriptionHandle, BackplaneError> {
        let refused = self.refused.lock().iter().any(|c| c == channel);
        if refused {
            return Err(BackplaneError::subscription(channel, "refused by test"));
        }
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        self.inner.subscribe(channel, handler).await
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), BackplaneError> {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.inner.unsubscribe(handle).await
    }
}
