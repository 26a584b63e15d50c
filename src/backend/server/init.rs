/**
 * Node Initialization
 *
 * Wires a `BackplaneNode` together and joins it to the deployment.
 *
 * # Initialization Process
 *
 * 1. Validate the configuration
 * 2. Resolve the configured sub-protocols against the registry
 * 3. Start the ack tracker and its sweep task
 * 4. Subscribe to the all, group-management, own-ack and own-return-results
 *    channels
 * 5. Start the sweep that expires unanswered client-result routes
 *
 * If any subscription fails the ones already made are dropped, the ack
 * tracker is stopped and the error is returned.
 */

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::backend::ack::{AckHandler, CommandIdGenerator};
use crate::backend::channels::ChannelNamer;
use crate::backend::error::BackplaneError;
use crate::backend::protocol::{MessageSerializer, ProtocolRegistry};
use crate::backend::realtime::PubSub;
use crate::backend::server::node::{BackplaneNode, NodeInner};
use crate::backend::server::state::ConnectionStore;
use crate::backend::subscription::SubscriptionManager;
use crate::shared::config::BackplaneConfig;

impl BackplaneNode {
    /// Start a node with its own command id sequence
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use xfbackplane::backend::protocol::{JsonHubProtocol, ProtocolRegistry};
    /// use xfbackplane::backend::realtime::MemoryPubSub;
    /// use xfbackplane::backend::server::BackplaneNode;
    /// use xfbackplane::shared::config::BackplaneConfig;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let bus = Arc::new(MemoryPubSub::new());
    /// let registry = ProtocolRegistry::new().with(Arc::new(JsonHubProtocol));
    /// let config = BackplaneConfig::builder().server_name("node-a").build()?;
    ///
    /// let node = BackplaneNode::start(config, bus, registry).await?;
    /// assert_eq!(node.server_name(), "node-a");
    /// node.shutdown().await;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn start(
        config: BackplaneConfig,
        bus: Arc<dyn PubSub>,
        registry: ProtocolRegistry,
    ) -> Result<Self, BackplaneError> {
        Self::start_with_ids(config, bus, registry, Arc::new(CommandIdGenerator::new())).await
    }

    /// Start a node drawing group command ids from `ids`
    pub async fn start_with_ids(
        config: BackplaneConfig,
        bus: Arc<dyn PubSub>,
        registry: ProtocolRegistry,
        ids: Arc<CommandIdGenerator>,
    ) -> Result<Self, BackplaneError> {
        config.validate()?;
        tracing::info!(
            "[Backplane] Starting node '{}' on prefix '{}'",
            config.server_name,
            config.channel_prefix
        );

        let serializer = MessageSerializer::new(&registry, &config.protocols);
        if serializer.protocol_names().is_empty() {
            tracing::warn!(
                "[Backplane] None of the configured protocols {:?} are registered; invocations will carry no payloads",
                config.protocols
            );
        }

        let inner = Arc::new_cyclic(|me| NodeInner {
            me: me.clone(),
            channels: ChannelNamer::new(config.channel_prefix.clone()),
            acks: AckHandler::from_config(&config),
            config,
            bus,
            registry,
            serializer,
            ids,
            connections: ConnectionStore::new(),
            subscriptions: SubscriptionManager::new(),
            internal: Mutex::new(Vec::new()),
            pending_results: DashMap::new(),
            remote_invocations: DashMap::new(),
            stop: CancellationToken::new(),
            sweeper: Mutex::new(None),
        });

        if let Err(e) = inner.subscribe_internal().await {
            inner.acks.shutdown().await;
            return Err(e);
        }

        let sweeper = tokio::spawn(run_route_sweeper(
            Arc::downgrade(&inner),
            inner.config.ack_sweep_interval,
            inner.stop.clone(),
        ));
        *inner.sweeper.lock() = Some(sweeper);

        tracing::info!(
            "[Backplane] Node '{}' ready, serializing for {:?}",
            inner.config.server_name,
            inner.serializer.protocol_names()
        );
        Ok(Self { inner })
    }
}

async fn run_route_sweeper(node: Weak<NodeInner>, sweep_interval: Duration, stop: CancellationToken) {
    let mut interval = tokio::time::interval_at(Instant::now() + sweep_interval, sweep_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = interval.tick() => {
                let Some(node) = node.upgrade() else {
                    break;
                };
                let expired = node.expire_return_routes();
                if expired > 0 {
                    tracing::debug!("[Backplane] Sweep expired {} client-result routes", expired);
                }
            }
        }
    }
}
