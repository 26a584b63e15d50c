//! XFBackplane - Main Library
//!
//! XFBackplane lets several real-time hub servers behave as one. A message
//! aimed at a connection, group or user reaches it no matter which server
//! the client is connected to, by relaying it over a shared pub/sub bus.
//!
//! # Overview
//!
//! This library provides:
//! - Deterministic channel naming for every routing target
//! - Per-protocol serialization of hub messages
//! - A compact MessagePack envelope codec for the four backplane messages
//! - Acknowledged cross-server group membership changes
//! - Reference-counted channel subscriptions
//! - Client results routed back to the invoking server
//!
//! # Module Structure
//!
//! The library is organized into two main modules:
//!
//! - **`shared`** - Types with no runtime dependencies
//!   - Hub messages, configuration, wire decode errors
//!
//! - **`backend`** - The backplane runtime
//!   - Channel naming, codec, ack tracking, subscriptions
//!   - Pub/sub substrate and the `BackplaneNode`
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use xfbackplane::backend::protocol::{JsonHubProtocol, ProtocolRegistry};
//! use xfbackplane::backend::realtime::MemoryPubSub;
//! use xfbackplane::backend::server::{BackplaneNode, LocalConnection};
//! use xfbackplane::shared::{BackplaneConfig, InvocationMessage};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = Arc::new(MemoryPubSub::new());
//! let registry = ProtocolRegistry::new().with(Arc::new(JsonHubProtocol));
//! let node = BackplaneNode::start(BackplaneConfig::default(), bus, registry).await?;
//!
//! let (connection, mut outbound) = LocalConnection::new("conn-1", "json");
//! node.on_connected(connection).await?;
//! node.add_to_group("conn-1", "lobby").await?;
//! node.send_group("lobby", InvocationMessage::new("greet", vec![])).await?;
//!
//! let payload = outbound.recv().await.unwrap();
//! assert!(std::str::from_utf8(&payload)?.contains("greet"));
//! node.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Feature Flags
//!
//! - **`demo`** - Builds the `backplane-demo` binary with logging and
//!   `.env` support
//!
//! # Error Handling
//!
//! - `shared::ProtocolError` for malformed wire data
//! - `shared::ConfigError` for invalid configuration
//! - `backend::BackplaneError` for everything the runtime reports

/// Shared types and data structures
pub mod shared;

/// Backplane runtime
pub mod backend;
