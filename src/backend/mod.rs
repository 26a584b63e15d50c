//! Backend Module
//!
//! Everything a server process needs to take part in a backplane: channel
//! naming, the wire codec, the ack tracker, subscription reference counting,
//! the pub/sub substrate and the node that ties them together.
//!
//! # Architecture
//!
//! The backend is organized into focused submodules:
//!
//! - **`channels`** - Deterministic channel names for every routing target
//! - **`protocol`** - Hub message serialization and backplane envelopes
//! - **`ack`** - Group command acknowledgment tracking
//! - **`subscription`** - First-in/last-out channel subscription counting
//! - **`realtime`** - Pub/sub substrate trait and in-process implementation
//! - **`server`** - The backplane node and its local connections
//! - **`error`** - Backend-specific error types
//!
//! # Module Structure
//!
//! ```text
//! backend/
//! ├── mod.rs          - Module exports and documentation
//! ├── main.rs         - Two-node demo binary
//! ├── channels.rs     - ChannelNamer
//! ├── protocol/       - Serializer and envelope codec
//! ├── ack/            - AckHandler and command ids
//! ├── subscription/   - SubscriptionManager
//! ├── realtime/       - PubSub and MemoryPubSub
//! ├── server/         - BackplaneNode
//! └── error/          - Error types
//! ```
//!
//! # Message Flow
//!
//! ```text
//! hub ──send_group──> BackplaneNode ──serialize──> MessageSerializer
//!                          │
//!                          └──encode──> Invocation envelope ──publish──> "{prefix}:group:{name}"
//!                                                                           │
//!   every server subscribed to the group channel <─────────────────────────┘
//!     └──> payload for each local member's protocol ──> connection queue
//! ```
//!
//! # Thread Safety
//!
//! Nodes are `Clone + Send + Sync`. Receive handlers run on the substrate's
//! delivery tasks, one message at a time per channel, and share state with
//! callers through `DashMap`s and a single async gate in the subscription
//! manager.

/// Acknowledgment tracking
pub mod ack;

/// Channel naming
pub mod channels;

/// Error types
pub mod error;

/// Serialization and wire codec
pub mod protocol;

/// Pub/sub substrate
pub mod realtime;

/// Backplane node
pub mod server;

/// Subscription reference counting
pub mod subscription;

/// Re-export commonly used types
pub use ack::{AckHandler, AckWaiter, CommandIdGenerator};
pub use channels::{ChannelKind, ChannelNamer};
pub use error::BackplaneError;
pub use protocol::{HubProtocol, JsonHubProtocol, MessageSerializer, ProtocolRegistry};
pub use realtime::{MemoryPubSub, PubSub};
pub use server::{BackplaneNode, LocalConnection};
pub use subscription::SubscriptionManager;
