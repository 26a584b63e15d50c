//! Server Module
//!
//! The backplane node a server process runs, and the local connection state
//! it routes to.
//!
//! # Architecture
//!
//! The server module is organized into focused submodules:
//!
//! - **`state`** - Local connections and their group memberships
//! - **`config`** - Configuration loading from the environment
//! - **`init`** - Node startup
//! - **`node`** - Public node operations (fan-out, groups, client results)
//! - **`receive`** - Handlers for every subscribed channel
//!
//! # Module Structure
//!
//! ```text
//! server/
//! ├── mod.rs          - Module exports and documentation
//! ├── state.rs        - LocalConnection and ConnectionStore
//! ├── config.rs       - Environment configuration loading
//! ├── init.rs         - BackplaneNode::start
//! ├── node.rs         - BackplaneNode operations
//! └── receive.rs      - Receive paths
//! ```
//!
//! # Subscriptions
//!
//! Each node holds four internal subscriptions for its lifetime (all,
//! group management, its ack channel, its return-results channel) plus one
//! per connection, user and group channel that has a local consumer.
//! The latter are reference counted by `SubscriptionManager`.

/// Local connection state
pub mod state;

/// Configuration loading
pub mod config;

/// Node startup
pub mod init;

/// Backplane node
pub mod node;

/// Channel receive handlers
mod receive;

// Re-export commonly used types
pub use config::load_config;
pub use node::BackplaneNode;
pub use state::{ConnectionReceiver, ConnectionStore, LocalConnection};
