//! Subscription Module
//!
//! Per-channel reference counting of local consumers so that each server
//! holds at most one substrate subscription per channel.
//!
//! # Module Structure
//!
//! ```text
//! subscription/
//! ├── mod.rs      - Module exports and documentation
//! └── manager.rs  - SubscriptionManager and ConsumerSet
//! ```

/// Reference-counted channel subscriptions
pub mod manager;

pub use manager::{ConsumerSet, SubscriptionManager};
