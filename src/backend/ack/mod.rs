//! Group Command Acknowledgments
//!
//! A server changing group membership for a connection it does not own
//! publishes a group command and waits for the owning server's ack. This
//! module tracks those waits.
//!
//! # Module Structure
//!
//! ```text
//! ack/
//! ├── mod.rs          - Module exports and documentation
//! ├── handler.rs      - Pending-ack table, sweep task, waiters
//! └── ids.rs          - Correlation id generator
//! ```
//!
//! # Timeouts
//!
//! A wait that sees no ack within the configured timeout (30 seconds by
//! default) completes as canceled. Expiry is checked by a sweep every
//! few seconds (5 by default), so a wait can outlive the timeout by up to one
//! sweep interval.

/// Pending-ack tracking
pub mod handler;

/// Correlation ids
pub mod ids;

// Re-export commonly used types
pub use handler::{AckHandler, AckWaiter};
pub use ids::CommandIdGenerator;
