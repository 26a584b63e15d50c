//! Shared Module
//!
//! Types used on both sides of the backplane: the hub messages it carries,
//! its configuration, and the errors raised while decoding wire data.
//!
//! # Overview
//!
//! Nothing here touches the network or the async runtime, so these types
//! can be used by a hub layer that never starts a node (for instance to
//! prepare configuration or to build messages ahead of time).

/// Hub message structures
pub mod message;

/// Shared error types
pub mod error;

/// Backplane configuration
pub mod config;

/// Re-export commonly used types for convenience
pub use message::{CompletionMessage, HubMessage, InvocationMessage, SerializedMessage};
pub use error::ProtocolError;
pub use config::{BackplaneConfig, BackplaneConfigBuilder, ConfigError};
