/**
 * Backplane Error Types
 *
 * This module defines the errors surfaced by the backplane runtime.
 *
 * # Error Categories
 *
 * ## Local errors (logged, message dropped)
 *
 * - `Decode` - Malformed, truncated or under-length envelope
 * - `ProtocolMismatch` - A completion named a protocol this server lacks
 *
 * ## Caller errors (returned to the hub layer)
 *
 * - `AckCanceled` - A group command was not acknowledged in time, or the
 *   tracker shut down while it was pending
 * - `Subscription` - Establishing or tearing down a remote subscription failed
 * - `Transport` - The pub/sub substrate rejected a publish
 * - `ClientResultTimeout` - A client never answered an invocation
 * - `Config` - The node was started with an invalid configuration
 */

use thiserror::Error;
use crate::shared::config::ConfigError;
use crate::shared::ProtocolError;

/// Backplane-specific error types
///
/// # Usage
///
/// ```rust
/// use xfbackplane::backend::error::BackplaneError;
///
/// let err = BackplaneError::transport("connection reset");
/// assert!(err.to_string().contains("connection reset"));
///
/// let err = BackplaneError::subscription("hub:all", "refused");
/// assert!(!err.is_local());
/// ```
#[derive(Debug, Error)]
pub enum BackplaneError {
    /// An envelope could not be decoded
    #[error(transparent)]
    Decode(#[from] ProtocolError),

    /// A completion was produced with a protocol this server does not support
    #[error("Protocol mismatch: '{protocol}' is not supported on this server")]
    ProtocolMismatch {
        /// Protocol name carried by the envelope
        protocol: String,
    },

    /// A group command wait ended without an ack
    #[error("Group command {id} was canceled before it was acknowledged")]
    AckCanceled {
        /// Correlation id of the command
        id: i64,
    },

    /// Subscribing or unsubscribing on the substrate failed
    #[error("Subscription error on '{channel}': {message}")]
    Subscription {
        channel: String,
        message: String,
    },

    /// The substrate failed to carry a message
    #[error("Transport error: {message}")]
    Transport {
        message: String,
    },

    /// No server owns the target connection
    #[error("Connection '{connection_id}' does not exist")]
    ConnectionNotFound {
        connection_id: String,
    },

    /// A completion arrived for an invocation nobody is waiting on
    #[error("Unknown invocation '{invocation_id}'")]
    UnknownInvocation {
        invocation_id: String,
    },

    /// A client-result invocation did not complete in time
    #[error("Invocation '{invocation_id}' timed out waiting for a client result")]
    ClientResultTimeout {
        invocation_id: String,
    },

    /// JSON (de)serialization inside a sub-protocol failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The node was started with an invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The component has been shut down
    #[error("Backplane is shut down")]
    Shutdown,
}

impl BackplaneError {
    /// Create a new subscription error
    pub fn subscription(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Subscription {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Create a new transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a new protocol mismatch error
    pub fn protocol_mismatch(protocol: impl Into<String>) -> Self {
        Self::ProtocolMismatch {
            protocol: protocol.into(),
        }
    }

    /// Whether the error only concerns a single inbound message
    ///
    /// Local errors are logged by receive loops and the message is dropped;
    /// everything else is reported to the caller that started the operation.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::ProtocolMismatch { .. })
    }

    /// Whether the operation ended as canceled rather than failed
    pub fn is_canceled(&self) -> bool {
        matches!(
            self,
            Self::AckCanceled { .. } | Self::ClientResultTimeout { .. } | Self::Shutdown
        )
    }
}
