//! Shared Error Types
//!
//! This module defines the wire-level error taxonomy for backplane envelopes.
//! Every variant describes why a single message could not be decoded; none of
//! them is fatal to the subscription the message arrived on.
//!
//! # Error Categories
//!
//! - `Truncated` - The buffer ended before a declared length was satisfied
//! - `UnexpectedMarker` - A format byte did not match the expected value kind
//! - `ArrayTooShort` - An envelope declared fewer elements than its minimum
//! - `InvalidGroupAction` - Unknown group action byte
//! - `DuplicateProtocol` - A payload map repeated a protocol name
//!
//! # Usage
//!
//! ```rust
//! use xfbackplane::shared::error::ProtocolError;
//!
//! let error = ProtocolError::array_too_short("GroupCommand", 5, 3);
//! assert!(error.to_string().contains("expected at least 5"));
//! ```
use thiserror::Error;

/// Errors raised while decoding a backplane envelope
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The buffer ended before the value was complete
    #[error("Truncated message: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes required by the value being read
        needed: usize,
        /// Bytes left in the buffer
        remaining: usize,
    },

    /// A format marker did not describe the expected kind of value
    #[error("Unexpected format marker 0x{marker:02x}, expected {expected}")]
    UnexpectedMarker {
        /// Human-readable name of the expected value kind
        expected: &'static str,
        /// The marker byte that was found
        marker: u8,
    },

    /// A string value was not valid UTF-8
    #[error("Invalid UTF-8 in string value")]
    InvalidUtf8,

    /// An envelope declared fewer elements than its minimum contract
    #[error("Invalid '{message_type}' message: expected at least {expected} elements, found {actual}")]
    ArrayTooShort {
        /// Envelope name
        message_type: &'static str,
        /// Minimum element count
        expected: usize,
        /// Declared element count
        actual: usize,
    },

    /// A group command carried an unknown action byte
    #[error("Invalid group action: {0}")]
    InvalidGroupAction(u8),

    /// A payload map named the same protocol twice
    #[error("Duplicate protocol '{0}' in payload map")]
    DuplicateProtocol(String),

    /// Skipped values were nested deeper than the reader allows
    #[error("Value nesting exceeds {0} levels")]
    NestingTooDeep(usize),

    /// An integer did not fit the target width
    #[error("Integer out of range for {target}")]
    IntegerOutOfRange {
        /// Name of the target integer type
        target: &'static str,
    },
}

impl ProtocolError {
    /// Create a new truncation error
    pub fn truncated(needed: usize, remaining: usize) -> Self {
        Self::Truncated { needed, remaining }
    }

    /// Create a new unexpected marker error
    pub fn unexpected(expected: &'static str, marker: u8) -> Self {
        Self::UnexpectedMarker { expected, marker }
    }

    /// Create a new under-length envelope error
    pub fn array_too_short(message_type: &'static str, expected: usize, actual: usize) -> Self {
        Self::ArrayTooShort {
            message_type,
            expected,
            actual,
        }
    }
}
