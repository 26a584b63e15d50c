//! Backplane Error Module
//!
//! Error types raised by the backplane runtime.
//!
//! # Module Structure
//!
//! ```text
//! error/
//! ├── mod.rs        - Module exports and documentation
//! └── types.rs      - Error type definitions
//! ```
//!
//! Wire decode failures are defined in `shared::error::ProtocolError` and
//! wrapped by `BackplaneError::Decode`.

/// Error type definitions
pub mod types;

// Re-export commonly used types
pub use types::BackplaneError;
