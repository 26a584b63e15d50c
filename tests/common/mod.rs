//! Common test utilities and helpers
//!
//! This module provides shared utilities for all tests including:
//! - Node and registry fixtures
//! - A tagged stand-in for a binary sub-protocol
//! - A pub/sub wrapper that can be told to fail
//! - Custom assertion macros

#![allow(dead_code)]

pub mod helpers;

// Re-export commonly used utilities
pub use helpers::*;
