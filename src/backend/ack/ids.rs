//! Correlation id source for group commands

use std::sync::atomic::{AtomicI64, Ordering};

/// Hands out increasing correlation ids
///
/// Each backplane node owns one, so independent nodes in the same process
/// (as in tests) never share a sequence.
#[derive(Debug, Default)]
pub struct CommandIdGenerator {
    last: AtomicI64,
}

impl CommandIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start after `last`, so the first id returned is `last + 1`
    pub fn starting_after(last: i64) -> Self {
        Self {
            last: AtomicI64::new(last),
        }
    }

    pub fn next_id(&self) -> i64 {
        self.last.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }
}
