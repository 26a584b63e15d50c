//! Real-time Bus Module
//!
//! The pub/sub substrate that carries backplane envelopes between servers.
//!
//! # Module Structure
//!
//! ```text
//! realtime/
//! ├── mod.rs          - Module exports and documentation
//! ├── bus.rs          - PubSub trait, handlers and subscription handles
//! └── broadcast.rs    - In-process implementation on tokio broadcast channels
//! ```
//!
//! # Example
//!
//! ```rust
//! use bytes::Bytes;
//! use xfbackplane::backend::realtime::{handler, MemoryPubSub, PubSub};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = MemoryPubSub::new();
//! let handle = bus
//!     .subscribe("hub:all", handler(|payload: Bytes| async move {
//!         println!("received {} bytes", payload.len());
//!     }))
//!     .await?;
//!
//! let reached = bus.publish("hub:all", Bytes::from_static(b"hello")).await?;
//! assert_eq!(reached, 1);
//!
//! bus.unsubscribe(handle).await?;
//! # Ok(())
//! # }
//! ```

/// Substrate trait and handler types
pub mod bus;

/// tokio broadcast implementation
pub mod broadcast;

pub use broadcast::{MemoryPubSub, CHANNEL_CAPACITY};
pub use bus::{handler, MessageHandler, PubSub, SubscriptionHandle};
