//! Backplane Protocol Module
//!
//! Everything that turns messages into bytes and back.
//!
//! # Module Structure
//!
//! ```text
//! protocol/
//! ├── mod.rs          - Module exports and documentation
//! ├── msgpack.rs      - Length-prefixed array/map/str/bin/int primitives
//! ├── codec.rs        - The four backplane envelopes
//! ├── serializer.rs   - Per-protocol serialization of hub messages
//! └── json.rs         - Built-in JSON sub-protocol
//! ```
//!
//! # Layers
//!
//! A hub message is first serialized once per configured client sub-protocol
//! (`serializer`), then the resulting payloads are wrapped in a backplane
//! envelope (`codec`) written with MessagePack primitives (`msgpack`). The
//! envelope format is shared by every server in a deployment and must stay
//! stable: new fields are only ever appended.

/// MessagePack primitives
pub mod msgpack;

/// Backplane envelope codec
pub mod codec;

/// Hub message serialization per sub-protocol
pub mod serializer;

/// JSON sub-protocol
pub mod json;

// Re-export commonly used types
pub use codec::{
    decode_ack, decode_completion, decode_group_command, decode_invocation, encode_ack,
    encode_completion, encode_group_command, encode_invocation, serialize_invocation, Ack,
    BackplaneCompletion, BackplaneInvocation, GroupAction, GroupCommand,
};
pub use json::{JsonHubProtocol, JSON_PROTOCOL_NAME};
pub use serializer::{serialize_message, HubProtocol, MessageSerializer, ProtocolRegistry};
