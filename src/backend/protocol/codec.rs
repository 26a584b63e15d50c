/**
 * Backplane Envelope Codec
 *
 * Encodes and decodes the four envelopes that travel between servers. The
 * envelope kind is never written on the wire: it is implied by the channel
 * the bytes arrive on, so each kind has its own typed decoder and the
 * receive path picks the one matching the channel.
 *
 * # Wire Format
 *
 * ```text
 * Invocation:    [excluded: [str], payloads: {str: bin}]
 *                [excluded: [str], payloads: {str: bin}, invocation_id: str?, return_channel: str?]
 * GroupCommand:  [id: int, server_name: str, action: int, group_name: str, connection_id: str]
 * Ack:           [id: int]
 * Completion:    [protocol_name: str, completion: bin]
 * ```
 *
 * # Forward Compatibility
 *
 * Decoders check that the declared array length reaches the minimum for the
 * envelope, read the fields they know, and skip any further elements. New
 * optional fields must therefore only ever be appended.
 */

use bytes::{Bytes, BytesMut};

use crate::backend::error::BackplaneError;
use crate::backend::protocol::msgpack::{self, MessageReader};
use crate::backend::protocol::serializer::MessageSerializer;
use crate::shared::{HubMessage, ProtocolError, SerializedMessage};

/// A hub invocation fanned out to every server listening on a channel
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BackplaneInvocation {
    /// Connections that must not receive the message
    pub excluded_connection_ids: Vec<String>,
    /// One serialization per sub-protocol, keyed by protocol name
    pub payloads: Vec<SerializedMessage>,
    /// Set when the sender expects a client result
    pub invocation_id: Option<String>,
    /// Channel the client result must be published to
    pub return_channel: Option<String>,
}

impl BackplaneInvocation {
    pub fn new(excluded_connection_ids: Vec<String>, payloads: Vec<SerializedMessage>) -> Self {
        Self {
            excluded_connection_ids,
            payloads,
            invocation_id: None,
            return_channel: None,
        }
    }

    /// Ask for the client result to be sent back on `return_channel`
    pub fn with_result_routing(
        mut self,
        invocation_id: impl Into<String>,
        return_channel: impl Into<String>,
    ) -> Self {
        self.invocation_id = Some(invocation_id.into());
        self.return_channel = Some(return_channel.into());
        self
    }

    /// The serialization for `protocol_name`, if the sender produced one
    pub fn payload_for(&self, protocol_name: &str) -> Option<&Bytes> {
        self.payloads
            .iter()
            .find(|message| message.protocol_name == protocol_name)
            .map(|message| &message.payload)
    }

    pub fn is_excluded(&self, connection_id: &str) -> bool {
        self.excluded_connection_ids
            .iter()
            .any(|excluded| excluded == connection_id)
    }

    pub fn expects_result(&self) -> bool {
        self.invocation_id.is_some() || self.return_channel.is_some()
    }
}

/// Group membership change requested by one server of the server owning a connection
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupAction {
    Add = 1,
    Remove = 2,
}

impl GroupAction {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Add),
            2 => Some(Self::Remove),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupCommand {
    /// Correlation id, unique for the origin server's lifetime
    pub id: i64,
    /// Origin server; the ack goes to its ack channel
    pub server_name: String,
    pub action: GroupAction,
    pub group_name: String,
    pub connection_id: String,
}

/// Acknowledges the group command with the same id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ack {
    pub id: i64,
}

/// A serialized client result on its way back to the invoking server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackplaneCompletion {
    /// Protocol that serialized `completion`
    pub protocol_name: String,
    pub completion: Bytes,
}

const INVOCATION_MIN_LEN: usize = 2;
const INVOCATION_ROUTED_LEN: usize = 4;
const GROUP_COMMAND_LEN: usize = 5;
const ACK_LEN: usize = 1;
const COMPLETION_LEN: usize = 2;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

pub fn encode_invocation(invocation: &BackplaneInvocation) -> Bytes {
    let mut buf = BytesMut::with_capacity(
        16 + invocation
            .payloads
            .iter()
            .map(|message| message.protocol_name.len() + message.payload.len() + 10)
            .sum::<usize>(),
    );

    let routed = invocation.expects_result();
    msgpack::write_array_header(
        &mut buf,
        if routed {
            INVOCATION_ROUTED_LEN
        } else {
            INVOCATION_MIN_LEN
        },
    );

    msgpack::write_array_header(&mut buf, invocation.excluded_connection_ids.len());
    for connection_id in &invocation.excluded_connection_ids {
        msgpack::write_str(&mut buf, connection_id);
    }

    msgpack::write_map_header(&mut buf, invocation.payloads.len());
    for message in &invocation.payloads {
        msgpack::write_str(&mut buf, &message.protocol_name);
        msgpack::write_bin(&mut buf, &message.payload);
    }

    if routed {
        msgpack::write_optional_str(&mut buf, invocation.invocation_id.as_deref());
        msgpack::write_optional_str(&mut buf, invocation.return_channel.as_deref());
    }

    buf.freeze()
}

/// Serialize `message` for every configured protocol and wrap it in an invocation envelope
///
/// # Arguments
///
/// * `message` - The hub message to fan out
/// * `serializer` - Produces one payload per configured sub-protocol
/// * `excluded_connection_ids` - Connections that must not receive it
/// * `result_routing` - `(invocation_id, return_channel)` when a client result is expected
pub fn serialize_invocation(
    message: &HubMessage,
    serializer: &MessageSerializer,
    excluded_connection_ids: &[String],
    result_routing: Option<(&str, &str)>,
) -> Result<Bytes, BackplaneError> {
    let payloads = serializer.serialize(message)?;
    let mut invocation = BackplaneInvocation::new(excluded_connection_ids.to_vec(), payloads);
    if let Some((invocation_id, return_channel)) = result_routing {
        invocation = invocation.with_result_routing(invocation_id, return_channel);
    }
    Ok(encode_invocation(&invocation))
}

pub fn encode_group_command(command: &GroupCommand) -> Bytes {
    let mut buf = BytesMut::with_capacity(
        16 + command.server_name.len() + command.group_name.len() + command.connection_id.len(),
    );
    msgpack::write_array_header(&mut buf, GROUP_COMMAND_LEN);
    msgpack::write_int(&mut buf, command.id);
    msgpack::write_str(&mut buf, &command.server_name);
    msgpack::write_int(&mut buf, command.action as u8 as i64);
    msgpack::write_str(&mut buf, &command.group_name);
    msgpack::write_str(&mut buf, &command.connection_id);
    buf.freeze()
}

pub fn encode_ack(ack: Ack) -> Bytes {
    let mut buf = BytesMut::with_capacity(10);
    msgpack::write_array_header(&mut buf, ACK_LEN);
    msgpack::write_int(&mut buf, ack.id);
    buf.freeze()
}

pub fn encode_completion(completion: &BackplaneCompletion) -> Bytes {
    let mut buf =
        BytesMut::with_capacity(16 + completion.protocol_name.len() + completion.completion.len());
    msgpack::write_array_header(&mut buf, COMPLETION_LEN);
    msgpack::write_str(&mut buf, &completion.protocol_name);
    msgpack::write_bin(&mut buf, &completion.completion);
    buf.freeze()
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

fn read_envelope_len(
    reader: &mut MessageReader,
    message_type: &'static str,
    minimum: usize,
) -> Result<usize, ProtocolError> {
    let len = reader.read_array_len()?;
    if len < minimum {
        return Err(ProtocolError::array_too_short(message_type, minimum, len));
    }
    Ok(len)
}

fn skip_trailing(reader: &mut MessageReader, declared: usize, read: usize) -> Result<(), ProtocolError> {
    for _ in read..declared {
        reader.skip_value()?;
    }
    Ok(())
}

pub fn decode_invocation(payload: Bytes) -> Result<BackplaneInvocation, ProtocolError> {
    let mut reader = MessageReader::new(payload);
    let len = read_envelope_len(&mut reader, "Invocation", INVOCATION_MIN_LEN)?;

    let excluded_len = reader.read_array_len()?;
    let mut excluded_connection_ids = Vec::with_capacity(excluded_len.min(reader.remaining()));
    for _ in 0..excluded_len {
        excluded_connection_ids.push(reader.read_str()?);
    }

    let payload_len = reader.read_map_len()?;
    let mut payloads: Vec<SerializedMessage> =
        Vec::with_capacity(payload_len.min(reader.remaining()));
    for _ in 0..payload_len {
        let protocol_name = reader.read_str()?;
        let payload = reader.read_bin()?;
        if payloads.iter().any(|m| m.protocol_name == protocol_name) {
            return Err(ProtocolError::DuplicateProtocol(protocol_name));
        }
        payloads.push(SerializedMessage::new(protocol_name, payload));
    }

    let mut invocation = BackplaneInvocation::new(excluded_connection_ids, payloads);
    let mut read = INVOCATION_MIN_LEN;
    if len >= INVOCATION_ROUTED_LEN {
        invocation.invocation_id = reader.read_optional_str()?;
        invocation.return_channel = reader.read_optional_str()?;
        read = INVOCATION_ROUTED_LEN;
    }
    skip_trailing(&mut reader, len, read)?;

    Ok(invocation)
}

pub fn decode_group_command(payload: Bytes) -> Result<GroupCommand, ProtocolError> {
    let mut reader = MessageReader::new(payload);
    let len = read_envelope_len(&mut reader, "GroupCommand", GROUP_COMMAND_LEN)?;

    let id = reader.read_int()?;
    let server_name = reader.read_str()?;
    let raw_action = reader.read_u8()?;
    let action = GroupAction::from_u8(raw_action).ok_or(ProtocolError::InvalidGroupAction(raw_action))?;
    let group_name = reader.read_str()?;
    let connection_id = reader.read_str()?;
    skip_trailing(&mut reader, len, GROUP_COMMAND_LEN)?;

    Ok(GroupCommand {
        id,
        server_name,
        action,
        group_name,
        connection_id,
    })
}

pub fn decode_ack(payload: Bytes) -> Result<Ack, ProtocolError> {
    let mut reader = MessageReader::new(payload);
    let len = read_envelope_len(&mut reader, "Ack", ACK_LEN)?;
    let id = reader.read_int()?;
    skip_trailing(&mut reader, len, ACK_LEN)?;
    Ok(Ack { id })
}

pub fn decode_completion(payload: Bytes) -> Result<BackplaneCompletion, ProtocolError> {
    let mut reader = MessageReader::new(payload);
    let len = read_envelope_len(&mut reader, "Completion", COMPLETION_LEN)?;
    let protocol_name = reader.read_str()?;
    let completion = reader.read_bin()?;
    skip_trailing(&mut reader, len, COMPLETION_LEN)?;
    Ok(BackplaneCompletion {
        protocol_name,
        completion,
    })
}
