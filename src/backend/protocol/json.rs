//! JSON hub sub-protocol
//!
//! Each message is a JSON object with a numeric `type` field, terminated by
//! the ASCII record separator (0x1E) so clients can split a stream of them.

use bytes::Bytes;
use serde_json::Value;

use crate::backend::error::BackplaneError;
use crate::backend::protocol::serializer::HubProtocol;
use crate::shared::{CompletionMessage, HubMessage};

pub const JSON_PROTOCOL_NAME: &str = "json";

/// Terminates every JSON message
pub const RECORD_SEPARATOR: u8 = 0x1e;

const INVOCATION_TYPE: u64 = 1;
const COMPLETION_TYPE: u64 = 3;

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonHubProtocol;

impl HubProtocol for JsonHubProtocol {
    fn name(&self) -> &str {
        JSON_PROTOCOL_NAME
    }

    fn write_message(&self, message: &HubMessage) -> Result<Bytes, BackplaneError> {
        let (kind, mut value) = match message {
            HubMessage::Invocation(invocation) => (INVOCATION_TYPE, serde_json::to_value(invocation)?),
            HubMessage::Completion(completion) => (COMPLETION_TYPE, serde_json::to_value(completion)?),
        };
        if let Value::Object(fields) = &mut value {
            fields.insert("type".to_string(), Value::from(kind));
        }
        let mut bytes = serde_json::to_vec(&value)?;
        bytes.push(RECORD_SEPARATOR);
        Ok(Bytes::from(bytes))
    }

    fn read_completion(&self, payload: &[u8]) -> Result<CompletionMessage, BackplaneError> {
        let body = payload.strip_suffix(&[RECORD_SEPARATOR]).unwrap_or(payload);
        let mut value: Value = serde_json::from_slice(body)?;
        let kind = value
            .as_object_mut()
            .and_then(|fields| fields.remove("type"))
            .and_then(|kind| kind.as_u64());
        if kind != Some(COMPLETION_TYPE) {
            return Err(BackplaneError::transport(format!(
                "expected a completion message, found type {:?}",
                kind
            )));
        }
        Ok(serde_json::from_value(value)?)
    }
}
