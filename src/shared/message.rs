/**
 * Hub Message Types
 *
 * Application-level messages that the hub layer hands to the backplane.
 * The backplane never inspects their contents beyond asking a sub-protocol
 * to serialize them; only completions are read back, to correlate client
 * results with the invocation that asked for them.
 */
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A hub method call targeted at one or more clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvocationMessage {
    /// Present only when the caller expects a result back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    /// Client method name
    pub target: String,
    /// Method arguments
    #[serde(default)]
    pub arguments: Vec<serde_json::Value>,
}

impl InvocationMessage {
    /// Create a fire-and-forget invocation
    pub fn new(target: impl Into<String>, arguments: Vec<serde_json::Value>) -> Self {
        Self {
            invocation_id: None,
            target: target.into(),
            arguments,
        }
    }

    /// Attach an invocation id, turning this into a client-result request
    pub fn with_invocation_id(mut self, invocation_id: impl Into<String>) -> Self {
        self.invocation_id = Some(invocation_id.into());
        self
    }
}

/// The outcome a client reports for an invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletionMessage {
    pub invocation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompletionMessage {
    /// Successful completion carrying a result value
    pub fn with_result(invocation_id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Failed completion carrying an error message
    pub fn with_error(invocation_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Messages the backplane can carry on behalf of the hub
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation(InvocationMessage),
    Completion(CompletionMessage),
}

impl From<InvocationMessage> for HubMessage {
    fn from(message: InvocationMessage) -> Self {
        Self::Invocation(message)
    }
}

impl From<CompletionMessage> for HubMessage {
    fn from(message: CompletionMessage) -> Self {
        Self::Completion(message)
    }
}

/// One protocol-tagged serialization of a hub message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedMessage {
    /// Sub-protocol that produced `payload`
    pub protocol_name: String,
    /// Serialized bytes, ready to write to a client of that protocol
    pub payload: Bytes,
}

impl SerializedMessage {
    pub fn new(protocol_name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            protocol_name: protocol_name.into(),
            payload: payload.into(),
        }
    }
}
