//! `graphql-ws` (subscriptions-transport-ws) handshake messages.

use serde::{Deserialize, Serialize};

use crate::types::Error;

/// WebSocket sub-protocol requested when probing.
pub const SUBSCRIPTION_PROTOCOL: &str = "graphql-ws";

pub mod message_type {
    pub const CONNECTION_INIT: &str = "connection_init";
    pub const CONNECTION_ACK: &str = "connection_ack";
    pub const CONNECTION_ERROR: &str = "connection_error";
    pub const KEEP_ALIVE: &str = "ka";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl OperationMessage {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            payload: None,
        }
    }

    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

pub fn encode_msg(msg: &OperationMessage) -> Result<String, Error> {
    Ok(serde_json::to_string(msg)?)
}

pub fn decode_msg(text: &str) -> Result<OperationMessage, Error> {
    Ok(serde_json::from_str(text)?)
}
