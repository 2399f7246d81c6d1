//! # Auxiliary Messages
//!
//! Control messages exchanged with the helper process, one JSON object per
//! line:
//!
//! ```text
//! {"op": <code>, "payload": <object or null>}
//! ```
//!
//! Op codes are scoped per direction: clientbound messages flow from the
//! proxy to the helper, serverbound ones from the helper to the proxy.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{constants, ProtocolError, Result};

/// Operation codes
pub mod op {
    /// Proxy to helper
    pub mod clientbound {
        pub const KEEP_ALIVE_REQUEST: u8 = 0;
        pub const ENCRYPTION_DATA_REQUEST: u8 = 1;
        pub const MODULE_TOGGLE: u8 = 2;
    }

    /// Helper to proxy
    pub mod serverbound {
        pub const KEEP_ALIVE_RESPONSE: u8 = 0;
        pub const HANDSHAKE: u8 = 1;
        pub const ENCRYPTION_DATA_RESPONSE: u8 = 2;
        pub const MODULE_TOGGLE_ACK: u8 = 3;
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    op: u8,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionDataRequest {
    pub public_key: Vec<u8>,
    pub server_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleToggle {
    pub identifier: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakePayload {
    pub identity: String,
    pub auth_key: String,
}

/// Shared-secret candidates recovered by the helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionData {
    pub candidates: Vec<Vec<u8>>,
    /// Verify token as sealed under the real secret's keystream, when the
    /// helper observed it. Without it every candidate is tried against the
    /// server's first encrypted frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sealed_token: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleToggleAck {
    pub identifier: String,
    pub status: bool,
}

/// Messages the proxy sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientboundMessage {
    KeepAliveRequest,
    EncryptionDataRequest(EncryptionDataRequest),
    ModuleToggle(ModuleToggle),
}

/// Messages the helper sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerboundMessage {
    KeepAliveResponse,
    Handshake(HandshakePayload),
    EncryptionDataResponse(EncryptionData),
    ModuleToggleAck(ModuleToggleAck),
}

fn encode_line(op: u8, payload: Value) -> Result<String> {
    Ok(serde_json::to_string(&Envelope { op, payload })?)
}

impl ClientboundMessage {
    pub fn op(&self) -> u8 {
        match self {
            ClientboundMessage::KeepAliveRequest => op::clientbound::KEEP_ALIVE_REQUEST,
            ClientboundMessage::EncryptionDataRequest(_) => op::clientbound::ENCRYPTION_DATA_REQUEST,
            ClientboundMessage::ModuleToggle(_) => op::clientbound::MODULE_TOGGLE,
        }
    }

    pub fn to_line(&self) -> Result<String> {
        let payload = match self {
            ClientboundMessage::KeepAliveRequest => Value::Null,
            ClientboundMessage::EncryptionDataRequest(p) => serde_json::to_value(p)?,
            ClientboundMessage::ModuleToggle(p) => serde_json::to_value(p)?,
        };
        encode_line(self.op(), payload)
    }

    pub fn from_line(line: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(line)?;
        match envelope.op {
            op::clientbound::KEEP_ALIVE_REQUEST => Ok(ClientboundMessage::KeepAliveRequest),
            op::clientbound::ENCRYPTION_DATA_REQUEST => Ok(
                ClientboundMessage::EncryptionDataRequest(serde_json::from_value(envelope.payload)?),
            ),
            op::clientbound::MODULE_TOGGLE => Ok(ClientboundMessage::ModuleToggle(
                serde_json::from_value(envelope.payload)?,
            )),
            other => Err(ProtocolError::AuxiliaryError(format!(
                "{}: {other}",
                constants::ERR_UNKNOWN_OPERATION
            ))),
        }
    }
}

impl ServerboundMessage {
    pub fn op(&self) -> u8 {
        match self {
            ServerboundMessage::KeepAliveResponse => op::serverbound::KEEP_ALIVE_RESPONSE,
            ServerboundMessage::Handshake(_) => op::serverbound::HANDSHAKE,
            ServerboundMessage::EncryptionDataResponse(_) => {
                op::serverbound::ENCRYPTION_DATA_RESPONSE
            }
            ServerboundMessage::ModuleToggleAck(_) => op::serverbound::MODULE_TOGGLE_ACK,
        }
    }

    pub fn to_line(&self) -> Result<String> {
        let payload = match self {
            ServerboundMessage::KeepAliveResponse => Value::Null,
            ServerboundMessage::Handshake(p) => serde_json::to_value(p)?,
            ServerboundMessage::EncryptionDataResponse(p) => serde_json::to_value(p)?,
            ServerboundMessage::ModuleToggleAck(p) => serde_json::to_value(p)?,
        };
        encode_line(self.op(), payload)
    }

    pub fn from_line(line: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(line)?;
        match envelope.op {
            op::serverbound::KEEP_ALIVE_RESPONSE => Ok(ServerboundMessage::KeepAliveResponse),
            op::serverbound::HANDSHAKE => Ok(ServerboundMessage::Handshake(
                serde_json::from_value(envelope.payload)?,
            )),
            op::serverbound::ENCRYPTION_DATA_RESPONSE => Ok(
                ServerboundMessage::EncryptionDataResponse(serde_json::from_value(envelope.payload)?),
            ),
            op::serverbound::MODULE_TOGGLE_ACK => Ok(ServerboundMessage::ModuleToggleAck(
                serde_json::from_value(envelope.payload)?,
            )),
            other => Err(ProtocolError::AuxiliaryError(format!(
                "{}: {other}",
                constants::ERR_UNKNOWN_OPERATION
            ))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_wire_format() {
        let message = ServerboundMessage::from_line(
            r#"{"op":1,"payload":{"identity":"Steve","authKey":"k-123"}}"#,
        )
        .unwrap();
        assert_eq!(
            message,
            ServerboundMessage::Handshake(HandshakePayload {
                identity: "Steve".to_string(),
                auth_key: "k-123".to_string(),
            })
        );
    }

    #[test]
    fn test_keepalive_without_payload() {
        assert_eq!(
            ServerboundMessage::from_line(r#"{"op":0}"#).unwrap(),
            ServerboundMessage::KeepAliveResponse
        );
        assert_eq!(
            ClientboundMessage::KeepAliveRequest.to_line().unwrap(),
            r#"{"op":0,"payload":null}"#
        );
    }

    #[test]
    fn test_candidates_are_byte_arrays() {
        let message = ServerboundMessage::from_line(
            r#"{"op":2,"payload":{"candidates":[[1,2,3],[255]]}}"#,
        )
        .unwrap();
        assert_eq!(
            message,
            ServerboundMessage::EncryptionDataResponse(EncryptionData {
                candidates: vec![vec![1, 2, 3], vec![255]],
                sealed_token: None,
            })
        );
    }

    #[test]
    fn test_encryption_request_field_names() {
        let line = ClientboundMessage::EncryptionDataRequest(EncryptionDataRequest {
            public_key: vec![9],
            server_id: String::new(),
        })
        .to_line()
        .unwrap();
        assert_eq!(line, r#"{"op":1,"payload":{"publicKey":[9],"serverId":""}}"#);
    }

    #[test]
    fn test_unknown_op_rejected() {
        assert!(matches!(
            ServerboundMessage::from_line(r#"{"op":42,"payload":null}"#),
            Err(ProtocolError::AuxiliaryError(_))
        ));
        assert!(ServerboundMessage::from_line("not json").is_err());
    }
}
