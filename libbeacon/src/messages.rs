//! The typed message model exchanged between dApps and wallets.
//!
//! Every message carries the common envelope fields (`id`, `senderId`, `version`) plus a payload discriminated by the
//! `type` field on the wire. Requests flow dApp → wallet; responses, errors and acknowledgements flow back, carrying
//! the `id` of the request they answer.

use crate::constants::BEACON_VERSION;
use crate::errors::{BeaconError, BeaconErrorType};
use crate::types::{AppMetadata, Network, PermissionScope, SigningType};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconMessage {
    pub id: String,
    pub sender_id: String,
    pub version: String,
    #[serde(flatten)]
    pub payload: MessagePayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePayload {
    PermissionRequest(PermissionRequest),
    PermissionResponse(PermissionResponse),
    OperationRequest(OperationRequest),
    OperationResponse(OperationResponse),
    SignPayloadRequest(SignPayloadRequest),
    SignPayloadResponse(SignPayloadResponse),
    BroadcastRequest(BroadcastRequest),
    BroadcastResponse(BroadcastResponse),
    Error(ErrorResponse),
    Acknowledge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    pub app_metadata: AppMetadata,
    pub network: Network,
    pub scopes: Vec<PermissionScope>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionResponse {
    pub public_key: String,
    pub network: Network,
    pub scopes: Vec<PermissionScope>,
}

/// A request to submit operations. The operation details are opaque to this crate and forwarded untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    pub network: Network,
    pub operation_details: Vec<serde_json::Value>,
    pub source_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResponse {
    pub operation_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignPayloadRequest {
    #[serde(default)]
    pub signing_type: SigningType,
    pub payload: String,
    pub source_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignPayloadResponse {
    #[serde(default)]
    pub signing_type: SigningType,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
    pub network: Network,
    pub signed_transaction: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastResponse {
    pub transaction_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_type: BeaconErrorType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_data: Option<serde_json::Value>,
}

impl From<ErrorResponse> for BeaconError {
    fn from(value: ErrorResponse) -> Self {
        BeaconError::new(value.error_type, value.error_data)
    }
}

/// The payload discriminant, without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    PermissionRequest,
    PermissionResponse,
    OperationRequest,
    OperationResponse,
    SignPayloadRequest,
    SignPayloadResponse,
    BroadcastRequest,
    BroadcastResponse,
    Error,
    Acknowledge,
}

impl MessageKind {
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            MessageKind::PermissionRequest
                | MessageKind::OperationRequest
                | MessageKind::SignPayloadRequest
                | MessageKind::BroadcastRequest
        )
    }
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageKind::PermissionRequest => "permission_request",
            MessageKind::PermissionResponse => "permission_response",
            MessageKind::OperationRequest => "operation_request",
            MessageKind::OperationResponse => "operation_response",
            MessageKind::SignPayloadRequest => "sign_payload_request",
            MessageKind::SignPayloadResponse => "sign_payload_response",
            MessageKind::BroadcastRequest => "broadcast_request",
            MessageKind::BroadcastResponse => "broadcast_response",
            MessageKind::Error => "error",
            MessageKind::Acknowledge => "acknowledge",
        };
        write!(f, "{s}")
    }
}

impl MessagePayload {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessagePayload::PermissionRequest(_) => MessageKind::PermissionRequest,
            MessagePayload::PermissionResponse(_) => MessageKind::PermissionResponse,
            MessagePayload::OperationRequest(_) => MessageKind::OperationRequest,
            MessagePayload::OperationResponse(_) => MessageKind::OperationResponse,
            MessagePayload::SignPayloadRequest(_) => MessageKind::SignPayloadRequest,
            MessagePayload::SignPayloadResponse(_) => MessageKind::SignPayloadResponse,
            MessagePayload::BroadcastRequest(_) => MessageKind::BroadcastRequest,
            MessagePayload::BroadcastResponse(_) => MessageKind::BroadcastResponse,
            MessagePayload::Error(_) => MessageKind::Error,
            MessagePayload::Acknowledge => MessageKind::Acknowledge,
        }
    }

    pub fn error(error_type: BeaconErrorType) -> Self {
        MessagePayload::Error(ErrorResponse { error_type, error_data: None })
    }
}

impl BeaconMessage {
    /// Wraps a payload in an envelope stamped with the current protocol version.
    pub fn new(id: impl Into<String>, sender_id: impl Into<String>, payload: MessagePayload) -> Self {
        Self { id: id.into(), sender_id: sender_id.into(), version: BEACON_VERSION.to_string(), payload }
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// The wallet error carried by this message, if it is an error response.
    pub fn as_error(&self) -> Option<BeaconError> {
        match &self.payload {
            MessagePayload::Error(e) => Some(e.clone().into()),
            _ => None,
        }
    }
}

impl Display for BeaconMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({}) from {}", self.kind(), self.id, self.sender_id)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::NetworkType;
    use serde_json::json;

    #[test]
    fn envelope_is_flat_with_a_type_tag() {
        let msg = BeaconMessage::new(
            "id1",
            "sender",
            MessagePayload::BroadcastRequest(BroadcastRequest {
                network: Network::new(NetworkType::Mainnet),
                signed_transaction: "abcd".into(),
            }),
        );
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "id1",
                "senderId": "sender",
                "version": "2",
                "type": "broadcast_request",
                "network": {"type": "mainnet"},
                "signedTransaction": "abcd"
            })
        );
        let back: BeaconMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn acknowledge_and_error_payloads() {
        let ack: BeaconMessage =
            serde_json::from_value(json!({"id": "1", "senderId": "s", "version": "2", "type": "acknowledge"})).unwrap();
        assert_eq!(ack.kind(), MessageKind::Acknowledge);
        assert!(ack.as_error().is_none());

        let err: BeaconMessage = serde_json::from_value(
            json!({"id": "1", "senderId": "s", "version": "2", "type": "error", "errorType": "ABORTED_ERROR"}),
        )
        .unwrap();
        let beacon_err = err.as_error().expect("error payload");
        assert_eq!(beacon_err.error_type, BeaconErrorType::AbortedError);
    }

    #[test]
    fn sign_request_defaults_to_raw_signing() {
        let msg: BeaconMessage = serde_json::from_value(json!({
            "id": "1", "senderId": "s", "version": "2", "type": "sign_payload_request",
            "payload": "05aa", "sourceAddress": "tz1"
        }))
        .unwrap();
        match msg.payload {
            MessagePayload::SignPayloadRequest(req) => assert_eq!(req.signing_type, SigningType::Raw),
            other => panic!("unexpected payload {other:?}"),
        }
        assert!(MessageKind::SignPayloadRequest.is_request());
        assert_eq!(MessageKind::SignPayloadRequest.to_string(), "sign_payload_request");
    }
}
