//! Shared domain types: networks, scopes, accounts, grants, app metadata and peers.

use crate::constants::{BEACON_VERSION, PAIRING_REQUEST_TYPE, PAIRING_RESPONSE_TYPE};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    #[default]
    Mainnet,
    Ghostnet,
    Custom,
}

impl Display for NetworkType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkType::Mainnet => write!(f, "mainnet"),
            NetworkType::Ghostnet => write!(f, "ghostnet"),
            NetworkType::Custom => write!(f, "custom"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    #[serde(rename = "type")]
    pub network_type: NetworkType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
}

impl Network {
    pub fn new(network_type: NetworkType) -> Self {
        Self { network_type, name: None, rpc_url: None }
    }

    pub fn custom<S: Into<String>>(name: S, rpc_url: S) -> Self {
        Self { network_type: NetworkType::Custom, name: Some(name.into()), rpc_url: Some(rpc_url.into()) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionScope {
    Sign,
    OperationRequest,
    Encrypt,
    Threshold,
}

impl PermissionScope {
    /// The scopes asked for when the dApp does not specify any.
    pub fn defaults() -> Vec<PermissionScope> {
        vec![PermissionScope::OperationRequest, PermissionScope::Sign]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningType {
    #[default]
    Raw,
    Operation,
    Micheline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// A browser-extension message bridge.
    PostMessage,
    /// The relay-assisted, end-to-end encrypted peer-to-peer channel.
    P2p,
}

impl Display for TransportKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::PostMessage => write!(f, "post_message"),
            TransportKind::P2p => write!(f, "p2p"),
        }
    }
}

/// Where a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Extension,
    Website,
    P2p,
}

/// The origin of an inbound message plus an origin-specific sender id (extension id or peer public key).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionContext {
    pub origin: Origin,
    pub id: String,
}

impl ConnectionContext {
    pub fn new<S: Into<String>>(origin: Origin, id: S) -> Self {
        Self { origin, id: id.into() }
    }
}

impl Display for ConnectionContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}:{}", self.origin, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppMetadata {
    pub sender_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// A dApp-side record of an account the wallet granted access to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub account_identifier: String,
    pub sender_id: String,
    pub origin: ConnectionContext,
    pub address: String,
    pub public_key: String,
    pub network: Network,
    pub scopes: Vec<PermissionScope>,
    /// Unix epoch milliseconds.
    pub connected_at: i64,
}

/// A wallet-side record of a grant given to a dApp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionInfo {
    pub account_identifier: String,
    pub sender_id: String,
    pub app_metadata: AppMetadata,
    pub address: String,
    pub public_key: String,
    pub network: Network,
    pub scopes: Vec<PermissionScope>,
    /// Unix epoch milliseconds.
    pub connected_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub name: String,
    pub public_key: String,
    pub relay_server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// The out-of-band pairing payload a dApp hands to a wallet (usually as a QR code or deep link).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub version: String,
    pub public_key: String,
    pub relay_server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// The wallet's answer to a [`PairingRequest`], sent over the relay once the channel is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub version: String,
    pub public_key: String,
    pub relay_server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl PairingRequest {
    pub fn new(id: String, name: String, public_key: String, relay_server: String, icon: Option<String>) -> Self {
        let kind = PAIRING_REQUEST_TYPE.to_string();
        let version = BEACON_VERSION.to_string();
        Self { id, kind, name, version, public_key, relay_server, icon }
    }

    pub fn to_peer_info(&self) -> PeerInfo {
        PeerInfo {
            name: self.name.clone(),
            public_key: self.public_key.clone(),
            relay_server: self.relay_server.clone(),
            icon: self.icon.clone(),
        }
    }
}

impl PairingResponse {
    pub fn new(id: String, name: String, public_key: String, relay_server: String, icon: Option<String>) -> Self {
        let kind = PAIRING_RESPONSE_TYPE.to_string();
        let version = BEACON_VERSION.to_string();
        Self { id, kind, name, version, public_key, relay_server, icon }
    }

    pub fn to_peer_info(&self) -> PeerInfo {
        PeerInfo {
            name: self.name.clone(),
            public_key: self.public_key.clone(),
            relay_server: self.relay_server.clone(),
            icon: self.icon.clone(),
        }
    }
}

/// The current time as Unix epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn network_wire_format() {
        let net = Network::custom("local", "http://localhost:8732");
        let json = serde_json::to_value(&net).unwrap();
        assert_eq!(json, serde_json::json!({"type": "custom", "name": "local", "rpcUrl": "http://localhost:8732"}));
        let mainnet: Network = serde_json::from_str(r#"{"type":"mainnet"}"#).unwrap();
        assert_eq!(mainnet, Network::new(NetworkType::Mainnet));
    }

    #[test]
    fn scopes_use_snake_case() {
        let json = serde_json::to_string(&PermissionScope::defaults()).unwrap();
        assert_eq!(json, r#"["operation_request","sign"]"#);
    }

    #[test]
    fn pairing_payload_types() {
        let req = PairingRequest::new("abc".into(), "dapp".into(), "aa".repeat(32), "relay".into(), None);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["type"], "p2p-pairing-request");
        assert_eq!(json["publicKey"], "aa".repeat(32));
        let resp = PairingResponse::new("abc".into(), "wallet".into(), "bb".repeat(32), "relay".into(), None);
        assert_eq!(resp.kind, "p2p-pairing-response");
        assert_eq!(resp.to_peer_info().name, "wallet");
        assert_eq!(req.to_peer_info().relay_server, "relay");
    }
}
