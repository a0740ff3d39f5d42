use libbeacon::errors::{CryptoError, SerializerError, StorageError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("The transport is not connected.")]
    NotConnected,
    #[error("There are no peers to send the message to.")]
    NoPeers,
    #[error("Unknown peer: {0}")]
    UnknownPeer(String),
    #[error("This transport does not support {0}.")]
    Unsupported(&'static str),
    #[error("Relay error. {0}")]
    Relay(String),
    #[error("Extension bridge error. {0}")]
    Bridge(String),
    #[error("The connection was closed.")]
    Closed,
    #[error("Pairing was abandoned before a peer connected.")]
    PairingAborted,
    #[error("Invalid payload. {0}")]
    InvalidPayload(String),
    #[error("I/O error. {0}")]
    Io(#[from] std::io::Error),
    #[error("Crypto error. {0}")]
    Crypto(#[from] CryptoError),
    #[error("Storage error. {0}")]
    Storage(#[from] StorageError),
    #[error("Serialization error. {0}")]
    Serialization(#[from] SerializerError),
    #[error("Invalid JSON. {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid hex payload. {0}")]
    Hex(#[from] hex::FromHexError),
}

impl TransportError {
    pub fn relay(msg: impl Into<String>) -> Self {
        TransportError::Relay(msg.into())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::Relay(value.to_string())
    }
}

/// A transport listener failed to process a message.
#[derive(Debug, Error)]
#[error("Listener failed: {0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}
