use beacon_transport::TransportError;
use libbeacon::errors::{CryptoError, InterceptorError, SerializerError, StorageError};
use libbeacon::{BeaconError, MessageKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Protocol error. {0}")]
    Protocol(#[from] SerializerError),
    #[error("No permission to send a {0} to the wallet.")]
    Permission(MessageKind),
    #[error("Rate limit reached. Please slow down.")]
    RateLimit,
    #[error("Transport error. {0}")]
    Transport(#[from] TransportError),
    #[error("The wallet answered with an error. {0}")]
    Wallet(BeaconError),
    #[error("Storage error. {0}")]
    Storage(#[from] StorageError),
    #[error("Interceptor error. {0}")]
    Interceptor(#[from] InterceptorError),
    #[error("Crypto error. {0}")]
    Crypto(#[from] CryptoError),
    #[error("No active account is set.")]
    NoActiveAccount,
    #[error("Invalid input. {0}")]
    InvalidInput(String),
    #[error("No transport available. {0}")]
    NoTransport(String),
    #[error("The client identity is unavailable. {0}")]
    Identity(String),
    #[error("Expected an answer to a {request} but got a {response}.")]
    UnexpectedResponse { request: MessageKind, response: MessageKind },
}

impl From<BeaconError> for ClientError {
    fn from(value: BeaconError) -> Self {
        ClientError::Wallet(value)
    }
}
