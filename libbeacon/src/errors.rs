use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// Failure to turn wire text back into a message.
#[derive(Debug, Error)]
pub enum SerializerError {
    #[error("Invalid checksum encoding. {0}")]
    Decoding(#[from] bs58::decode::Error),
    #[error("Decoded payload is not valid UTF-8. {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("Invalid JSON payload. {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error. {0}")]
    Io(#[from] std::io::Error),
    #[error("Stored value could not be de/encoded. {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("Invalid base58check string. {0}")]
    Encoding(#[from] bs58::decode::Error),
    #[error("Invalid hex string. {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("Encryption failed")]
    Encryption,
    #[error("Decryption failed. The payload was not meant for us or has been tampered with.")]
    Decryption,
    #[error("Ciphertext is too short")]
    Truncated,
}

#[derive(Debug, Error)]
pub enum InterceptorError {
    #[error("AppMetadata not found for sender {0}")]
    MissingAppMetadata(String),
    #[error("Storage error. {0}")]
    Storage(#[from] StorageError),
    #[error("Crypto error. {0}")]
    Crypto(#[from] CryptoError),
}

#[derive(Debug, Error)]
#[error("Event handler failed: {0}")]
pub struct EventHandlerError(pub String);

impl EventHandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// The reason a wallet gave for refusing or failing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BeaconErrorType {
    BroadcastError,
    NetworkNotSupported,
    NoAddressError,
    NoPrivateKeyFoundError,
    NotGrantedError,
    ParametersInvalidError,
    TooManyOperations,
    TransactionInvalidError,
    SignatureTypeNotSupported,
    EncryptionTypeNotSupported,
    AbortedError,
    UnknownError,
}

impl BeaconErrorType {
    pub fn title(&self) -> &'static str {
        match self {
            BeaconErrorType::BroadcastError => "Broadcast Error",
            BeaconErrorType::NetworkNotSupported => "Network Error",
            BeaconErrorType::NoAddressError => "No Address",
            BeaconErrorType::NoPrivateKeyFoundError => "Account Not Found",
            BeaconErrorType::NotGrantedError => "Permission Not Granted",
            BeaconErrorType::ParametersInvalidError => "Parameters Invalid",
            BeaconErrorType::TooManyOperations => "Too Many Operations",
            BeaconErrorType::TransactionInvalidError => "Transaction Invalid",
            BeaconErrorType::SignatureTypeNotSupported => "Signature Type Not Supported",
            BeaconErrorType::EncryptionTypeNotSupported => "Encryption Type Not Supported",
            BeaconErrorType::AbortedError => "Aborted",
            BeaconErrorType::UnknownError => "Error",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            BeaconErrorType::BroadcastError => "The transaction could not be broadcast to the network.",
            BeaconErrorType::NetworkNotSupported => "The wallet does not support this network.",
            BeaconErrorType::NoAddressError => "The wallet does not have an account set up.",
            BeaconErrorType::NoPrivateKeyFoundError => "The account you are trying to interact with is not available.",
            BeaconErrorType::NotGrantedError => "You do not have the necessary permissions to perform this action.",
            BeaconErrorType::ParametersInvalidError => "Some of the parameters you provided are invalid.",
            BeaconErrorType::TooManyOperations => "The request contains too many transactions.",
            BeaconErrorType::TransactionInvalidError => "The transaction is invalid and the node did not accept it.",
            BeaconErrorType::SignatureTypeNotSupported => "The wallet is not able to sign payloads of this type.",
            BeaconErrorType::EncryptionTypeNotSupported => "The wallet is not able to encrypt payloads of this type.",
            BeaconErrorType::AbortedError => "The action was aborted by the user.",
            BeaconErrorType::UnknownError => "An unknown error occurred.",
        }
    }
}

impl Display for BeaconErrorType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // The wire name is the canonical display form
        match serde_json::to_value(self) {
            Ok(serde_json::Value::String(s)) => write!(f, "{s}"),
            _ => write!(f, "{self:?}"),
        }
    }
}

/// A wallet-originated error, delivered to the dApp as an error-discriminated response.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("[{error_type}]:{}", .error_type.description())]
pub struct BeaconError {
    pub error_type: BeaconErrorType,
    pub error_data: Option<serde_json::Value>,
}

impl BeaconError {
    pub fn new(error_type: BeaconErrorType, error_data: Option<serde_json::Value>) -> Self {
        Self { error_type, error_data }
    }

    pub fn title(&self) -> &'static str {
        self.error_type.title()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_types_use_screaming_wire_names() {
        let s = serde_json::to_string(&BeaconErrorType::NoPrivateKeyFoundError).unwrap();
        assert_eq!(s, "\"NO_PRIVATE_KEY_FOUND_ERROR\"");
        let t: BeaconErrorType = serde_json::from_str("\"TOO_MANY_OPERATIONS\"").unwrap();
        assert_eq!(t, BeaconErrorType::TooManyOperations);
        assert_eq!(BeaconErrorType::AbortedError.to_string(), "ABORTED_ERROR");
    }

    #[test]
    fn beacon_error_message() {
        let err = BeaconError::new(BeaconErrorType::AbortedError, None);
        assert_eq!(err.to_string(), "[ABORTED_ERROR]:The action was aborted by the user.");
        assert_eq!(err.title(), "Aborted");
    }
}
