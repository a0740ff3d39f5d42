//! Client identity.

use crate::errors::ClientError;
use libbeacon::constants::SDK_VERSION;
use libbeacon::crypto::{CryptoProvider, KeyPair};
use libbeacon::errors::StorageError;
use libbeacon::storage::{load, save};
use libbeacon::{generate_id, Deferred, Storage, StorageKey};
use log::*;
use std::sync::Arc;

/// Loads the secret seed from storage, creating and saving a fresh one on first use.
pub async fn load_or_create_seed(storage: &dyn Storage) -> Result<String, StorageError> {
    if let Some(seed) = load::<String>(storage, StorageKey::BeaconSdkSecretSeed).await? {
        return Ok(seed);
    }
    let seed = generate_id();
    save(storage, StorageKey::BeaconSdkSecretSeed, &seed).await?;
    info!("Created a new client identity");
    Ok(seed)
}

/// A client's cryptographic identity.
///
/// The keypair is derived from a seed persisted in storage, so the identity survives restarts. Derivation runs on a
/// background task started by [`BeaconClient::new`] (which must therefore be called inside a tokio runtime); the
/// keypair and the `beaconId` become available through [`Deferred`] handles as soon as it completes.
pub struct BeaconClient {
    name: String,
    keypair: Deferred<KeyPair, String>,
    beacon_id: Deferred<String, String>,
}

impl BeaconClient {
    pub fn new(name: impl Into<String>, storage: Arc<dyn Storage>, crypto: Arc<dyn CryptoProvider>) -> Self {
        let keypair = Deferred::new();
        let beacon_id = Deferred::new();
        let (kp, id) = (keypair.clone(), beacon_id.clone());
        tokio::spawn(async move {
            match load_or_create_seed(storage.as_ref()).await {
                Ok(seed) => {
                    if let Err(e) = save(storage.as_ref(), StorageKey::BeaconSdkVersion, &SDK_VERSION).await {
                        warn!("Could not record the SDK version. {e}");
                    }
                    let derived = crypto.keypair_from_seed(&seed);
                    debug!("Client identity is {}", derived.public_key_hex());
                    id.resolve(derived.public_key_hex());
                    kp.resolve(derived);
                }
                Err(e) => {
                    error!("Could not load the client identity. {e}");
                    id.reject(e.to_string());
                    kp.reject(e.to_string());
                }
            }
        });
        Self { name: name.into(), keypair, beacon_id }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The handle that settles with the hex-encoded public key.
    pub fn beacon_id_handle(&self) -> Deferred<String, String> {
        self.beacon_id.clone()
    }

    pub async fn beacon_id(&self) -> Result<String, ClientError> {
        self.beacon_id.wait().await.map_err(ClientError::Identity)
    }

    pub async fn keypair(&self) -> Result<KeyPair, ClientError> {
        self.keypair.wait().await.map_err(ClientError::Identity)
    }
}
