//! Typed views over the persisted lists: accounts, app metadata, permission grants and peers.
//!
//! All of them are thin wrappers around [`StorageManager`], which stores a JSON list under one [`StorageKey`] and
//! offers get-all / get-one / add-or-replace / remove / remove-all. There is no locking across the read-modify-write
//! cycle; concurrent writers to the same key may lose updates.

use crate::crypto::CryptoProvider;
use crate::errors::StorageError;
use crate::messages::{BeaconMessage, MessagePayload};
use crate::migration::migrate_record;
use crate::storage::{load, save, Storage, StorageKey};
use crate::types::{AccountInfo, AppMetadata, PeerInfo, PermissionInfo, PermissionScope};
use log::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

pub struct StorageManager<T> {
    storage: Arc<dyn Storage>,
    key: StorageKey,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StorageManager<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(storage: Arc<dyn Storage>, key: StorageKey) -> Self {
        Self { storage, key, _marker: PhantomData }
    }

    pub fn key(&self) -> StorageKey {
        self.key
    }

    pub async fn get_all(&self) -> Result<Vec<T>, StorageError> {
        let raw: Option<Vec<Value>> = load(self.storage.as_ref(), self.key).await?;
        let items = raw
            .unwrap_or_default()
            .into_iter()
            .map(|mut v| {
                migrate_record(&mut v);
                serde_json::from_value(v)
            })
            .collect::<Result<Vec<T>, _>>()?;
        Ok(items)
    }

    pub async fn get_one<P: Fn(&T) -> bool>(&self, predicate: P) -> Result<Option<T>, StorageError> {
        let items = self.get_all().await?;
        Ok(items.into_iter().find(|item| predicate(item)))
    }

    /// Replaces the first element matching `predicate` with `element`, or appends it if nothing matches.
    pub async fn add_one<P: Fn(&T) -> bool>(&self, element: T, predicate: P) -> Result<(), StorageError> {
        let mut items = self.get_all().await?;
        match items.iter().position(|item| predicate(item)) {
            Some(i) => {
                trace!("Replacing existing entry in {}", self.key);
                items[i] = element;
            }
            None => items.push(element),
        }
        save(self.storage.as_ref(), self.key, &items).await
    }

    /// Removes every element matching `predicate`.
    pub async fn remove<P: Fn(&T) -> bool>(&self, predicate: P) -> Result<(), StorageError> {
        let mut items = self.get_all().await?;
        let before = items.len();
        items.retain(|item| !predicate(item));
        if items.len() == before {
            return Ok(());
        }
        save(self.storage.as_ref(), self.key, &items).await
    }

    pub async fn remove_all(&self) -> Result<(), StorageError> {
        self.storage.delete(self.key).await
    }
}

/// dApp-side accounts, keyed by account identifier.
pub struct AccountManager {
    inner: StorageManager<AccountInfo>,
}

impl AccountManager {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { inner: StorageManager::new(storage, StorageKey::Accounts) }
    }

    pub async fn get_accounts(&self) -> Result<Vec<AccountInfo>, StorageError> {
        self.inner.get_all().await
    }

    pub async fn get_account(&self, account_identifier: &str) -> Result<Option<AccountInfo>, StorageError> {
        self.inner.get_one(|a| a.account_identifier == account_identifier).await
    }

    pub async fn add_account(&self, account: AccountInfo) -> Result<(), StorageError> {
        let id = account.account_identifier.clone();
        self.inner.add_one(account, |a| a.account_identifier == id).await
    }

    pub async fn remove_account(&self, account_identifier: &str) -> Result<(), StorageError> {
        self.inner.remove(|a| a.account_identifier == account_identifier).await
    }

    /// Removes every account that was granted over a connection to one of the given peers.
    pub async fn remove_accounts_for_peers(&self, peer_public_keys: &[String]) -> Result<(), StorageError> {
        self.inner.remove(|a| peer_public_keys.contains(&a.origin.id)).await
    }

    pub async fn remove_all_accounts(&self) -> Result<(), StorageError> {
        self.inner.remove_all().await
    }
}

/// Wallet-side metadata about dApps, keyed by the dApp's sender id.
pub struct AppMetadataManager {
    inner: StorageManager<AppMetadata>,
}

impl AppMetadataManager {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { inner: StorageManager::new(storage, StorageKey::AppMetadataList) }
    }

    pub async fn get_app_metadata_list(&self) -> Result<Vec<AppMetadata>, StorageError> {
        self.inner.get_all().await
    }

    pub async fn get_app_metadata(&self, sender_id: &str) -> Result<Option<AppMetadata>, StorageError> {
        self.inner.get_one(|m| m.sender_id == sender_id).await
    }

    pub async fn add_app_metadata(&self, metadata: AppMetadata) -> Result<(), StorageError> {
        let sender_id = metadata.sender_id.clone();
        self.inner.add_one(metadata, |m| m.sender_id == sender_id).await
    }

    pub async fn remove_app_metadata(&self, sender_id: &str) -> Result<(), StorageError> {
        self.inner.remove(|m| m.sender_id == sender_id).await
    }

    pub async fn remove_all_app_metadata(&self) -> Result<(), StorageError> {
        self.inner.remove_all().await
    }
}

/// Wallet-side grants, keyed by account identifier.
pub struct PermissionManager {
    inner: StorageManager<PermissionInfo>,
    crypto: Arc<dyn CryptoProvider>,
}

impl PermissionManager {
    pub fn new(storage: Arc<dyn Storage>, crypto: Arc<dyn CryptoProvider>) -> Self {
        Self { inner: StorageManager::new(storage, StorageKey::PermissionList), crypto }
    }

    pub async fn get_permissions(&self) -> Result<Vec<PermissionInfo>, StorageError> {
        self.inner.get_all().await
    }

    pub async fn get_permission(&self, account_identifier: &str) -> Result<Option<PermissionInfo>, StorageError> {
        self.inner.get_one(|p| p.account_identifier == account_identifier).await
    }

    pub async fn add_permission(&self, permission: PermissionInfo) -> Result<(), StorageError> {
        let id = permission.account_identifier.clone();
        self.inner.add_one(permission, |p| p.account_identifier == id).await
    }

    pub async fn remove_permission(&self, account_identifier: &str) -> Result<(), StorageError> {
        self.inner.remove(|p| p.account_identifier == account_identifier).await
    }

    pub async fn remove_all_permissions(&self) -> Result<(), StorageError> {
        self.inner.remove_all().await
    }

    /// Whether a stored grant covers `message`.
    ///
    /// Permission and broadcast requests are always allowed. An operation request needs the `operation_request` scope
    /// on the grant for its source address and network. A sign request needs the `sign` scope on any grant for its
    /// source address. Anything else is not a request and is never permitted.
    pub async fn has_permission(&self, message: &BeaconMessage) -> Result<bool, StorageError> {
        match &message.payload {
            MessagePayload::PermissionRequest(_) | MessagePayload::BroadcastRequest(_) => Ok(true),
            MessagePayload::OperationRequest(req) => {
                let id = self.crypto.account_identifier(&req.source_address, &req.network);
                let permission = self.get_permission(&id).await?;
                Ok(permission.is_some_and(|p| p.scopes.contains(&PermissionScope::OperationRequest)))
            }
            MessagePayload::SignPayloadRequest(req) => {
                let permissions = self.get_permissions().await?;
                let allowed = permissions
                    .iter()
                    .filter(|p| p.address == req.source_address)
                    .any(|p| p.scopes.contains(&PermissionScope::Sign));
                Ok(allowed)
            }
            _ => {
                warn!("Permission check on a non-request message: {message}");
                Ok(false)
            }
        }
    }
}

/// Paired peers, keyed by public key. dApps and wallets keep separate lists.
pub struct PeerManager {
    inner: StorageManager<PeerInfo>,
}

impl PeerManager {
    pub fn new(storage: Arc<dyn Storage>, key: StorageKey) -> Self {
        Self { inner: StorageManager::new(storage, key) }
    }

    pub async fn get_peers(&self) -> Result<Vec<PeerInfo>, StorageError> {
        self.inner.get_all().await
    }

    pub async fn get_peer(&self, public_key: &str) -> Result<Option<PeerInfo>, StorageError> {
        self.inner.get_one(|p| p.public_key == public_key).await
    }

    pub async fn has_peer(&self, public_key: &str) -> Result<bool, StorageError> {
        Ok(self.get_peer(public_key).await?.is_some())
    }

    pub async fn add_peer(&self, peer: PeerInfo) -> Result<(), StorageError> {
        let public_key = peer.public_key.clone();
        self.inner.add_one(peer, |p| p.public_key == public_key).await
    }

    pub async fn remove_peer(&self, public_key: &str) -> Result<(), StorageError> {
        self.inner.remove(|p| p.public_key == public_key).await
    }

    pub async fn remove_all_peers(&self) -> Result<(), StorageError> {
        self.inner.remove_all().await
    }
}
