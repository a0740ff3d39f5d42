//! The key-value storage collaborator and two implementations of it.
//!
//! The core never touches a database or the file system directly. It reads and writes JSON text under a fixed set of
//! [`StorageKey`]s through the [`Storage`] trait, so hosts decide where state lives. [`MemoryStorage`] is useful for
//! tests and ephemeral clients; [`FileStorage`] keeps one file per key in a directory.

use crate::errors::StorageError;
use async_trait::async_trait;
use log::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    Accounts,
    ActiveAccount,
    BeaconSdkSecretSeed,
    BeaconSdkVersion,
    AppMetadataList,
    PermissionList,
    /// Wallets a dApp has paired with.
    TransportP2pPeersDapp,
    /// dApps a wallet has paired with.
    TransportP2pPeersWallet,
}

impl StorageKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKey::Accounts => "beacon:accounts",
            StorageKey::ActiveAccount => "beacon:active-account",
            StorageKey::BeaconSdkSecretSeed => "beacon:sdk-secret-seed",
            StorageKey::BeaconSdkVersion => "beacon:sdk_version",
            StorageKey::AppMetadataList => "beacon:app-metadata-list",
            StorageKey::PermissionList => "beacon:permissions",
            StorageKey::TransportP2pPeersDapp => "beacon:communication-peers-dapp",
            StorageKey::TransportP2pPeersWallet => "beacon:communication-peers-wallet",
        }
    }
}

impl Display for StorageKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: StorageKey) -> Result<Option<String>, StorageError>;
    async fn set(&self, key: StorageKey, value: String) -> Result<(), StorageError>;
    async fn delete(&self, key: StorageKey) -> Result<(), StorageError>;
}

/// Reads and decodes the JSON value stored under `key`.
pub async fn load<T: DeserializeOwned>(storage: &dyn Storage, key: StorageKey) -> Result<Option<T>, StorageError> {
    match storage.get(key).await? {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

/// Encodes `value` as JSON and stores it under `key`.
pub async fn save<T: Serialize + Sync>(storage: &dyn Storage, key: StorageKey, value: &T) -> Result<(), StorageError> {
    let text = serde_json::to_string(value)?;
    storage.set(key, text).await
}

#[derive(Default)]
pub struct MemoryStorage {
    values: RwLock<HashMap<StorageKey, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: StorageKey) -> Result<Option<String>, StorageError> {
        Ok(self.values.read().await.get(&key).cloned())
    }

    async fn set(&self, key: StorageKey, value: String) -> Result<(), StorageError> {
        self.values.write().await.insert(key, value);
        Ok(())
    }

    async fn delete(&self, key: StorageKey) -> Result<(), StorageError> {
        self.values.write().await.remove(&key);
        Ok(())
    }
}

/// A directory-backed store.
///
/// Each key is saved in its own file, named after the key, e.g. `beacon_accounts.json`.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Creates a new file store in the given directory, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            std::fs::create_dir_all(&path)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_for(&self, key: StorageKey) -> PathBuf {
        let name = key.as_str().replace([':', '-'], "_");
        self.path.join(format!("{name}.json"))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn get(&self, key: StorageKey) -> Result<Option<String>, StorageError> {
        match tokio::fs::read_to_string(self.file_for(key)).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: StorageKey, value: String) -> Result<(), StorageError> {
        let path = self.file_for(key);
        trace!("Writing {key} to {}", path.display());
        tokio::fs::write(path, value).await?;
        Ok(())
    }

    async fn delete(&self, key: StorageKey) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.file_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    async fn exercise(storage: &dyn Storage) {
        assert_eq!(storage.get(StorageKey::Accounts).await.unwrap(), None);
        save(storage, StorageKey::Accounts, &vec!["a", "b"]).await.unwrap();
        let loaded: Option<Vec<String>> = load(storage, StorageKey::Accounts).await.unwrap();
        assert_eq!(loaded, Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(storage.get(StorageKey::PermissionList).await.unwrap(), None);
        storage.delete(StorageKey::Accounts).await.unwrap();
        assert_eq!(storage.get(StorageKey::Accounts).await.unwrap(), None);
        // Deleting a missing key is fine
        storage.delete(StorageKey::Accounts).await.unwrap();
    }

    #[tokio::test]
    async fn memory_storage() {
        exercise(&MemoryStorage::new()).await;
    }

    #[tokio::test]
    async fn file_storage() {
        let dir = tempfile::tempdir().expect("temp dir");
        let storage = FileStorage::new(dir.path().join("beacon")).expect("file storage");
        exercise(&storage).await;
        storage.set(StorageKey::ActiveAccount, "abc".into()).await.unwrap();
        assert!(dir.path().join("beacon").join("beacon_active_account.json").exists());
        // A new instance over the same directory sees the same data
        let other = FileStorage::new(dir.path().join("beacon")).unwrap();
        assert_eq!(other.get(StorageKey::ActiveAccount).await.unwrap(), Some("abc".to_string()));
    }
}
