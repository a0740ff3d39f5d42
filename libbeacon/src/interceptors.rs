//! Message enrichment at the wallet's trust boundary.
//!
//! [`IncomingRequestInterceptor`] runs on every request a wallet receives. It records the dApp's metadata on
//! permission requests and attaches the known metadata to every other request, refusing requests from dApps it has
//! never seen.
//!
//! [`OutgoingResponseInterceptor`] runs on every response a wallet sends. It stamps the wallet's identity and the
//! protocol version, and persists a grant whenever a permission request is answered positively.

use crate::constants::BEACON_VERSION;
use crate::crypto::CryptoProvider;
use crate::errors::InterceptorError;
use crate::managers::{AppMetadataManager, PermissionManager};
use crate::messages::{BeaconMessage, MessagePayload};
use crate::types::{now_millis, AppMetadata, ConnectionContext, PermissionInfo};
use log::*;
use std::sync::Arc;

/// A request as handed to the hosting wallet application.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingRequest {
    pub message: BeaconMessage,
    pub app_metadata: AppMetadata,
    pub context: ConnectionContext,
}

pub struct IncomingRequestInterceptor {
    app_metadata: Arc<AppMetadataManager>,
}

impl IncomingRequestInterceptor {
    pub fn new(app_metadata: Arc<AppMetadataManager>) -> Self {
        Self { app_metadata }
    }

    /// Enriches an inbound request with the sender's app metadata.
    ///
    /// Returns `Ok(None)` for messages that are not requests; those are logged and dropped.
    pub async fn intercept(
        &self,
        message: BeaconMessage,
        context: ConnectionContext,
    ) -> Result<Option<IncomingRequest>, InterceptorError> {
        let app_metadata = match &message.payload {
            MessagePayload::PermissionRequest(req) => {
                self.app_metadata.add_app_metadata(req.app_metadata.clone()).await?;
                req.app_metadata.clone()
            }
            MessagePayload::OperationRequest(_)
            | MessagePayload::SignPayloadRequest(_)
            | MessagePayload::BroadcastRequest(_) => self
                .app_metadata
                .get_app_metadata(&message.sender_id)
                .await?
                .ok_or_else(|| InterceptorError::MissingAppMetadata(message.sender_id.clone()))?,
            _ => {
                warn!("Message not handled: {message}");
                return Ok(None);
            }
        };
        Ok(Some(IncomingRequest { message, app_metadata, context }))
    }
}

pub struct OutgoingResponseInterceptor {
    sender_id: String,
    app_metadata: Arc<AppMetadataManager>,
    permissions: Arc<PermissionManager>,
    crypto: Arc<dyn CryptoProvider>,
}

impl OutgoingResponseInterceptor {
    pub fn new(
        sender_id: String,
        app_metadata: Arc<AppMetadataManager>,
        permissions: Arc<PermissionManager>,
        crypto: Arc<dyn CryptoProvider>,
    ) -> Self {
        Self { sender_id, app_metadata, permissions, crypto }
    }

    /// Builds the outgoing message for `payload`, answering request `id`, and persists any permission grant in it.
    ///
    /// `request` is the original request if the wallet still has it. A permission grant can only be persisted when it
    /// is present, because the grant is keyed on the requesting dApp.
    pub async fn intercept(
        &self,
        id: String,
        request: Option<&BeaconMessage>,
        payload: MessagePayload,
    ) -> Result<BeaconMessage, InterceptorError> {
        let outgoing = self.prepare(id, request, payload).await?;
        if let Some(grant) = outgoing.grant {
            self.commit(grant).await?;
        }
        Ok(outgoing.message)
    }

    /// Like [`intercept`](Self::intercept), but hands the grant back instead of persisting it, so the caller can
    /// [`commit`](Self::commit) it once the response has actually been delivered.
    pub async fn prepare(
        &self,
        id: String,
        request: Option<&BeaconMessage>,
        payload: MessagePayload,
    ) -> Result<OutgoingResponse, InterceptorError> {
        let mut grant = None;
        if let MessagePayload::PermissionResponse(response) = &payload {
            match request {
                Some(request) => {
                    let address = self.crypto.address_from_public_key(&response.public_key)?;
                    let app_metadata = self
                        .app_metadata
                        .get_app_metadata(&request.sender_id)
                        .await?
                        .ok_or_else(|| InterceptorError::MissingAppMetadata(request.sender_id.clone()))?;
                    grant = Some(PermissionInfo {
                        account_identifier: self.crypto.account_identifier(&address, &response.network),
                        sender_id: request.sender_id.clone(),
                        app_metadata,
                        address,
                        public_key: response.public_key.clone(),
                        network: response.network.clone(),
                        scopes: response.scopes.clone(),
                        connected_at: now_millis(),
                    });
                }
                None => warn!("Permission response {id} has no matching request. The grant is not persisted."),
            }
        }
        let sender_id = self.sender_id.clone();
        let message = BeaconMessage { id, sender_id, version: BEACON_VERSION.to_string(), payload };
        Ok(OutgoingResponse { message, grant })
    }

    pub async fn commit(&self, grant: PermissionInfo) -> Result<(), InterceptorError> {
        debug!("Persisting grant {} for {}", grant.account_identifier, grant.sender_id);
        Ok(self.permissions.add_permission(grant).await?)
    }
}

/// A stamped response and the grant it carries, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingResponse {
    pub message: BeaconMessage,
    pub grant: Option<PermissionInfo>,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::DefaultCrypto;
    use crate::messages::{BroadcastRequest, OperationResponse, PermissionRequest, PermissionResponse};
    use crate::storage::{MemoryStorage, Storage};
    use crate::types::{Network, NetworkType, Origin, PermissionScope};

    struct Fixture {
        app_metadata: Arc<AppMetadataManager>,
        permissions: Arc<PermissionManager>,
        incoming: IncomingRequestInterceptor,
        outgoing: OutgoingResponseInterceptor,
    }

    fn fixture() -> Fixture {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let crypto: Arc<dyn CryptoProvider> = Arc::new(DefaultCrypto);
        let app_metadata = Arc::new(AppMetadataManager::new(Arc::clone(&storage)));
        let permissions = Arc::new(PermissionManager::new(storage, Arc::clone(&crypto)));
        let incoming = IncomingRequestInterceptor::new(Arc::clone(&app_metadata));
        let outgoing = OutgoingResponseInterceptor::new(
            "wallet".into(),
            Arc::clone(&app_metadata),
            Arc::clone(&permissions),
            crypto,
        );
        Fixture { app_metadata, permissions, incoming, outgoing }
    }

    fn permission_request() -> BeaconMessage {
        let payload = MessagePayload::PermissionRequest(PermissionRequest {
            app_metadata: AppMetadata { sender_id: "dapp".into(), name: "My dApp".into(), icon: None },
            network: Network::new(NetworkType::Mainnet),
            scopes: PermissionScope::defaults(),
        });
        BeaconMessage::new("req-1", "dapp", payload)
    }

    fn ctx() -> ConnectionContext {
        ConnectionContext::new(Origin::P2p, "ab".repeat(32))
    }

    #[tokio::test]
    async fn permission_request_records_app_metadata() {
        let f = fixture();
        let req = f.incoming.intercept(permission_request(), ctx()).await.unwrap().expect("a request");
        assert_eq!(req.app_metadata.name, "My dApp");
        assert!(f.app_metadata.get_app_metadata("dapp").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unknown_dapps_are_refused() {
        let f = fixture();
        let payload = MessagePayload::BroadcastRequest(BroadcastRequest {
            network: Network::default(),
            signed_transaction: "ff".into(),
        });
        let msg = BeaconMessage::new("req-2", "stranger", payload);
        let err = f.incoming.intercept(msg, ctx()).await.expect_err("no metadata");
        assert!(matches!(err, InterceptorError::MissingAppMetadata(ref s) if s == "stranger"));
    }

    #[tokio::test]
    async fn responses_are_not_requests() {
        let f = fixture();
        let payload = MessagePayload::OperationResponse(OperationResponse { operation_hash: "oo".into() });
        let msg = BeaconMessage::new("x", "dapp", payload);
        assert!(f.incoming.intercept(msg, ctx()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn permission_response_persists_a_grant() {
        let f = fixture();
        let request = permission_request();
        f.incoming.intercept(request.clone(), ctx()).await.unwrap();
        let public_key = DefaultCrypto.keypair_from_seed("wallet account").public_key_hex();
        let payload = MessagePayload::PermissionResponse(PermissionResponse {
            public_key: public_key.clone(),
            network: Network::new(NetworkType::Mainnet),
            scopes: vec![PermissionScope::Sign],
        });
        let out = f.outgoing.intercept(request.id.clone(), Some(&request), payload).await.unwrap();
        assert_eq!(out.id, "req-1");
        assert_eq!(out.sender_id, "wallet");
        assert_eq!(out.version, BEACON_VERSION);

        let grants = f.permissions.get_permissions().await.unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].public_key, public_key);
        assert_eq!(grants[0].sender_id, "dapp");
        assert_eq!(grants[0].address, DefaultCrypto.address_from_public_key(&public_key).unwrap());
    }

    #[tokio::test]
    async fn permission_response_without_request_is_still_stamped() {
        let f = fixture();
        let payload = MessagePayload::PermissionResponse(PermissionResponse {
            public_key: "cd".repeat(32),
            network: Network::default(),
            scopes: vec![],
        });
        let out = f.outgoing.intercept("gone".into(), None, payload).await.unwrap();
        assert_eq!(out.sender_id, "wallet");
        assert!(f.permissions.get_permissions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn prepared_grants_wait_for_commit() {
        let f = fixture();
        let request = permission_request();
        f.incoming.intercept(request.clone(), ctx()).await.unwrap();
        let payload = MessagePayload::PermissionResponse(PermissionResponse {
            public_key: "ab".repeat(32),
            network: Network::default(),
            scopes: vec![PermissionScope::OperationRequest],
        });
        let out = f.outgoing.prepare(request.id.clone(), Some(&request), payload).await.unwrap();
        assert!(f.permissions.get_permissions().await.unwrap().is_empty());
        let grant = out.grant.expect("a grant");
        assert_eq!(grant.sender_id, "dapp");
        f.outgoing.commit(grant.clone()).await.unwrap();
        assert_eq!(f.permissions.get_permissions().await.unwrap(), vec![grant]);
    }
}
