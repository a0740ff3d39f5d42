//! The request responder.
//!
//! A [`WalletClient`] hands every inbound request to the hosting wallet application once, enriched with the
//! requesting dApp's metadata, and sends the application's answer back through the interceptor chain.

use crate::client::{Client, MessageHandler};
use crate::config::ClientConfig;
use crate::errors::ClientError;
use async_trait::async_trait;
use beacon_transport::P2pRole;
use libbeacon::interceptors::{IncomingRequest, IncomingRequestInterceptor, OutgoingResponseInterceptor};
use libbeacon::managers::{AppMetadataManager, PermissionManager};
use libbeacon::types::{AppMetadata, ConnectionContext, PairingRequest, PeerInfo, PermissionInfo};
use libbeacon::{BeaconMessage, EventBus, MessagePayload};
use log::*;
use std::sync::{Arc, Mutex};

/// The wallet application's side of the conversation.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn on_request(&self, request: IncomingRequest);
}

#[async_trait]
impl<F> RequestHandler for F
where
    F: Fn(IncomingRequest) + Send + Sync,
{
    async fn on_request(&self, request: IncomingRequest) {
        self(request)
    }
}

/// Requests delivered to the application and not yet answered.
struct PendingRequests {
    requests: Mutex<Vec<(BeaconMessage, ConnectionContext)>>,
    interceptor: IncomingRequestInterceptor,
    handler: Arc<dyn RequestHandler>,
}

impl PendingRequests {
    /// Records the request. Returns `false` if a request with the same id is already pending.
    fn insert(&self, message: &BeaconMessage, context: &ConnectionContext) -> bool {
        let Ok(mut requests) = self.requests.lock() else {
            return false;
        };
        if requests.iter().any(|(m, _)| m.id == message.id) {
            return false;
        }
        requests.push((message.clone(), context.clone()));
        true
    }

    fn get(&self, id: &str) -> Option<(BeaconMessage, ConnectionContext)> {
        let requests = self.requests.lock().ok()?;
        requests.iter().find(|(m, _)| m.id == id).cloned()
    }

    fn take(&self, id: &str) -> Option<(BeaconMessage, ConnectionContext)> {
        let mut requests = self.requests.lock().ok()?;
        let index = requests.iter().position(|(m, _)| m.id == id)?;
        Some(requests.remove(index))
    }

    fn len(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }
}

#[async_trait]
impl MessageHandler for PendingRequests {
    async fn handle_message(&self, message: BeaconMessage, context: ConnectionContext) {
        if !self.insert(&message, &context) {
            debug!("Request {} is already pending. Not redelivering it.", message.id);
            return;
        }
        let id = message.id.clone();
        match self.interceptor.intercept(message, context).await {
            Ok(Some(request)) => {
                info!("Request {} from {}", request.message.id, request.app_metadata.name);
                self.handler.on_request(request).await;
            }
            Ok(None) => {
                self.take(&id);
            }
            Err(e) => {
                warn!("Dropping request {id}. {e}");
                self.take(&id);
            }
        }
    }
}

pub struct WalletClient {
    client: Client,
    app_metadata: Arc<AppMetadataManager>,
    permissions: Arc<PermissionManager>,
    pending: Mutex<Option<Arc<PendingRequests>>>,
}

impl WalletClient {
    pub fn new(config: ClientConfig) -> Self {
        let client = Client::new(config, P2pRole::Wallet);
        let app_metadata = Arc::new(AppMetadataManager::new(client.storage()));
        let permissions = Arc::new(PermissionManager::new(client.storage(), client.crypto()));
        Self { client, app_metadata, permissions, pending: Mutex::new(None) }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn events(&self) -> &Arc<EventBus> {
        self.client.events()
    }

    pub async fn beacon_id(&self) -> Result<String, ClientError> {
        self.client.beacon_id().await
    }

    /// Connects and starts delivering requests to `handler`. A request is delivered once, even if the dApp sends it
    /// again before it has been answered.
    pub async fn connect(&self, handler: impl RequestHandler + 'static) -> Result<(), ClientError> {
        let pending = Arc::new(PendingRequests {
            requests: Mutex::new(Vec::new()),
            interceptor: IncomingRequestInterceptor::new(Arc::clone(&self.app_metadata)),
            handler: Arc::new(handler),
        });
        if let Ok(mut slot) = self.pending.lock() {
            if slot.is_none() {
                *slot = Some(Arc::clone(&pending));
            }
        }
        let active = self.pending.lock().ok().and_then(|p| p.clone()).unwrap_or(pending);
        self.client.connect(active).await
    }

    /// The number of delivered requests still waiting for an answer.
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().ok().and_then(|p| p.as_ref().map(|p| p.len())).unwrap_or_default()
    }

    /// Answers request `request_id`.
    ///
    /// The response is sent to the dApp that made the request. If the request is not pending (it was never received,
    /// or was already answered) the response is still sent, to every paired dApp, but a permission grant in it is not
    /// persisted. The request stays pending, and a grant is only persisted, once the response has been sent, so a
    /// failed send can be retried.
    pub async fn respond(&self, request_id: &str, payload: MessagePayload) -> Result<(), ClientError> {
        let pending = self.pending.lock().ok().and_then(|p| p.clone());
        let request = pending.as_ref().and_then(|p| p.get(request_id));
        if request.is_none() {
            warn!("No pending request {request_id}. Sending the response anyway.");
        }
        let interceptor = OutgoingResponseInterceptor::new(
            self.beacon_id().await?,
            Arc::clone(&self.app_metadata),
            Arc::clone(&self.permissions),
            self.client.crypto(),
        );
        let outgoing = interceptor.prepare(request_id.to_string(), request.as_ref().map(|(m, _)| m), payload).await?;
        let recipient = request.as_ref().map(|(_, ctx)| ctx.id.as_str());
        if let Err(e) = self.client.send(&outgoing.message, recipient).await {
            warn!("Could not answer request {request_id}. It stays pending. {e}");
            return Err(e);
        }
        if let Some(pending) = &pending {
            pending.take(request_id);
        }
        if let Some(grant) = outgoing.grant {
            interceptor.commit(grant).await?;
        }
        Ok(())
    }

    /// Pairs with the dApp that produced `pairing_request` (the payload it displayed, e.g. in a QR code).
    pub async fn pair(&self, pairing_request: &str) -> Result<PeerInfo, ClientError> {
        let request: PairingRequest = self.client.serializer().deserialize(pairing_request)?;
        let peer = request.to_peer_info();
        self.add_peer(peer.clone()).await?;
        Ok(peer)
    }

    pub async fn add_peer(&self, peer: PeerInfo) -> Result<(), ClientError> {
        self.client.add_peer(peer).await
    }

    pub async fn get_peers(&self) -> Result<Vec<PeerInfo>, ClientError> {
        self.client.get_peers().await
    }

    pub async fn remove_peer(&self, public_key: &str) -> Result<(), ClientError> {
        self.client.remove_peer(public_key).await
    }

    pub async fn remove_all_peers(&self) -> Result<(), ClientError> {
        self.client.remove_all_peers().await
    }

    pub async fn get_permissions(&self) -> Result<Vec<PermissionInfo>, ClientError> {
        Ok(self.permissions.get_permissions().await?)
    }

    pub async fn get_permission(&self, account_identifier: &str) -> Result<Option<PermissionInfo>, ClientError> {
        Ok(self.permissions.get_permission(account_identifier).await?)
    }

    pub async fn remove_permission(&self, account_identifier: &str) -> Result<(), ClientError> {
        Ok(self.permissions.remove_permission(account_identifier).await?)
    }

    pub async fn remove_all_permissions(&self) -> Result<(), ClientError> {
        Ok(self.permissions.remove_all_permissions().await?)
    }

    /// Whether a stored grant covers `message`. Wallets use this to refuse requests the dApp was never granted.
    pub async fn has_permission(&self, message: &BeaconMessage) -> Result<bool, ClientError> {
        Ok(self.permissions.has_permission(message).await?)
    }

    pub async fn get_app_metadata_list(&self) -> Result<Vec<AppMetadata>, ClientError> {
        Ok(self.app_metadata.get_app_metadata_list().await?)
    }

    pub async fn get_app_metadata(&self, sender_id: &str) -> Result<Option<AppMetadata>, ClientError> {
        Ok(self.app_metadata.get_app_metadata(sender_id).await?)
    }

    pub async fn remove_app_metadata(&self, sender_id: &str) -> Result<(), ClientError> {
        Ok(self.app_metadata.remove_app_metadata(sender_id).await?)
    }

    pub async fn remove_all_app_metadata(&self) -> Result<(), ClientError> {
        Ok(self.app_metadata.remove_all_app_metadata().await?)
    }
}
