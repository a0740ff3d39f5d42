//! The request initiator.
//!
//! A [`DAppClient`] sends typed requests to a wallet and correlates the replies by message id. Any number of requests
//! may be in flight at once; each caller waits on its own [`Deferred`] handle, which the response handler settles
//! when the matching reply arrives, in whatever order the replies come back.

use crate::client::{Client, MessageHandler};
use crate::config::ClientConfig;
use crate::errors::ClientError;
use async_trait::async_trait;
use beacon_transport::P2pRole;
use libbeacon::events::EventHandler;
use libbeacon::managers::AccountManager;
use libbeacon::messages::{
    BroadcastRequest, BroadcastResponse, OperationRequest, OperationResponse, PermissionRequest, SignPayloadRequest,
    SignPayloadResponse,
};
use libbeacon::storage::{load, save};
use libbeacon::types::{
    now_millis, AccountInfo, AppMetadata, ConnectionContext, Network, PeerInfo, PermissionScope, SigningType,
    TransportKind,
};
use libbeacon::{
    generate_id, BeaconError, BeaconEvent, BeaconMessage, Deferred, EventBus, EventKind, MessageKind, MessagePayload,
    StorageKey,
};
use log::*;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// A reply together with where it came from.
pub type Reply = (BeaconMessage, ConnectionContext);

/// The correlation table: one handle per request id still waiting for its reply.
#[derive(Default)]
pub struct OpenRequests {
    pending: Mutex<HashMap<String, Deferred<Reply, BeaconError>>>,
}

impl OpenRequests {
    fn open(&self, id: &str) -> Deferred<Reply, BeaconError> {
        let handle = Deferred::new();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id.to_string(), handle.clone());
        }
        handle
    }

    fn close(&self, id: &str) -> Option<Deferred<Reply, BeaconError>> {
        self.pending.lock().ok().and_then(|mut pending| pending.remove(id))
    }

    /// Opens a handle for `id` that is closed again when the returned guard is dropped.
    fn track(&self, id: &str) -> TrackedRequest<'_> {
        TrackedRequest { table: self, id: id.to_string(), handle: self.open(id) }
    }

    pub fn len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct TrackedRequest<'a> {
    table: &'a OpenRequests,
    id: String,
    handle: Deferred<Reply, BeaconError>,
}

impl TrackedRequest<'_> {
    async fn wait(&self) -> Result<Reply, BeaconError> {
        self.handle.wait().await
    }
}

impl Drop for TrackedRequest<'_> {
    fn drop(&mut self) {
        if self.table.close(&self.id).is_some() {
            trace!("Stopped waiting for request {}", self.id);
        }
    }
}

#[async_trait]
impl MessageHandler for OpenRequests {
    async fn handle_message(&self, message: BeaconMessage, context: ConnectionContext) {
        match message.kind() {
            MessageKind::Acknowledge => {
                debug!("Request {} acknowledged by {context}", message.id);
                return;
            }
            kind if kind.is_request() => {
                warn!("Ignoring a {kind} sent to a dApp by {context}");
                return;
            }
            _ => {}
        }
        let Some(handle) = self.close(&message.id) else {
            error!("No request {} is waiting for a reply. Dropping {message}", message.id);
            return;
        };
        match message.as_error() {
            Some(err) => {
                debug!("Request {} failed: {err}", message.id);
                handle.reject(err);
            }
            None => {
                trace!("Request {} answered", message.id);
                handle.resolve((message, context));
            }
        }
    }
}

fn sent_event(kind: MessageKind) -> Option<BeaconEvent> {
    match kind {
        MessageKind::PermissionRequest => Some(BeaconEvent::PermissionRequestSent),
        MessageKind::OperationRequest => Some(BeaconEvent::OperationRequestSent),
        MessageKind::SignPayloadRequest => Some(BeaconEvent::SignRequestSent),
        MessageKind::BroadcastRequest => Some(BeaconEvent::BroadcastRequestSent),
        _ => None,
    }
}

fn error_event(kind: MessageKind, error: BeaconError) -> Option<BeaconEvent> {
    match kind {
        MessageKind::PermissionRequest => Some(BeaconEvent::PermissionRequestError { error }),
        MessageKind::OperationRequest => Some(BeaconEvent::OperationRequestError { error }),
        MessageKind::SignPayloadRequest => Some(BeaconEvent::SignRequestError { error }),
        MessageKind::BroadcastRequest => Some(BeaconEvent::BroadcastRequestError { error }),
        _ => None,
    }
}

pub struct DAppClient {
    client: Client,
    accounts: AccountManager,
    open_requests: Arc<OpenRequests>,
    active_account: RwLock<Option<AccountInfo>>,
}

impl DAppClient {
    /// Creates the client and restores the active account persisted by a previous session, if any.
    pub async fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let client = Client::new(config, P2pRole::DApp);
        let accounts = AccountManager::new(client.storage());
        let open_requests = Arc::new(OpenRequests::default());
        let dapp = Self { client, accounts, open_requests, active_account: RwLock::new(None) };
        let stored: Option<String> = load(dapp.client.storage().as_ref(), StorageKey::ActiveAccount).await?;
        if let Some(identifier) = stored {
            match dapp.accounts.get_account(&identifier).await? {
                Some(account) => dapp.set_active_account(Some(account)).await?,
                None => warn!("Stored active account {identifier} no longer exists"),
            }
        }
        Ok(dapp)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn events(&self) -> &Arc<EventBus> {
        self.client.events()
    }

    pub async fn init(&self) -> Result<TransportKind, ClientError> {
        self.client.init().await
    }

    /// Selects a transport if needed and connects it. On the peer-to-peer transport with no known wallet, this waits
    /// until a wallet pairs.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.client.connect(Arc::clone(&self.open_requests) as Arc<dyn MessageHandler>).await
    }

    pub async fn beacon_id(&self) -> Result<String, ClientError> {
        self.client.beacon_id().await
    }

    /// The number of requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.open_requests.len()
    }

    pub fn get_active_account(&self) -> Option<AccountInfo> {
        self.active_account.read().ok().and_then(|a| a.clone())
    }

    /// Sets (or with `None`, clears) the active account, persisting the choice.
    pub async fn set_active_account(&self, account: Option<AccountInfo>) -> Result<(), ClientError> {
        let storage = self.client.storage();
        match &account {
            Some(a) => save(storage.as_ref(), StorageKey::ActiveAccount, &a.account_identifier).await?,
            None => storage.delete(StorageKey::ActiveAccount).await?,
        }
        if let Ok(mut active) = self.active_account.write() {
            *active = account.clone();
        }
        self.client.events().emit(BeaconEvent::ActiveAccountSet { account });
        Ok(())
    }

    pub async fn get_app_metadata(&self) -> Result<AppMetadata, ClientError> {
        Ok(AppMetadata {
            sender_id: self.beacon_id().await?,
            name: self.client.name().to_string(),
            icon: self.client.icon().map(String::from),
        })
    }

    pub async fn get_accounts(&self) -> Result<Vec<AccountInfo>, ClientError> {
        Ok(self.accounts.get_accounts().await?)
    }

    pub async fn get_account(&self, account_identifier: &str) -> Result<Option<AccountInfo>, ClientError> {
        Ok(self.accounts.get_account(account_identifier).await?)
    }

    pub async fn remove_account(&self, account_identifier: &str) -> Result<(), ClientError> {
        self.accounts.remove_account(account_identifier).await?;
        let is_active = self.get_active_account().is_some_and(|a| a.account_identifier == account_identifier);
        if is_active {
            self.set_active_account(None).await?;
        }
        Ok(())
    }

    pub async fn remove_all_accounts(&self) -> Result<(), ClientError> {
        self.accounts.remove_all_accounts().await?;
        self.set_active_account(None).await
    }

    pub async fn get_peers(&self) -> Result<Vec<PeerInfo>, ClientError> {
        self.client.get_peers().await
    }

    /// Forgets a wallet, along with every account it granted.
    pub async fn remove_peer(&self, public_key: &str) -> Result<(), ClientError> {
        self.client.remove_peer(public_key).await?;
        self.remove_accounts_for_peers(&[public_key.to_string()]).await
    }

    pub async fn remove_all_peers(&self) -> Result<(), ClientError> {
        let peers = self.client.get_peers().await?;
        self.client.remove_all_peers().await?;
        let keys = peers.into_iter().map(|p| p.public_key).collect::<Vec<_>>();
        self.remove_accounts_for_peers(&keys).await
    }

    async fn remove_accounts_for_peers(&self, keys: &[String]) -> Result<(), ClientError> {
        self.accounts.remove_accounts_for_peers(keys).await?;
        let orphaned = self.get_active_account().is_some_and(|a| keys.contains(&a.origin.id));
        if orphaned {
            self.set_active_account(None).await?;
        }
        Ok(())
    }

    pub fn subscribe_to_event(&self, kind: EventKind, handler: EventHandler) {
        self.client.events().on(kind, handler);
    }

    /// Whether the active account allows sending a request of this kind.
    ///
    /// Permission and broadcast requests are always allowed. Operation and sign requests need the matching scope on
    /// the active account, so they are refused while no account is active.
    pub fn check_permissions(&self, kind: MessageKind) -> bool {
        match kind {
            MessageKind::PermissionRequest | MessageKind::BroadcastRequest => true,
            MessageKind::OperationRequest => {
                self.get_active_account().is_some_and(|a| a.scopes.contains(&PermissionScope::OperationRequest))
            }
            MessageKind::SignPayloadRequest => {
                self.get_active_account().is_some_and(|a| a.scopes.contains(&PermissionScope::Sign))
            }
            _ => false,
        }
    }

    /// Asks the wallet for access to an account. On success the account is stored and becomes the active account.
    pub async fn request_permissions(
        &self,
        network: Option<Network>,
        scopes: Option<Vec<PermissionScope>>,
    ) -> Result<AccountInfo, ClientError> {
        let request = PermissionRequest {
            app_metadata: self.get_app_metadata().await?,
            network: network.unwrap_or_default(),
            scopes: scopes.unwrap_or_else(PermissionScope::defaults),
        };
        let (message, origin) = self.make_request(MessagePayload::PermissionRequest(request), None).await?;
        let response = match message.payload {
            MessagePayload::PermissionResponse(r) => r,
            other => return Err(unexpected(MessageKind::PermissionRequest, other.kind())),
        };
        let crypto = self.client.crypto();
        let address = crypto.address_from_public_key(&response.public_key)?;
        let account = AccountInfo {
            account_identifier: crypto.account_identifier(&address, &response.network),
            sender_id: message.sender_id,
            origin,
            address,
            public_key: response.public_key,
            network: response.network,
            scopes: response.scopes,
            connected_at: now_millis(),
        };
        self.accounts.add_account(account.clone()).await?;
        self.set_active_account(Some(account.clone())).await?;
        self.client.events().emit(BeaconEvent::PermissionRequestSuccess { account: account.clone() });
        Ok(account)
    }

    /// Asks the wallet to sign `payload`. The source address defaults to the active account's.
    pub async fn request_sign_payload(
        &self,
        payload: &str,
        signing_type: SigningType,
        source_address: Option<String>,
    ) -> Result<SignPayloadResponse, ClientError> {
        if payload.is_empty() {
            return Err(self.invalid_input("Payload must be provided"));
        }
        let source_address =
            source_address.or_else(|| self.get_active_account().map(|a| a.address)).unwrap_or_default();
        let request = SignPayloadRequest { signing_type, payload: payload.to_string(), source_address };
        let recipient = self.active_origin();
        let (message, _) = self.make_request(MessagePayload::SignPayloadRequest(request), recipient).await?;
        match message.payload {
            MessagePayload::SignPayloadResponse(r) => {
                self.client.events().emit(BeaconEvent::SignRequestSuccess { signature: r.signature.clone() });
                Ok(r)
            }
            other => Err(unexpected(MessageKind::SignPayloadRequest, other.kind())),
        }
    }

    /// Asks the wallet to sign and inject operations from the active account. The network defaults to the active
    /// account's.
    pub async fn request_operation(
        &self,
        network: Option<Network>,
        operation_details: Vec<Value>,
    ) -> Result<OperationResponse, ClientError> {
        if operation_details.is_empty() {
            return Err(self.invalid_input("Operation details must be provided"));
        }
        let active = self.get_active_account();
        let request = OperationRequest {
            network: network.or_else(|| active.as_ref().map(|a| a.network.clone())).unwrap_or_default(),
            operation_details,
            source_address: active.as_ref().map(|a| a.address.clone()).unwrap_or_default(),
        };
        let recipient = active.as_ref().map(|a| a.origin.id.clone());
        let (message, _) = self.make_request(MessagePayload::OperationRequest(request), recipient).await?;
        match message.payload {
            MessagePayload::OperationResponse(r) => {
                let account = active.ok_or(ClientError::NoActiveAccount)?;
                let operation_hash = r.operation_hash.clone();
                self.client.events().emit(BeaconEvent::OperationRequestSuccess { account, operation_hash });
                Ok(r)
            }
            other => Err(unexpected(MessageKind::OperationRequest, other.kind())),
        }
    }

    /// Asks the wallet to broadcast an already signed transaction.
    pub async fn request_broadcast(
        &self,
        network: Option<Network>,
        signed_transaction: &str,
    ) -> Result<BroadcastResponse, ClientError> {
        if signed_transaction.is_empty() {
            return Err(self.invalid_input("Signed transaction must be provided"));
        }
        let network = network.unwrap_or_default();
        let request = BroadcastRequest { network: network.clone(), signed_transaction: signed_transaction.to_string() };
        let (message, _) = self.make_request(MessagePayload::BroadcastRequest(request), None).await?;
        match message.payload {
            MessagePayload::BroadcastResponse(r) => {
                let transaction_hash = r.transaction_hash.clone();
                self.client.events().emit(BeaconEvent::BroadcastRequestSuccess { network, transaction_hash });
                Ok(r)
            }
            other => Err(unexpected(MessageKind::BroadcastRequest, other.kind())),
        }
    }

    fn active_origin(&self) -> Option<String> {
        self.get_active_account().map(|a| a.origin.id)
    }

    fn invalid_input(&self, reason: &str) -> ClientError {
        self.client.events().emit(BeaconEvent::InternalError { message: reason.to_string() });
        ClientError::InvalidInput(reason.to_string())
    }

    async fn make_request(&self, payload: MessagePayload, recipient: Option<String>) -> Result<Reply, ClientError> {
        let kind = payload.kind();
        self.connect().await?;
        let events = self.client.events();
        if self.client.is_rate_limited() {
            events.emit(BeaconEvent::LocalRateLimitReached);
            return Err(ClientError::RateLimit);
        }
        if !self.check_permissions(kind) {
            events.emit(BeaconEvent::NoPermissions);
            return Err(ClientError::Permission(kind));
        }
        if let Some(event) = sent_event(kind) {
            events.emit(event);
        }
        let message = BeaconMessage::new(generate_id(), self.beacon_id().await?, payload);
        let request = self.open_requests.track(&message.id);
        if let Err(e) = self.client.send(&message, recipient.as_deref()).await {
            warn!("Could not send {message}. {e}");
            return Err(e);
        }
        debug!("{message} sent, waiting for the reply");
        request.wait().await.map_err(|err| {
            if let Some(event) = error_event(kind, err.clone()) {
                events.emit(event);
            }
            ClientError::Wallet(err)
        })
    }
}

fn unexpected(request: MessageKind, response: MessageKind) -> ClientError {
    ClientError::UnexpectedResponse { request, response }
}

#[cfg(test)]
mod test {
    use super::*;
    use libbeacon::messages::ErrorResponse;
    use libbeacon::types::Origin;
    use libbeacon::BeaconErrorType;

    fn reply(id: &str, payload: MessagePayload) -> BeaconMessage {
        BeaconMessage::new(id, "wallet", payload)
    }

    fn ctx() -> ConnectionContext {
        ConnectionContext::new(Origin::P2p, "wallet-key")
    }

    #[tokio::test]
    async fn replies_settle_their_own_request_once() {
        let table = OpenRequests::default();
        let first = table.open("a");
        let second = table.open("b");
        assert_eq!(table.len(), 2);

        let answer = reply("b", MessagePayload::BroadcastResponse(BroadcastResponse { transaction_hash: "oo".into() }));
        table.handle_message(answer.clone(), ctx()).await;
        assert_eq!(second.wait().await.unwrap().0, answer);
        assert!(first.is_pending());
        assert_eq!(table.len(), 1);

        // A duplicate reply finds nothing to settle
        table.handle_message(answer, ctx()).await;
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn error_replies_reject() {
        let table = OpenRequests::default();
        let handle = table.open("x");
        let payload =
            MessagePayload::Error(ErrorResponse { error_type: BeaconErrorType::AbortedError, error_data: None });
        table.handle_message(reply("x", payload), ctx()).await;
        let err = handle.wait().await.expect_err("rejected");
        assert_eq!(err.error_type, BeaconErrorType::AbortedError);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn abandoned_requests_are_closed() {
        let table = OpenRequests::default();
        let request = table.track("slow");
        assert_eq!(table.len(), 1);
        let waited = async move { request.wait().await };
        assert!(tokio::time::timeout(std::time::Duration::from_millis(20), waited).await.is_err());
        assert!(table.is_empty());

        // A late reply to the abandoned request is ignored
        let payload =
            MessagePayload::Error(ErrorResponse { error_type: BeaconErrorType::AbortedError, error_data: None });
        table.handle_message(reply("slow", payload), ctx()).await;
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn acknowledgements_keep_the_request_open() {
        let table = OpenRequests::default();
        let handle = table.open("x");
        table.handle_message(reply("x", MessagePayload::Acknowledge), ctx()).await;
        assert!(handle.is_pending());
        assert_eq!(table.len(), 1);
    }
}
