//! The connection-capable client shared by the dApp and wallet roles.
//!
//! [`Client`] owns the identity, the event bus, the rate limiter and the active transport. Role-specific clients hold
//! a `Client` and plug their message handling in through [`MessageHandler`].

use crate::beacon_client::BeaconClient;
use crate::config::ClientConfig;
use crate::errors::ClientError;
use async_trait::async_trait;
use beacon_transport::extension::is_available;
use beacon_transport::{
    ExtensionBridge, ExtensionTransport, ListenerError, ListenerId, P2PCommunicationClient, P2PTransport, P2pRole,
    Relay, Transport, TransportError, TransportListener, TransportStatus,
};
use libbeacon::crypto::CryptoProvider;
use libbeacon::managers::PeerManager;
use libbeacon::rate_limit::RateLimiter;
use libbeacon::types::{ConnectionContext, PeerInfo, TransportKind};
use libbeacon::{BeaconEvent, BeaconMessage, Deferred, EventBus, Serializer, Storage};
use log::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Receives every message that arrives on the active transport, already decoded.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_message(&self, message: BeaconMessage, context: ConnectionContext);
}

/// The single transport listener a client attaches. It decodes inbound text and hands it to the role's handler.
struct Demultiplexer {
    serializer: Serializer,
    handler: Arc<dyn MessageHandler>,
}

#[async_trait]
impl TransportListener for Demultiplexer {
    async fn on_message(&self, message: String, context: ConnectionContext) -> Result<(), ListenerError> {
        let message = self
            .serializer
            .deserialize_message(&message)
            .map_err(|e| ListenerError::new(format!("Undecodable message from {context}. {e}")))?;
        trace!("Received {message} via {context}");
        self.handler.handle_message(message, context).await;
        Ok(())
    }
}

pub struct Client {
    role: P2pRole,
    name: String,
    icon: Option<String>,
    identity: BeaconClient,
    storage: Arc<dyn Storage>,
    crypto: Arc<dyn CryptoProvider>,
    events: Arc<EventBus>,
    rate_limiter: RateLimiter,
    serializer: Serializer,
    extension_bridge: Option<Arc<dyn ExtensionBridge>>,
    detection_timeout: Duration,
    grace_period: Duration,
    relay: Option<Arc<dyn Relay>>,
    preset_transport: Option<Arc<dyn Transport>>,
    transport: tokio::sync::Mutex<Option<Arc<dyn Transport>>>,
    listener: Mutex<Option<ListenerId>>,
    ready: Mutex<Deferred<(), String>>,
}

impl Client {
    /// Creates the client and starts loading its identity. Must be called inside a tokio runtime.
    pub fn new(config: ClientConfig, role: P2pRole) -> Self {
        let identity = BeaconClient::new(config.name.clone(), Arc::clone(&config.storage), Arc::clone(&config.crypto));
        Self {
            role,
            name: config.name,
            icon: config.icon,
            identity,
            storage: config.storage,
            crypto: config.crypto,
            events: Arc::new(EventBus::with_overrides(config.event_handlers)),
            rate_limiter: RateLimiter::new(config.rate_limit, config.rate_limit_window),
            serializer: Serializer::new(config.wire_format),
            extension_bridge: config.extension_bridge,
            detection_timeout: config.extension_detection_timeout,
            grace_period: config.transport_grace_period,
            relay: config.relay,
            preset_transport: config.transport,
            transport: tokio::sync::Mutex::new(None),
            listener: Mutex::new(None),
            ready: Mutex::new(Deferred::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn icon(&self) -> Option<&str> {
        self.icon.as_deref()
    }

    pub fn role(&self) -> P2pRole {
        self.role
    }

    pub fn identity(&self) -> &BeaconClient {
        &self.identity
    }

    pub async fn beacon_id(&self) -> Result<String, ClientError> {
        self.identity.beacon_id().await
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        Arc::clone(&self.storage)
    }

    pub fn crypto(&self) -> Arc<dyn CryptoProvider> {
        Arc::clone(&self.crypto)
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn serializer(&self) -> Serializer {
        self.serializer
    }

    /// Selects the transport if that has not happened yet, and returns its kind.
    ///
    /// A preset transport always wins. Otherwise the extension is pinged, racing the ping against the grace period.
    /// If the extension answers first it is used. If the grace period ends first, or nothing answers, the
    /// peer-to-peer transport is built.
    pub async fn init(&self) -> Result<TransportKind, ClientError> {
        let mut slot = self.transport.lock().await;
        if let Some(transport) = slot.as_ref() {
            return Ok(transport.kind());
        }
        let transport = match &self.preset_transport {
            Some(t) => Arc::clone(t),
            None => self.select_transport().await?,
        };
        let kind = transport.kind();
        *slot = Some(transport);
        info!("{} is using the {kind} transport", self.name);
        self.events.emit(BeaconEvent::ActiveTransportSet { kind });
        Ok(kind)
    }

    async fn select_transport(&self) -> Result<Arc<dyn Transport>, ClientError> {
        if let Some(bridge) = &self.extension_bridge {
            let detection = is_available(bridge.as_ref(), self.detection_timeout);
            let grace = tokio::time::sleep(self.grace_period);
            tokio::select! {
                available = detection => {
                    if available {
                        return Ok(Arc::new(ExtensionTransport::new(Arc::clone(bridge))));
                    }
                    debug!("No extension answered the ping");
                }
                _ = grace => debug!("No extension answered within {:?}", self.grace_period),
            }
        }
        self.p2p_transport().await
    }

    async fn p2p_transport(&self) -> Result<Arc<dyn Transport>, ClientError> {
        let relay = self
            .relay
            .as_ref()
            .ok_or_else(|| ClientError::NoTransport("No extension answered and no relay is configured.".into()))?;
        let keypair = self.identity.keypair().await?;
        let client =
            P2PCommunicationClient::new(&self.name, self.icon.clone(), keypair, self.crypto(), Arc::clone(relay))?;
        let peers = PeerManager::new(self.storage(), self.role.peers_key());
        let transport = P2PTransport::new(self.role, client, peers, Arc::clone(&self.events), self.serializer);
        Ok(Arc::new(transport))
    }

    /// The active transport. Fails if [`init`](Client::init) has not selected one yet.
    pub async fn transport(&self) -> Result<Arc<dyn Transport>, ClientError> {
        self.transport.lock().await.clone().ok_or_else(|| ClientError::NoTransport("Client is not initialised.".into()))
    }

    /// Attaches the message handler to the active transport and connects it. Connecting an already connected client
    /// does nothing.
    pub async fn connect(&self, handler: Arc<dyn MessageHandler>) -> Result<(), ClientError> {
        self.init().await?;
        let transport = self.transport().await?;
        if let Ok(mut listener) = self.listener.lock() {
            if listener.is_none() {
                let demux = Demultiplexer { serializer: self.serializer, handler };
                *listener = Some(transport.add_listener(Arc::new(demux)));
            }
        }
        if let Err(e) = transport.connect().await {
            warn!("{} could not connect. {e}", self.name);
            return Err(e.into());
        }
        if transport.status() != TransportStatus::Connected {
            return Err(TransportError::NotConnected.into());
        }
        if let Ok(ready) = self.ready.lock() {
            ready.resolve(());
        }
        Ok(())
    }

    /// Settles once the client has connected.
    pub fn ready(&self) -> Deferred<(), String> {
        self.ready.lock().map(|r| r.clone()).unwrap_or_else(|_| Deferred::rejected("lock poisoned".into()))
    }

    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let transport = self.transport().await?;
        transport.disconnect().await?;
        if let Ok(mut ready) = self.ready.lock() {
            *ready = Deferred::new();
        }
        self.events.emit(BeaconEvent::ChannelClosed);
        Ok(())
    }

    /// Records a request against the rate limit. Returns `true` if the request should be refused.
    pub fn is_rate_limited(&self) -> bool {
        self.rate_limiter.check()
    }

    pub async fn send(&self, message: &BeaconMessage, recipient: Option<&str>) -> Result<(), ClientError> {
        let text = self.serializer.serialize(message)?;
        let transport = self.transport().await?;
        debug!("Sending {message} to {}", recipient.unwrap_or("all peers"));
        transport.send(&text, recipient).await?;
        Ok(())
    }

    pub async fn get_peers(&self) -> Result<Vec<PeerInfo>, ClientError> {
        self.init().await?;
        Ok(self.transport().await?.get_peers().await?)
    }

    pub async fn add_peer(&self, peer: PeerInfo) -> Result<(), ClientError> {
        self.init().await?;
        Ok(self.transport().await?.add_peer(peer).await?)
    }

    pub async fn remove_peer(&self, public_key: &str) -> Result<(), ClientError> {
        self.init().await?;
        Ok(self.transport().await?.remove_peer(public_key).await?)
    }

    pub async fn remove_all_peers(&self) -> Result<(), ClientError> {
        self.init().await?;
        Ok(self.transport().await?.remove_all_peers().await?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use beacon_transport::extension::spawn_extension_responder;
    use beacon_transport::{LocalBridge, MemoryRelay};
    use libbeacon::storage::MemoryStorage;

    fn config() -> ClientConfig {
        ClientConfig::new("test", Arc::new(MemoryStorage::new()))
    }

    #[tokio::test]
    async fn prefers_an_extension_that_answers_promptly() {
        let bridge: Arc<dyn ExtensionBridge> = Arc::new(LocalBridge::new());
        let _ext = spawn_extension_responder(Arc::clone(&bridge), "ext".into(), |_| None);
        let client = Client::new(config().with_extension_bridge(bridge), P2pRole::DApp);
        let mut events = client.events().subscribe();
        assert_eq!(client.init().await.unwrap(), TransportKind::PostMessage);
        assert_eq!(events.recv().await.unwrap(), BeaconEvent::ActiveTransportSet { kind: TransportKind::PostMessage });
        // Selection happens once
        assert_eq!(client.init().await.unwrap(), TransportKind::PostMessage);
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_to_p2p_after_the_grace_period() {
        let bridge: Arc<dyn ExtensionBridge> = Arc::new(LocalBridge::new());
        let relay: Arc<dyn Relay> = Arc::new(MemoryRelay::default());
        let client = Client::new(config().with_extension_bridge(bridge).with_relay(relay), P2pRole::DApp);
        assert_eq!(client.init().await.unwrap(), TransportKind::P2p);
    }

    #[tokio::test]
    async fn no_extension_and_no_relay_means_no_transport() {
        let client = Client::new(config(), P2pRole::Wallet);
        assert!(matches!(client.init().await, Err(ClientError::NoTransport(_))));
        assert!(matches!(client.transport().await, Err(ClientError::NoTransport(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_is_per_client() {
        let client = Client::new(config(), P2pRole::DApp);
        let other = Client::new(config(), P2pRole::DApp);
        assert!(!client.is_rate_limited());
        assert!(!client.is_rate_limited());
        assert!(client.is_rate_limited());
        assert!(!other.is_rate_limited());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!client.is_rate_limited());
    }
}
