//! The relay-assisted peer-to-peer transport.
//!
//! A dApp with no known peers publishes a pairing payload (through the event bus, for the UI to render) and waits
//! for a wallet to open a channel. Wallets are handed the dApp's [`PeerInfo`] out of band and open the channel
//! themselves with [`Transport::add_peer`]. Known peers are persisted, and on every connect the transport listens to
//! all of them again.

use crate::errors::TransportError;
use crate::p2p_client::{CommunicationEvent, P2PCommunicationClient};
use crate::transport::{ListenerId, ListenerSet, Transport, TransportListener, TransportStatus};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use libbeacon::managers::PeerManager;
use libbeacon::types::{ConnectionContext, Origin, PeerInfo, TransportKind};
use libbeacon::{BeaconEvent, Deferred, EventBus, Serializer, StorageKey};
use log::*;
use std::sync::{Arc, Mutex, RwLock};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum P2pRole {
    DApp,
    Wallet,
}

impl P2pRole {
    pub fn peers_key(&self) -> StorageKey {
        match self {
            P2pRole::DApp => StorageKey::TransportP2pPeersDapp,
            P2pRole::Wallet => StorageKey::TransportP2pPeersWallet,
        }
    }
}

type NewPeer = Deferred<PeerInfo, String>;

pub struct P2PTransport {
    role: P2pRole,
    client: Arc<P2PCommunicationClient>,
    peers: Arc<PeerManager>,
    events: Arc<EventBus>,
    serializer: Serializer,
    status: RwLock<TransportStatus>,
    listeners: Arc<ListenerSet>,
    new_peer: Arc<Mutex<NewPeer>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    // Held for the whole of a connection attempt, so concurrent callers wait for its outcome
    connecting: tokio::sync::Mutex<()>,
}

impl P2PTransport {
    pub fn new(
        role: P2pRole,
        client: P2PCommunicationClient,
        peers: PeerManager,
        events: Arc<EventBus>,
        serializer: Serializer,
    ) -> Self {
        Self {
            role,
            client: Arc::new(client),
            peers: Arc::new(peers),
            events,
            serializer,
            status: RwLock::new(TransportStatus::NotConnected),
            listeners: Arc::new(ListenerSet::new()),
            new_peer: Arc::new(Mutex::new(Deferred::new())),
            pump: Mutex::new(None),
            connecting: tokio::sync::Mutex::new(()),
        }
    }

    pub fn role(&self) -> P2pRole {
        self.role
    }

    pub fn client(&self) -> &P2PCommunicationClient {
        &self.client
    }

    /// The serialized pairing payload for a wallet to scan.
    pub fn pairing_payload(&self) -> Result<String, TransportError> {
        Ok(self.serializer.serialize(&self.client.pairing_request())?)
    }

    /// Resolves with the first peer that opens a channel after the most recent connect.
    pub fn new_peer(&self) -> Option<NewPeer> {
        self.new_peer.lock().ok().map(|d| d.clone())
    }

    fn set_status(&self, status: TransportStatus) {
        if let Ok(mut s) = self.status.write() {
            trace!("P2P transport: {} -> {status}", *s);
            *s = status;
        }
    }

    fn start_pump(&self, rx: mpsc::UnboundedReceiver<CommunicationEvent>) {
        let pump = Pump {
            client: Arc::clone(&self.client),
            peers: Arc::clone(&self.peers),
            events: Arc::clone(&self.events),
            listeners: Arc::clone(&self.listeners),
            new_peer: Arc::clone(&self.new_peer),
        };
        let handle = tokio::spawn(pump.run(rx));
        if let Ok(mut slot) = self.pump.lock() {
            if let Some(old) = slot.replace(handle) {
                old.abort();
            }
        }
    }

    fn stop_pump(&self) {
        if let Ok(mut slot) = self.pump.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }

    async fn establish(&self) -> Result<(), TransportError> {
        let waiter = NewPeer::new();
        if let Ok(mut slot) = self.new_peer.lock() {
            *slot = waiter.clone();
        }
        let rx = self.client.start().await?;
        self.start_pump(rx);

        let known = self.peers.get_peers().await?;
        if known.is_empty() && self.role == P2pRole::DApp {
            let pairing_request = self.pairing_payload()?;
            self.events.emit(BeaconEvent::P2pListenForChannelOpen { pairing_request: pairing_request.clone() });
            self.events.emit(BeaconEvent::PairInit { pairing_request });
            let peer = waiter.wait().await.map_err(|_| TransportError::PairingAborted)?;
            info!("Paired with {}", peer.name);
            return Ok(());
        }
        for peer in &known {
            if let Err(e) = self.client.listen_for_encrypted_messages(&peer.public_key) {
                warn!("Skipping peer {}. {e}", peer.public_key);
            }
        }
        debug!("Listening to {} known peer(s)", known.len());
        Ok(())
    }
}

impl Drop for P2PTransport {
    fn drop(&mut self) {
        self.stop_pump();
    }
}

/// Routes client events: messages go to the transport listeners, channel openings register new peers.
struct Pump {
    client: Arc<P2PCommunicationClient>,
    peers: Arc<PeerManager>,
    events: Arc<EventBus>,
    listeners: Arc<ListenerSet>,
    new_peer: Arc<Mutex<NewPeer>>,
}

impl Pump {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<CommunicationEvent>) {
        while let Some(event) = rx.next().await {
            match event {
                CommunicationEvent::Message { sender_public_key, payload } => {
                    let context = ConnectionContext::new(Origin::P2p, sender_public_key);
                    self.listeners.notify(payload, context).await;
                }
                CommunicationEvent::ChannelOpened(response) => self.on_channel_opened(response.to_peer_info()).await,
            }
        }
        debug!("P2P event stream closed");
    }

    async fn on_channel_opened(&self, peer: PeerInfo) {
        match self.peers.has_peer(&peer.public_key).await {
            Ok(true) => debug!("{} re-opened an existing channel", peer.name),
            Ok(false) => {
                if let Err(e) = self.peers.add_peer(peer.clone()).await {
                    warn!("Could not save peer {}. {e}", peer.public_key);
                }
            }
            Err(e) => warn!("Could not read the peer list. {e}"),
        }
        if let Err(e) = self.client.listen_for_encrypted_messages(&peer.public_key) {
            error!("Cannot listen to {}. {e}", peer.public_key);
            self.events.emit(BeaconEvent::InternalError { message: e.to_string() });
            return;
        }
        self.events.emit(BeaconEvent::P2pChannelConnectSuccess { peer: peer.clone() });
        self.events.emit(BeaconEvent::PairSuccess { peer: peer.clone() });
        if let Ok(waiter) = self.new_peer.lock() {
            waiter.resolve(peer);
        }
    }
}

#[async_trait]
impl Transport for P2PTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::P2p
    }

    fn status(&self) -> TransportStatus {
        self.status.read().map(|s| *s).unwrap_or(TransportStatus::NotConnected)
    }

    /// Connects, waiting for a wallet to pair if this is a dApp with no known peers. A call made while another
    /// connection attempt is in flight waits for that attempt to finish first.
    async fn connect(&self) -> Result<(), TransportError> {
        let _attempt = self.connecting.lock().await;
        if self.status() == TransportStatus::Connected {
            return Ok(());
        }
        self.set_status(TransportStatus::Connecting);
        match self.establish().await {
            Ok(()) => {
                self.set_status(TransportStatus::Connected);
                info!("P2P transport connected as {}", self.client.public_key());
                Ok(())
            }
            Err(e) => {
                self.stop_pump();
                self.set_status(TransportStatus::NotConnected);
                Err(e)
            }
        }
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        self.disconnect().await?;
        self.connect().await
    }

    /// Stops listening on the relay. Known peers are kept.
    async fn disconnect(&self) -> Result<(), TransportError> {
        self.stop_pump();
        self.client.stop().await?;
        self.set_status(TransportStatus::NotConnected);
        info!("P2P transport disconnected");
        Ok(())
    }

    async fn send(&self, message: &str, recipient: Option<&str>) -> Result<(), TransportError> {
        if self.status() != TransportStatus::Connected {
            return Err(TransportError::NotConnected);
        }
        match recipient {
            Some(public_key) => {
                if !self.peers.has_peer(public_key).await? {
                    return Err(TransportError::UnknownPeer(public_key.to_string()));
                }
                self.client.send_message(public_key, message).await
            }
            None => {
                let peers = self.peers.get_peers().await?;
                if peers.is_empty() {
                    return Err(TransportError::NoPeers);
                }
                let sends = peers.iter().map(|p| self.client.send_message(&p.public_key, message));
                futures::future::try_join_all(sends).await.map(|_| ())
            }
        }
    }

    fn add_listener(&self, listener: Arc<dyn TransportListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    async fn get_peers(&self) -> Result<Vec<PeerInfo>, TransportError> {
        Ok(self.peers.get_peers().await?)
    }

    async fn add_peer(&self, peer: PeerInfo) -> Result<(), TransportError> {
        self.peers.add_peer(peer.clone()).await?;
        if self.role == P2pRole::Wallet {
            self.client.open_channel(&peer).await?;
        }
        self.client.listen_for_encrypted_messages(&peer.public_key)?;
        self.events.emit(BeaconEvent::P2pChannelConnectSuccess { peer });
        Ok(())
    }

    async fn remove_peer(&self, public_key: &str) -> Result<(), TransportError> {
        self.client.stop_listening(public_key)?;
        Ok(self.peers.remove_peer(public_key).await?)
    }

    async fn remove_all_peers(&self) -> Result<(), TransportError> {
        for peer in self.peers.get_peers().await? {
            self.client.stop_listening(&peer.public_key)?;
        }
        Ok(self.peers.remove_all_peers().await?)
    }
}
