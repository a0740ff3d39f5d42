//! The peer-to-peer communication client.
//!
//! Sits between [`P2PTransport`](crate::P2PTransport) and a [`Relay`]. Every client has one inbox on the relay,
//! addressed by the hash of its public key, and a second address where wallets drop sealed pairing responses to open
//! a channel. Messages in the inbox are only accepted from peers we listen to, since the sender's public key is
//! needed to decrypt them.

use crate::errors::TransportError;
use crate::relay::{Relay, RelayEnvelope};
use futures::channel::mpsc;
use futures::StreamExt;
use libbeacon::crypto::{CryptoProvider, KeyPair};
use libbeacon::generate_id;
use libbeacon::types::{PairingRequest, PairingResponse, PeerInfo};
use log::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::task::JoinHandle;

pub fn channel_open_address(public_key_hash: &str) -> String {
    format!("channel-open:{public_key_hash}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommunicationEvent {
    /// A decrypted message from a peer we listen to.
    Message { sender_public_key: String, payload: String },
    /// A wallet opened a channel to us in answer to our pairing request.
    ChannelOpened(PairingResponse),
}

pub struct P2PCommunicationClient {
    name: String,
    icon: Option<String>,
    keypair: Arc<KeyPair>,
    crypto: Arc<dyn CryptoProvider>,
    relay: Arc<dyn Relay>,
    address: String,
    /// Public key hash -> public key, for every peer we accept messages from.
    listened: Arc<RwLock<HashMap<String, String>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl P2PCommunicationClient {
    pub fn new(
        name: impl Into<String>,
        icon: Option<String>,
        keypair: KeyPair,
        crypto: Arc<dyn CryptoProvider>,
        relay: Arc<dyn Relay>,
    ) -> Result<Self, TransportError> {
        let address = crypto.public_key_hash(&keypair.public_key_hex())?;
        Ok(Self {
            name: name.into(),
            icon,
            keypair: Arc::new(keypair),
            crypto,
            relay,
            address,
            listened: Arc::new(RwLock::new(HashMap::new())),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn public_key(&self) -> String {
        self.keypair.public_key_hex()
    }

    /// Our inbox address on the relay.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn relay_server(&self) -> String {
        self.relay.server_name()
    }

    /// A fresh pairing payload for a wallet to open a channel with.
    pub fn pairing_request(&self) -> PairingRequest {
        PairingRequest::new(generate_id(), self.name.clone(), self.public_key(), self.relay_server(), self.icon.clone())
    }

    /// Subscribes to the inbox and the channel-open address, and returns the stream of decoded events.
    pub async fn start(&self) -> Result<mpsc::UnboundedReceiver<CommunicationEvent>, TransportError> {
        let (tx, rx) = mpsc::unbounded();
        let mut inbox = self.relay.subscribe(&self.address).await?;
        let mut openings = self.relay.subscribe(&channel_open_address(&self.address)).await?;

        let listened = Arc::clone(&self.listened);
        let keypair = Arc::clone(&self.keypair);
        let crypto = Arc::clone(&self.crypto);
        let inbox_tx = tx.clone();
        let inbox_task = tokio::spawn(async move {
            while let Some(envelope) = inbox.next().await {
                let peer = listened.read().ok().and_then(|l| l.get(&envelope.sender).cloned());
                let Some(peer) = peer else {
                    debug!("Dropping a message from {}, which we are not listening to", envelope.sender);
                    continue;
                };
                match decrypt(crypto.as_ref(), &keypair, &peer, &envelope.payload) {
                    Ok(payload) => {
                        let event = CommunicationEvent::Message { sender_public_key: peer, payload };
                        if inbox_tx.unbounded_send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Could not decrypt a message from {peer}. {e}"),
                }
            }
            trace!("Inbox stream ended");
        });

        let keypair = Arc::clone(&self.keypair);
        let crypto = Arc::clone(&self.crypto);
        let openings_task = tokio::spawn(async move {
            while let Some(envelope) = openings.next().await {
                match open_pairing_response(crypto.as_ref(), &keypair, &envelope.payload) {
                    Ok(response) => {
                        debug!("Channel opened by {} ({})", response.name, response.public_key);
                        if tx.unbounded_send(CommunicationEvent::ChannelOpened(response)).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Ignoring an invalid channel-open message. {e}"),
                }
            }
            trace!("Channel-open stream ended");
        });

        if let Ok(mut tasks) = self.tasks.lock() {
            for old in tasks.drain(..) {
                old.abort();
            }
            tasks.push(inbox_task);
            tasks.push(openings_task);
        }
        info!("P2P client {} listening on relay {}", self.address, self.relay_server());
        Ok(rx)
    }

    /// Unsubscribes from the relay and ends the event stream. The set of listened peers is kept.
    pub async fn stop(&self) -> Result<(), TransportError> {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        self.relay.unsubscribe(&self.address).await?;
        self.relay.unsubscribe(&channel_open_address(&self.address)).await
    }

    /// Accepts messages from `public_key` from now on.
    pub fn listen_for_encrypted_messages(&self, public_key: &str) -> Result<(), TransportError> {
        let hash = self.crypto.public_key_hash(public_key)?;
        if let Ok(mut listened) = self.listened.write() {
            if listened.insert(hash, public_key.to_string()).is_none() {
                debug!("Listening for messages from {public_key}");
            }
        }
        Ok(())
    }

    pub fn stop_listening(&self, public_key: &str) -> Result<(), TransportError> {
        let hash = self.crypto.public_key_hash(public_key)?;
        if let Ok(mut listened) = self.listened.write() {
            listened.remove(&hash);
        }
        Ok(())
    }

    pub fn is_listening_to(&self, public_key: &str) -> bool {
        let Ok(hash) = self.crypto.public_key_hash(public_key) else {
            return false;
        };
        self.listened.read().map(|l| l.contains_key(&hash)).unwrap_or_default()
    }

    pub async fn send_message(&self, public_key: &str, message: &str) -> Result<(), TransportError> {
        let recipient = self.crypto.public_key_hash(public_key)?;
        let ciphertext = self.crypto.encrypt_for_peer(&self.keypair, public_key, message.as_bytes())?;
        let envelope = RelayEnvelope { recipient, sender: self.address.clone(), payload: hex::encode(ciphertext) };
        self.relay.publish(envelope).await
    }

    /// Answers a pairing request: drops a sealed [`PairingResponse`] on the peer's channel-open address.
    pub async fn open_channel(&self, peer: &PeerInfo) -> Result<(), TransportError> {
        let (name, icon) = (self.name.clone(), self.icon.clone());
        let response = PairingResponse::new(generate_id(), name, self.public_key(), self.relay_server(), icon);
        let json = serde_json::to_string(&response)?;
        let sealed = self.crypto.seal_for(&peer.public_key, json.as_bytes())?;
        let peer_address = self.crypto.public_key_hash(&peer.public_key)?;
        let recipient = channel_open_address(&peer_address);
        debug!("Opening a channel to {} at {recipient}", peer.name);
        let envelope = RelayEnvelope { recipient, sender: self.address.clone(), payload: hex::encode(sealed) };
        self.relay.publish(envelope).await
    }
}

impl Drop for P2PCommunicationClient {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

fn decrypt(
    crypto: &dyn CryptoProvider,
    keypair: &KeyPair,
    peer: &str,
    payload: &str,
) -> Result<String, TransportError> {
    let ciphertext = hex::decode(payload)?;
    let plaintext = crypto.decrypt_from_peer(keypair, peer, &ciphertext)?;
    String::from_utf8(plaintext).map_err(|e| TransportError::InvalidPayload(e.to_string()))
}

fn open_pairing_response(
    crypto: &dyn CryptoProvider,
    keypair: &KeyPair,
    payload: &str,
) -> Result<PairingResponse, TransportError> {
    let sealed = hex::decode(payload)?;
    let plaintext = crypto.open_sealed(keypair, &sealed)?;
    Ok(serde_json::from_slice(&plaintext)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::relay::MemoryRelay;
    use libbeacon::crypto::DefaultCrypto;
    use std::time::Duration;

    fn client(name: &str, relay: &Arc<MemoryRelay>) -> P2PCommunicationClient {
        let crypto: Arc<dyn CryptoProvider> = Arc::new(DefaultCrypto);
        let keypair = crypto.keypair_from_seed(name);
        P2PCommunicationClient::new(name, None, keypair, crypto, Arc::clone(relay) as Arc<dyn Relay>).expect("client")
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<CommunicationEvent>) -> CommunicationEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.next()).await.expect("in time").expect("event")
    }

    #[tokio::test]
    async fn pairing_then_encrypted_messages() {
        let relay = Arc::new(MemoryRelay::default());
        let dapp = client("dapp", &relay);
        let wallet = client("wallet", &relay);
        let mut dapp_events = dapp.start().await.unwrap();
        let mut wallet_events = wallet.start().await.unwrap();

        let request = dapp.pairing_request();
        assert_eq!(request.public_key, dapp.public_key());
        assert_eq!(request.relay_server, "memory");
        wallet.open_channel(&request.to_peer_info()).await.unwrap();
        wallet.listen_for_encrypted_messages(&request.public_key).unwrap();

        let CommunicationEvent::ChannelOpened(response) = next(&mut dapp_events).await else {
            panic!("expected a channel opening");
        };
        assert_eq!(response.public_key, wallet.public_key());
        dapp.listen_for_encrypted_messages(&response.public_key).unwrap();

        dapp.send_message(&wallet.public_key(), "hello wallet").await.unwrap();
        let event = next(&mut wallet_events).await;
        let payload = "hello wallet".to_string();
        assert_eq!(event, CommunicationEvent::Message { sender_public_key: dapp.public_key(), payload });

        wallet.send_message(&dapp.public_key(), "hello dapp").await.unwrap();
        let event = next(&mut dapp_events).await;
        assert!(matches!(event, CommunicationEvent::Message { payload, .. } if payload == "hello dapp"));
    }

    #[tokio::test]
    async fn messages_from_strangers_are_dropped() {
        let relay = Arc::new(MemoryRelay::default());
        let dapp = client("dapp", &relay);
        let stranger = client("stranger", &relay);
        let friend = client("friend", &relay);
        let mut events = dapp.start().await.unwrap();
        dapp.listen_for_encrypted_messages(&friend.public_key()).unwrap();
        assert!(dapp.is_listening_to(&friend.public_key()));

        stranger.send_message(&dapp.public_key(), "spam").await.unwrap();
        friend.send_message(&dapp.public_key(), "hi").await.unwrap();
        assert!(matches!(next(&mut events).await, CommunicationEvent::Message { payload, .. } if payload == "hi"));

        dapp.stop_listening(&friend.public_key()).unwrap();
        assert!(!dapp.is_listening_to(&friend.public_key()));
    }
}
