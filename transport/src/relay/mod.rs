//! Relay nodes.
//!
//! A relay forwards opaque envelopes between peers by recipient address. Addresses are public-key hashes, so the
//! relay learns who talks to whom but never sees plaintext. Envelopes published to an address nobody is subscribed to
//! are held in a small mailbox and delivered on the next subscription.

mod server;
mod websocket;

pub use server::RelayServer;
pub use websocket::WebSocketRelay;

use crate::errors::TransportError;
use async_trait::async_trait;
use futures::channel::mpsc;
use log::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// The most envelopes held for an address with no subscribers. Older envelopes are dropped first.
pub const MAILBOX_LIMIT: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    /// The address the envelope is for.
    pub recipient: String,
    /// The sender's address.
    pub sender: String,
    /// Hex-encoded ciphertext.
    pub payload: String,
}

/// Frames exchanged between a relay client and a relay server over a WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RelayFrame {
    Subscribe { address: String },
    Unsubscribe { address: String },
    Publish { envelope: RelayEnvelope },
    Deliver { envelope: RelayEnvelope },
    Error { message: String },
}

#[async_trait]
pub trait Relay: Send + Sync {
    /// The name peers use to find this relay. It is advertised in pairing payloads.
    fn server_name(&self) -> String;

    /// Starts receiving envelopes sent to `address`. Envelopes waiting in the mailbox are delivered first.
    async fn subscribe(&self, address: &str) -> Result<mpsc::UnboundedReceiver<RelayEnvelope>, TransportError>;

    async fn unsubscribe(&self, address: &str) -> Result<(), TransportError>;

    async fn publish(&self, envelope: RelayEnvelope) -> Result<(), TransportError>;
}

#[derive(Default)]
struct Routes {
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<RelayEnvelope>>>,
    mailboxes: HashMap<String, VecDeque<RelayEnvelope>>,
}

/// An in-process relay. It is also the routing table behind [`RelayServer`].
pub struct MemoryRelay {
    name: String,
    routes: Mutex<Routes>,
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl MemoryRelay {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), routes: Mutex::new(Routes::default()) }
    }

    /// The number of envelopes waiting for `address` to subscribe.
    pub fn pending_for(&self, address: &str) -> usize {
        self.routes.lock().map(|r| r.mailboxes.get(address).map(VecDeque::len).unwrap_or_default()).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Routes>, TransportError> {
        self.routes.lock().map_err(|_| TransportError::relay("routing table lock poisoned"))
    }
}

#[async_trait]
impl Relay for MemoryRelay {
    fn server_name(&self) -> String {
        self.name.clone()
    }

    async fn subscribe(&self, address: &str) -> Result<mpsc::UnboundedReceiver<RelayEnvelope>, TransportError> {
        let (tx, rx) = mpsc::unbounded();
        let mut routes = self.lock()?;
        if let Some(waiting) = routes.mailboxes.remove(address) {
            debug!("Flushing {} held envelope(s) to {address}", waiting.len());
            for envelope in waiting {
                // The receiver is still in hand, so this cannot fail
                let _ = tx.unbounded_send(envelope);
            }
        }
        routes.subscribers.entry(address.to_string()).or_default().push(tx);
        trace!("Subscribed to {address}");
        Ok(rx)
    }

    async fn unsubscribe(&self, address: &str) -> Result<(), TransportError> {
        let mut routes = self.lock()?;
        if routes.subscribers.remove(address).is_some() {
            trace!("Unsubscribed from {address}");
        }
        Ok(())
    }

    async fn publish(&self, envelope: RelayEnvelope) -> Result<(), TransportError> {
        let mut routes = self.lock()?;
        let address = envelope.recipient.clone();
        let mut delivered = false;
        if let Some(subscribers) = routes.subscribers.get_mut(&address) {
            subscribers.retain(|tx| match tx.unbounded_send(envelope.clone()) {
                Ok(()) => {
                    delivered = true;
                    true
                }
                Err(_) => false,
            });
            if subscribers.is_empty() {
                routes.subscribers.remove(&address);
            }
        }
        if !delivered {
            let mailbox = routes.mailboxes.entry(address.clone()).or_default();
            if mailbox.len() >= MAILBOX_LIMIT {
                warn!("Mailbox for {address} is full. Dropping the oldest envelope.");
                mailbox.pop_front();
            }
            mailbox.push_back(envelope);
            trace!("Holding envelope for {address}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use futures::StreamExt;

    fn envelope(recipient: &str, payload: &str) -> RelayEnvelope {
        RelayEnvelope { recipient: recipient.into(), sender: "sender".into(), payload: payload.into() }
    }

    #[tokio::test]
    async fn routes_by_recipient() {
        let relay = MemoryRelay::default();
        let mut alice = relay.subscribe("alice").await.unwrap();
        let mut bob = relay.subscribe("bob").await.unwrap();
        relay.publish(envelope("bob", "for bob")).await.unwrap();
        relay.publish(envelope("alice", "for alice")).await.unwrap();
        assert_eq!(bob.next().await.unwrap().payload, "for bob");
        assert_eq!(alice.next().await.unwrap().payload, "for alice");
    }

    #[tokio::test]
    async fn holds_envelopes_until_someone_subscribes() {
        let relay = MemoryRelay::default();
        relay.publish(envelope("carol", "one")).await.unwrap();
        relay.publish(envelope("carol", "two")).await.unwrap();
        assert_eq!(relay.pending_for("carol"), 2);
        let mut carol = relay.subscribe("carol").await.unwrap();
        assert_eq!(relay.pending_for("carol"), 0);
        assert_eq!(carol.next().await.unwrap().payload, "one");
        assert_eq!(carol.next().await.unwrap().payload, "two");
    }

    #[tokio::test]
    async fn dropped_subscribers_fall_back_to_the_mailbox() {
        let relay = MemoryRelay::default();
        let rx = relay.subscribe("dave").await.unwrap();
        drop(rx);
        relay.publish(envelope("dave", "late")).await.unwrap();
        assert_eq!(relay.pending_for("dave"), 1);

        relay.unsubscribe("dave").await.unwrap();
        for i in 0..MAILBOX_LIMIT + 5 {
            relay.publish(envelope("dave", &i.to_string())).await.unwrap();
        }
        assert_eq!(relay.pending_for("dave"), MAILBOX_LIMIT);
    }

    #[test]
    fn frame_wire_format() {
        let frame = RelayFrame::Subscribe { address: "abc".into() };
        assert_eq!(serde_json::to_string(&frame).unwrap(), r#"{"op":"subscribe","address":"abc"}"#);
        let frame: RelayFrame =
            serde_json::from_str(r#"{"op":"deliver","envelope":{"recipient":"a","sender":"b","payload":"00"}}"#)
                .unwrap();
        assert!(matches!(frame, RelayFrame::Deliver { envelope } if envelope.payload == "00"));
    }
}
