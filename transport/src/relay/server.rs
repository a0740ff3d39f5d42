use super::{MemoryRelay, Relay, RelayFrame};
use crate::errors::TransportError;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use log::*;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// A relay node that serves [`RelayFrame`]s over WebSockets.
///
/// Every connection may subscribe to any number of addresses. Routing, including holding envelopes for absent
/// recipients, is delegated to a shared [`MemoryRelay`].
pub struct RelayServer {
    listener: TcpListener,
    relay: Arc<MemoryRelay>,
}

impl RelayServer {
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        let relay = Arc::new(MemoryRelay::new(format!("ws://{local}")));
        info!("Relay listening on {local}");
        Ok(Self { listener, relay })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until the listener fails.
    pub async fn run(self) -> Result<(), TransportError> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let relay = Arc::clone(&self.relay);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer, relay).await {
                    warn!("Relay connection from {peer} ended with an error. {e}");
                }
            });
        }
    }

    /// Runs the server on a background task.
    pub fn spawn(self) -> JoinHandle<Result<(), TransportError>> {
        tokio::spawn(self.run())
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, relay: Arc<MemoryRelay>) -> Result<(), TransportError> {
    let socket = accept_async(stream).await?;
    debug!("Relay client connected from {peer}");
    let (mut sink, mut source) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded::<RelayFrame>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.next().await {
            let Ok(text) = serde_json::to_string(&frame) else {
                continue;
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut forwards: HashMap<String, JoinHandle<()>> = HashMap::new();
    while let Some(msg) = source.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("Relay client {peer} disconnected. {e}");
                break;
            }
        };
        let frame = match serde_json::from_str::<RelayFrame>(&text) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = out_tx.unbounded_send(RelayFrame::Error { message: format!("Invalid frame. {e}") });
                continue;
            }
        };
        match frame {
            RelayFrame::Subscribe { address } => {
                let mut inbox = relay.subscribe(&address).await?;
                let out = out_tx.clone();
                let forward = tokio::spawn(async move {
                    while let Some(envelope) = inbox.next().await {
                        if out.unbounded_send(RelayFrame::Deliver { envelope }).is_err() {
                            break;
                        }
                    }
                });
                if let Some(old) = forwards.insert(address, forward) {
                    old.abort();
                }
            }
            RelayFrame::Unsubscribe { address } => {
                if let Some(forward) = forwards.remove(&address) {
                    forward.abort();
                }
            }
            RelayFrame::Publish { envelope } => relay.publish(envelope).await?,
            RelayFrame::Deliver { .. } | RelayFrame::Error { .. } => {
                let message = "Clients may only subscribe, unsubscribe and publish".to_string();
                let _ = out_tx.unbounded_send(RelayFrame::Error { message });
            }
        }
    }

    for forward in forwards.into_values() {
        forward.abort();
    }
    writer.abort();
    debug!("Relay client {peer} closed");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::relay::{RelayEnvelope, WebSocketRelay};
    use std::time::Duration;

    #[tokio::test]
    async fn websocket_clients_exchange_envelopes() {
        let _ = env_logger::try_init();
        let server = RelayServer::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("ws://{}", server.local_addr().expect("addr"));
        let _server = server.spawn();

        let alice = WebSocketRelay::connect(&url).await.expect("alice connects");
        let bob = WebSocketRelay::connect(&url).await.expect("bob connects");
        assert_eq!(alice.server_name(), url);

        // Bob is offline when Alice publishes, so the relay holds the envelope
        let envelope = RelayEnvelope { recipient: "bob".into(), sender: "alice".into(), payload: "cafe".into() };
        alice.publish(envelope.clone()).await.expect("publish");
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut inbox = bob.subscribe("bob").await.expect("subscribe");
        let received = tokio::time::timeout(Duration::from_secs(5), inbox.next()).await.expect("in time");
        assert_eq!(received, Some(envelope));

        let reply = RelayEnvelope { recipient: "alice".into(), sender: "bob".into(), payload: "beef".into() };
        let mut alice_inbox = alice.subscribe("alice").await.expect("subscribe");
        tokio::time::sleep(Duration::from_millis(50)).await;
        bob.publish(reply.clone()).await.expect("publish");
        let received = tokio::time::timeout(Duration::from_secs(5), alice_inbox.next()).await.expect("in time");
        assert_eq!(received, Some(reply));
    }
}
