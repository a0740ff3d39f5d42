use super::{Relay, RelayEnvelope, RelayFrame};
use crate::errors::TransportError;
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use log::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

type Subscriptions = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<RelayEnvelope>>>>;

/// A connection to a relay node over a WebSocket.
///
/// One socket carries every subscription. A writer task drains outbound frames and a reader task hands delivered
/// envelopes to the matching subscription. When the socket closes, every subscription stream ends.
pub struct WebSocketRelay {
    url: String,
    outbound: mpsc::UnboundedSender<RelayFrame>,
    subscriptions: Subscriptions,
    tasks: Vec<JoinHandle<()>>,
}

impl WebSocketRelay {
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (socket, _) = connect_async(url).await?;
        info!("Connected to relay at {url}");
        let (mut sink, mut stream) = socket.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded::<RelayFrame>();
        let subscriptions: Subscriptions = Arc::new(Mutex::new(HashMap::new()));

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.next().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(t) => t,
                    Err(e) => {
                        error!("Could not encode relay frame. {e}");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!("Relay connection lost while sending. {e}");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let subs = Arc::clone(&subscriptions);
        let relay_url = url.to_string();
        let reader = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("Relay connection error. {e}");
                        break;
                    }
                };
                match serde_json::from_str::<RelayFrame>(&text) {
                    Ok(RelayFrame::Deliver { envelope }) => dispatch(&subs, envelope),
                    Ok(RelayFrame::Error { message }) => warn!("Relay reported an error: {message}"),
                    Ok(other) => debug!("Ignoring unexpected relay frame: {other:?}"),
                    Err(e) => warn!("Invalid frame from relay. {e}"),
                }
            }
            info!("Relay connection to {relay_url} closed");
            if let Ok(mut subs) = subs.lock() {
                subs.clear();
            }
        });

        Ok(Self { url: url.to_string(), outbound, subscriptions, tasks: vec![writer, reader] })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn send_frame(&self, frame: RelayFrame) -> Result<(), TransportError> {
        self.outbound.unbounded_send(frame).map_err(|_| TransportError::Closed)
    }
}

fn dispatch(subscriptions: &Subscriptions, envelope: RelayEnvelope) {
    let Ok(mut subs) = subscriptions.lock() else {
        return;
    };
    let address = envelope.recipient.clone();
    match subs.get(&address) {
        Some(tx) => {
            if tx.unbounded_send(envelope).is_err() {
                debug!("Subscription to {address} was dropped");
                subs.remove(&address);
            }
        }
        None => debug!("Envelope for {address} arrived without a subscription"),
    }
}

impl Drop for WebSocketRelay {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl Relay for WebSocketRelay {
    fn server_name(&self) -> String {
        self.url.clone()
    }

    async fn subscribe(&self, address: &str) -> Result<mpsc::UnboundedReceiver<RelayEnvelope>, TransportError> {
        let (tx, rx) = mpsc::unbounded();
        if let Ok(mut subs) = self.subscriptions.lock() {
            subs.insert(address.to_string(), tx);
        }
        self.send_frame(RelayFrame::Subscribe { address: address.to_string() })?;
        Ok(rx)
    }

    async fn unsubscribe(&self, address: &str) -> Result<(), TransportError> {
        if let Ok(mut subs) = self.subscriptions.lock() {
            subs.remove(address);
        }
        self.send_frame(RelayFrame::Unsubscribe { address: address.to_string() })
    }

    async fn publish(&self, envelope: RelayEnvelope) -> Result<(), TransportError> {
        self.send_frame(RelayFrame::Publish { envelope })
    }
}
