//! Browser-extension transport.
//!
//! A page and a browser extension talk over a shared message bridge (in a browser, `window.postMessage`). Every
//! message on the bridge is visible to every participant, so messages carry a [`BridgeTarget`] saying who should act
//! on them. The [`ExtensionBridge`] trait abstracts the bridge; [`LocalBridge`] is an in-process implementation.
//!
//! Extension discovery is a ping/pong exchange: the page posts `ping` to the extension target, and every installed
//! extension answers `pong` to the page target.

use crate::errors::TransportError;
use crate::transport::{ListenerId, ListenerSet, Transport, TransportListener, TransportStatus};
use async_trait::async_trait;
use libbeacon::constants::{EXTENSION_PING, EXTENSION_PONG};
use libbeacon::types::{ConnectionContext, Origin, TransportKind};
use log::*;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeTarget {
    Extension,
    Page,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeMessage {
    pub target: BridgeTarget,
    /// On page-bound messages, the sending extension. On extension-bound messages, the addressed extension, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_id: Option<String>,
    pub payload: String,
}

impl BridgeMessage {
    pub fn to_extension(extension_id: Option<String>, payload: impl Into<String>) -> Self {
        Self { target: BridgeTarget::Extension, extension_id, payload: payload.into() }
    }

    pub fn to_page(extension_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self { target: BridgeTarget::Page, extension_id: Some(extension_id.into()), payload: payload.into() }
    }
}

pub trait ExtensionBridge: Send + Sync {
    fn post(&self, message: BridgeMessage) -> Result<(), TransportError>;
    fn subscribe(&self) -> broadcast::Receiver<BridgeMessage>;
}

/// An in-process bridge. Every subscriber sees every posted message, including its own.
#[derive(Clone)]
pub struct LocalBridge {
    tx: broadcast::Sender<BridgeMessage>,
}

impl Default for LocalBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBridge {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }
}

impl ExtensionBridge for LocalBridge {
    fn post(&self, message: BridgeMessage) -> Result<(), TransportError> {
        // Posting into an empty window is not an error
        let _ = self.tx.send(message);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BridgeMessage> {
        self.tx.subscribe()
    }
}

/// Checks for an extension. Returns `true` if any extension answers the ping before `timeout`.
pub async fn is_available(bridge: &dyn ExtensionBridge, timeout: Duration) -> bool {
    let mut rx = bridge.subscribe();
    if let Err(e) = bridge.post(BridgeMessage::to_extension(None, EXTENSION_PING)) {
        warn!("Could not ping for extensions. {e}");
        return false;
    }
    let wait_for_pong = async {
        loop {
            match rx.recv().await {
                Ok(msg) if msg.target == BridgeTarget::Page && msg.payload == EXTENSION_PONG => return true,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return false,
            }
        }
    };
    let available = tokio::time::timeout(timeout, wait_for_pong).await.unwrap_or(false);
    debug!("Extension available: {available}");
    available
}

/// Collects the ids of every extension that answers a ping within `window`.
pub async fn get_available_extensions(bridge: &dyn ExtensionBridge, window: Duration) -> Vec<String> {
    let mut rx = bridge.subscribe();
    if let Err(e) = bridge.post(BridgeMessage::to_extension(None, EXTENSION_PING)) {
        warn!("Could not ping for extensions. {e}");
        return Vec::new();
    }
    let mut found = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Ok(msg)) if msg.target == BridgeTarget::Page && msg.payload == EXTENSION_PONG => {
                if let Some(id) = msg.extension_id {
                    if !found.contains(&id) {
                        found.push(id);
                    }
                }
            }
            Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => continue,
            Ok(Err(RecvError::Closed)) | Err(_) => break,
        }
    }
    found
}

pub struct ExtensionTransport {
    bridge: Arc<dyn ExtensionBridge>,
    status: RwLock<TransportStatus>,
    listeners: Arc<ListenerSet>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ExtensionTransport {
    pub fn new(bridge: Arc<dyn ExtensionBridge>) -> Self {
        Self {
            bridge,
            status: RwLock::new(TransportStatus::NotConnected),
            listeners: Arc::new(ListenerSet::new()),
            reader: Mutex::new(None),
        }
    }

    pub fn bridge(&self) -> Arc<dyn ExtensionBridge> {
        Arc::clone(&self.bridge)
    }

    fn set_status(&self, status: TransportStatus) {
        if let Ok(mut s) = self.status.write() {
            trace!("Extension transport: {} -> {status}", *s);
            *s = status;
        }
    }

    fn start_reader(&self) {
        let mut rx = self.bridge.subscribe();
        let listeners = Arc::clone(&self.listeners);
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => {
                        if msg.target != BridgeTarget::Page || msg.payload == EXTENSION_PONG {
                            continue;
                        }
                        let id = msg.extension_id.unwrap_or_default();
                        listeners.notify(msg.payload, ConnectionContext::new(Origin::Extension, id)).await;
                    }
                    Err(RecvError::Lagged(n)) => warn!("Extension transport missed {n} bridge messages"),
                    Err(RecvError::Closed) => {
                        debug!("Extension bridge closed");
                        break;
                    }
                }
            }
        });
        if let Ok(mut reader) = self.reader.lock() {
            if let Some(old) = reader.replace(handle) {
                old.abort();
            }
        }
    }
}

impl Drop for ExtensionTransport {
    fn drop(&mut self) {
        if let Ok(mut reader) = self.reader.lock() {
            if let Some(handle) = reader.take() {
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl Transport for ExtensionTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::PostMessage
    }

    fn status(&self) -> TransportStatus {
        self.status.read().map(|s| *s).unwrap_or(TransportStatus::NotConnected)
    }

    async fn connect(&self) -> Result<(), TransportError> {
        if self.status() != TransportStatus::NotConnected {
            return Ok(());
        }
        self.set_status(TransportStatus::Connecting);
        self.start_reader();
        self.set_status(TransportStatus::Connected);
        info!("Extension transport connected");
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        self.set_status(TransportStatus::Connecting);
        self.start_reader();
        self.set_status(TransportStatus::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Ok(mut reader) = self.reader.lock() {
            if let Some(handle) = reader.take() {
                handle.abort();
            }
        }
        self.set_status(TransportStatus::NotConnected);
        Ok(())
    }

    async fn send(&self, message: &str, recipient: Option<&str>) -> Result<(), TransportError> {
        if self.status() != TransportStatus::Connected {
            return Err(TransportError::NotConnected);
        }
        self.bridge.post(BridgeMessage::to_extension(recipient.map(String::from), message))
    }

    fn add_listener(&self, listener: Arc<dyn TransportListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}

/// Answers pings on `bridge` as extension `extension_id`, and runs `handler` on every other extension-bound payload,
/// posting whatever it returns back to the page. This is the extension half of the bridge, used to host a wallet
/// behind an [`ExtensionTransport`] in the same process.
pub fn spawn_extension_responder<F>(
    bridge: Arc<dyn ExtensionBridge>,
    extension_id: String,
    handler: F,
) -> JoinHandle<()>
where
    F: Fn(String) -> Option<String> + Send + Sync + 'static,
{
    let mut rx = bridge.subscribe();
    tokio::spawn(async move {
        loop {
            let msg = match rx.recv().await {
                Ok(msg) => msg,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            };
            if msg.target != BridgeTarget::Extension {
                continue;
            }
            if msg.extension_id.as_ref().is_some_and(|id| *id != extension_id) {
                continue;
            }
            let reply = if msg.payload == EXTENSION_PING {
                Some(EXTENSION_PONG.to_string())
            } else {
                handler(msg.payload)
            };
            if let Some(reply) = reply {
                if let Err(e) = bridge.post(BridgeMessage::to_page(extension_id.clone(), reply)) {
                    warn!("Extension {extension_id} could not reply. {e}");
                }
            }
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::errors::ListenerError;

    struct Forward(tokio::sync::mpsc::UnboundedSender<(String, ConnectionContext)>);

    #[async_trait]
    impl TransportListener for Forward {
        async fn on_message(&self, message: String, context: ConnectionContext) -> Result<(), ListenerError> {
            self.0.send((message, context)).map_err(|e| ListenerError::new(e.to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn no_extension_means_unavailable_after_the_timeout() {
        let bridge = LocalBridge::new();
        assert!(!is_available(&bridge, Duration::from_millis(1000)).await);
        assert!(get_available_extensions(&bridge, Duration::from_millis(1000)).await.is_empty());
    }

    #[tokio::test]
    async fn extensions_answer_pings() {
        let bridge: Arc<dyn ExtensionBridge> = Arc::new(LocalBridge::new());
        let _a = spawn_extension_responder(Arc::clone(&bridge), "ext-a".into(), |_| None);
        let _b = spawn_extension_responder(Arc::clone(&bridge), "ext-b".into(), |_| None);
        assert!(is_available(bridge.as_ref(), Duration::from_secs(1)).await);
        let mut found = get_available_extensions(bridge.as_ref(), Duration::from_millis(200)).await;
        found.sort();
        assert_eq!(found, vec!["ext-a".to_string(), "ext-b".to_string()]);
    }

    #[tokio::test]
    async fn messages_round_trip_through_the_extension() {
        let bridge: Arc<dyn ExtensionBridge> = Arc::new(LocalBridge::new());
        let _ext = spawn_extension_responder(Arc::clone(&bridge), "ext".into(), |p| Some(format!("echo:{p}")));
        let transport = ExtensionTransport::new(Arc::clone(&bridge));
        assert_eq!(transport.status(), TransportStatus::NotConnected);
        assert!(matches!(transport.send("early", None).await, Err(TransportError::NotConnected)));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        transport.add_listener(Arc::new(Forward(tx)));
        transport.connect().await.expect("connect");
        assert_eq!(transport.status(), TransportStatus::Connected);
        transport.send("hello", None).await.expect("send");
        let (msg, ctx) = rx.recv().await.expect("reply");
        assert_eq!(msg, "echo:hello");
        assert_eq!(ctx, ConnectionContext::new(Origin::Extension, "ext"));

        // Listeners survive a reconnect
        transport.reconnect().await.expect("reconnect");
        transport.send("again", None).await.expect("send");
        let (msg, _) = rx.recv().await.expect("reply");
        assert_eq!(msg, "echo:again");
    }
}
