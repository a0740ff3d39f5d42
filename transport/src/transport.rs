//! The transport abstraction.
//!
//! A [`Transport`] moves already-serialized message text between this client and its counterpart(s). It knows nothing
//! about message types or correlation. Inbound text is handed to every registered [`TransportListener`] together with
//! a [`ConnectionContext`] describing where it came from.

use crate::errors::{ListenerError, TransportError};
use async_trait::async_trait;
use libbeacon::types::{ConnectionContext, PeerInfo, TransportKind};
use log::*;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    NotConnected,
    Connecting,
    Connected,
}

impl Display for TransportStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportStatus::NotConnected => write!(f, "NOT_CONNECTED"),
            TransportStatus::Connecting => write!(f, "CONNECTING"),
            TransportStatus::Connected => write!(f, "CONNECTED"),
        }
    }
}

#[async_trait]
pub trait TransportListener: Send + Sync {
    async fn on_message(&self, message: String, context: ConnectionContext) -> Result<(), ListenerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn status(&self) -> TransportStatus;

    /// Moves the transport from `NotConnected` to `Connected`. Calling it on a connected transport is a no-op.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Re-establishes the underlying connection. Registered listeners are kept.
    async fn reconnect(&self) -> Result<(), TransportError>;

    /// Stops delivering messages and returns to `NotConnected`. Registered listeners are kept.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Sends serialized message text. `recipient` narrows delivery to one peer where the transport supports it;
    /// otherwise the message goes to every known counterpart.
    async fn send(&self, message: &str, recipient: Option<&str>) -> Result<(), TransportError>;

    fn add_listener(&self, listener: Arc<dyn TransportListener>) -> ListenerId;

    fn remove_listener(&self, id: ListenerId) -> bool;

    async fn get_peers(&self) -> Result<Vec<PeerInfo>, TransportError> {
        Ok(Vec::new())
    }

    async fn add_peer(&self, _peer: PeerInfo) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("peers"))
    }

    async fn remove_peer(&self, _public_key: &str) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("peers"))
    }

    async fn remove_all_peers(&self) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("peers"))
    }
}

/// The set of listeners registered on a transport.
#[derive(Default)]
pub struct ListenerSet {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn TransportListener>)>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn TransportListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push((id, listener));
        }
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        match self.listeners.write() {
            Ok(mut listeners) => {
                let before = listeners.len();
                listeners.retain(|(lid, _)| *lid != id);
                listeners.len() != before
            }
            Err(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hands `message` to every listener concurrently. Failures are logged and do not affect the other listeners.
    pub async fn notify(&self, message: String, context: ConnectionContext) {
        let listeners = match self.listeners.read() {
            Ok(l) => l.iter().map(|(_, l)| Arc::clone(l)).collect::<Vec<_>>(),
            Err(_) => return,
        };
        if listeners.is_empty() {
            debug!("Message from {context} dropped. No listeners are registered.");
            return;
        }
        let calls = listeners.iter().map(|l| l.on_message(message.clone(), context.clone()));
        let results = futures::future::join_all(calls).await;
        for err in results.into_iter().filter_map(Result::err) {
            warn!("Transport listener failed on a message from {context}. {err}");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use libbeacon::types::Origin;
    use std::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TransportListener for Recorder {
        async fn on_message(&self, message: String, _context: ConnectionContext) -> Result<(), ListenerError> {
            self.seen.lock().expect("lock").push(message);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl TransportListener for Failing {
        async fn on_message(&self, _message: String, _context: ConnectionContext) -> Result<(), ListenerError> {
            Err(ListenerError::new("always fails"))
        }
    }

    #[tokio::test]
    async fn failing_listener_does_not_block_others() {
        let set = ListenerSet::new();
        let recorder = Arc::new(Recorder { seen: Mutex::new(Vec::new()) });
        set.add(Arc::new(Failing));
        let id = set.add(recorder.clone());
        assert_eq!(set.len(), 2);
        set.notify("hello".into(), ConnectionContext::new(Origin::P2p, "peer")).await;
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["hello".to_string()]);

        assert!(set.remove(id));
        assert!(!set.remove(id));
        set.notify("again".into(), ConnectionContext::new(Origin::P2p, "peer")).await;
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }
}
