//! The typed event bus.
//!
//! Clients report everything a user interface might want to react to as a [`BeaconEvent`]. Each [`EventKind`] has a
//! default handler (which logs) that the host can override, and any number of extra listeners. A handler that fails
//! is logged; it never stops the remaining handlers. Async consumers can also [`subscribe`](EventBus::subscribe) to a
//! broadcast stream of every emitted event.

use crate::errors::{BeaconError, EventHandlerError};
use crate::types::{AccountInfo, Network, PeerInfo, TransportKind};
use log::*;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq)]
pub enum BeaconEvent {
    PermissionRequestSent,
    PermissionRequestSuccess { account: AccountInfo },
    PermissionRequestError { error: BeaconError },
    OperationRequestSent,
    OperationRequestSuccess { account: AccountInfo, operation_hash: String },
    OperationRequestError { error: BeaconError },
    SignRequestSent,
    SignRequestSuccess { signature: String },
    SignRequestError { error: BeaconError },
    BroadcastRequestSent,
    BroadcastRequestSuccess { network: Network, transaction_hash: String },
    BroadcastRequestError { error: BeaconError },
    LocalRateLimitReached,
    NoPermissions,
    ActiveAccountSet { account: Option<AccountInfo> },
    ActiveTransportSet { kind: TransportKind },
    /// A pairing payload is ready to be shown to the user (e.g. as a QR code).
    PairInit { pairing_request: String },
    PairSuccess { peer: PeerInfo },
    ChannelClosed,
    P2pChannelConnectSuccess { peer: PeerInfo },
    /// A dApp with no known peers is waiting for a wallet to open a channel using this pairing payload.
    P2pListenForChannelOpen { pairing_request: String },
    InternalError { message: String },
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PermissionRequestSent,
    PermissionRequestSuccess,
    PermissionRequestError,
    OperationRequestSent,
    OperationRequestSuccess,
    OperationRequestError,
    SignRequestSent,
    SignRequestSuccess,
    SignRequestError,
    BroadcastRequestSent,
    BroadcastRequestSuccess,
    BroadcastRequestError,
    LocalRateLimitReached,
    NoPermissions,
    ActiveAccountSet,
    ActiveTransportSet,
    PairInit,
    PairSuccess,
    ChannelClosed,
    P2pChannelConnectSuccess,
    P2pListenForChannelOpen,
    InternalError,
    Unknown,
}

impl EventKind {
    pub const ALL: [EventKind; 23] = [
        EventKind::PermissionRequestSent,
        EventKind::PermissionRequestSuccess,
        EventKind::PermissionRequestError,
        EventKind::OperationRequestSent,
        EventKind::OperationRequestSuccess,
        EventKind::OperationRequestError,
        EventKind::SignRequestSent,
        EventKind::SignRequestSuccess,
        EventKind::SignRequestError,
        EventKind::BroadcastRequestSent,
        EventKind::BroadcastRequestSuccess,
        EventKind::BroadcastRequestError,
        EventKind::LocalRateLimitReached,
        EventKind::NoPermissions,
        EventKind::ActiveAccountSet,
        EventKind::ActiveTransportSet,
        EventKind::PairInit,
        EventKind::PairSuccess,
        EventKind::ChannelClosed,
        EventKind::P2pChannelConnectSuccess,
        EventKind::P2pListenForChannelOpen,
        EventKind::InternalError,
        EventKind::Unknown,
    ];
}

impl BeaconEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            BeaconEvent::PermissionRequestSent => EventKind::PermissionRequestSent,
            BeaconEvent::PermissionRequestSuccess { .. } => EventKind::PermissionRequestSuccess,
            BeaconEvent::PermissionRequestError { .. } => EventKind::PermissionRequestError,
            BeaconEvent::OperationRequestSent => EventKind::OperationRequestSent,
            BeaconEvent::OperationRequestSuccess { .. } => EventKind::OperationRequestSuccess,
            BeaconEvent::OperationRequestError { .. } => EventKind::OperationRequestError,
            BeaconEvent::SignRequestSent => EventKind::SignRequestSent,
            BeaconEvent::SignRequestSuccess { .. } => EventKind::SignRequestSuccess,
            BeaconEvent::SignRequestError { .. } => EventKind::SignRequestError,
            BeaconEvent::BroadcastRequestSent => EventKind::BroadcastRequestSent,
            BeaconEvent::BroadcastRequestSuccess { .. } => EventKind::BroadcastRequestSuccess,
            BeaconEvent::BroadcastRequestError { .. } => EventKind::BroadcastRequestError,
            BeaconEvent::LocalRateLimitReached => EventKind::LocalRateLimitReached,
            BeaconEvent::NoPermissions => EventKind::NoPermissions,
            BeaconEvent::ActiveAccountSet { .. } => EventKind::ActiveAccountSet,
            BeaconEvent::ActiveTransportSet { .. } => EventKind::ActiveTransportSet,
            BeaconEvent::PairInit { .. } => EventKind::PairInit,
            BeaconEvent::PairSuccess { .. } => EventKind::PairSuccess,
            BeaconEvent::ChannelClosed => EventKind::ChannelClosed,
            BeaconEvent::P2pChannelConnectSuccess { .. } => EventKind::P2pChannelConnectSuccess,
            BeaconEvent::P2pListenForChannelOpen { .. } => EventKind::P2pListenForChannelOpen,
            BeaconEvent::InternalError { .. } => EventKind::InternalError,
            BeaconEvent::Unknown => EventKind::Unknown,
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&BeaconEvent) -> Result<(), EventHandlerError> + Send + Sync>;

/// Wraps a closure as an [`EventHandler`].
pub fn handler<F>(f: F) -> EventHandler
where
    F: Fn(&BeaconEvent) -> Result<(), EventHandlerError> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn log_event(event: &BeaconEvent) -> Result<(), EventHandlerError> {
    match event {
        BeaconEvent::PermissionRequestSuccess { account } => {
            info!("Permission granted for {} on {}", account.address, account.network.network_type)
        }
        BeaconEvent::OperationRequestSuccess { operation_hash, .. } => info!("Operation injected: {operation_hash}"),
        BeaconEvent::SignRequestSuccess { signature } => info!("Payload signed: {signature}"),
        BeaconEvent::BroadcastRequestSuccess { transaction_hash, .. } => {
            info!("Transaction broadcast: {transaction_hash}")
        }
        BeaconEvent::PermissionRequestError { error }
        | BeaconEvent::OperationRequestError { error }
        | BeaconEvent::SignRequestError { error }
        | BeaconEvent::BroadcastRequestError { error } => warn!("{}: {error}", error.title()),
        BeaconEvent::LocalRateLimitReached => warn!("Rate limit reached. Please slow down."),
        BeaconEvent::NoPermissions => warn!("No permissions to send this request to the wallet."),
        BeaconEvent::ActiveAccountSet { account } => match account {
            Some(a) => info!("Active account set to {}", a.address),
            None => info!("Active account cleared"),
        },
        BeaconEvent::ActiveTransportSet { kind } => info!("Active transport set to {kind}"),
        BeaconEvent::PairInit { pairing_request } | BeaconEvent::P2pListenForChannelOpen { pairing_request } => {
            info!("Waiting for a wallet to pair. Pairing payload: {pairing_request}")
        }
        BeaconEvent::PairSuccess { peer } | BeaconEvent::P2pChannelConnectSuccess { peer } => {
            info!("Paired with {} ({})", peer.name, peer.public_key)
        }
        BeaconEvent::InternalError { message } => error!("Internal error: {message}"),
        other => debug!("Event: {other:?}"),
    }
    Ok(())
}

pub struct EventBus {
    defaults: RwLock<HashMap<EventKind, EventHandler>>,
    listeners: RwLock<HashMap<EventKind, Vec<EventHandler>>>,
    stream: broadcast::Sender<BeaconEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates a bus with the logging default handler installed for every event kind.
    pub fn new() -> Self {
        let log: EventHandler = Arc::new(log_event);
        let defaults = EventKind::ALL.iter().map(|k| (*k, Arc::clone(&log))).collect();
        let (stream, _) = broadcast::channel(64);
        Self { defaults: RwLock::new(defaults), listeners: RwLock::new(HashMap::new()), stream }
    }

    /// Creates a bus with the given default handlers replacing the built-in ones.
    pub fn with_overrides(overrides: HashMap<EventKind, EventHandler>) -> Self {
        let bus = Self::new();
        for (kind, h) in overrides {
            bus.override_default(kind, h);
        }
        bus
    }

    /// Replaces the default handler for `kind`.
    pub fn override_default(&self, kind: EventKind, handler: EventHandler) {
        if let Ok(mut defaults) = self.defaults.write() {
            defaults.insert(kind, handler);
        }
    }

    /// Adds a listener for `kind`. Listeners run after the default handler, in registration order.
    pub fn on(&self, kind: EventKind, handler: EventHandler) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.entry(kind).or_default().push(handler);
        }
    }

    /// A stream of every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<BeaconEvent> {
        self.stream.subscribe()
    }

    pub fn emit(&self, event: BeaconEvent) {
        let kind = event.kind();
        trace!("Emitting {kind:?}");
        let mut handlers = Vec::new();
        if let Some(h) = self.defaults.read().ok().and_then(|d| d.get(&kind).cloned()) {
            handlers.push(h);
        }
        if let Some(extra) = self.listeners.read().ok().and_then(|l| l.get(&kind).cloned()) {
            handlers.extend(extra);
        }
        for h in handlers {
            if let Err(e) = h(&event) {
                error!("Event handler for {kind:?} failed. {e}");
            }
        }
        // Nobody listening on the stream is fine
        let _ = self.stream.send(event);
    }
}
