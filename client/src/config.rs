use beacon_transport::{ExtensionBridge, Relay, Transport};
use libbeacon::constants::{
    DEFAULT_RATE_LIMIT, DEFAULT_RATE_LIMIT_WINDOW, EXTENSION_DETECTION_TIMEOUT, TRANSPORT_GRACE_PERIOD,
};
use libbeacon::crypto::{CryptoProvider, DefaultCrypto};
use libbeacon::events::EventHandler;
use libbeacon::{EventKind, Storage, WireFormat};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Everything a client instance needs. Nothing is shared between instances unless the host passes the same handle
/// (usually the storage) to several configs.
#[derive(Clone)]
pub struct ClientConfig {
    pub name: String,
    pub icon: Option<String>,
    pub storage: Arc<dyn Storage>,
    pub crypto: Arc<dyn CryptoProvider>,
    /// Replacements for the default (logging) event handlers.
    pub event_handlers: HashMap<EventKind, EventHandler>,
    pub rate_limit: usize,
    pub rate_limit_window: Duration,
    /// The message bridge used to detect a browser extension. Without one, the extension transport is never selected.
    pub extension_bridge: Option<Arc<dyn ExtensionBridge>>,
    pub extension_detection_timeout: Duration,
    pub transport_grace_period: Duration,
    /// The relay to use when falling back to the peer-to-peer transport.
    pub relay: Option<Arc<dyn Relay>>,
    /// A transport to use instead of running transport selection.
    pub transport: Option<Arc<dyn Transport>>,
    pub wire_format: WireFormat,
}

impl ClientConfig {
    pub fn new(name: impl Into<String>, storage: Arc<dyn Storage>) -> Self {
        Self {
            name: name.into(),
            icon: None,
            storage,
            crypto: Arc::new(DefaultCrypto),
            event_handlers: HashMap::new(),
            rate_limit: DEFAULT_RATE_LIMIT,
            rate_limit_window: DEFAULT_RATE_LIMIT_WINDOW,
            extension_bridge: None,
            extension_detection_timeout: EXTENSION_DETECTION_TIMEOUT,
            transport_grace_period: TRANSPORT_GRACE_PERIOD,
            relay: None,
            transport: None,
            wire_format: WireFormat::default(),
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_crypto(mut self, crypto: Arc<dyn CryptoProvider>) -> Self {
        self.crypto = crypto;
        self
    }

    pub fn with_event_handler(mut self, kind: EventKind, handler: EventHandler) -> Self {
        self.event_handlers.insert(kind, handler);
        self
    }

    pub fn with_rate_limit(mut self, limit: usize, window: Duration) -> Self {
        self.rate_limit = limit;
        self.rate_limit_window = window;
        self
    }

    pub fn with_extension_bridge(mut self, bridge: Arc<dyn ExtensionBridge>) -> Self {
        self.extension_bridge = Some(bridge);
        self
    }

    pub fn with_extension_detection_timeout(mut self, timeout: Duration) -> Self {
        self.extension_detection_timeout = timeout;
        self
    }

    pub fn with_transport_grace_period(mut self, grace: Duration) -> Self {
        self.transport_grace_period = grace;
        self
    }

    pub fn with_relay(mut self, relay: Arc<dyn Relay>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_wire_format(mut self, format: WireFormat) -> Self {
        self.wire_format = format;
        self
    }
}
