use std::time::Duration;

/// The message protocol version stamped on every outgoing [`crate::BeaconMessage`].
pub const BEACON_VERSION: &str = "2";
/// The SDK version, persisted so that future migrations know what they are upgrading from.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_RATE_LIMIT: usize = 2;
pub const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(5);

/// How long an extension has to answer a ping before it is considered absent.
pub const EXTENSION_DETECTION_TIMEOUT: Duration = Duration::from_millis(1000);
/// How long transport selection waits for extension detection before falling through to P2P.
pub const TRANSPORT_GRACE_PERIOD: Duration = Duration::from_millis(200);

pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:7750";
pub const DEFAULT_RELAY_LISTEN_ADDRESS: &str = "127.0.0.1:7750";

/// Payload used to detect a browser extension on the message bridge.
pub const EXTENSION_PING: &str = "ping";
pub const EXTENSION_PONG: &str = "pong";

pub const PAIRING_REQUEST_TYPE: &str = "p2p-pairing-request";
pub const PAIRING_RESPONSE_TYPE: &str = "p2p-pairing-response";
