//! Transports for dApp/wallet messaging.
//!
//! Two [`Transport`] implementations are provided:
//! - [`ExtensionTransport`] talks to a browser extension over an [`ExtensionBridge`].
//! - [`P2PTransport`] pairs with a peer and exchanges end-to-end encrypted messages through a [`Relay`].

pub mod errors;
pub mod extension;
pub mod p2p_client;
pub mod p2p_transport;
pub mod relay;
pub mod transport;

pub use errors::{ListenerError, TransportError};
pub use extension::{ExtensionBridge, ExtensionTransport, LocalBridge};
pub use p2p_client::P2PCommunicationClient;
pub use p2p_transport::{P2PTransport, P2pRole};
pub use relay::{MemoryRelay, Relay, RelayServer, WebSocketRelay};
pub use transport::{ListenerId, Transport, TransportListener, TransportStatus};
