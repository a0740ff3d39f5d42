//! Core protocol types and services for dApp/wallet messaging.
//!
//! This crate holds everything that does not depend on a concrete transport: the message model and its wire
//! encoding, the settle-once [`Deferred`] handle used for request correlation, the storage and crypto collaborators,
//! the persisted-state managers, the message interceptors, the local rate limiter and the event bus.

pub mod constants;
pub mod crypto;
pub mod deferred;
pub mod errors;
pub mod events;
pub mod interceptors;
pub mod managers;
pub mod messages;
pub mod migration;
pub mod rate_limit;
pub mod serializer;
pub mod storage;
pub mod types;

pub use deferred::{Deferred, DeferredStatus};
pub use errors::{BeaconError, BeaconErrorType};
pub use events::{BeaconEvent, EventBus, EventKind};
pub use messages::{BeaconMessage, MessageKind, MessagePayload};
pub use serializer::{Serializer, WireFormat};
pub use storage::{Storage, StorageKey};

/// Generates a fresh random message / request identifier.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
