//! dApp and wallet clients.
//!
//! [`DAppClient`] initiates requests and [`WalletClient`] answers them. Both hold a [`Client`], which owns the client
//! identity, selects and connects a transport, and carries the event bus and the local rate limiter.

pub mod beacon_client;
pub mod client;
pub mod config;
pub mod dapp_client;
pub mod errors;
pub mod wallet_client;

pub use beacon_client::BeaconClient;
pub use client::{Client, MessageHandler};
pub use config::ClientConfig;
pub use dapp_client::DAppClient;
pub use errors::ClientError;
pub use wallet_client::{RequestHandler, WalletClient};
