//! A dApp talking to a browser extension over the in-process message bridge.

use beacon_client::{ClientConfig, ClientError, DAppClient};
use beacon_transport::extension::{spawn_extension_responder, BridgeMessage, BridgeTarget};
use beacon_transport::{ExtensionBridge, LocalBridge};
use libbeacon::constants::{EXTENSION_PING, EXTENSION_PONG};
use libbeacon::messages::BroadcastResponse;
use libbeacon::storage::MemoryStorage;
use libbeacon::types::TransportKind;
use libbeacon::{BeaconEvent, BeaconMessage, MessagePayload, Serializer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

/// An extension that answers pings itself and hands every other extension-bound payload to the test.
fn fake_extension(bridge: Arc<dyn ExtensionBridge>) -> mpsc::UnboundedReceiver<String> {
    let mut rx = bridge.subscribe();
    let (tx, requests) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok(msg) = rx.recv().await {
            if msg.target != BridgeTarget::Extension {
                continue;
            }
            if msg.payload == EXTENSION_PING {
                bridge.post(BridgeMessage::to_page("ext", EXTENSION_PONG)).expect("pong");
            } else if tx.send(msg.payload).is_err() {
                break;
            }
        }
    });
    requests
}

fn broadcast_reply(request: &BeaconMessage) -> BeaconMessage {
    let signed = match &request.payload {
        MessagePayload::BroadcastRequest(r) => r.signed_transaction.clone(),
        other => panic!("expected a broadcast request, got {other:?}"),
    };
    let payload = MessagePayload::BroadcastResponse(BroadcastResponse { transaction_hash: format!("hash-{signed}") });
    BeaconMessage::new(request.id.clone(), "wallet", payload)
}

#[tokio::test]
async fn out_of_order_replies_reach_the_right_caller() {
    let _ = env_logger::try_init();
    let bridge: Arc<dyn ExtensionBridge> = Arc::new(LocalBridge::new());
    let mut requests = fake_extension(Arc::clone(&bridge));
    let config = ClientConfig::new("dApp", Arc::new(MemoryStorage::new()))
        .with_extension_bridge(Arc::clone(&bridge))
        .with_transport_grace_period(Duration::from_secs(1))
        .with_rate_limit(10, Duration::from_secs(5));
    let dapp = Arc::new(DAppClient::new(config).await.expect("dapp"));
    assert_eq!(dapp.init().await.unwrap(), TransportKind::PostMessage);

    let first = {
        let dapp = Arc::clone(&dapp);
        tokio::spawn(async move { dapp.request_broadcast(None, "aa").await })
    };
    let serializer = Serializer::default();
    let a = serializer.deserialize_message(&tokio::time::timeout(WAIT, requests.recv()).await.unwrap().unwrap());
    let second = {
        let dapp = Arc::clone(&dapp);
        tokio::spawn(async move { dapp.request_broadcast(None, "bb").await })
    };
    let b = serializer.deserialize_message(&tokio::time::timeout(WAIT, requests.recv()).await.unwrap().unwrap());
    let (a, b) = (a.expect("decodable"), b.expect("decodable"));
    assert_ne!(a.id, b.id);
    assert_eq!(a.sender_id, dapp.beacon_id().await.unwrap());
    assert_eq!(dapp.pending_requests(), 2);

    for request in [&b, &a] {
        let text = serializer.serialize(&broadcast_reply(request)).unwrap();
        bridge.post(BridgeMessage::to_page("ext", text)).unwrap();
    }
    assert_eq!(first.await.unwrap().expect("first").transaction_hash, "hash-aa");
    assert_eq!(second.await.unwrap().expect("second").transaction_hash, "hash-bb");
    assert_eq!(dapp.pending_requests(), 0);
}

#[tokio::test]
async fn rate_limit_stops_requests_before_they_leave() {
    let bridge: Arc<dyn ExtensionBridge> = Arc::new(LocalBridge::new());
    let _ext = spawn_extension_responder(Arc::clone(&bridge), "ext".into(), |text| {
        let serializer = Serializer::default();
        let request = serializer.deserialize_message(&text).ok()?;
        serializer.serialize(&broadcast_reply(&request)).ok()
    });
    let config = ClientConfig::new("dApp", Arc::new(MemoryStorage::new()))
        .with_extension_bridge(Arc::clone(&bridge))
        .with_transport_grace_period(Duration::from_secs(1))
        .with_rate_limit(1, Duration::from_secs(60));
    let dapp = DAppClient::new(config).await.expect("dapp");

    let reply = tokio::time::timeout(WAIT, dapp.request_broadcast(None, "aa")).await.unwrap();
    assert_eq!(reply.expect("first request").transaction_hash, "hash-aa");

    let mut events = dapp.events().subscribe();
    let err = dapp.request_broadcast(None, "bb").await.expect_err("limited");
    assert!(matches!(err, ClientError::RateLimit));
    // The limited request is never announced as sent
    assert_eq!(events.try_recv().unwrap(), BeaconEvent::LocalRateLimitReached);
    assert!(events.try_recv().is_err());
    assert_eq!(dapp.pending_requests(), 0);
}

#[tokio::test]
async fn empty_input_is_refused_locally() {
    let bridge: Arc<dyn ExtensionBridge> = Arc::new(LocalBridge::new());
    let config = ClientConfig::new("dApp", Arc::new(MemoryStorage::new())).with_extension_bridge(bridge);
    let dapp = DAppClient::new(config).await.expect("dapp");
    assert!(matches!(dapp.request_broadcast(None, "").await, Err(ClientError::InvalidInput(_))));
    assert!(matches!(dapp.request_operation(None, Vec::new()).await, Err(ClientError::InvalidInput(_))));
    assert!(matches!(
        dapp.request_sign_payload("", Default::default(), None).await,
        Err(ClientError::InvalidInput(_))
    ));
}
