//! Integration tests: JMS backend over the loopback wire.
//!
//! Focus is on the selector mechanism: outgoing messages carry the client
//! token in the `appId` property, and the broker-evaluated selector keeps a
//! client's own messages from coming back.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use unibus_core::{Credentials, Payload, Topology, UniversalClient};
use unibus_harness::{BrokerHub, LoopbackJmsWire};
use unibus_jms::JmsBackend;

async fn client(
    hub: &BrokerHub,
    suppress_echo: bool,
) -> (
    UniversalClient<JmsBackend<LoopbackJmsWire>>,
    Arc<Mutex<Vec<Payload>>>,
) {
    let backend = JmsBackend::new(LoopbackJmsWire::new(hub.clone()));
    let mut client = UniversalClient::new(backend);
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    client
        .connect(
            Credentials::new("ws://hub.local/jms", "guest", "guest"),
            Topology::new("news", "news", suppress_echo),
            move |payload| sink.lock().unwrap().push(payload),
        )
        .await
        .expect("connect failed");

    for _ in 0..200 {
        if client.state_name().await == "Ready" {
            return (client, received);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("client never became ready");
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn selector_drops_own_messages_only() {
    let hub = BrokerHub::new();
    let (client_a, received_a) = client(&hub, true).await;
    let (client_b, received_b) = client(&hub, true).await;

    client_a.send_message(json!({"from": "a"})).await.unwrap();
    client_b.send_message(json!({"from": "b"})).await.unwrap();
    settle().await;

    assert_eq!(
        received_a.lock().unwrap().as_slice(),
        &[Payload::Json(json!({"from": "b"}))]
    );
    assert_eq!(
        received_b.lock().unwrap().as_slice(),
        &[Payload::Json(json!({"from": "a"}))]
    );
}

#[tokio::test]
async fn untagged_messages_reach_everyone() {
    let hub = BrokerHub::new();
    // No suppression on the sender: its messages carry no appId property,
    // so even a selector-filtered peer accepts them.
    let (sender, own) = client(&hub, false).await;
    let (_peer, received) = client(&hub, true).await;

    sender.send_message("broadcast").await.unwrap();
    settle().await;

    let expected = Payload::Text("broadcast".to_string());
    assert_eq!(received.lock().unwrap().as_slice(), &[expected.clone()]);
    assert_eq!(own.lock().unwrap().as_slice(), &[expected]);
}
