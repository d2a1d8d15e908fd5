//! Request/response over loopback TCP.

use std::time::{Duration, Instant};

use serde_json::json;

use tether_core::{to_payload, Message, Payload, WireFormat};
use tether_services::{Connector, Manager};

use crate::*;

const TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn hub_ping_reaches_device() {
    let (hub, _devices) = hub_with_devices(&["lamp"]).await.unwrap();

    let reply = hub
        .server
        .send("ping", "lamp", to_payload(json!({"n": 1})).unwrap(), TIMEOUT)
        .await
        .unwrap()
        .expect("lamp should answer");

    assert!(reply.is_response());
    assert_eq!(reply.sender(), "lamp");
    assert_eq!(reply.receiver(), Some(HUB));
    assert_eq!(reply.payload()["n"], 1);
}

#[tokio::test]
async fn device_request_is_answered_by_hub() {
    let (hub, devices) = hub_with_devices(&["lamp"]).await.unwrap();
    hub.server.subscribe(echo_on("status"));

    let reply = devices[0]
        .link
        .send("status", HUB, to_payload(json!({"uptime": 42})).unwrap(), TIMEOUT)
        .await
        .unwrap()
        .expect("hub should answer");

    assert_eq!(reply.sender(), HUB);
    assert_eq!(reply.payload()["uptime"], 42);
}

#[tokio::test]
async fn unicast_is_ignored_by_other_devices() {
    let (hub, _devices) = hub_with_devices(&["lamp", "fan"]).await.unwrap();

    let replies = hub
        .server
        .request(
            Message::new("ping", HUB, Some("fan".into()), Payload::new()).unwrap(),
            Duration::from_millis(300),
            None,
        )
        .await
        .unwrap();

    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].sender(), "fan");
}

#[tokio::test]
async fn broadcast_collects_every_device() {
    let (hub, _devices) = hub_with_devices(&["lamp", "fan", "blind"]).await.unwrap();

    let replies = hub
        .server
        .broadcast("ping", Payload::new(), Duration::from_millis(500), None)
        .await
        .unwrap();

    let mut senders: Vec<_> = replies.iter().map(|m| m.sender().to_string()).collect();
    senders.sort();
    assert_eq!(senders, vec!["blind", "fan", "lamp"]);
}

#[tokio::test]
async fn broadcast_stops_at_max_responses() {
    let names = ["d1", "d2", "d3", "d4", "d5"];
    let (hub, _devices) = hub_with_devices(&names).await.unwrap();

    let start = Instant::now();
    let replies = hub
        .server
        .broadcast("ping", Payload::new(), Duration::from_secs(5), Some(2))
        .await
        .unwrap();

    assert_eq!(replies.len(), 2);
    assert_ne!(replies[0].sender(), replies[1].sender());
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn silent_device_times_out_empty() {
    let hub = Hub::start(WireFormat::Socket).await.unwrap();
    let _mute = Device::dial("mute", &hub, WireFormat::Socket)
        .await
        .unwrap();
    hub.wait_for_peers(1).await.unwrap();

    let reply = hub
        .server
        .send("ping", "mute", Payload::new(), Duration::from_millis(200))
        .await
        .unwrap();
    assert!(reply.is_none());
    assert_eq!(hub.server.publisher().subscriber_count(), 0);
}

#[tokio::test]
async fn manager_merges_server_and_uplink() {
    // "hub" serves lamp locally and is uplinked to "attic", a second hub.
    let local = Hub::start(WireFormat::Socket).await.unwrap();
    let lamp = Device::dial("lamp", &local, WireFormat::Socket).await.unwrap();
    lamp.link.subscribe(echo_on("ping"));
    local.wait_for_peers(1).await.unwrap();

    let attic = Hub::start_named("attic", WireFormat::Socket).await.unwrap();
    attic.server.subscribe(echo_on("ping"));
    let uplink = Device::dial(HUB, &attic, WireFormat::Socket).await.unwrap();
    attic.wait_for_peers(1).await.unwrap();

    let mut manager = Manager::new(HUB);
    manager.add_connector(local.server.clone()).unwrap();
    manager.add_connector(uplink.link.clone()).unwrap();

    let replies = manager
        .broadcast("ping", Payload::new(), Some(Duration::from_millis(500)), None)
        .await
        .unwrap();

    let mut senders: Vec<_> = replies.iter().map(|m| m.sender().to_string()).collect();
    senders.sort();
    assert_eq!(senders, vec!["attic", "lamp"]);
}
