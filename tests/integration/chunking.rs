//! Split sends and serial framing across real links.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::io::AsyncWriteExt;

use tether_core::{to_payload, Message, Payload, WireFormat};
use tether_services::{Connector, StreamTransport};

use crate::*;

/// Answers `sync/blob` with the length of the received blob.
fn blob_sizer() -> Arc<dyn tether_services::Subscriber> {
    Arc::new(|message: &Message| {
        if message.path() != "sync/blob" || message.is_response() {
            return;
        }
        let len = message.payload()["blob"].as_str().map_or(0, |b| b.chars().count());
        let _ = message.respond(to_payload(json!({ "len": len })).unwrap(), None);
    })
}

#[tokio::test]
async fn split_send_from_device_reassembles_on_hub() {
    let (hub, devices) = hub_with_devices(&["lamp"]).await.unwrap();
    hub.server.subscribe(blob_sizer());

    let blob = "ÿ\"quoted\" ".repeat(40);
    let reply = devices[0]
        .link
        .send_split(
            "sync/blob",
            Some(HUB),
            to_payload(json!({ "blob": blob })).unwrap(),
            24,
            Duration::from_secs(3),
        )
        .await
        .unwrap()
        .expect("hub should answer the final chunk");

    assert_eq!(reply.payload()["len"], blob.chars().count());
    assert_eq!(hub.server.reassembly_pending(), 0);
}

#[tokio::test]
async fn split_send_from_hub_reaches_device() {
    let (hub, devices) = hub_with_devices(&["lamp"]).await.unwrap();
    devices[0].link.subscribe(blob_sizer());

    let reply = hub
        .server
        .send_split(
            "sync/blob",
            Some("lamp"),
            to_payload(json!({ "blob": "x".repeat(500) })).unwrap(),
            64,
            Duration::from_secs(3),
        )
        .await
        .unwrap()
        .expect("lamp should answer");
    assert_eq!(reply.payload()["len"], 500);
}

#[tokio::test]
async fn serial_peer_noise_and_crash_are_not_published() {
    let hub = Hub::start(WireFormat::Serial).await.unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    hub.server
        .subscribe(Arc::new(move |m: &Message| sink.lock().unwrap().push(m.clone())));

    let (local, mut remote) = tokio::io::duplex(4096);
    hub.server
        .accept("/dev/ttyUSB0", Arc::new(StreamTransport::new(local)));

    let frame = Message::new("telemetry", "esp32", None, Payload::new()).unwrap();
    remote.write_all(b"ets Jun  8 2016 00:22:57\n").await.unwrap();
    remote
        .write_all(b"Backtrace: 0x400d1234:0x3ffb0000\n")
        .await
        .unwrap();
    remote.write_all(b"!r_p[broken\n").await.unwrap();
    remote
        .write_all(WireFormat::Serial.encode(&frame).unwrap().as_bytes())
        .await
        .unwrap();

    let check = seen.clone();
    wait_until(move || !check.lock().unwrap().is_empty()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], frame);
    assert!(hub.server.peer("/dev/ttyUSB0").unwrap().is_connected());
}
