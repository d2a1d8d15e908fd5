//! Peer session lifecycle inside the hub.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use tether_core::WireFormat;
use tether_services::StreamTransport;

use crate::*;

#[tokio::test]
async fn reconnect_from_same_address_replaces_session() {
    let hub = Hub::start(WireFormat::Socket).await.unwrap();

    let (first_local, _first_remote) = tokio::io::duplex(1024);
    let (second_local, _second_remote) = tokio::io::duplex(1024);
    let first = hub
        .server
        .accept("192.168.1.40:5000", Arc::new(StreamTransport::new(first_local)));
    let second = hub
        .server
        .accept("192.168.1.40:5000", Arc::new(StreamTransport::new(second_local)));

    assert_eq!(hub.server.peer_count(), 1);
    assert!(!first.is_connected());
    assert!(second.is_connected());
}

#[tokio::test]
async fn hung_up_device_is_swept() {
    let (hub, mut devices) = hub_with_devices(&["lamp", "fan"]).await.unwrap();

    let fan = devices.pop().unwrap();
    fan.hang_up().await.unwrap();

    let server = hub.server.clone();
    wait_until(move || server.connected_count() == 1).await.unwrap();
    assert_eq!(hub.server.peer_count(), 2);
    assert_eq!(hub.server.sweep(), 1);
    assert_eq!(hub.server.peer_count(), 1);
}

#[tokio::test]
async fn sweeper_task_evicts_and_stops_on_shutdown() {
    let (hub, mut devices) = hub_with_devices(&["lamp"]).await.unwrap();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let sweeper = tokio::spawn(
        hub.server
            .clone()
            .run_sweeper(Duration::from_millis(20), shutdown_rx),
    );

    devices.pop().unwrap().hang_up().await.unwrap();

    let server = hub.server.clone();
    wait_until(move || server.peer_count() == 0).await.unwrap();

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(1), sweeper)
        .await
        .expect("sweeper should stop on shutdown")
        .unwrap();
}

#[tokio::test]
async fn hub_send_to_departed_device_is_empty() {
    let (hub, mut devices) = hub_with_devices(&["lamp"]).await.unwrap();
    devices.pop().unwrap().hang_up().await.unwrap();

    let server = hub.server.clone();
    wait_until(move || server.connected_count() == 0).await.unwrap();

    let reply = hub
        .server
        .send("ping", "lamp", Default::default(), Duration::from_millis(100))
        .await
        .unwrap();
    assert!(reply.is_none());
}
