//! Tether integration test harness.
//!
//! Every test runs real nodes inside the test process: a hub `Server` behind
//! a loopback TCP listener, and devices that dial it as `LinkConnector`s.
//! Nothing needs root and every listener binds an ephemeral port, so tests
//! can run in parallel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use tether_core::{Message, WireFormat};
use tether_services::{Connector, LinkConnector, Server, StreamTransport, Subscriber};

mod chunking;
mod messaging;
mod sessions;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const HUB: &str = "hub";

/// A hub server listening on loopback.
pub struct Hub {
    pub server: Arc<Server>,
    pub addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
}

impl Hub {
    pub async fn start(format: WireFormat) -> Result<Self> {
        Self::start_named(HUB, format).await
    }

    pub async fn start_named(hostname: &str, format: WireFormat) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind hub listener")?;
        let addr = listener.local_addr()?;
        let server = Arc::new(Server::new(hostname, format));
        let (shutdown, mut shutdown_rx) = broadcast::channel(1);

        let accept_server = server.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => return,
                    result = listener.accept() => {
                        let Ok((stream, peer)) = result else { continue };
                        accept_server.accept(peer.to_string(), Arc::new(StreamTransport::new(stream)));
                    }
                }
            }
        });

        Ok(Self {
            server,
            addr,
            shutdown,
        })
    }

    /// Wait until `n` peers are connected.
    pub async fn wait_for_peers(&self, n: usize) -> Result<()> {
        let server = self.server.clone();
        wait_until(move || server.connected_count() == n)
            .await
            .with_context(|| format!("hub never saw {n} connected peers"))
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        self.server.close_all();
    }
}

/// A device that dialled the hub.
pub struct Device {
    pub link: Arc<LinkConnector>,
    pub task: JoinHandle<anyhow::Result<()>>,
    shutdown: broadcast::Sender<()>,
}

impl Device {
    pub async fn dial(hostname: &str, hub: &Hub, format: WireFormat) -> Result<Self> {
        let transport = StreamTransport::dial(hub.addr).await?;
        let link = Arc::new(LinkConnector::new(
            hostname,
            hub.addr.to_string(),
            format,
            Arc::new(transport),
        ));
        let (shutdown, _) = broadcast::channel(1);
        let task = tokio::spawn(link.clone().run(shutdown.subscribe()));
        Ok(Self {
            link,
            task,
            shutdown,
        })
    }

    /// Stop the receive loop; the link is disconnected on the way out.
    pub async fn hang_up(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.task.await?
    }
}

/// Subscriber that answers every request on `path` with its own payload.
pub fn echo_on(path: &'static str) -> Arc<dyn Subscriber> {
    Arc::new(move |message: &Message| {
        if message.path() == path && !message.is_response() {
            let _ = message.respond(message.payload().clone(), None);
        }
    })
}

/// Poll `check` every 10ms for up to 2s.
pub async fn wait_until(mut check: impl FnMut() -> bool) -> Result<()> {
    for _ in 0..200 {
        if check() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("condition not met within 2s")
}

/// Hub plus `names.len()` connected devices, each echoing `ping`.
pub async fn hub_with_devices(names: &[&str]) -> Result<(Hub, Vec<Device>)> {
    let hub = Hub::start(WireFormat::Socket).await?;
    let mut devices = Vec::new();
    for name in names {
        let device = Device::dial(name, &hub, WireFormat::Socket).await?;
        device.link.subscribe(echo_on("ping"));
        devices.push(device);
    }
    hub.wait_for_peers(names.len()).await?;
    Ok((hub, devices))
}
