//! tetherd: Tether messaging bridge daemon.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use tether_core::config::TetherConfig;
use tether_services::{Connector, LinkConnector, Manager, Server, StreamTransport};

mod handlers;
mod listener;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = TetherConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = TetherConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        TetherConfig::default()
    });
    let hostname = config.identity.hostname.clone();
    tracing::info!(
        hostname = %hostname,
        listen = %config.network.listen_addr,
        format = ?config.network.wire_format,
        "tetherd starting"
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Connectors ───────────────────────────────────────────────────────────
    let server = Arc::new(
        Server::new(hostname.clone(), config.network.wire_format)
            .configure(&config.messaging, &config.server),
    );

    let mut manager = Manager::new(hostname.clone())
        .configure(&config.messaging)
        .context("invalid messaging config")?;
    manager.subscribe(handlers::message_logger());
    manager.subscribe(handlers::ping_responder());
    manager.add_connector(server.clone() as Arc<dyn Connector>)?;

    let mut uplink_tasks = Vec::new();
    for addr in &config.network.uplinks {
        let transport = match StreamTransport::dial(addr.as_str()).await {
            Ok(t) => Arc::new(t),
            Err(e) => {
                tracing::warn!(uplink = %addr, error = %e, "uplink unreachable, skipping");
                continue;
            }
        };
        let link = Arc::new(
            LinkConnector::new(hostname.clone(), addr.clone(), config.network.wire_format, transport)
                .configure(&config.messaging),
        );
        manager.add_connector(link.clone() as Arc<dyn Connector>)?;

        let shutdown = shutdown_tx.subscribe();
        let addr = addr.clone();
        uplink_tasks.push(tokio::spawn(async move {
            if let Err(e) = link.run(shutdown).await {
                tracing::error!(uplink = %addr, error = %e, "uplink receive loop ended");
            }
        }));
    }
    tracing::info!(
        connectors = manager.connector_count(),
        uplinks = uplink_tasks.len(),
        "connectors ready"
    );
    let manager = Arc::new(manager);

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let listener_task = {
        let peer_listener = listener::PeerListener::bind(
            &config.network.listen_addr,
            server.clone(),
            shutdown_tx.subscribe(),
        )
        .await?;
        tokio::spawn(peer_listener.run())
    };

    let sweeper_task = tokio::spawn(
        server
            .clone()
            .run_sweeper(config.server.sweep_interval(), shutdown_tx.subscribe()),
    );

    // Announce ourselves once peers have had a moment to connect.
    let announce_task = {
        let manager = manager.clone();
        let delay = config.server.sweep_interval();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match manager
                .broadcast(handlers::PING_PATH, Default::default(), None, None)
                .await
            {
                Ok(replies) => tracing::info!(replies = replies.len(), "startup ping answered"),
                Err(e) => tracing::warn!(error = %e, "startup ping failed"),
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = listener_task      => tracing::error!("peer listener exited: {:?}", r),
        r = sweeper_task       => tracing::error!("peer sweeper exited: {:?}", r),
    }

    announce_task.abort();
    server.close_all();
    for task in uplink_tasks {
        task.abort();
    }

    Ok(())
}
