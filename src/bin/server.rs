//! Voice Relay Server
//!
//! Tracks session members and fans audio out between them.
//!
//! Usage: `speekchat-server [port] [config.toml]`

use anyhow::{Context, Result};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use speekchat::{
    config::AppConfig,
    network::{lan_ip, VoiceServer},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting SpeekChat relay server");

    let mut args = std::env::args().skip(1);
    let port_arg = args.next();
    let config_path = args.next().map(PathBuf::from);

    let mut config = AppConfig::load_or_default(config_path.as_deref()).context("Failed to load config")?;
    if let Some(port) = port_arg {
        config.network.server_port = port
            .parse()
            .with_context(|| format!("Invalid port: {}", port))?;
    }

    let server = VoiceServer::start(&config).context("Failed to start server")?;
    let local_addr = server.local_addr()?;
    tracing::info!("Relay ready on {}", local_addr);
    if local_addr.ip().is_unspecified() {
        let ip = lan_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        tracing::info!("Clients can connect to {}:{}", ip, local_addr.port());
    }

    let mut stats_ticker = tokio::time::interval(Duration::from_secs(30));
    stats_ticker.tick().await;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for Ctrl+C: {}", e);
                }
                break;
            }
            _ = stats_ticker.tick() => {
                let stats = server.stats();
                tracing::info!(
                    "{} participant(s) {:?}; {} packets in, {} packets out, {} oversized dropped",
                    server.registry().len(),
                    server.participants(),
                    stats.packets_received,
                    stats.packets_sent,
                    stats.oversized_dropped
                );
            }
        }
    }

    tracing::info!("Shutting down...");
    server.shutdown().await;

    Ok(())
}
