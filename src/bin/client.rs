//! Voice Chat Client
//!
//! Captures the microphone, joins a relay server and plays everyone else.
//!
//! Usage: `speekchat-client <server-host[:port]> <username> [config.toml]`

use anyhow::{bail, Context, Result};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use speekchat::{
    audio::{list_devices, AudioPipeline, AudioStreams},
    config::AppConfig,
    network::{ConnectionState, VoiceClient},
    session::{AudioSink, SessionObserver},
};

/// Logs session events and keeps the pipeline's peer set in step
struct ConsoleObserver {
    pipeline: Arc<AudioPipeline>,
}

impl SessionObserver for ConsoleObserver {
    fn on_participants_updated(&self, participants: &[String]) {
        tracing::info!("Participants: {}", participants.join(", "));
        self.pipeline.sync_participants(participants);
    }

    fn on_connected(&self) {
        tracing::info!("Joined session as {}", self.pipeline.local_identity());
    }

    fn on_error(&self, message: &str) {
        tracing::error!("Session error: {}", message);
    }
}

fn resolve_server(target: &str, default_port: u16) -> Result<SocketAddr> {
    if let Ok(addr) = target.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }

    let with_port = match target.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() => target.to_string(),
        _ => format!("{}:{}", target, default_port),
    };

    with_port
        .to_socket_addrs()
        .with_context(|| format!("Cannot resolve {}", with_port))?
        .next()
        .with_context(|| format!("No address for {}", with_port))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting SpeekChat client");

    let mut args = std::env::args().skip(1);
    let (server, username) = match (args.next(), args.next()) {
        (Some(server), Some(username)) => (server, username),
        _ => bail!("Usage: speekchat-client <server-host[:port]> <username> [config.toml]"),
    };
    let config_path = args.next().map(PathBuf::from);
    let config = AppConfig::load_or_default(config_path.as_deref()).context("Failed to load config")?;

    // List available devices
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}", device.name, device_type, default_marker);
    }
    println!();

    let server_addr = resolve_server(&server, config.network.server_port)?;

    let (pipeline, outbound) = AudioPipeline::new(&config.audio, username.clone());
    let pipeline = Arc::new(pipeline);

    let observer = Arc::new(ConsoleObserver {
        pipeline: pipeline.clone(),
    });
    let sink: Arc<dyn AudioSink> = pipeline.clone();

    let client = VoiceClient::connect(server_addr, username, &config, sink, observer)
        .context("Failed to open session")?;
    let sender = client.spawn_audio_sender(outbound)?;

    let mut streams = AudioStreams::start(&config.audio, pipeline.clone()).context("Failed to start audio")?;

    if let Err(e) = client.wait_connected().await {
        streams.stop();
        client.shutdown().await;
        let _ = sender.join();
        return Err(e).context("Could not join session");
    }

    tracing::info!("Connected to {}. Press Ctrl+C to leave.", server_addr);

    let mut status_ticker = tokio::time::interval(Duration::from_secs(10));
    status_ticker.tick().await;
    let mut reported_decode_failures = 0;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for Ctrl+C: {}", e);
                }
                break;
            }
            _ = status_ticker.tick() => {
                while let Some(e) = streams.check_errors() {
                    tracing::warn!("Audio stream error: {}", e);
                }

                let speaking: Vec<String> = client
                    .participants()
                    .into_iter()
                    .filter(|name| pipeline.is_speaking(name))
                    .collect();
                let stats = pipeline.stats();
                tracing::info!(
                    "State {:?}; speaking: {:?}; {} frames captured, {} outbound dropped, {} decode failures",
                    client.state(),
                    speaking,
                    stats.frames_captured,
                    stats.outbound_dropped,
                    stats.decode_failures
                );

                if stats.decode_failures > reported_decode_failures {
                    tracing::warn!(
                        "{} undecodable frames skipped since last report",
                        stats.decode_failures - reported_decode_failures
                    );
                    reported_decode_failures = stats.decode_failures;
                }

                if client.state() == ConnectionState::Closed {
                    tracing::warn!("Session closed");
                    break;
                }
            }
        }
    }

    tracing::info!("Shutting down...");
    streams.stop();
    client.shutdown().await;
    if sender.join().is_err() {
        tracing::warn!("Audio send thread panicked");
    }

    Ok(())
}
