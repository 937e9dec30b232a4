//! Network subsystem: UDP transport, relay server, session client

pub mod client;
pub mod server;
pub mod udp;

pub use client::{ConnectionState, VoiceClient};
pub use server::VoiceServer;
pub use udp::{create_socket, lan_ip, local_ip_toward, Transport, TransportStats};

use tokio::sync::watch;

/// Resolves once the shutdown flag is raised or its sender is gone
pub(crate) async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
