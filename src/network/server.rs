//! Relay server: session registry, participant broadcasts, audio fan-out

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::stop_requested;
use super::udp::{is_transient, Transport, TransportStats};
use crate::config::{AppConfig, SessionConfig};
use crate::constants::UNKNOWN_SPEAKER;
use crate::error::{PacketError, Result};
use crate::protocol::{encode_audio, AudioPacket, Command, Packet};
use crate::session::SessionRegistry;

struct ServerInner {
    /// Taken on stop; the socket closes once the loops drop their clones
    transport: Mutex<Option<Arc<Transport>>>,
    local_addr: SocketAddr,
    final_stats: Mutex<TransportStats>,
    registry: SessionRegistry,
    session: SessionConfig,
    shutdown: watch::Sender<bool>,
    stopped: AtomicBool,
}

/// Running relay server
pub struct VoiceServer {
    inner: Arc<ServerInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl VoiceServer {
    /// Bind the configured address and start serving.
    /// Must be called from within a Tokio runtime.
    pub fn start(config: &AppConfig) -> Result<Self> {
        config.validate()?;

        let addr = SocketAddr::new(config.network.bind_address, config.network.server_port);
        let transport = Arc::new(Transport::bind(addr, &config.network)?);
        let local_addr = transport.local_addr()?;
        let (shutdown, _) = watch::channel(false);

        let inner = Arc::new(ServerInner {
            transport: Mutex::new(Some(transport.clone())),
            local_addr,
            final_stats: Mutex::new(TransportStats::default()),
            registry: SessionRegistry::new(),
            session: config.session.clone(),
            shutdown,
            stopped: AtomicBool::new(false),
        });

        tracing::info!("Server listening on {}", local_addr);

        let mut tasks = vec![tokio::spawn(receive_loop(inner.clone(), transport))];
        if let Some(timeout) = inner.session.client_timeout() {
            tasks.push(tokio::spawn(eviction_loop(inner.clone(), timeout)));
        } else {
            tracing::info!("Idle client eviction disabled");
        }

        Ok(Self {
            inner,
            tasks: Mutex::new(tasks),
        })
    }

    /// Address the server was bound to. Still reported after stop.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr)
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    /// Current participant names in join order
    pub fn participants(&self) -> Vec<String> {
        self.inner.registry.participants()
    }

    pub fn stats(&self) -> TransportStats {
        match self.inner.transport() {
            Some(transport) => transport.stats(),
            None => self.inner.final_stats.lock().clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Stop the receive and eviction loops and release the socket. Idempotent.
    ///
    /// The port is free once the loops have exited; `shutdown` waits for that.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let transport = self.inner.transport.lock().take();
        if let Some(transport) = transport {
            *self.inner.final_stats.lock() = transport.stats();
        }
        self.inner.shutdown.send_replace(true);
        tracing::info!("Server stopped");
    }

    /// Stop, then wait for the background tasks to finish
    pub async fn shutdown(&self) {
        self.stop();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("Server task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for VoiceServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn receive_loop(inner: Arc<ServerInner>, transport: Arc<Transport>) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut buf = transport.recv_buffer();

    loop {
        let received = tokio::select! {
            _ = stop_requested(&mut shutdown) => break,
            received = transport.recv_from(&mut buf) => received,
        };

        match received {
            Ok(Some((len, from))) => inner.handle_datagram(&transport, &buf[..len], from).await,
            Ok(None) => {}
            Err(e) if is_transient(&e) => {
                tracing::debug!("Transient receive error: {}", e);
            }
            Err(e) => {
                if !inner.stopped.load(Ordering::SeqCst) {
                    tracing::error!("Server receive loop failed: {}", e);
                }
                break;
            }
        }
    }

    tracing::debug!("Server receive loop exited");
}

async fn eviction_loop(inner: Arc<ServerInner>, timeout: std::time::Duration) {
    let mut shutdown = inner.shutdown.subscribe();
    let period = inner.session.eviction_check_interval();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop_requested(&mut shutdown) => break,
            _ = ticker.tick() => {
                let evicted = inner.registry.evict_idle(timeout);
                if evicted.is_empty() {
                    continue;
                }
                for record in &evicted {
                    tracing::info!(
                        "Evicting {} ({}) after {:?} of silence",
                        record.username,
                        record.endpoint,
                        record.last_seen.elapsed()
                    );
                }
                let Some(transport) = inner.transport() else { break };
                // Evicted endpoints get the list too
                let notified: Vec<SocketAddr> = evicted.iter().map(|r| r.endpoint).collect();
                inner.broadcast_participants(&transport, &notified).await;
            }
        }
    }
}

impl ServerInner {
    fn transport(&self) -> Option<Arc<Transport>> {
        self.transport.lock().clone()
    }

    async fn handle_datagram(&self, transport: &Transport, data: &[u8], from: SocketAddr) {
        match Packet::decode(data) {
            Ok(Packet::Command(command)) => self.handle_command(transport, command, from).await,
            Ok(Packet::Audio(audio)) => self.relay_audio(transport, audio, from).await,
            Err(e @ PacketError::MalformedCommand(_)) => {
                tracing::warn!("Dropping command from {}: {}", from, e);
            }
            Err(e) => tracing::debug!("Dropping packet from {}: {}", from, e),
        }
    }

    async fn handle_command(&self, transport: &Transport, command: Command, from: SocketAddr) {
        match command {
            Command::Join(username) => match self.registry.upsert(from, &username) {
                Ok(is_new) => {
                    if is_new {
                        tracing::info!("{} joined from {}", username, from);
                    } else {
                        tracing::debug!("Repeated JOIN from {} ({})", username, from);
                    }
                    self.send_command(transport, &Command::JoinAck, from).await;
                    self.broadcast_participants(transport, &[]).await;
                }
                Err(e) => tracing::warn!("Rejecting JOIN from {}: {}", from, e),
            },
            Command::Leave(_) => match self.registry.remove(&from) {
                Some(record) => {
                    tracing::info!("{} left ({})", record.username, from);
                    self.broadcast_participants(transport, &[]).await;
                }
                None => tracing::debug!("LEAVE from unregistered {}", from),
            },
            Command::Ping => {
                if !self.registry.touch(&from) {
                    // A heartbeat from an endpoint we no longer know: show it
                    // the list it is missing from
                    tracing::debug!("PING from unregistered {}, sending participant list", from);
                    let participants = Command::Participants(self.registry.participants());
                    self.send_command(transport, &participants, from).await;
                }
            }
            other => tracing::debug!("Ignoring {} from {}", other.name(), from),
        }
    }

    /// Fan a frame out to every registered endpoint except its sender
    async fn relay_audio(&self, transport: &Transport, audio: AudioPacket, from: SocketAddr) {
        self.registry.touch(&from);
        let speaker = self
            .registry
            .username_of(&from)
            .unwrap_or_else(|| UNKNOWN_SPEAKER.to_string());

        let datagram = match encode_audio(&speaker, &audio.payload) {
            Ok(datagram) => datagram,
            Err(e) => {
                tracing::debug!("Cannot relay frame from {}: {}", from, e);
                return;
            }
        };
        if datagram.len() > transport.max_datagram_size() {
            tracing::debug!("Relayed frame from {} would be {} bytes, dropping", from, datagram.len());
            return;
        }

        for target in self.registry.recipients_except(&from) {
            if let Err(e) = transport.send_to(&datagram, target).await {
                tracing::warn!("Relay to {} failed: {}", target, e);
            }
        }
    }

    /// Send the participant list to every registered endpoint plus `extra`
    async fn broadcast_participants(&self, transport: &Transport, extra: &[SocketAddr]) {
        let participants = self.registry.participants();
        let datagram = match Packet::from(Command::Participants(participants)).encode() {
            Ok(datagram) => datagram,
            Err(e) => {
                tracing::error!("Cannot encode participant list: {}", e);
                return;
            }
        };

        let mut targets = self.registry.endpoints();
        targets.extend(extra.iter().filter(|addr| !self.registry.contains(addr)));
        for target in targets {
            if let Err(e) = transport.send_to(&datagram, target).await {
                tracing::warn!("Participant update to {} failed: {}", target, e);
            }
        }
    }

    async fn send_command(&self, transport: &Transport, command: &Command, target: SocketAddr) {
        let datagram = match Packet::Command(command.clone()).encode() {
            Ok(datagram) => datagram,
            Err(e) => {
                tracing::error!("Cannot encode {}: {}", command.name(), e);
                return;
            }
        };
        if let Err(e) = transport.send_to(&datagram, target).await {
            tracing::warn!("{} to {} failed: {}", command.name(), target, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn loopback_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.network.bind_address = Ipv4Addr::LOCALHOST.into();
        config.network.server_port = 0;
        config
    }

    #[tokio::test]
    async fn test_start_binds_ephemeral_port() {
        let server = VoiceServer::start(&loopback_config()).unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert!(server.participants().is_empty());
        assert!(server.is_running());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let server = VoiceServer::start(&loopback_config()).unwrap();
        server.stop();
        server.stop();
        assert!(!server.is_running());
        server.shutdown().await;
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_port_in_use_fails_to_start() {
        let first = VoiceServer::start(&loopback_config()).unwrap();
        let mut config = loopback_config();
        config.network.server_port = first.local_addr().unwrap().port();

        let second = VoiceServer::start(&config);
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_releases_port_for_restart() {
        let first = VoiceServer::start(&loopback_config()).unwrap();
        let addr = first.local_addr().unwrap();
        first.shutdown().await;

        let mut config = loopback_config();
        config.network.server_port = addr.port();
        let second = VoiceServer::start(&config).unwrap();
        assert_eq!(second.local_addr().unwrap(), addr);
        assert!(second.is_running());
        // The stopped handle still answers queries
        assert_eq!(first.local_addr().unwrap(), addr);
        assert_eq!(first.stats().packets_sent, 0);
    }
}
