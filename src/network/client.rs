//! Session client: join handshake, heartbeat, audio send and receive
//!
//! ```text
//! Disconnected ──connect──▶ Joining ──PARTICIPANTS / JOIN_ACK──▶ Connected
//!                            │   ▲                                  │
//!           attempts exhausted   └──── PARTICIPANTS without us ─────┤
//!                            ▼                                      │ disconnect
//!                          Closed ◀─────────────────────────────────┘
//! ```
//!
//! Closed is final; reconnecting means building a new client.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::stop_requested;
use super::udp::{ephemeral_addr_for, is_transient, Transport, TransportStats};
use crate::audio::OutboundReceiver;
use crate::config::{AppConfig, SessionConfig};
use crate::constants::SEND_LOOP_TIMEOUT;
use crate::error::{NetworkError, Result};
use crate::protocol::{AudioPacket, Command, Packet};
use crate::session::{AudioSink, SessionObserver, SessionRegistry};

/// Client connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Joining,
    Connected,
    Closed,
}

struct ClientInner {
    username: String,
    server_addr: SocketAddr,
    /// Taken on close so the socket is released once the tasks finish
    transport: Mutex<Option<Arc<Transport>>>,
    local_addr: SocketAddr,
    final_stats: Mutex<TransportStats>,
    session: SessionConfig,
    state: watch::Sender<ConnectionState>,
    participants: Mutex<Vec<String>>,
    shutdown: watch::Sender<bool>,
    stopped: AtomicBool,
    join_timed_out: AtomicBool,
    sink: Arc<dyn AudioSink>,
    observer: Arc<dyn SessionObserver>,
}

/// Handle to one session with a relay server
pub struct VoiceClient {
    inner: Arc<ClientInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl VoiceClient {
    /// Bind an ephemeral port and start joining `server_addr`.
    /// Must be called from within a Tokio runtime.
    pub fn connect(
        server_addr: SocketAddr,
        username: impl Into<String>,
        config: &AppConfig,
        sink: Arc<dyn AudioSink>,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Self> {
        config.validate()?;
        let username = username.into();
        SessionRegistry::validate_username(&username)?;

        let transport = Arc::new(Transport::bind(ephemeral_addr_for(&server_addr), &config.network)?);
        let local_addr = transport.local_addr()?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = watch::channel(false);

        let inner = Arc::new(ClientInner {
            username,
            server_addr,
            transport: Mutex::new(Some(transport.clone())),
            local_addr,
            final_stats: Mutex::new(TransportStats::default()),
            session: config.session.clone(),
            state,
            participants: Mutex::new(Vec::new()),
            shutdown,
            stopped: AtomicBool::new(false),
            join_timed_out: AtomicBool::new(false),
            sink,
            observer,
        });

        inner.state.send_replace(ConnectionState::Joining);
        tracing::info!("Joining {} as {} from {}", server_addr, inner.username, local_addr);

        let tasks = vec![
            tokio::spawn(receive_loop(inner.clone(), transport)),
            tokio::spawn(membership_loop(inner.clone())),
            tokio::spawn(heartbeat_loop(inner.clone())),
        ];

        Ok(Self {
            inner,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Last participant list received from the server
    pub fn participants(&self) -> Vec<String> {
        self.inner.participants.lock().clone()
    }

    pub fn username(&self) -> &str {
        &self.inner.username
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.inner.server_addr
    }

    /// Address the client was bound to; still reported after disconnect
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr)
    }

    pub fn stats(&self) -> TransportStats {
        match self.inner.transport() {
            Some(transport) => transport.stats(),
            None => self.inner.final_stats.lock().clone(),
        }
    }

    /// Wait until the handshake completes or the session closes.
    /// After a rejoin this waits for the next handshake.
    pub async fn wait_connected(&self) -> Result<()> {
        let mut state = self.inner.state.subscribe();
        match settled_state(&mut state).await {
            ConnectionState::Connected => Ok(()),
            _ if self.inner.join_timed_out.load(Ordering::SeqCst) => Err(NetworkError::JoinTimeout {
                attempts: self.inner.session.join_max_attempts,
            }
            .into()),
            _ => Err(NetworkError::NotConnected.into()),
        }
    }

    /// Send one compressed frame to the server. No-op unless joining or
    /// connected; never blocks.
    pub fn send_audio(&self, frame: &[u8]) -> Result<()> {
        self.inner.send_audio(frame)
    }

    /// Drain `outbound` on a dedicated thread until the client closes
    pub fn spawn_audio_sender(&self, outbound: OutboundReceiver) -> std::io::Result<thread::JoinHandle<()>> {
        let inner = self.inner.clone();
        thread::Builder::new()
            .name("audio-send".to_string())
            .spawn(move || {
                while !inner.stopped.load(Ordering::Relaxed) {
                    match outbound.recv_timeout(SEND_LOOP_TIMEOUT) {
                        Ok(frame) => {
                            if let Err(e) = inner.send_audio(&frame) {
                                tracing::debug!("Audio frame not sent: {}", e);
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("Audio send loop exited");
            })
    }

    /// Leave the session and close the socket. Idempotent; sends LEAVE at
    /// most once.
    pub fn disconnect(&self) {
        self.inner.close();
    }

    /// Disconnect, then wait for the background tasks to finish
    pub async fn shutdown(&self) {
        self.disconnect();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("Client task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for VoiceClient {
    fn drop(&mut self) {
        self.inner.close();
    }
}

/// Wait for the state to leave `Joining`/`Disconnected`
async fn settled_state(state: &mut watch::Receiver<ConnectionState>) -> ConnectionState {
    match state
        .wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Closed))
        .await
    {
        Ok(current) => *current,
        Err(_) => ConnectionState::Closed,
    }
}

/// Wait for the state to become `Joining` or `Closed`
async fn rejoin_needed(state: &mut watch::Receiver<ConnectionState>) -> ConnectionState {
    match state
        .wait_for(|s| matches!(s, ConnectionState::Joining | ConnectionState::Closed))
        .await
    {
        Ok(current) => *current,
        Err(_) => ConnectionState::Closed,
    }
}

impl ClientInner {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn transport(&self) -> Option<Arc<Transport>> {
        self.transport.lock().clone()
    }

    fn send_audio(&self, frame: &[u8]) -> Result<()> {
        match self.state() {
            ConnectionState::Joining | ConnectionState::Connected => {}
            ConnectionState::Disconnected | ConnectionState::Closed => return Ok(()),
        }

        let Some(transport) = self.transport() else {
            return Ok(());
        };
        let datagram = Packet::from(AudioPacket::outbound(Bytes::copy_from_slice(frame))).encode()?;
        transport.try_send_to(&datagram, self.server_addr)?;
        Ok(())
    }

    async fn send_command(&self, command: Command) -> Result<()> {
        let transport = self.transport().ok_or(NetworkError::Closed)?;
        let datagram = Packet::from(command).encode()?;
        transport.send_to(&datagram, self.server_addr).await?;
        Ok(())
    }

    fn mark_connected(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Joining {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        })
    }

    /// The server dropped us (eviction or restart); go back to joining
    fn mark_lost(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Joining;
                true
            } else {
                false
            }
        })
    }

    fn handle_datagram(&self, data: &[u8], from: SocketAddr) {
        if from != self.server_addr {
            tracing::debug!("Ignoring datagram from {}", from);
            return;
        }

        match Packet::decode(data) {
            Ok(Packet::Command(Command::Participants(list))) => {
                if list.contains(&self.username) {
                    if self.mark_connected() {
                        tracing::info!("Connected to {}", self.server_addr);
                    }
                } else if self.mark_lost() {
                    tracing::warn!("{} no longer lists {}; rejoining", self.server_addr, self.username);
                }
                tracing::debug!("Participants: {:?}", list);
                *self.participants.lock() = list.clone();
                self.observer.on_participants_updated(&list);
            }
            Ok(Packet::Command(Command::JoinAck)) => {
                if self.mark_connected() {
                    tracing::info!("Connected to {}", self.server_addr);
                }
            }
            Ok(Packet::Command(other)) => {
                tracing::debug!("Ignoring {} from server", other.name());
            }
            Ok(Packet::Audio(audio)) => self.sink.on_audio_received(&audio.speaker, audio.payload),
            Err(e) => tracing::debug!("Dropping packet from server: {}", e),
        }
    }

    /// Transition to Closed, sending LEAVE if the server may know us
    fn close(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let previous = self.state.send_replace(ConnectionState::Closed);
        let transport = self.transport.lock().take();
        if let Some(transport) = transport {
            if matches!(previous, ConnectionState::Joining | ConnectionState::Connected) {
                let leave = Packet::from(Command::Leave(self.username.clone())).encode();
                match leave {
                    Ok(datagram) => {
                        if let Err(e) = transport.try_send_to(&datagram, self.server_addr) {
                            tracing::debug!("LEAVE not delivered: {}", e);
                        }
                    }
                    Err(e) => tracing::debug!("Cannot encode LEAVE: {}", e),
                }
            }
            *self.final_stats.lock() = transport.stats();
        }

        self.shutdown.send_replace(true);
        tracing::info!("Disconnected from {}", self.server_addr);
    }
}

async fn receive_loop(inner: Arc<ClientInner>, transport: Arc<Transport>) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut buf = transport.recv_buffer();

    loop {
        let received = tokio::select! {
            _ = stop_requested(&mut shutdown) => break,
            received = transport.recv_from(&mut buf) => received,
        };

        match received {
            Ok(Some((len, from))) => inner.handle_datagram(&buf[..len], from),
            Ok(None) => {}
            Err(e) if is_transient(&e) => {
                tracing::debug!("Transient receive error: {}", e);
            }
            Err(e) => {
                if !inner.stopped.load(Ordering::SeqCst) {
                    let message = format!("Receive failed: {}", e);
                    tracing::error!("{}", message);
                    inner.observer.on_error(&message);
                    inner.close();
                }
                break;
            }
        }
    }

    tracing::debug!("Client receive loop exited");
}

/// Run the JOIN handshake whenever the client is joining: once at connect
/// and again each time the server stops listing us.
async fn membership_loop(inner: Arc<ClientInner>) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut state = inner.state.subscribe();

    loop {
        let current = tokio::select! {
            _ = stop_requested(&mut shutdown) => return,
            current = rejoin_needed(&mut state) => current,
        };
        if current == ConnectionState::Closed {
            return;
        }
        if !join_round(&inner, &mut shutdown, &mut state).await {
            return;
        }
    }
}

/// Bounded JOIN retries. Returns true once connected; on exhaustion the
/// client is closed.
async fn join_round(
    inner: &Arc<ClientInner>,
    shutdown: &mut watch::Receiver<bool>,
    state: &mut watch::Receiver<ConnectionState>,
) -> bool {
    let max_attempts = inner.session.join_max_attempts;
    let retry = inner.session.join_retry_interval();

    for attempt in 1..=max_attempts {
        if inner.stopped.load(Ordering::SeqCst) {
            return false;
        }
        tracing::debug!("JOIN attempt {}/{}", attempt, max_attempts);
        if let Err(e) = inner.send_command(Command::Join(inner.username.clone())).await {
            tracing::warn!("JOIN send failed: {}", e);
        }

        let outcome = tokio::select! {
            _ = stop_requested(shutdown) => return false,
            settled = settled_state(state) => Some(settled),
            _ = tokio::time::sleep(retry) => None,
        };

        match outcome {
            Some(ConnectionState::Connected) => {
                inner.observer.on_connected();
                return true;
            }
            Some(_) => return false,
            None => {}
        }
    }

    match inner.state() {
        ConnectionState::Joining => {}
        ConnectionState::Connected => {
            inner.observer.on_connected();
            return true;
        }
        _ => return false,
    }

    let message = format!(
        "No response from {} after {} join attempts",
        inner.server_addr, max_attempts
    );
    tracing::error!("{}", message);
    inner.join_timed_out.store(true, Ordering::SeqCst);
    inner.observer.on_error(&message);
    inner.close();
    false
}

async fn heartbeat_loop(inner: Arc<ClientInner>) {
    let mut shutdown = inner.shutdown.subscribe();
    let period = inner.session.heartbeat_interval();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop_requested(&mut shutdown) => break,
            _ = ticker.tick() => {
                if inner.state() != ConnectionState::Connected {
                    continue;
                }
                if let Err(e) = inner.send_command(Command::Ping).await {
                    tracing::debug!("PING send failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::NullObserver;

    #[tokio::test]
    async fn test_invalid_username_is_rejected() {
        let server: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let sink = Arc::new(NullObserver);
        let result = VoiceClient::connect(server, "", &AppConfig::default(), sink.clone(), sink);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_send_audio_after_disconnect_is_noop() {
        let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sink = Arc::new(NullObserver);
        let client = VoiceClient::connect(
            silent.local_addr().unwrap(),
            "alice",
            &AppConfig::default(),
            sink.clone(),
            sink,
        )
        .unwrap();
        assert_eq!(client.state(), ConnectionState::Joining);

        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Closed);

        let sent_before = client.stats().packets_sent;
        client.send_audio(&[1, 2, 3]).unwrap();
        assert_eq!(client.stats().packets_sent, sent_before);
    }

    #[tokio::test]
    async fn test_shutdown_releases_local_port() {
        let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sink = Arc::new(NullObserver);
        let client = VoiceClient::connect(
            silent.local_addr().unwrap(),
            "alice",
            &AppConfig::default(),
            sink.clone(),
            sink,
        )
        .unwrap();
        let addr = client.local_addr().unwrap();

        client.shutdown().await;
        assert_eq!(client.local_addr().unwrap(), addr);
        assert!(client.stats().packets_sent >= 1);

        let rebound = std::net::UdpSocket::bind(addr);
        assert!(rebound.is_ok());
    }
}
