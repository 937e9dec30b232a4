//! UDP socket setup and the shared datagram transport

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::NetworkConfig;
use crate::error::NetworkError;

/// Create a non-blocking UDP socket bound to `addr`
pub fn create_socket(addr: SocketAddr, config: &NetworkConfig) -> Result<std::net::UdpSocket, NetworkError> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    if let Some(size) = config.send_buffer_size {
        socket
            .set_send_buffer_size(size)
            .map_err(|e| NetworkError::BindFailed(format!("SO_SNDBUF: {}", e)))?;
    }
    if let Some(size) = config.recv_buffer_size {
        socket
            .set_recv_buffer_size(size)
            .map_err(|e| NetworkError::BindFailed(format!("SO_RCVBUF: {}", e)))?;
    }

    socket
        .set_nonblocking(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .bind(&addr.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;

    Ok(socket.into())
}

/// Wildcard address of the same family as `peer`, port 0
pub fn ephemeral_addr_for(peer: &SocketAddr) -> SocketAddr {
    let ip = match peer.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}

/// Local address the OS would route `target` through. Connecting a UDP
/// socket sends nothing; it only resolves the route.
pub fn local_ip_toward(target: SocketAddr) -> Option<IpAddr> {
    let socket = std::net::UdpSocket::bind(ephemeral_addr_for(&target)).ok()?;
    socket.connect(target).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

/// LAN address of the interface holding the default route, if any
pub fn lan_ip() -> Option<IpAddr> {
    local_ip_toward(SocketAddr::from(([8, 8, 8, 8], 80)))
}

/// Errors a receive loop should shrug off rather than exit on.
/// Windows reports ICMP port-unreachable as a reset on UDP sockets.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

#[derive(Default)]
struct Counters {
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    oversized_dropped: AtomicU64,
    send_failures: AtomicU64,
}

/// Transport statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub oversized_dropped: u64,
    pub send_failures: u64,
}

/// One UDP socket per process
pub struct Transport {
    socket: tokio::net::UdpSocket,
    max_datagram_size: usize,
    counters: Counters,
}

impl Transport {
    /// Bind a transport. Must be called from within a Tokio runtime.
    pub fn bind(addr: SocketAddr, config: &NetworkConfig) -> Result<Self, NetworkError> {
        let std_socket = create_socket(addr, config)?;
        let socket = tokio::net::UdpSocket::from_std(std_socket)
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        Ok(Self {
            socket,
            max_datagram_size: config.max_datagram_size,
            counters: Counters::default(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.socket
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))
    }

    /// Receive buffer one byte larger than the ceiling, so oversized
    /// datagrams can be told apart from ones that exactly fit
    pub fn recv_buffer(&self) -> Vec<u8> {
        vec![0u8; self.max_datagram_size + 1]
    }

    /// Wait for the next datagram. `Ok(None)` means one arrived but was
    /// over the size ceiling and has been dropped.
    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        let (len, from) = self.socket.recv_from(buf).await?;
        if len > self.max_datagram_size {
            self.counters.oversized_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Dropping oversized datagram ({}+ bytes) from {}", len, from);
            return Ok(None);
        }

        self.counters.packets_received.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_received
            .fetch_add(len as u64, Ordering::Relaxed);
        Ok(Some((len, from)))
    }

    /// Send a datagram, waiting for socket readiness
    pub async fn send_to(&self, data: &[u8], target: SocketAddr) -> Result<usize, NetworkError> {
        let result = self.socket.send_to(data, target).await;
        self.record_send(result)
    }

    /// Send without waiting; fails with `SendFailed` if the socket is busy
    pub fn try_send_to(&self, data: &[u8], target: SocketAddr) -> Result<usize, NetworkError> {
        let result = self.socket.try_send_to(data, target);
        self.record_send(result)
    }

    fn record_send(&self, result: io::Result<usize>) -> Result<usize, NetworkError> {
        match result {
            Ok(sent) => {
                self.counters.packets_sent.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .bytes_sent
                    .fetch_add(sent as u64, Ordering::Relaxed);
                Ok(sent)
            }
            Err(e) => {
                self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                Err(NetworkError::SendFailed(e.to_string()))
            }
        }
    }

    pub fn max_datagram_size(&self) -> usize {
        self.max_datagram_size
    }

    pub fn stats(&self) -> TransportStats {
        TransportStats {
            packets_sent: self.counters.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            packets_received: self.counters.packets_received.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            oversized_dropped: self.counters.oversized_dropped.load(Ordering::Relaxed),
            send_failures: self.counters.send_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_config() -> NetworkConfig {
        NetworkConfig {
            max_datagram_size: 64,
            ..Default::default()
        }
    }

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[test]
    fn test_local_ip_toward_loopback() {
        let ip = local_ip_toward(SocketAddr::from(([127, 0, 0, 1], 9)));
        assert_eq!(ip, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let a = Transport::bind(loopback(), &loopback_config()).unwrap();
        let b = Transport::bind(loopback(), &loopback_config()).unwrap();

        a.send_to(b"hello", b.local_addr().unwrap()).await.unwrap();

        let mut buf = b.recv_buffer();
        let (len, from) = b.recv_from(&mut buf).await.unwrap().unwrap();
        assert_eq!(&buf[..len], b"hello");
        assert_eq!(from.port(), a.local_addr().unwrap().port());

        assert_eq!(a.stats().packets_sent, 1);
        assert_eq!(b.stats().bytes_received, 5);
    }

    #[tokio::test]
    async fn test_oversized_datagram_is_dropped() {
        let a = Transport::bind(loopback(), &loopback_config()).unwrap();
        let b = Transport::bind(loopback(), &loopback_config()).unwrap();
        let target = b.local_addr().unwrap();

        a.send_to(&[0u8; 65], target).await.unwrap();
        a.send_to(&[1u8; 64], target).await.unwrap();

        let mut buf = b.recv_buffer();
        assert!(b.recv_from(&mut buf).await.unwrap().is_none());
        let (len, _) = b.recv_from(&mut buf).await.unwrap().unwrap();
        assert_eq!(len, 64);
        assert_eq!(b.stats().oversized_dropped, 1);
    }

    #[test]
    fn test_ephemeral_addr_matches_family() {
        let v4: SocketAddr = "10.0.0.1:50005".parse().unwrap();
        let v6: SocketAddr = "[::1]:50005".parse().unwrap();
        assert_eq!(ephemeral_addr_for(&v4), "0.0.0.0:0".parse().unwrap());
        assert_eq!(ephemeral_addr_for(&v6), "[::]:0".parse().unwrap());
    }

    #[test]
    fn test_bind_conflict_is_reported() {
        let first = create_socket(loopback(), &NetworkConfig::default()).unwrap();
        let taken = first.local_addr().unwrap();
        let second = create_socket(taken, &NetworkConfig::default());
        assert!(matches!(second, Err(NetworkError::BindFailed(_))));
    }
}
