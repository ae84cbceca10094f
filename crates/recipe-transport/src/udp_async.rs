//! Async UDP hop link.
//!
//! Used both by the host-side driver (talking to a remote hop) and by the
//! UDP hop emulator (answering the host).

use crate::transport::{AtomicStats, Transport, TransportError, TransportResult, TransportStats};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::UdpSocket;

/// Socket buffer size applied to both directions.
const SOCKET_BUFFER_SIZE: usize = 2 * 1024 * 1024;

/// Async UDP transport using Tokio.
///
/// # Examples
///
/// ```no_run
/// use recipe_transport::udp_async::AsyncUdpTransport;
/// use recipe_transport::transport::Transport;
/// use std::net::SocketAddr;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let addr: SocketAddr = "127.0.0.1:0".parse()?;
/// let transport = AsyncUdpTransport::bind(addr).await?;
/// println!("Listening on {}", transport.local_addr()?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AsyncUdpTransport {
    socket: Arc<UdpSocket>,
    closed: Arc<AtomicBool>,
    stats: Arc<AtomicStats>,
}

impl AsyncUdpTransport {
    /// Bind a UDP socket to `addr`. Use port 0 for automatic selection.
    ///
    /// # Errors
    /// Returns `TransportError::BindFailed` if the socket cannot be created,
    /// tuned or bound.
    pub async fn bind<A: Into<SocketAddr>>(addr: A) -> TransportResult<Self> {
        let addr = addr.into();

        let domain = if addr.is_ipv4() {
            socket2::Domain::IPV4
        } else {
            socket2::Domain::IPV6
        };

        let bind_err = |e: std::io::Error| TransportError::BindFailed(e.to_string());

        let socket2 =
            socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))
                .map_err(bind_err)?;
        socket2
            .set_recv_buffer_size(SOCKET_BUFFER_SIZE)
            .map_err(bind_err)?;
        socket2
            .set_send_buffer_size(SOCKET_BUFFER_SIZE)
            .map_err(bind_err)?;
        socket2.bind(&addr.into()).map_err(bind_err)?;
        socket2.set_nonblocking(true).map_err(bind_err)?;

        let std_socket: std::net::UdpSocket = socket2.into();
        let socket = UdpSocket::from_std(std_socket).map_err(bind_err)?;

        tracing::debug!("UDP hop link bound to {}", addr);
        Ok(Self::from_socket(socket))
    }

    /// Wrap an already-bound Tokio socket.
    #[must_use]
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket: Arc::new(socket),
            closed: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(AtomicStats::new()),
        }
    }
}

#[async_trait]
impl Transport for AsyncUdpTransport {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> TransportResult<usize> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }

        match self.socket.send_to(buf, addr).await {
            Ok(sent) => {
                self.stats.record_send(sent);
                Ok(sent)
            }
            Err(e) => {
                self.stats.record_send_error();
                Err(TransportError::Io(e))
            }
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }

        match self.socket.recv_from(buf).await {
            Ok((size, addr)) => {
                self.stats.record_recv(size);
                Ok((size, addr))
            }
            Err(e) => {
                self.stats.record_recv_error();
                Err(TransportError::Io(e))
            }
        }
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.socket.local_addr().map_err(TransportError::Io)
    }

    async fn close(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn stats(&self) -> TransportStats {
        self.stats.snapshot()
    }
}
