//! In-memory hop link for simulated hops.
//!
//! [`MemoryTransport::pair`] returns two connected ends. Datagrams written on
//! one end are read on the other, tagged with the sender's synthetic address.
//! The link can be told to swallow a number of upcoming sends, which lets
//! tests exercise the driver's timeout and retry path without real loss.

use crate::transport::{AtomicStats, Transport, TransportError, TransportResult, TransportStats};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::{Mutex, mpsc};

type Datagram = (Vec<u8>, SocketAddr);

/// One end of an in-memory datagram link.
pub struct MemoryTransport {
    local: SocketAddr,
    peer: SocketAddr,
    tx: mpsc::UnboundedSender<Datagram>,
    rx: Mutex<mpsc::UnboundedReceiver<Datagram>>,
    closed: AtomicBool,
    drop_budget: AtomicU32,
    stats: AtomicStats,
}

impl MemoryTransport {
    /// Create a connected pair of endpoints with the given synthetic addresses.
    #[must_use]
    pub fn pair(a: SocketAddr, b: SocketAddr) -> (Arc<Self>, Arc<Self>) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();

        let end_a = Self {
            local: a,
            peer: b,
            tx: a_tx,
            rx: Mutex::new(a_rx),
            closed: AtomicBool::new(false),
            drop_budget: AtomicU32::new(0),
            stats: AtomicStats::new(),
        };
        let end_b = Self {
            local: b,
            peer: a,
            tx: b_tx,
            rx: Mutex::new(b_rx),
            closed: AtomicBool::new(false),
            drop_budget: AtomicU32::new(0),
            stats: AtomicStats::new(),
        };
        (Arc::new(end_a), Arc::new(end_b))
    }

    /// Address of the other end
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Silently discard the next `count` datagrams sent from this end.
    pub fn drop_next(&self, count: u32) {
        self.drop_budget.store(count, Ordering::SeqCst);
    }

    fn take_drop(&self) -> bool {
        self.drop_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> TransportResult<usize> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }
        if addr != self.peer {
            self.stats.record_send_error();
            return Err(TransportError::Unreachable(addr));
        }

        if self.take_drop() {
            tracing::trace!("memory link {} dropped {} bytes", self.local, buf.len());
            self.stats.record_send(buf.len());
            return Ok(buf.len());
        }

        match self.tx.send((buf.to_vec(), self.local)) {
            Ok(()) => {
                self.stats.record_send(buf.len());
                Ok(buf.len())
            }
            Err(_) => {
                self.stats.record_send_error();
                Err(TransportError::Disconnected)
            }
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }

        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some((data, from)) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                self.stats.record_recv(len);
                Ok((len, from))
            }
            None => {
                self.stats.record_recv_error();
                Err(TransportError::Disconnected)
            }
        }
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.local)
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
