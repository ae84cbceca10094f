//! Software hop.
//!
//! [`HopProcessor`] performs one forwarding-plane pass over a RECIPE datagram
//! the way a programmable switch would: derive the hop count from the
//! incoming TTL, decrement the TTL, run the decision engine, and re-frame the
//! packet with a fresh checksum. [`HopServer`] runs a processor over any
//! [`Transport`] and replies to whoever sent the datagram.
//!
//! # Packet Flow
//!
//! ```text
//! recv_from → parse → TTL check → hop = 255 - ttl → ttl - 1
//!           → fingerprint → apply_hop → encode → send_to(sender)
//! ```

use crate::decision::{HopDecisionEngine, HopOutcome, RestartPolicy};
use crate::error::Error;
use crate::hop_count::HopCount;
use crate::wire::RecipePacket;
use recipe_transport::{MAX_DATAGRAM_SIZE, Transport};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Hop emulator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopConfig {
    /// Address the hop listens on
    pub listen_addr: SocketAddr,
    /// Restart branch behavior
    pub restart_policy: RestartPolicy,
    /// How often the receive loop checks for shutdown
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
}

impl Default for HopConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            restart_policy: RestartPolicy::default(),
            poll_interval: Duration::from_millis(100),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// A packet after one hop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedPacket {
    /// Hop count this pass ran at
    pub hop: HopCount,
    /// Packet as it leaves the hop
    pub packet: RecipePacket,
    /// Decision details
    pub outcome: HopOutcome,
    /// Encoded datagram
    pub bytes: Vec<u8>,
}

/// Stateless per-datagram hop logic
#[derive(Debug, Clone)]
pub struct HopProcessor {
    engine: HopDecisionEngine,
}

impl HopProcessor {
    /// Create a processor around a decision engine
    #[must_use]
    pub fn new(engine: HopDecisionEngine) -> Self {
        Self { engine }
    }

    /// Decision engine in use
    #[must_use]
    pub fn engine(&self) -> &HopDecisionEngine {
        &self.engine
    }

    /// Process one datagram.
    ///
    /// Returns `Ok(None)` when the packet arrives with no TTL left and is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns `Error::Wire` for datagrams that are not RECIPE packets and
    /// `Error::Decision` when the hop cannot be decided.
    pub fn process(&self, data: &[u8]) -> Result<Option<ProcessedPacket>, Error> {
        let mut packet = RecipePacket::parse(data)?;

        if packet.ttl == 0 {
            tracing::debug!("Dropping {} with expired TTL", packet.identity);
            return Ok(None);
        }

        let hop = packet.hop_count();
        packet.ttl -= 1;

        let outcome = self.engine.apply(&packet.identity, packet.header, hop)?;
        packet.header = Some(outcome.header);
        let bytes = packet.encode()?;

        Ok(Some(ProcessedPacket {
            hop,
            packet,
            outcome,
            bytes,
        }))
    }
}

/// Snapshot of hop server counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HopStats {
    /// Datagrams processed and answered
    pub processed: u64,
    /// Datagrams dropped for expired TTL
    pub expired: u64,
    /// Datagrams that failed to parse
    pub malformed: u64,
    /// Datagrams rejected by the decision engine
    pub rejected: u64,
}

#[derive(Debug, Default)]
struct HopCounters {
    processed: AtomicU64,
    expired: AtomicU64,
    malformed: AtomicU64,
    rejected: AtomicU64,
}

impl HopCounters {
    fn snapshot(&self) -> HopStats {
        HopStats {
            processed: self.processed.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

struct HopServerInner {
    transport: Arc<dyn Transport>,
    processor: HopProcessor,
    poll_interval: Duration,
    running: AtomicBool,
    counters: HopCounters,
}

/// Hop emulator serving datagrams over a transport
#[derive(Clone)]
pub struct HopServer {
    inner: Arc<HopServerInner>,
}

impl HopServer {
    /// Create a stopped server
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, processor: HopProcessor, config: &HopConfig) -> Self {
        Self {
            inner: Arc::new(HopServerInner {
                transport,
                processor,
                poll_interval: config.poll_interval,
                running: AtomicBool::new(false),
                counters: HopCounters::default(),
            }),
        }
    }

    /// Start the receive loop on a background task
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` if the server is already running.
    pub fn start(&self) -> Result<tokio::task::JoinHandle<()>, Error> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::InvalidState("hop server already running"));
        }

        let addr = self.inner.transport.local_addr().ok();
        tracing::info!(
            "Hop server started on {:?} ({} fingerprints, {} restarts)",
            addr,
            self.inner.processor.engine().strategy().name(),
            self.inner.processor.engine().policy()
        );

        let server = self.clone();
        Ok(tokio::spawn(async move {
            server.receive_loop().await;
        }))
    }

    /// Stop the receive loop
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` if the server is not running.
    pub fn stop(&self) -> Result<(), Error> {
        if self
            .inner
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::InvalidState("hop server not running"));
        }
        tracing::info!("Hop server stopped: {:?}", self.stats());
        Ok(())
    }

    /// Check if the receive loop is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> HopStats {
        self.inner.counters.snapshot()
    }

    async fn receive_loop(&self) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let transport = Arc::clone(&self.inner.transport);

        while self.is_running() {
            match tokio::time::timeout(self.inner.poll_interval, transport.recv_from(&mut buf))
                .await
            {
                Ok(Ok((size, from))) => self.handle_datagram(&buf[..size], from).await,
                Ok(Err(e)) if e.is_fatal() => {
                    tracing::warn!("Hop transport failed: {}", e);
                    self.inner.running.store(false, Ordering::SeqCst);
                    break;
                }
                Ok(Err(e)) => {
                    tracing::warn!("Error receiving datagram: {}", e);
                }
                Err(_) => continue,
            }
        }
    }

    async fn handle_datagram(&self, data: &[u8], from: SocketAddr) {
        let counters = &self.inner.counters;
        match self.inner.processor.process(data) {
            Ok(Some(processed)) => {
                if let Err(e) = self.inner.transport.send_to(&processed.bytes, from).await {
                    tracing::warn!("Failed to answer {}: {}", from, e);
                    return;
                }
                counters.processed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(None) => {
                counters.expired.fetch_add(1, Ordering::Relaxed);
            }
            Err(Error::Wire(e)) => {
                tracing::debug!("Discarding datagram from {}: {}", from, e);
                counters.malformed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::debug!("Rejecting datagram from {}: {}", from, e);
                counters.rejected.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Decision;
    use crate::fingerprint::{Crc32Hash, PacketIdentity};
    use crate::header::CodedSymbol;
    use crate::table::{ProbabilityTable, Thresholds};
    use recipe_transport::MemoryTransport;
    use std::net::Ipv4Addr;

    fn processor(thresholds: Thresholds) -> HopProcessor {
        let table = Arc::new(ProbabilityTable::uniform(256, 64, thresholds).unwrap());
        HopProcessor::new(HopDecisionEngine::new(
            table,
            Arc::new(Crc32Hash),
            RestartPolicy::TwoThreshold,
        ))
    }

    fn identity() -> PacketIdentity {
        PacketIdentity::v4(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 7)
    }

    #[test]
    fn test_first_hop_creates_header() {
        let processor = processor(Thresholds::new(u32::MAX, u32::MAX));
        let input = RecipePacket::new(identity()).encode().unwrap();

        let out = processor.process(&input).unwrap().unwrap();
        assert_eq!(out.hop, HopCount::ZERO);
        assert_eq!(out.packet.ttl, 254);
        assert_eq!(out.outcome.decision, Decision::Extend);
        assert_eq!(out.packet.header, Some(CodedSymbol::new(0, 1)));
        assert_eq!(RecipePacket::parse(&out.bytes).unwrap(), out.packet);
    }

    #[test]
    fn test_hop_count_from_incoming_ttl() {
        let processor = processor(Thresholds::new(u32::MAX, u32::MAX));
        let input = RecipePacket::new(identity())
            .with_ttl(250)
            .with_header(CodedSymbol::new(0x0003, 2))
            .encode()
            .unwrap();

        let out = processor.process(&input).unwrap().unwrap();
        assert_eq!(out.hop, HopCount::new(5));
        assert_eq!(out.packet.ttl, 249);
        assert_eq!(out.packet.header, Some(CodedSymbol::new(0x0006, 3)));
    }

    #[test]
    fn test_expired_ttl_dropped() {
        let processor = processor(Thresholds::new(u32::MAX, u32::MAX));
        let input = RecipePacket::new(identity()).with_ttl(0).encode().unwrap();
        assert!(processor.process(&input).unwrap().is_none());
    }

    #[test]
    fn test_malformed_rejected() {
        let processor = processor(Thresholds::new(u32::MAX, u32::MAX));
        assert!(matches!(processor.process(&[0u8; 4]), Err(Error::Wire(_))));
    }

    #[test]
    fn test_table_miss_rejected() {
        let processor = processor(Thresholds::new(u32::MAX, u32::MAX));
        let input = RecipePacket::new(identity())
            .with_ttl(250)
            .with_header(CodedSymbol::new(0, 64))
            .encode()
            .unwrap();
        assert!(matches!(processor.process(&input), Err(Error::Decision(_))));
    }

    #[tokio::test]
    async fn test_server_answers_sender() {
        let host_addr: SocketAddr = "10.0.0.1:40000".parse().unwrap();
        let hop_addr: SocketAddr = "10.0.0.254:9000".parse().unwrap();
        let (host, hop) = MemoryTransport::pair(host_addr, hop_addr);

        let config = HopConfig {
            poll_interval: Duration::from_millis(10),
            ..HopConfig::default()
        };
        let server = HopServer::new(
            hop,
            processor(Thresholds::new(u32::MAX, u32::MAX)),
            &config,
        );
        let handle = server.start().unwrap();
        assert!(server.is_running());
        assert!(server.start().is_err());

        let input = RecipePacket::new(identity()).encode().unwrap();
        host.send_to(&input, hop_addr).await.unwrap();
        host.send_to(&[1, 2, 3], hop_addr).await.unwrap();

        let mut buf = [0u8; 64];
        let (len, from) = tokio::time::timeout(Duration::from_secs(1), host.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(from, hop_addr);
        let reply = RecipePacket::parse(&buf[..len]).unwrap();
        assert_eq!(reply.ttl, 254);
        assert_eq!(reply.header, Some(CodedSymbol::new(0, 1)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let stats = server.stats();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.malformed, 1);

        server.stop().unwrap();
        assert!(server.stop().is_err());
        handle.await.unwrap();
    }
}
