//! Shared fixtures for the RECIPE-D integration tests.

use recipe_core::{
    DriverConfig, FingerprintStrategy, HopConfig, HopDecisionEngine, HopProcessor, HopServer,
    LifecycleDriver, PacketIdentity, ProbabilityTable, RestartPolicy, RetryConfig, Thresholds,
};
use recipe_transport::{MemoryTransport, Transport};
use std::io::Cursor;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

/// Synthetic host address on memory links
pub const HOST_ADDR: &str = "192.168.1.10:40000";

/// Synthetic hop address on memory links
pub const HOP_ADDR: &str = "192.168.1.1:9000";

/// Packet of the test flow with identification `id`
#[must_use]
pub fn identity(id: u16) -> PacketIdentity {
    PacketIdentity::v4(Ipv4Addr::new(192, 168, 1, 10), Ipv4Addr::new(192, 168, 2, 20), id)
}

/// Table that extends below `extend` and restarts below `restart` everywhere
#[must_use]
pub fn uniform_table(extend: u32, restart: u32) -> Arc<ProbabilityTable> {
    Arc::new(
        ProbabilityTable::uniform(256, 256, Thresholds::new(extend, restart))
            .expect("uniform table dimensions are valid"),
    )
}

/// Parse a table from its text form
#[must_use]
pub fn table_from_text(text: &str, max_hops: usize, max_degree: usize) -> ProbabilityTable {
    ProbabilityTable::from_reader(Cursor::new(text), max_hops, max_degree)
        .expect("table text parses")
}

/// Decision engine over `table`
#[must_use]
pub fn engine(
    table: Arc<ProbabilityTable>,
    strategy: Arc<dyn FingerprintStrategy>,
    policy: RestartPolicy,
) -> HopDecisionEngine {
    HopDecisionEngine::new(table, strategy, policy)
}

/// Driver settings with short timeouts for tests
#[must_use]
pub fn driver_config(hop_addr: SocketAddr, max_iterations: u8) -> DriverConfig {
    DriverConfig {
        hop_addr,
        max_iterations,
        hop_timeout: Duration::from_millis(250),
        retry: RetryConfig {
            max_retries: 3,
            initial_backoff: Duration::from_millis(5),
            jitter: false,
            ..RetryConfig::default()
        },
        ..DriverConfig::default()
    }
}

/// Hop settings with a short shutdown poll
#[must_use]
pub fn hop_config(listen_addr: SocketAddr) -> HopConfig {
    HopConfig {
        listen_addr,
        poll_interval: Duration::from_millis(10),
        ..HopConfig::default()
    }
}

/// A running driver wired to a running hop over an in-memory link
pub struct MemoryHarness {
    /// Driver, started
    pub driver: LifecycleDriver,
    /// Hop server, started
    pub hop: HopServer,
    /// Host end of the link
    pub host: Arc<MemoryTransport>,
}

impl MemoryHarness {
    /// Start a hop running `hop_engine`, and a driver that verifies with
    /// `verifier` when given
    #[must_use]
    pub fn start(
        hop_engine: HopDecisionEngine,
        verifier: Option<HopDecisionEngine>,
        max_iterations: u8,
    ) -> Self {
        let host_addr: SocketAddr = HOST_ADDR.parse().expect("valid address");
        let hop_addr: SocketAddr = HOP_ADDR.parse().expect("valid address");
        let (host, far) = MemoryTransport::pair(host_addr, hop_addr);

        let hop = HopServer::new(far, HopProcessor::new(hop_engine), &hop_config(hop_addr));
        hop.start().expect("hop starts");

        let transport: Arc<dyn Transport> = host.clone();
        let config = driver_config(hop_addr, max_iterations);
        let driver = match verifier {
            Some(engine) => LifecycleDriver::with_verifier(config, transport, engine),
            None => LifecycleDriver::new(config, transport),
        }
        .expect("driver config is valid");
        driver.start().expect("driver starts");

        Self { driver, hop, host }
    }

    /// Stop both ends
    pub fn shutdown(&self) {
        let _ = self.driver.stop();
        let _ = self.hop.stop();
    }
}
