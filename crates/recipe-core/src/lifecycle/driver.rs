//! Host-side packet lifecycle driver.
//!
//! The driver owns every packet's journey: it sends the packet to the hop,
//! waits for the processed datagram, advances the packet's state machine and
//! repeats until a stop condition is hit.
//!
//! # Packet Flow
//!
//! ```text
//! drive(identity) ──send_to──► hop ──► transport
//!       ▲                                  │
//!       │ mpsc (per packet)                ▼
//!   pending[identity] ◄── parse ◄── receive_loop
//! ```
//!
//! A single receive loop demultiplexes responses by packet identity through
//! a concurrent map of per-packet channels. Each packet is only ever
//! mutated by its own task, and waits for one hop at a time.

use crate::decision::HopDecisionEngine;
use crate::fingerprint::PacketIdentity;
use crate::header::CodedSymbol;
use crate::hop_count::HopCount;
use crate::lifecycle::config::DriverConfig;
use crate::lifecycle::error::LifecycleError;
use crate::lifecycle::record::{PacketTrace, Verification};
use crate::lifecycle::state::{PacketLifecycle, Step};
use crate::wire::RecipePacket;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use recipe_transport::{MAX_DATAGRAM_SIZE, Transport};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::time::Instant;

/// How often the receive loop checks for shutdown
const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Snapshot of driver counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DriverStats {
    /// Datagrams sent, resends included
    pub sent: u64,
    /// Datagrams received
    pub received: u64,
    /// Resends after a hop timeout
    pub retried: u64,
    /// Responses discarded as undecodable
    pub malformed: u64,
    /// Responses discarded for matching no packet in flight
    pub unknown_identity: u64,
    /// Responses discarded as not following the last send
    pub stale: u64,
    /// Packets that reached `TERMINATED`
    pub terminated: u64,
    /// Packets that failed
    pub failed: u64,
    /// Hops whose answer differed from the local re-computation
    pub mismatched: u64,
}

#[derive(Debug, Default)]
struct DriverCounters {
    sent: AtomicU64,
    received: AtomicU64,
    retried: AtomicU64,
    malformed: AtomicU64,
    unknown_identity: AtomicU64,
    stale: AtomicU64,
    terminated: AtomicU64,
    failed: AtomicU64,
    mismatched: AtomicU64,
}

impl DriverCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DriverStats {
        DriverStats {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            unknown_identity: self.unknown_identity.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            terminated: self.terminated.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            mismatched: self.mismatched.load(Ordering::Relaxed),
        }
    }
}

/// Recompute a hop locally and compare it with what the hop returned
#[must_use]
pub fn verify_hop(
    engine: &HopDecisionEngine,
    identity: &PacketIdentity,
    previous: Option<CodedSymbol>,
    hop: HopCount,
    actual: CodedSymbol,
) -> Verification {
    match engine.apply(identity, previous, hop) {
        Ok(outcome) if outcome.header == actual => Verification::Match,
        Ok(outcome) => Verification::Mismatch {
            expected: outcome.header,
            actual,
        },
        Err(e) => Verification::Failed(e),
    }
}

struct DriverInner {
    config: DriverConfig,
    transport: Arc<dyn Transport>,
    pending: DashMap<PacketIdentity, mpsc::UnboundedSender<RecipePacket>>,
    in_flight: Semaphore,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    verifier: Option<HopDecisionEngine>,
    counters: DriverCounters,
}

/// Drives packets through a hop over a transport
#[derive(Clone)]
pub struct LifecycleDriver {
    inner: Arc<DriverInner>,
}

/// Removes a packet's channel from the pending map however its task ends
struct Registration<'a> {
    pending: &'a DashMap<PacketIdentity, mpsc::UnboundedSender<RecipePacket>>,
    identity: PacketIdentity,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.identity);
    }
}

async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

impl LifecycleDriver {
    /// Create a stopped driver
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration does not validate.
    pub fn new(config: DriverConfig, transport: Arc<dyn Transport>) -> Result<Self, LifecycleError> {
        Self::build(config, transport, None)
    }

    /// Create a stopped driver that re-computes every hop locally and counts
    /// disagreements
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration does not validate.
    pub fn with_verifier(
        config: DriverConfig,
        transport: Arc<dyn Transport>,
        engine: HopDecisionEngine,
    ) -> Result<Self, LifecycleError> {
        Self::build(config, transport, Some(engine))
    }

    fn build(
        config: DriverConfig,
        transport: Arc<dyn Transport>,
        verifier: Option<HopDecisionEngine>,
    ) -> Result<Self, LifecycleError> {
        config.validate()?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(DriverInner {
                in_flight: Semaphore::new(config.max_in_flight),
                config,
                transport,
                pending: DashMap::new(),
                running: AtomicBool::new(false),
                shutdown,
                verifier,
                counters: DriverCounters::default(),
            }),
        })
    }

    /// Driver configuration
    #[must_use]
    pub fn config(&self) -> &DriverConfig {
        &self.inner.config
    }

    /// Start the receive loop
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the driver is already running.
    pub fn start(&self) -> Result<(), LifecycleError> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(LifecycleError::InvalidState("driver already running"));
        }
        self.inner.shutdown.send_replace(false);

        tracing::info!(
            "Lifecycle driver started: hop {}, max iterations {}, timeout {:?}",
            self.inner.config.hop_addr,
            self.inner.config.max_iterations,
            self.inner.config.hop_timeout
        );

        let driver = self.clone();
        tokio::spawn(async move {
            driver.receive_loop().await;
        });
        Ok(())
    }

    /// Stop issuing hops; packets still in flight end with `Cancelled`
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the driver is not running.
    pub fn stop(&self) -> Result<(), LifecycleError> {
        if self
            .inner
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(LifecycleError::InvalidState("driver not running"));
        }
        self.inner.shutdown.send_replace(true);
        tracing::info!("Lifecycle driver stopped: {:?}", self.stats());
        Ok(())
    }

    /// Check if the driver is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Packets currently registered
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.pending.len()
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> DriverStats {
        self.inner.counters.snapshot()
    }

    /// Drive every identity concurrently; results come back in input order
    pub async fn run<I>(&self, identities: I) -> Vec<Result<PacketTrace, LifecycleError>>
    where
        I: IntoIterator<Item = PacketIdentity>,
    {
        let handles: Vec<_> = identities
            .into_iter()
            .map(|identity| {
                let driver = self.clone();
                tokio::spawn(async move { driver.drive(identity).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.unwrap_or_else(|e| {
                tracing::warn!("Packet task ended abnormally: {}", e);
                Err(LifecycleError::InvalidState("packet task aborted"))
            }));
        }
        results
    }

    /// Drive one packet from `CREATED` to `TERMINATED`
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the driver is not running or the identity is
    /// already in flight, `UnresponsiveHop` once retries are exhausted,
    /// `Cancelled` on shutdown, and decision or transport errors as they occur.
    pub async fn drive(&self, identity: PacketIdentity) -> Result<PacketTrace, LifecycleError> {
        if !self.is_running() {
            return Err(LifecycleError::InvalidState("driver not running"));
        }
        let mut shutdown = self.inner.shutdown.subscribe();

        let _permit = tokio::select! {
            permit = self.inner.in_flight.acquire() => {
                permit.map_err(|_| LifecycleError::Cancelled)?
            }
            () = cancelled(&mut shutdown) => return Err(LifecycleError::Cancelled),
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        match self.inner.pending.entry(identity) {
            Entry::Occupied(_) => {
                return Err(LifecycleError::InvalidState("identity already in flight"));
            }
            Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }
        let _registration = Registration {
            pending: &self.inner.pending,
            identity,
        };

        let result = self.drive_packet(identity, &mut rx, &mut shutdown).await;
        match &result {
            Ok(trace) => {
                DriverCounters::bump(&self.inner.counters.terminated);
                tracing::debug!(
                    "Packet {} terminated after {} hops ({}), degree {}",
                    identity,
                    trace.hops(),
                    trace.reason,
                    trace.final_degree()
                );
            }
            Err(e) => {
                DriverCounters::bump(&self.inner.counters.failed);
                tracing::debug!("Packet {} failed: {}", identity, e);
            }
        }
        result
    }

    async fn drive_packet(
        &self,
        identity: PacketIdentity,
        rx: &mut mpsc::UnboundedReceiver<RecipePacket>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<PacketTrace, LifecycleError> {
        let config = &self.inner.config;
        let counters = &self.inner.counters;
        let mut lifecycle = PacketLifecycle::new(identity, config.max_iterations);

        loop {
            if *shutdown.borrow() {
                return Err(LifecycleError::Cancelled);
            }

            let hop = lifecycle.hop();
            let previous = lifecycle.header();
            let bytes = lifecycle.dispatch()?.encode()?;

            let mut attempts = 0u32;
            let step = loop {
                self.inner.transport.send_to(&bytes, config.hop_addr).await?;
                attempts += 1;
                DriverCounters::bump(&counters.sent);

                if let Some(step) = self.await_response(&mut lifecycle, rx, shutdown).await? {
                    break step;
                }
                if attempts > config.retry.max_retries {
                    tracing::warn!(
                        "Giving up on {} at hop {} after {} attempts",
                        identity,
                        hop,
                        attempts
                    );
                    return Err(LifecycleError::UnresponsiveHop {
                        packet: identity,
                        hop,
                        attempts,
                    });
                }

                let backoff = config.retry.backoff_duration(attempts - 1);
                tracing::warn!(
                    "No answer for {} at hop {} (attempt {}), resending in {:?}",
                    identity,
                    hop,
                    attempts,
                    backoff
                );
                tokio::select! {
                    () = tokio::time::sleep(backoff) => {}
                    () = cancelled(shutdown) => return Err(LifecycleError::Cancelled),
                }
                lifecycle.note_retry();
                DriverCounters::bump(&counters.retried);
            };

            if let (Some(engine), Some(actual)) = (&self.inner.verifier, lifecycle.header()) {
                match verify_hop(engine, &identity, previous, hop, actual) {
                    Verification::Match => {}
                    other => {
                        DriverCounters::bump(&counters.mismatched);
                        tracing::warn!("Hop {} of {} failed verification: {:?}", hop, identity, other);
                    }
                }
            }

            if let Step::Terminated(_) = step {
                return lifecycle.into_trace();
            }
        }
    }

    /// Wait up to `hop_timeout` for the successor of the last send.
    /// `Ok(None)` means the hop timed out.
    async fn await_response(
        &self,
        lifecycle: &mut PacketLifecycle,
        rx: &mut mpsc::UnboundedReceiver<RecipePacket>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<Step>, LifecycleError> {
        let counters = &self.inner.counters;
        let deadline = Instant::now() + self.inner.config.hop_timeout;

        loop {
            let received = tokio::select! {
                received = tokio::time::timeout_at(deadline, rx.recv()) => received,
                () = cancelled(shutdown) => return Err(LifecycleError::Cancelled),
            };
            let response = match received {
                Err(_) => return Ok(None),
                Ok(None) => return Err(LifecycleError::Cancelled),
                Ok(Some(response)) => response,
            };

            match lifecycle.accept(&response) {
                Ok(Step::Stale) => {
                    DriverCounters::bump(&counters.stale);
                    tracing::debug!(
                        "Discarding stale response for {} (ttl {})",
                        response.identity,
                        response.ttl
                    );
                }
                Ok(step) => return Ok(Some(step)),
                Err(e @ LifecycleError::MalformedHeader(_)) => {
                    DriverCounters::bump(&counters.malformed);
                    tracing::debug!("Discarding response for {}: {}", lifecycle.identity(), e);
                }
                Err(e @ LifecycleError::IdentityMismatch(_)) => {
                    DriverCounters::bump(&counters.unknown_identity);
                    tracing::debug!("Discarding response for {}: {}", lifecycle.identity(), e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn receive_loop(&self) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let transport = Arc::clone(&self.inner.transport);

        while self.is_running() {
            match tokio::time::timeout(RECEIVE_POLL_INTERVAL, transport.recv_from(&mut buf)).await {
                Ok(Ok((size, from))) => self.dispatch_datagram(&buf[..size], from),
                Ok(Err(e)) if e.is_fatal() => {
                    tracing::warn!("Driver transport failed, shutting down: {}", e);
                    self.inner.running.store(false, Ordering::SeqCst);
                    self.inner.shutdown.send_replace(true);
                    break;
                }
                Ok(Err(e)) => {
                    tracing::warn!("Error receiving datagram: {}", e);
                }
                Err(_) => continue,
            }
        }
    }

    fn dispatch_datagram(&self, data: &[u8], from: SocketAddr) {
        let counters = &self.inner.counters;
        DriverCounters::bump(&counters.received);

        let packet = match RecipePacket::parse(data) {
            Ok(packet) => packet,
            Err(e) => {
                DriverCounters::bump(&counters.malformed);
                tracing::debug!("Discarding datagram from {}: {}", from, e);
                return;
            }
        };

        let delivered = self
            .inner
            .pending
            .get(&packet.identity)
            .is_some_and(|tx| tx.send(packet).is_ok());
        if !delivered {
            DriverCounters::bump(&counters.unknown_identity);
            tracing::debug!(
                "Discarding datagram from {}: {}",
                from,
                LifecycleError::IdentityMismatch(packet.identity)
            );
        }
    }
}
