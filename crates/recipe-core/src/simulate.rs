//! In-process degree distribution simulation.
//!
//! Runs many packets through a fixed-length path using only the decision
//! engine (no framing, no transport) and histograms the degree each packet
//! ends with. Used to sanity-check a probability table before deploying it.

use crate::decision::HopDecisionEngine;
use crate::fingerprint::PacketIdentity;
use crate::header::CodedSymbol;
use crate::hop_count::HopCount;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Final-degree histogram
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DegreeHistogram {
    counts: BTreeMap<u8, u64>,
    failed: u64,
}

impl DegreeHistogram {
    /// Empty histogram
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one packet ending with `degree`
    pub fn record(&mut self, degree: u8) {
        *self.counts.entry(degree).or_insert(0) += 1;
    }

    /// Count one packet that did not complete its path
    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    /// Packets that completed
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Packets that did not complete
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// Packets ending with `degree`
    #[must_use]
    pub fn count(&self, degree: u8) -> u64 {
        self.counts.get(&degree).copied().unwrap_or(0)
    }

    /// Share of completed packets ending with `degree`
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self, degree: u8) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.count(degree) as f64 / total as f64,
        }
    }

    /// `(degree, count)` in ascending degree order
    pub fn iter(&self) -> impl Iterator<Item = (u8, u64)> + '_ {
        self.counts.iter().map(|(&d, &c)| (d, c))
    }
}

impl FromIterator<u8> for DegreeHistogram {
    fn from_iter<I: IntoIterator<Item = u8>>(iter: I) -> Self {
        let mut histogram = Self::new();
        for degree in iter {
            histogram.record(degree);
        }
        histogram
    }
}

impl fmt::Display for DegreeHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (degree, count) in self.iter() {
            writeln!(
                f,
                "degree={:3}: {:7} packets ({:6.2}%)",
                degree,
                count,
                self.fraction(degree) * 100.0
            )?;
        }
        if self.failed > 0 {
            writeln!(f, "failed: {} packets", self.failed)?;
        }
        Ok(())
    }
}

/// Simulation parameters
#[derive(Debug, Clone, Copy)]
pub struct SimulationConfig {
    /// Flow the simulated packets belong to; ids are assigned from 1
    pub flow: PacketIdentity,
    /// Packets to simulate
    pub packets: u16,
    /// Path length
    pub hops: u8,
}

/// Final header of one packet after `hops` hops
///
/// # Errors
///
/// Returns the first decision error hit along the path.
pub fn run_path(
    engine: &HopDecisionEngine,
    identity: &PacketIdentity,
    hops: u8,
) -> Result<Option<CodedSymbol>, crate::error::DecisionError> {
    let mut header = None;
    for hop in 0..hops {
        header = Some(engine.apply(identity, header, HopCount::new(hop))?.header);
    }
    Ok(header)
}

/// Run the simulation
#[must_use]
pub fn simulate(engine: &HopDecisionEngine, config: &SimulationConfig) -> DegreeHistogram {
    let mut histogram = DegreeHistogram::new();
    for id in 1..=config.packets {
        let identity = config.flow.with_id(id);
        match run_path(engine, &identity, config.hops) {
            Ok(header) => histogram.record(header.map_or(0, |h| h.degree)),
            Err(e) => {
                tracing::debug!("Packet {} did not complete: {}", identity, e);
                histogram.record_failure();
            }
        }
    }
    tracing::info!(
        "Simulated {} packets over {} hops ({} failed)",
        config.packets,
        config.hops,
        histogram.failed()
    );
    histogram
}
