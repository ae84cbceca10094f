//! Per-hop observation records and finished packet traces

use crate::error::DecisionError;
use crate::fingerprint::PacketIdentity;
use crate::header::CodedSymbol;
use crate::hop_count::HopCount;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One observation of a packet, taken when it leaves the driver's hands
/// for the first time and after every hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopRecord {
    /// `255 - ttl` at observation time
    pub hop_id: HopCount,
    /// Remaining TTL
    pub ttl: u8,
    /// Coded symbol (zero before the header exists)
    pub symbol: u16,
    /// Degree (zero before the header exists)
    pub degree: u8,
}

impl HopRecord {
    /// Record for a packet with `ttl` and an optional header
    #[must_use]
    pub fn observe(ttl: u8, header: Option<CodedSymbol>) -> Self {
        let header = header.unwrap_or(CodedSymbol::EMPTY);
        Self {
            hop_id: HopCount::from_ttl(ttl),
            ttl,
            symbol: header.symbol,
            degree: header.degree,
        }
    }
}

/// Why a packet stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Remaining TTL reached zero
    TtlExhausted,
    /// Hop count reached the configured bound
    MaxIterations,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TtlExhausted => write!(f, "TTL exhausted"),
            Self::MaxIterations => write!(f, "max iterations reached"),
        }
    }
}

/// Everything observed about a packet that reached `TERMINATED`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketTrace {
    /// Packet identity
    pub identity: PacketIdentity,
    /// Observations in hop order
    pub records: Vec<HopRecord>,
    /// Header the packet terminated with
    pub final_header: Option<CodedSymbol>,
    /// Stop condition hit
    pub reason: TerminationReason,
    /// Resends needed along the way
    pub retries: u32,
}

impl PacketTrace {
    /// Hops the packet traversed
    #[must_use]
    pub fn hops(&self) -> usize {
        self.records.len().saturating_sub(1)
    }

    /// Degree the packet terminated with
    #[must_use]
    pub fn final_degree(&self) -> u8 {
        self.final_header.map_or(0, |h| h.degree)
    }
}

/// Outcome of a local re-computation of a hop's decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Hop produced the expected header
    Match,
    /// Hop produced a different header
    Mismatch {
        /// Header computed locally
        expected: CodedSymbol,
        /// Header the hop returned
        actual: CodedSymbol,
    },
    /// Local computation failed
    Failed(DecisionError),
}
