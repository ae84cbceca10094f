//! # RECIPE-D Core
//!
//! Distributed per-hop encoding of hop identifiers into a packet header.
//!
//! Every hop a packet crosses either XORs its hop identifier into a small
//! coded-symbol header, restarts the symbol with only itself, or leaves it
//! alone. The choice is driven by a per-packet, per-hop fingerprint compared
//! against a degree- and hop-indexed probability table, so that the stream
//! of headers seen downstream follows an LT-style degree distribution with
//! no coordination between hops.
//!
//! This crate provides:
//! - Hop counts, coded-symbol headers and IPv4 framing
//! - The probability table and its text loader
//! - Fingerprint strategies (mixing, CRC32, precomputed schedule)
//! - The hop decision engine
//! - A software hop that serves the decision over any transport
//! - The packet lifecycle driver
//! - An in-process degree distribution simulator
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Packet Lifecycle Driver                     │
//! │   (per-packet state machines, timeouts, retries, demux)         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                      Hop Decision Engine                        │
//! │   (extend / restart / keep on the coded-symbol header)          │
//! ├────────────────────────────────┬────────────────────────────────┤
//! │     Fingerprint Strategy       │       Probability Table        │
//! │  (mix, CRC32, precomputed)     │  ((hop, degree) -> (a, r))     │
//! └────────────────────────────────┴────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod decision;
pub mod error;
pub mod fingerprint;
pub mod header;
pub mod hop;
pub mod hop_count;
pub mod lifecycle;
pub mod simulate;
pub mod table;
pub mod wire;

pub use decision::{
    Decision, HopDecisionEngine, HopOutcome, RestartPolicy, apply_hop, apply_hop_indexed,
    msb_less_than,
};
pub use error::{DecisionError, Error, TableError, WireError};
pub use fingerprint::{
    Crc32Hash, FingerprintStrategy, HashSchedule, HashVariant, MixHash, PacketIdentity,
    PrecomputedHash,
};
pub use header::{CodedSymbol, RECIPE_HEADER_SIZE};
pub use hop::{HopConfig, HopProcessor, HopServer, HopStats};
pub use hop_count::HopCount;
pub use lifecycle::{
    DriverConfig, DriverStats, HopRecord, LifecycleDriver, LifecycleError, PacketTrace,
    RetryConfig, TerminationReason,
};
pub use simulate::{DegreeHistogram, SimulationConfig, simulate};
pub use table::{IndexBase, ProbabilityTable, TableBuilder, Thresholds};
pub use wire::RecipePacket;

/// TTL of a freshly created packet; hop counts are measured from it
pub const MAX_TTL: u8 = 255;

/// IPv4 protocol number carried by RECIPE packets
pub const RECIPE_PROTOCOL: u8 = 146;

/// IPv4 header size without options
pub const IPV4_HEADER_SIZE: usize = 20;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;
