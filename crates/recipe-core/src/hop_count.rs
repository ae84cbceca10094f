//! Hop counts derived from the remaining TTL.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::MAX_TTL;

/// Number of hops a packet has traversed, `255 - remaining_ttl`.
///
/// Carried as 8 bits on the wire. It is folded into the 16-bit coded symbol
/// only through [`HopCount::symbol_id`], which zero-extends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HopCount(u8);

impl HopCount {
    /// Hop count of a freshly created packet
    pub const ZERO: Self = Self(0);

    /// Wrap a raw hop count
    #[must_use]
    pub const fn new(hop: u8) -> Self {
        Self(hop)
    }

    /// Derive the hop count from a remaining TTL
    #[must_use]
    pub const fn from_ttl(ttl: u8) -> Self {
        Self(MAX_TTL - ttl)
    }

    /// Remaining TTL this hop count corresponds to
    #[must_use]
    pub const fn to_ttl(self) -> u8 {
        MAX_TTL - self.0
    }

    /// Raw 8-bit value
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Hop identifier as folded into the coded symbol (zero-extended).
    #[must_use]
    pub const fn symbol_id(self) -> u16 {
        self.0 as u16
    }
}

impl From<u8> for HopCount {
    fn from(hop: u8) -> Self {
        Self(hop)
    }
}

impl fmt::Display for HopCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
