//! The coded-symbol header carried end to end.

use serde::{Deserialize, Serialize};

/// RECIPE header size on the wire: `symbol` (2 bytes) + `degree` (1 byte)
pub const RECIPE_HEADER_SIZE: usize = 3;

/// Running XOR of hop identifiers plus the number folded in since the last restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CodedSymbol {
    /// XOR accumulation of hop identifiers in the current coded group
    pub symbol: u16,
    /// Hop identifiers XORed into `symbol` since the last restart
    pub degree: u8,
}

impl CodedSymbol {
    /// Header created by the first hop that finds it absent
    pub const EMPTY: Self = Self {
        symbol: 0,
        degree: 0,
    };

    /// Create a header with explicit fields
    #[must_use]
    pub const fn new(symbol: u16, degree: u8) -> Self {
        Self { symbol, degree }
    }

    /// Encode as `{symbol: u16 BE, degree: u8}`
    #[must_use]
    pub fn to_bytes(self) -> [u8; RECIPE_HEADER_SIZE] {
        let s = self.symbol.to_be_bytes();
        [s[0], s[1], self.degree]
    }

    /// Decode from the 3-byte wire form
    #[must_use]
    pub fn from_bytes(bytes: [u8; RECIPE_HEADER_SIZE]) -> Self {
        Self {
            symbol: u16::from_be_bytes([bytes[0], bytes[1]]),
            degree: bytes[2],
        }
    }
}
