//! Error types for the RECIPE-D core.

use thiserror::Error;

/// Core errors
#[derive(Debug, Error)]
pub enum Error {
    /// Hop decision error
    #[error("decision error: {0}")]
    Decision(#[from] DecisionError),

    /// Wire format error
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Probability table error
    #[error("table error: {0}")]
    Table(#[from] TableError),

    /// Transport error
    #[error("transport error: {0}")]
    Transport(#[from] recipe_transport::TransportError),

    /// Operation not valid in the current state
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

/// Errors raised while deciding a hop.
///
/// None of these are process-fatal; the hop is rejected and the packet is
/// left as it was.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum DecisionError {
    /// No provisioned thresholds for `(hop, degree)`
    #[error("no table entry for hop {hop}, degree {degree}")]
    TableLookupMiss {
        /// Hop count used for the lookup
        hop: u8,
        /// Degree used for the lookup
        degree: u8,
    },

    /// Extending would push the degree past the 8-bit wire field
    #[error("degree overflow at hop {hop}")]
    DegreeOverflow {
        /// Hop count at which the overflow happened
        hop: u8,
    },

    /// A precomputed fingerprint schedule has no value for this packet and hop
    #[error("no fingerprint scheduled for packet {packet_id} at hop {hop}")]
    FingerprintMiss {
        /// Packet identification field
        packet_id: u16,
        /// Hop count
        hop: u8,
    },
}

/// Wire-level errors
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum WireError {
    /// Datagram shorter than an IPv4 header
    #[error("packet too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Version nibble is not 4
    #[error("not an IPv4 packet (version {0})")]
    NotIpv4(u8),

    /// IHL other than 5 (options are not carried)
    #[error("unsupported IPv4 header length: {0} words")]
    BadHeaderLength(u8),

    /// Protocol field is not the RECIPE protocol number
    #[error("unexpected protocol: {0}")]
    UnexpectedProtocol(u8),

    /// `total_len` and the datagram disagree about the RECIPE header
    #[error("malformed RECIPE header: total length {declared}, datagram {actual}")]
    MalformedHeader {
        /// Length declared in the IPv4 header
        declared: u16,
        /// Bytes actually present
        actual: usize,
    },

    /// A hop answered without the RECIPE header
    #[error("response carries no RECIPE header")]
    MissingHeader,

    /// IPv4 header checksum does not verify
    #[error("IPv4 checksum mismatch")]
    ChecksumMismatch,

    /// Only IPv4 identities can be framed
    #[error("address family not supported on the wire")]
    UnsupportedAddressFamily,
}

/// Probability table loading errors
#[derive(Debug, Error)]
pub enum TableError {
    /// I/O failure while reading a table source
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A value could not be parsed as a number
    #[error("line {line}: cannot parse {value:?}")]
    Parse {
        /// 1-based line number
        line: usize,
        /// Offending token
        value: String,
    },

    /// Rows must hold `(a, r)` pairs
    #[error("line {line}: odd number of columns ({columns})")]
    OddColumns {
        /// 1-based line number
        line: usize,
        /// Column count found
        columns: usize,
    },

    /// Row wider than the configured degree bound
    #[error("line {line}: {degrees} degrees exceeds max degree {max_degree}")]
    TooManyDegrees {
        /// 1-based line number
        line: usize,
        /// Degrees present on the line
        degrees: usize,
        /// Configured bound
        max_degree: usize,
    },

    /// More rows than the configured hop bound
    #[error("{hops} hops exceeds max hops {max_hops}")]
    TooManyHops {
        /// Rows present
        hops: usize,
        /// Configured bound
        max_hops: usize,
    },

    /// Probability outside `[0, 1]`
    #[error("line {line}: probability {value} outside [0, 1]")]
    OutOfRange {
        /// 1-based line number
        line: usize,
        /// Offending value
        value: f64,
    },

    /// Table dimensions unusable
    #[error("invalid table dimensions: {0}")]
    Dimensions(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_error_display() {
        let err = DecisionError::TableLookupMiss { hop: 3, degree: 9 };
        assert_eq!(err.to_string(), "no table entry for hop 3, degree 9");
        let err = DecisionError::DegreeOverflow { hop: 200 };
        assert!(err.to_string().contains("200"));
    }

    #[test]
    fn test_error_from_conversions() {
        let err: Error = DecisionError::DegreeOverflow { hop: 1 }.into();
        assert!(matches!(err, Error::Decision(_)));
        let err: Error = WireError::ChecksumMismatch.into();
        assert!(err.to_string().starts_with("wire error"));
    }
}
