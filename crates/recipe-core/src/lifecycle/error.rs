//! Error types for the packet lifecycle driver
//!
//! Nothing here is fatal to the driver as a whole. Per-packet failures
//! (`Decision`, `UnresponsiveHop`, `Cancelled`) end that packet only;
//! `MalformedHeader` and `IdentityMismatch` describe datagrams that are
//! discarded at the receive loop and never reach a packet's state.

use crate::error::{DecisionError, WireError};
use crate::fingerprint::PacketIdentity;
use crate::hop_count::HopCount;
use recipe_transport::TransportError;
use thiserror::Error;

/// Errors that can occur while driving packets
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The hop could not be decided
    #[error("decision failed: {0}")]
    Decision(#[from] DecisionError),

    /// A response could not be decoded
    #[error("malformed response: {0}")]
    MalformedHeader(#[from] WireError),

    /// A response did not belong to any packet in flight
    #[error("no packet in flight for {0}")]
    IdentityMismatch(PacketIdentity),

    /// No answer after all retries
    #[error("hop {hop} unresponsive for {packet} after {attempts} attempts")]
    UnresponsiveHop {
        /// Packet affected
        packet: PacketIdentity,
        /// Hop count the packet was waiting at
        hop: HopCount,
        /// Sends made for this hop
        attempts: u32,
    },

    /// Transport operation failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Driver shut down before the packet terminated
    #[error("driver shut down")]
    Cancelled,

    /// Operation not valid in the current state
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Configuration rejected
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

impl LifecycleError {
    /// Returns true if retrying the packet may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::UnresponsiveHop { .. } | Self::IdentityMismatch(_) => true,
            Self::Transport(e) => !e.is_fatal(),
            _ => false,
        }
    }
}
