//! Per-packet state machine
//!
//! ```text
//! CREATED ──dispatch──► IN_FLIGHT ──accept──► CONTINUING ──dispatch──► IN_FLIGHT ...
//!                                    │
//!                                    └──────► TERMINATED (absorbing)
//! ```
//!
//! A response is accepted only if it is the direct successor of what was
//! sent: same identity, TTL exactly one lower, header present. Anything else
//! leaves the state untouched.

use crate::MAX_TTL;
use crate::error::WireError;
use crate::fingerprint::PacketIdentity;
use crate::header::CodedSymbol;
use crate::hop_count::HopCount;
use crate::lifecycle::error::LifecycleError;
use crate::lifecycle::record::{HopRecord, PacketTrace, TerminationReason};
use crate::wire::RecipePacket;

/// Lifecycle state of one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketState {
    /// Identity assigned, nothing sent yet
    Created,
    /// Waiting for the hop to answer
    InFlight,
    /// Answer accepted, next hop pending
    Continuing,
    /// Stop condition reached
    Terminated(TerminationReason),
}

impl PacketState {
    /// Check if the packet has terminated
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated(_))
    }
}

/// Result of offering a response to a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Response applied; another hop is due
    Continue,
    /// Response applied; packet is done
    Terminated(TerminationReason),
    /// Response does not follow the last send; ignored
    Stale,
}

/// One packet's journey
#[derive(Debug, Clone)]
pub struct PacketLifecycle {
    identity: PacketIdentity,
    ttl: u8,
    header: Option<CodedSymbol>,
    state: PacketState,
    max_iterations: u8,
    records: Vec<HopRecord>,
    retries: u32,
}

impl PacketLifecycle {
    /// Fresh packet in `CREATED`, starting at TTL 255 so its first hop is hop 0
    #[must_use]
    pub fn new(identity: PacketIdentity, max_iterations: u8) -> Self {
        Self {
            identity,
            ttl: MAX_TTL,
            header: None,
            state: PacketState::Created,
            max_iterations,
            records: vec![HopRecord::observe(MAX_TTL, None)],
            retries: 0,
        }
    }

    /// Packet identity
    #[must_use]
    pub fn identity(&self) -> &PacketIdentity {
        &self.identity
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> PacketState {
        self.state
    }

    /// Remaining TTL
    #[must_use]
    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    /// Current header
    #[must_use]
    pub fn header(&self) -> Option<CodedSymbol> {
        self.header
    }

    /// Hop count the next hop will run at
    #[must_use]
    pub fn hop(&self) -> HopCount {
        HopCount::from_ttl(self.ttl)
    }

    /// Observations so far
    #[must_use]
    pub fn records(&self) -> &[HopRecord] {
        &self.records
    }

    /// Count one resend
    pub fn note_retry(&mut self) {
        self.retries += 1;
    }

    /// Move to `IN_FLIGHT` and return the datagram to send
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the packet is `CREATED` or `CONTINUING`.
    pub fn dispatch(&mut self) -> Result<RecipePacket, LifecycleError> {
        match self.state {
            PacketState::Created | PacketState::Continuing => {}
            PacketState::InFlight => {
                return Err(LifecycleError::InvalidState("packet already in flight"));
            }
            PacketState::Terminated(_) => {
                return Err(LifecycleError::InvalidState("packet already terminated"));
            }
        }
        self.state = PacketState::InFlight;

        let mut packet = RecipePacket::new(self.identity).with_ttl(self.ttl);
        packet.header = self.header;
        Ok(packet)
    }

    /// Offer a response received while `IN_FLIGHT`
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if nothing is in flight, `IdentityMismatch` for
    /// another packet's response, and `MalformedHeader` for a successor that
    /// came back without a header.
    pub fn accept(&mut self, response: &RecipePacket) -> Result<Step, LifecycleError> {
        if self.state != PacketState::InFlight {
            return Err(LifecycleError::InvalidState("no hop in flight"));
        }
        if response.identity != self.identity {
            return Err(LifecycleError::IdentityMismatch(response.identity));
        }
        if Some(response.ttl) != self.ttl.checked_sub(1) {
            return Ok(Step::Stale);
        }
        let Some(header) = response.header else {
            return Err(LifecycleError::MalformedHeader(WireError::MissingHeader));
        };

        self.ttl = response.ttl;
        self.header = Some(header);
        self.records.push(HopRecord::observe(self.ttl, self.header));

        let reason = if self.ttl == 0 {
            Some(TerminationReason::TtlExhausted)
        } else if self.hop().get() >= self.max_iterations {
            Some(TerminationReason::MaxIterations)
        } else {
            None
        };

        match reason {
            Some(reason) => {
                self.state = PacketState::Terminated(reason);
                Ok(Step::Terminated(reason))
            }
            None => {
                self.state = PacketState::Continuing;
                Ok(Step::Continue)
            }
        }
    }

    /// Finished trace
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the packet is `TERMINATED`.
    pub fn into_trace(self) -> Result<PacketTrace, LifecycleError> {
        match self.state {
            PacketState::Terminated(reason) => Ok(PacketTrace {
                identity: self.identity,
                records: self.records,
                final_header: self.header,
                reason,
                retries: self.retries,
            }),
            _ => Err(LifecycleError::InvalidState("packet not terminated")),
        }
    }
}
