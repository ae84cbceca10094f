//! Hop decision engine.
//!
//! Each hop folds its identifier into the coded-symbol header with
//! probability given by the table cell for `(hop, degree)`:
//!
//! 1. An absent header is created as `{symbol: 0, degree: 0}`.
//! 2. The cell `(a, r)` for `(hop, degree)` is fetched. A miss is an error.
//! 3. `fingerprint < a` (sign-bit comparison rule): extend, XOR the hop id
//!    into the symbol and increment the degree.
//! 4. Otherwise, depending on the [`RestartPolicy`], restart the symbol with
//!    only this hop or leave the header as it is.
//!
//! A header created at this hop and then kept stays at `{0, 0}`. Its degree
//! becomes positive at the first extend or restart and never returns to 0.
//!
//! The engine is pure apart from reading the shared table, so it can be
//! called from any number of packet tasks at once.

use crate::error::DecisionError;
use crate::fingerprint::{FingerprintStrategy, PacketIdentity};
use crate::header::CodedSymbol;
use crate::hop_count::HopCount;
use crate::table::{IndexBase, ProbabilityTable, Thresholds};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// `x < a` evaluated with only 32-bit wrapping subtraction and bit 31 tests.
///
/// When the top bits differ the answer is decided by them alone; when they
/// agree the wrapped difference `x - a` is negative exactly when `x < a`.
/// For stored `u32` values this agrees with the unsigned order, including
/// across the `0x7FFF_FFFF` / `0x8000_0000` boundary.
#[must_use]
pub const fn msb_less_than(x: u32, a: u32) -> bool {
    let diff = x.wrapping_sub(a);
    let x_msb = x >> 31;
    let a_msb = a >> 31;
    let diff_msb = diff >> 31;
    (x_msb == 0 && a_msb == 1) || (x_msb == a_msb && diff_msb == 1)
}

/// What happens when a hop does not extend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Restart only when the fingerprint also falls below `r`
    #[default]
    TwoThreshold,
    /// Restart only when the fingerprint lies above `r`
    ///
    /// Orientation used by the reference degree simulator, so tables built
    /// for it reproduce its distribution.
    AboveThreshold,
    /// Every non-extend outcome restarts
    Unconditional,
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TwoThreshold => write!(f, "two_threshold"),
            Self::AboveThreshold => write!(f, "above_threshold"),
            Self::Unconditional => write!(f, "unconditional"),
        }
    }
}

impl FromStr for RestartPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "two_threshold" => Ok(Self::TwoThreshold),
            "above_threshold" => Ok(Self::AboveThreshold),
            "unconditional" => Ok(Self::Unconditional),
            other => Err(format!("unknown restart policy: {other}")),
        }
    }
}

/// Outcome of one hop's comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Hop id XORed into the current symbol
    Extend,
    /// Symbol replaced by the hop id
    Restart,
    /// Header left unchanged
    Keep,
}

/// Decide without touching a header
#[must_use]
pub fn decide(fingerprint: u32, thresholds: Thresholds, policy: RestartPolicy) -> Decision {
    if msb_less_than(fingerprint, thresholds.extend) {
        return Decision::Extend;
    }
    match policy {
        RestartPolicy::Unconditional => Decision::Restart,
        RestartPolicy::TwoThreshold if msb_less_than(fingerprint, thresholds.restart) => {
            Decision::Restart
        }
        RestartPolicy::AboveThreshold if msb_less_than(thresholds.restart, fingerprint) => {
            Decision::Restart
        }
        RestartPolicy::TwoThreshold | RestartPolicy::AboveThreshold => Decision::Keep,
    }
}

/// Result of applying one hop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopOutcome {
    /// Updated header
    pub header: CodedSymbol,
    /// Decision taken
    pub decision: Decision,
    /// Cell consulted
    pub thresholds: Thresholds,
}

/// Apply one hop using the computed row offset
///
/// # Errors
///
/// Returns `TableLookupMiss` if `(hop, degree)` is not provisioned and
/// `DegreeOverflow` if extending would exceed the degree field.
pub fn apply_hop(
    header: Option<CodedSymbol>,
    fingerprint: u32,
    hop: HopCount,
    table: &ProbabilityTable,
    policy: RestartPolicy,
) -> Result<HopOutcome, DecisionError> {
    apply_hop_indexed(IndexBase::Computed, header, fingerprint, hop, table, policy)
}

/// Apply one hop with an explicit row offset mode
///
/// # Errors
///
/// See [`apply_hop`].
pub fn apply_hop_indexed(
    mode: IndexBase,
    header: Option<CodedSymbol>,
    fingerprint: u32,
    hop: HopCount,
    table: &ProbabilityTable,
    policy: RestartPolicy,
) -> Result<HopOutcome, DecisionError> {
    let header = header.unwrap_or(CodedSymbol::EMPTY);

    let thresholds =
        table
            .lookup(mode, hop, header.degree)
            .ok_or(DecisionError::TableLookupMiss {
                hop: hop.get(),
                degree: header.degree,
            })?;

    let decision = decide(fingerprint, thresholds, policy);
    let header = match decision {
        Decision::Extend => CodedSymbol {
            symbol: header.symbol ^ hop.symbol_id(),
            degree: header
                .degree
                .checked_add(1)
                .ok_or(DecisionError::DegreeOverflow { hop: hop.get() })?,
        },
        Decision::Restart => CodedSymbol {
            symbol: hop.symbol_id(),
            degree: 1,
        },
        Decision::Keep => header,
    };

    Ok(HopOutcome {
        header,
        decision,
        thresholds,
    })
}

/// Table, fingerprint strategy and restart policy bundled for a hop
#[derive(Debug, Clone)]
pub struct HopDecisionEngine {
    table: Arc<ProbabilityTable>,
    strategy: Arc<dyn FingerprintStrategy>,
    policy: RestartPolicy,
}

impl HopDecisionEngine {
    /// Create an engine
    #[must_use]
    pub fn new(
        table: Arc<ProbabilityTable>,
        strategy: Arc<dyn FingerprintStrategy>,
        policy: RestartPolicy,
    ) -> Self {
        Self {
            table,
            strategy,
            policy,
        }
    }

    /// Shared table
    #[must_use]
    pub fn table(&self) -> &ProbabilityTable {
        &self.table
    }

    /// Fingerprint strategy in use
    #[must_use]
    pub fn strategy(&self) -> &dyn FingerprintStrategy {
        self.strategy.as_ref()
    }

    /// Restart policy in use
    #[must_use]
    pub fn policy(&self) -> RestartPolicy {
        self.policy
    }

    /// Fingerprint the packet and apply the hop
    ///
    /// # Errors
    ///
    /// Propagates fingerprint and table errors.
    pub fn apply(
        &self,
        identity: &PacketIdentity,
        header: Option<CodedSymbol>,
        hop: HopCount,
    ) -> Result<HopOutcome, DecisionError> {
        let fingerprint = self.strategy.fingerprint(identity, hop)?;
        let outcome = apply_hop_indexed(
            self.strategy.index_base(),
            header,
            fingerprint,
            hop,
            &self.table,
            self.policy,
        )?;
        tracing::debug!(
            "{} hop {}: fp={:#010x} a={:#010x} r={:#010x} -> {:?} symbol={:#06x} degree={}",
            identity,
            hop,
            fingerprint,
            outcome.thresholds.extend,
            outcome.thresholds.restart,
            outcome.decision,
            outcome.header.symbol,
            outcome.header.degree
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{Crc32Hash, MixHash};

    fn example_table() -> ProbabilityTable {
        let mut builder = ProbabilityTable::builder(4, 4).unwrap();
        builder
            .set(0, 0, Thresholds::new(0x4000_0000, 0x8000_0000))
            .unwrap()
            .set(1, 1, Thresholds::new(0x2000_0000, 0x6000_0000))
            .unwrap();
        builder.build()
    }

    #[test]
    fn test_msb_less_than_boundaries() {
        assert!(!msb_less_than(0, 0));
        assert!(msb_less_than(0, 1));
        assert!(msb_less_than(0x7FFF_FFFF, 0x8000_0000));
        assert!(!msb_less_than(0x8000_0000, 0x7FFF_FFFF));
        assert!(msb_less_than(0, 0xFFFF_FFFF));
        assert!(!msb_less_than(0xFFFF_FFFF, 0));
        assert!(!msb_less_than(0xFFFF_FFFF, 0xFFFF_FFFF));
        assert!(msb_less_than(0x8000_0000, 0xFFFF_FFFF));
    }

    #[test]
    fn test_worked_example() {
        let table = example_table();

        let first = apply_hop(
            None,
            0x1000_0000,
            HopCount::new(0),
            &table,
            RestartPolicy::TwoThreshold,
        )
        .unwrap();
        assert_eq!(first.decision, Decision::Extend);
        assert_eq!(first.header, CodedSymbol::new(0, 1));

        let second = apply_hop(
            Some(first.header),
            0x5000_0000,
            HopCount::new(1),
            &table,
            RestartPolicy::TwoThreshold,
        )
        .unwrap();
        assert_eq!(second.decision, Decision::Restart);
        assert_eq!(second.header, CodedSymbol::new(1, 1));
    }

    #[test]
    fn test_keep_under_two_threshold() {
        let table = ProbabilityTable::uniform(4, 4, Thresholds::new(0x1000, 0x2000)).unwrap();
        let header = CodedSymbol::new(0x00AB, 3);
        let outcome = apply_hop(
            Some(header),
            0x9000_0000,
            HopCount::new(2),
            &table,
            RestartPolicy::TwoThreshold,
        )
        .unwrap();
        assert_eq!(outcome.decision, Decision::Keep);
        assert_eq!(outcome.header, header);
    }

    #[test]
    fn test_first_hop_keep_leaves_empty_header() {
        let table = ProbabilityTable::uniform(4, 4, Thresholds::new(0, 0)).unwrap();
        let outcome = apply_hop(
            None,
            0x9000_0000,
            HopCount::ZERO,
            &table,
            RestartPolicy::TwoThreshold,
        )
        .unwrap();
        assert_eq!(outcome.decision, Decision::Keep);
        assert_eq!(outcome.header, CodedSymbol::EMPTY);

        // The next hop starts from degree 0 and codes normally
        let table = ProbabilityTable::uniform(4, 4, Thresholds::new(u32::MAX, 0)).unwrap();
        let next = apply_hop(
            Some(outcome.header),
            0x9000_0000,
            HopCount::new(1),
            &table,
            RestartPolicy::TwoThreshold,
        )
        .unwrap();
        assert_eq!(next.decision, Decision::Extend);
        assert_eq!(next.header, CodedSymbol::new(1, 1));
    }

    #[test]
    fn test_above_threshold_orientation() {
        let table = ProbabilityTable::uniform(4, 4, Thresholds::new(0x1000, 0x2000)).unwrap();
        let header = CodedSymbol::new(0x00AB, 3);

        let above = apply_hop(
            Some(header),
            0x9000_0000,
            HopCount::new(2),
            &table,
            RestartPolicy::AboveThreshold,
        )
        .unwrap();
        assert_eq!(above.decision, Decision::Restart);
        assert_eq!(above.header, CodedSymbol::new(2, 1));

        // Between a and r nothing happens
        let between = apply_hop(
            Some(header),
            0x1800,
            HopCount::new(2),
            &table,
            RestartPolicy::AboveThreshold,
        )
        .unwrap();
        assert_eq!(between.decision, Decision::Keep);
        assert_eq!(between.header, header);

        // Equal to r is not above it
        assert_eq!(
            decide(0x2000, Thresholds::new(0x1000, 0x2000), RestartPolicy::AboveThreshold),
            Decision::Keep
        );
    }

    /// Add / replace / skip loop of the reference degree simulator, with the
    /// cell read at `hop * max_degree + degree` and a lookup miss ending the
    /// packet
    fn reference_final_degree(
        table: &ProbabilityTable,
        fingerprints: &[u32],
    ) -> (usize, Option<CodedSymbol>) {
        let mut degree = 0usize;
        let mut members: Vec<u8> = Vec::new();
        let mut last = None;
        for (hop, &fp) in fingerprints.iter().enumerate() {
            let hop = u8::try_from(hop).unwrap();
            let Some(cell) = table.get(HopCount::new(hop), u8::try_from(degree).unwrap()) else {
                break;
            };
            if fp < cell.extend {
                members.push(hop);
                degree += 1;
            } else if fp > cell.restart {
                members = vec![hop];
                degree = 1;
            }
            let symbol = members.iter().fold(0u16, |acc, &h| acc ^ u16::from(h));
            last = Some(CodedSymbol::new(symbol, u8::try_from(degree).unwrap()));
        }
        (members.len(), last)
    }

    #[test]
    fn test_above_threshold_matches_reference_simulator() {
        let mut builder = ProbabilityTable::builder(6, 4).unwrap();
        let cells = [
            (0x6000_0000, 0xC000_0000),
            (0x4000_0000, 0xA000_0000),
            (0x3000_0000, 0x9000_0000),
            (0x1000_0000, 0x8000_0000),
        ];
        for hop in 0..6u8 {
            for (degree, &(a, r)) in cells.iter().enumerate() {
                let degree = u8::try_from(degree).unwrap();
                builder.set(hop, degree, Thresholds::new(a, r)).unwrap();
            }
        }
        let table = builder.build();
        let strategy = MixHash::with_seed(0x5EED);

        for id in 0..200u16 {
            let identity = PacketIdentity::v4([10, 0, 0, 1].into(), [10, 0, 0, 2].into(), id);
            let fingerprints: Vec<u32> = (0..6)
                .map(|h| strategy.fingerprint(&identity, HopCount::new(h)).unwrap())
                .collect();
            let (members, expected) = reference_final_degree(&table, &fingerprints);

            let mut header = None;
            let mut missed = false;
            for (hop, &fp) in fingerprints.iter().enumerate() {
                let hop = HopCount::new(u8::try_from(hop).unwrap());
                match apply_hop(header, fp, hop, &table, RestartPolicy::AboveThreshold) {
                    Ok(outcome) => header = Some(outcome.header),
                    Err(DecisionError::TableLookupMiss { .. }) => {
                        missed = true;
                        break;
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            assert_eq!(header, expected, "packet {id}");
            if !missed {
                assert_eq!(usize::from(header.unwrap().degree), members);
            }
        }
    }

    #[test]
    fn test_unconditional_restart() {
        let table = ProbabilityTable::uniform(4, 4, Thresholds::new(0x1000, 0x2000)).unwrap();
        let outcome = apply_hop(
            Some(CodedSymbol::new(0x00AB, 3)),
            0x9000_0000,
            HopCount::new(2),
            &table,
            RestartPolicy::Unconditional,
        )
        .unwrap();
        assert_eq!(outcome.decision, Decision::Restart);
        assert_eq!(outcome.header, CodedSymbol::new(2, 1));
    }

    #[test]
    fn test_lookup_miss_is_error() {
        let table = example_table();
        let err = apply_hop(
            Some(CodedSymbol::new(0, 2)),
            0,
            HopCount::new(0),
            &table,
            RestartPolicy::TwoThreshold,
        )
        .unwrap_err();
        assert_eq!(err, DecisionError::TableLookupMiss { hop: 0, degree: 2 });

        let err = apply_hop(None, 0, HopCount::new(9), &table, RestartPolicy::TwoThreshold)
            .unwrap_err();
        assert_eq!(err, DecisionError::TableLookupMiss { hop: 9, degree: 0 });
    }

    #[test]
    fn test_degree_overflow() {
        let table =
            ProbabilityTable::uniform(4, 256, Thresholds::new(u32::MAX, u32::MAX)).unwrap();
        let err = apply_hop(
            Some(CodedSymbol::new(0, 255)),
            0,
            HopCount::new(3),
            &table,
            RestartPolicy::TwoThreshold,
        )
        .unwrap_err();
        assert_eq!(err, DecisionError::DegreeOverflow { hop: 3 });
    }

    #[test]
    fn test_hop_id_zero_extended_into_symbol() {
        let table =
            ProbabilityTable::uniform(256, 8, Thresholds::new(u32::MAX, u32::MAX)).unwrap();
        let outcome = apply_hop(
            Some(CodedSymbol::new(0xFF00, 1)),
            0,
            HopCount::new(0xF0),
            &table,
            RestartPolicy::TwoThreshold,
        )
        .unwrap();
        assert_eq!(outcome.header, CodedSymbol::new(0xFFF0, 2));
    }

    #[test]
    fn test_engine_uses_strategy() {
        let table = Arc::new(
            ProbabilityTable::uniform(16, 16, Thresholds::new(0x8000_0000, u32::MAX)).unwrap(),
        );
        let id = PacketIdentity::v4([10, 0, 0, 1].into(), [10, 0, 0, 2].into(), 7);

        for strategy in [
            Arc::new(MixHash::with_seed(42)) as Arc<dyn FingerprintStrategy>,
            Arc::new(Crc32Hash),
        ] {
            let engine =
                HopDecisionEngine::new(table.clone(), strategy.clone(), RestartPolicy::default());
            let outcome = engine.apply(&id, None, HopCount::ZERO).unwrap();
            let fp = strategy.fingerprint(&id, HopCount::ZERO).unwrap();
            let expected = if fp < 0x8000_0000 {
                Decision::Extend
            } else {
                Decision::Restart
            };
            assert_eq!(outcome.decision, expected);
            assert_eq!(outcome.header.degree, 1);
        }
    }

    #[test]
    fn test_restart_policy_parse() {
        assert_eq!(
            "two-threshold".parse::<RestartPolicy>(),
            Ok(RestartPolicy::TwoThreshold)
        );
        assert_eq!(
            "Unconditional".parse::<RestartPolicy>(),
            Ok(RestartPolicy::Unconditional)
        );
        assert_eq!(
            "above_threshold".parse::<RestartPolicy>(),
            Ok(RestartPolicy::AboveThreshold)
        );
        assert_eq!(RestartPolicy::AboveThreshold.to_string(), "above_threshold");
        assert!("sometimes".parse::<RestartPolicy>().is_err());
    }
}
