//! Fuzz target for the hop decision
//!
//! Arbitrary headers, fingerprints and thresholds must either produce a
//! header consistent with the decision or a decision error.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use recipe_core::{
    CodedSymbol, Decision, HopCount, ProbabilityTable, RestartPolicy, Thresholds, apply_hop,
};

#[derive(Debug, Arbitrary)]
struct Input {
    header: Option<(u16, u8)>,
    fingerprint: u32,
    extend: u32,
    restart: u32,
    hop: u8,
    unconditional: bool,
}

fuzz_target!(|input: Input| {
    let Ok(table) = ProbabilityTable::uniform(256, 256, Thresholds::new(input.extend, input.restart))
    else {
        return;
    };
    let policy = if input.unconditional {
        RestartPolicy::Unconditional
    } else {
        RestartPolicy::TwoThreshold
    };
    let header = input.header.map(|(s, d)| CodedSymbol::new(s, d));
    let hop = HopCount::new(input.hop);

    if let Ok(outcome) = apply_hop(header, input.fingerprint, hop, &table, policy) {
        let before = header.unwrap_or(CodedSymbol::EMPTY);
        match outcome.decision {
            Decision::Extend => assert_eq!(outcome.header.degree, before.degree + 1),
            Decision::Restart => assert_eq!(outcome.header, CodedSymbol::new(hop.symbol_id(), 1)),
            Decision::Keep => assert_eq!(outcome.header, before),
        }
    }
});
