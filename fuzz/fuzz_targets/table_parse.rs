//! Fuzz test for probability table parsing
//!
//! Arbitrary text must load or fail with an error, never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use recipe_core::{HashSchedule, ProbabilityTable};
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = ProbabilityTable::from_reader(Cursor::new(s), 16, 16);
        let _ = HashSchedule::from_reader(Cursor::new(s));
    }
});
