//! Fuzz target for RECIPE packet parsing
//!
//! The parser should never panic, and anything it accepts must re-encode to
//! a datagram it accepts again.

#![no_main]

use libfuzzer_sys::fuzz_target;
use recipe_core::RecipePacket;

fuzz_target!(|data: &[u8]| {
    if let Ok(packet) = RecipePacket::parse(data) {
        let encoded = packet.encode().expect("parsed packets are IPv4");
        assert_eq!(RecipePacket::parse(&encoded), Ok(packet));
    }
});
