//! Fuzz target for the 96-bit nonce counter
//!
//! Checks the generator against a `u128` model from arbitrary seeds,
//! concentrating on carry and wraparound boundaries.
//!
//! # Strategy
//!
//! - Arbitrary seeds plus seeds pinned just below word boundaries
//! - Random runs of draws (bounded per input)
//!
//! # Invariants
//!
//! - Every draw equals the model value, little-endian, word 0 first
//! - The model advances by exactly one per draw, modulo 2^96
//! - No two draws within a run repeat

#![no_main]

use std::collections::HashSet;

use arbitrary::Arbitrary;
use hostagent_crypto::{NonceGenerator, NONCE_SIZE};
use libfuzzer_sys::fuzz_target;

const COUNTER_MASK: u128 = (1u128 << 96) - 1;

#[derive(Debug, Clone, Arbitrary)]
enum Seed {
    Raw([u32; 3]),
    /// `distance` steps before word 0 overflows into word 1
    BelowFirstCarry { distance: u8, high: [u32; 2] },
    /// `distance` steps before words 0 and 1 overflow into word 2
    BelowSecondCarry { distance: u8, top: u32 },
    /// `distance` steps before the whole counter wraps
    BelowWrap { distance: u8 },
}

impl Seed {
    fn words(&self) -> [u32; 3] {
        match self {
            Seed::Raw(words) => *words,
            Seed::BelowFirstCarry { distance, high } => {
                [u32::MAX - u32::from(*distance), high[0], high[1]]
            },
            Seed::BelowSecondCarry { distance, top } => {
                [u32::MAX - u32::from(*distance), u32::MAX, *top]
            },
            Seed::BelowWrap { distance } => [u32::MAX - u32::from(*distance), u32::MAX, u32::MAX],
        }
    }
}

#[derive(Debug, Clone, Arbitrary)]
struct CounterScenario {
    seed: Seed,
    draws: u16,
}

fn model(words: [u32; 3]) -> u128 {
    u128::from(words[0]) | (u128::from(words[1]) << 32) | (u128::from(words[2]) << 64)
}

fn decode(nonce: [u8; NONCE_SIZE]) -> u128 {
    let mut wide = [0u8; 16];
    wide[..NONCE_SIZE].copy_from_slice(&nonce);
    u128::from_le_bytes(wide)
}

fuzz_target!(|scenario: CounterScenario| {
    let words = scenario.seed.words();
    let generator = NonceGenerator::from_state(words);
    let mut expected = model(words);
    let draws = usize::from(scenario.draws % 512) + 1;
    let mut seen = HashSet::with_capacity(draws);

    for _ in 0..draws {
        // INVARIANT 1: generation never fails once seeded
        let nonce = generator.generate_nonce().expect("seeded generator must not fail");

        // INVARIANT 2: output matches the model
        assert_eq!(decode(nonce), expected, "nonce diverged from counter model");

        // INVARIANT 3: no repeats within a run
        assert!(seen.insert(nonce), "nonce repeated");

        expected = (expected + 1) & COUNTER_MASK;
    }

    // INVARIANT 4: the exposed state is the next value to be emitted
    let state = generator.state().expect("seeded generator has state");
    assert_eq!(model(state), expected);
});
