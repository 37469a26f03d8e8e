//! Counter-based 96-bit nonce generation for AES-GCM
//!
//! # Security Properties
//!
//! - Uniqueness: a generator never returns the same value twice (barring a
//!   full 2^96 wraparound, which wraps silently)
//! - Random start: the counter is seeded from the OS CSPRNG, so independent
//!   generators start at unrelated points
//! - Atomicity: read-then-increment happens under one lock, so concurrent
//!   callers never share a value
//!
//! An incrementing counter avoids the birthday bound that limits random
//! 96-bit nonces, allowing far more encryptions under one key.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::CryptoError;

/// AES-GCM nonce size in bytes.
pub const NONCE_SIZE: usize = 12;

/// Counter width in 32-bit words.
const STATE_WORDS: usize = 3;

/// Counter state, word 0 least significant.
pub type NonceState = [u32; STATE_WORDS];

/// Thread-safe monotonically incrementing nonce source.
///
/// Created uninitialized; [`initialize()`](Self::initialize) seeds it once.
#[derive(Debug, Default)]
pub struct NonceGenerator {
    state: Mutex<Option<NonceState>>,
}

impl NonceGenerator {
    /// Create an unseeded generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a generator starting at a known counter value.
    ///
    /// Intended for deterministic tests. Production generators must be seeded
    /// with [`initialize()`](Self::initialize).
    pub fn from_state(state: NonceState) -> Self {
        Self { state: Mutex::new(Some(state)) }
    }

    /// Seed the counter with cryptographically secure random bytes.
    ///
    /// # Errors
    ///
    /// - `RandomSource`: the OS entropy source failed
    /// - `NonceAlreadyInitialized`: the generator was already seeded
    pub fn initialize(&self) -> Result<(), CryptoError> {
        let mut seed = [0u8; NONCE_SIZE];
        getrandom::fill(&mut seed)?;

        let mut state = self.lock();
        if state.is_some() {
            return Err(CryptoError::NonceAlreadyInitialized);
        }
        *state = Some(words_from_bytes(&seed));
        Ok(())
    }

    /// Whether the generator has been seeded.
    pub fn is_initialized(&self) -> bool {
        self.lock().is_some()
    }

    /// Snapshot of the counter. `None` before initialization.
    pub fn state(&self) -> Option<NonceState> {
        *self.lock()
    }

    /// Return the current counter value and advance it by one.
    ///
    /// The returned nonce is the little-endian serialization of the counter
    /// *before* the increment.
    pub fn generate_nonce(&self) -> Result<[u8; NONCE_SIZE], CryptoError> {
        let mut guard = self.lock();
        let state = guard.as_mut().ok_or(CryptoError::NonceNotInitialized)?;

        let nonce = words_to_bytes(state);
        increment(state);
        Ok(nonce)
    }

    // The critical sections cannot panic, so a poisoned lock still guards a
    // consistent counter.
    fn lock(&self) -> MutexGuard<'_, Option<NonceState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Add one to a 96-bit little-endian counter, wrapping on overflow.
fn increment(state: &mut NonceState) {
    for word in state.iter_mut() {
        let (next, carry) = word.overflowing_add(1);
        *word = next;
        if !carry {
            return;
        }
    }
}

fn words_to_bytes(state: &NonceState) -> [u8; NONCE_SIZE] {
    let mut bytes = [0u8; NONCE_SIZE];
    for (chunk, word) in bytes.chunks_exact_mut(4).zip(state) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    bytes
}

fn words_from_bytes(bytes: &[u8; NONCE_SIZE]) -> NonceState {
    let mut state = [0u32; STATE_WORDS];
    for (word, chunk) in state.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    state
}
