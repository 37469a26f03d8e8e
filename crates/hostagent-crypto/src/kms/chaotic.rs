//! Chaotic key-management wrapper for fault injection testing
//!
//! Wraps any [`KmsClient`] and randomly fails unwraps or delays them, to test
//! that session establishment surfaces service failures and timeouts cleanly.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use zeroize::Zeroizing;

use super::{EncryptionContext, KmsClient, KmsError};

/// Chaotic KMS wrapper that randomly injects failures and latency
///
/// Delegates to an underlying client but fails unwraps based on a configured
/// failure rate. Injected failures are [`KmsError::Unavailable`], the error a
/// flaky network path would produce. Uses `Arc<Mutex<>>` for the RNG state,
/// making it Clone and thread-safe.
#[derive(Clone)]
pub struct ChaoticKms<K: KmsClient> {
    inner: K,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// Delay applied before every unwrap
    latency: Duration,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
    /// Unwrap attempts, including injected failures
    operation_count: Arc<Mutex<usize>>,
}

/// Linear congruential generator; reproducible chaos from a seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<K: KmsClient> ChaoticKms<K> {
    /// Create a chaotic wrapper with the default seed.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: K, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x5E55_10A1_C0DE_F00D)
    }

    /// Create with explicit seed for reproducible chaos
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: K, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            latency: Duration::ZERO,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(Mutex::new(0)),
        }
    }

    /// Delay every unwrap by `latency` (tokio time, so paused clocks apply).
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Underlying client.
    pub fn inner(&self) -> &K {
        &self.inner
    }

    /// Total unwrap attempts, including injected failures.
    #[allow(clippy::expect_used)]
    pub fn operation_count(&self) -> usize {
        *self.operation_count.lock().expect("operation_count mutex poisoned")
    }

    fn increment_operation_count(&self) {
        #[allow(clippy::expect_used)]
        let mut count = self.operation_count.lock().expect("operation_count mutex poisoned");
        *count += 1;
    }

    fn should_fail(&self) -> bool {
        #[allow(clippy::expect_used)]
        let roll = self.rng.lock().expect("ChaoticRng mutex poisoned").next();
        roll < self.failure_rate
    }
}

#[async_trait]
impl<K: KmsClient> KmsClient for ChaoticKms<K> {
    async fn unwrap(
        &self,
        ciphertext: &[u8],
        context: &EncryptionContext,
        key_id: &str,
    ) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        self.increment_operation_count();
        let fail = self.should_fail();

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if fail {
            return Err(KmsError::Unavailable("chaotic failure injection".to_string()));
        }
        self.inner.unwrap(ciphertext, context, key_id).await
    }
}
