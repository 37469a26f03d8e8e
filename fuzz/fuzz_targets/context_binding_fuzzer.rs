//! Fuzz target for encryption-context binding
//!
//! Wraps a data key under one session identity and unwraps it under another.
//!
//! # Invariants
//!
//! - Unwrap succeeds if and only if every context entry matches exactly
//! - A successful unwrap yields the wrapped key
//! - Mismatches fail with an error, never with a different key

#![no_main]

use std::sync::Arc;

use arbitrary::Arbitrary;
use hostagent_crypto::{
    session_context, BlockCipher, CipherState, CryptoError, KeyDirection, KmsError, MemoryKms,
    DEFAULT_CONTEXT_NAMESPACE,
};
use libfuzzer_sys::fuzz_target;

const KEY_ID: &str = "alias/fuzz";

#[derive(Debug, Clone, Arbitrary)]
struct Identity {
    session_id: String,
    target_id: String,
    challenge: Option<String>,
}

#[derive(Debug, Clone, Arbitrary)]
struct BindingScenario {
    wrapped_for: Identity,
    unwrapped_as: Identity,
}

fuzz_target!(|scenario: BindingScenario| {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime");

    runtime.block_on(async {
        let kms = MemoryKms::new();
        kms.create_key(KEY_ID).expect("create key");

        let wrap = &scenario.wrapped_for;
        let context = session_context(
            DEFAULT_CONTEXT_NAMESPACE,
            &wrap.session_id,
            &wrap.target_id,
            wrap.challenge.as_deref(),
        );
        let blob = kms.generate_data_key(KEY_ID, &context, 32).expect("data key").ciphertext;

        let unwrap = &scenario.unwrapped_as;
        let mut cipher = BlockCipher::new(KEY_ID, Arc::new(kms)).expect("cipher");
        if let Some(challenge) = &unwrap.challenge {
            cipher = cipher.with_random_challenge(challenge.clone());
        }
        let result = cipher
            .update_encryption_key(
                KeyDirection::Decrypt,
                &blob,
                &unwrap.session_id,
                &unwrap.target_id,
                unwrap.challenge.is_some(),
            )
            .await;

        let same_identity = wrap.session_id == unwrap.session_id
            && wrap.target_id == unwrap.target_id
            && wrap.challenge == unwrap.challenge;

        if same_identity {
            // INVARIANT 1: matching context unwraps
            assert!(result.is_ok(), "matching context rejected: {result:?}");
            assert_eq!(cipher.state(), CipherState::DecryptReady);
        } else {
            // INVARIANT 2: any mismatch fails closed and installs nothing
            assert!(matches!(result, Err(CryptoError::Kms(KmsError::InvalidCiphertext))));
            assert_eq!(cipher.state(), CipherState::Uninitialized);
        }
    });
});
