//! Property-based tests for session envelopes
//!
//! Uses one mirrored agent/client cipher pair for all cases; key
//! establishment is async, so the pair is built once on a throwaway runtime.

use std::sync::{Arc, LazyLock};

use hostagent_crypto::{
    BlockCipher, CryptoError, DEFAULT_CONTEXT_NAMESPACE, ENVELOPE_OVERHEAD, KeyDirection,
    MemoryKms, NONCE_SIZE, NonceGenerator, session_context,
};
use proptest::prelude::*;

const KEY_ID: &str = "alias/session-manager";
const SESSION_ID: &str = "operator-proptest";
const TARGET_ID: &str = "i-00000000000000001";

static PAIR: LazyLock<(BlockCipher, BlockCipher)> = LazyLock::new(|| {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime");
    runtime.block_on(mirrored_pair())
});

async fn mirrored_pair() -> (BlockCipher, BlockCipher) {
    let kms = MemoryKms::new();
    kms.create_key(KEY_ID).unwrap();
    let context = session_context(DEFAULT_CONTEXT_NAMESPACE, SESSION_ID, TARGET_ID, None);
    let agent_to_client = kms.generate_data_key(KEY_ID, &context, 32).unwrap().ciphertext;
    let client_to_agent = kms.generate_data_key(KEY_ID, &context, 32).unwrap().ciphertext;

    let mut agent = BlockCipher::new(KEY_ID, Arc::new(kms.clone())).unwrap();
    let mut client = BlockCipher::new(KEY_ID, Arc::new(kms)).unwrap();
    for (cipher, encrypt, decrypt) in [
        (&mut agent, &agent_to_client, &client_to_agent),
        (&mut client, &client_to_agent, &agent_to_client),
    ] {
        cipher
            .update_encryption_key(KeyDirection::Encrypt, encrypt, SESSION_ID, TARGET_ID, false)
            .await
            .unwrap();
        cipher
            .update_encryption_key(KeyDirection::Decrypt, decrypt, SESSION_ID, TARGET_ID, false)
            .await
            .unwrap();
    }
    (agent, client)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: whatever the agent seals, the client opens unchanged
    #[test]
    fn prop_roundtrip(plaintext in prop::collection::vec(any::<u8>(), 0..2048)) {
        let (agent, client) = &*PAIR;

        let envelope = agent.encrypt_with_aes_gcm(&plaintext).unwrap();

        prop_assert_eq!(envelope.len(), plaintext.len() + ENVELOPE_OVERHEAD);
        prop_assert_eq!(client.decrypt_with_aes_gcm(&envelope).unwrap(), plaintext);
    }

    /// Property: any single bit flip anywhere in the envelope is rejected
    #[test]
    fn prop_tamper_detected(
        plaintext in prop::collection::vec(any::<u8>(), 0..256),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let (agent, client) = &*PAIR;
        let mut envelope = agent.encrypt_with_aes_gcm(&plaintext).unwrap();

        let index = position.index(envelope.len());
        envelope[index] ^= 1 << bit;

        prop_assert!(matches!(
            client.decrypt_with_aes_gcm(&envelope),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    /// Property: arbitrary bytes never decrypt and never panic
    #[test]
    fn prop_garbage_rejected(garbage in prop::collection::vec(any::<u8>(), 0..128)) {
        let (_agent, client) = &*PAIR;

        match client.decrypt_with_aes_gcm(&garbage) {
            Err(CryptoError::MalformedEnvelope { .. }) => prop_assert!(garbage.len() < ENVELOPE_OVERHEAD),
            Err(CryptoError::AuthenticationFailed) => prop_assert!(garbage.len() >= ENVELOPE_OVERHEAD),
            other => prop_assert!(false, "unexpected result: {:?}", other),
        }
    }

    /// Property: the counter emits consecutive values from any seed
    #[test]
    fn prop_nonce_counter_increments(w0 in any::<u32>(), w1 in any::<u32>(), w2 in any::<u32>()) {
        let generator = NonceGenerator::from_state([w0, w1, w2]);
        let seed = u128::from(w0) | (u128::from(w1) << 32) | (u128::from(w2) << 64);

        let first = generator.generate_nonce().unwrap();
        let second = generator.generate_nonce().unwrap();

        let as_u128 = |nonce: [u8; NONCE_SIZE]| {
            let mut wide = [0u8; 16];
            wide[..NONCE_SIZE].copy_from_slice(&nonce);
            u128::from_le_bytes(wide)
        };
        prop_assert_eq!(as_u128(first), seed);
        prop_assert_eq!(as_u128(second), (seed + 1) & ((1u128 << 96) - 1));
    }
}
