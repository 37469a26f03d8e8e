//! Fuzz target for envelope sealing and opening
//!
//! Runs adversarial operation sequences against one mirrored agent/client
//! cipher pair.
//!
//! # Strategy
//!
//! - Round trips of arbitrary plaintexts
//! - Bit flips at arbitrary positions of valid envelopes
//! - Truncation and extension of valid envelopes
//! - Raw attacker-chosen bytes
//!
//! # Invariants
//!
//! - Decryption never panics
//! - Valid envelopes open to the original plaintext
//! - Any modification is rejected; no plaintext is returned
//! - Inputs shorter than nonce plus tag are malformed, never authenticated

#![no_main]

use std::sync::{Arc, LazyLock};

use arbitrary::Arbitrary;
use hostagent_crypto::{
    session_context, BlockCipher, CryptoError, KeyDirection, MemoryKms, DEFAULT_CONTEXT_NAMESPACE,
    ENVELOPE_OVERHEAD,
};
use libfuzzer_sys::fuzz_target;

const KEY_ID: &str = "alias/fuzz";
const SESSION_ID: &str = "fuzz-session";
const TARGET_ID: &str = "i-fuzz";

static PAIR: LazyLock<(BlockCipher, BlockCipher)> = LazyLock::new(|| {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime");
    runtime.block_on(async {
        let kms = MemoryKms::new();
        kms.create_key(KEY_ID).expect("create key");
        let context = session_context(DEFAULT_CONTEXT_NAMESPACE, SESSION_ID, TARGET_ID, None);
        let forward = kms.generate_data_key(KEY_ID, &context, 32).expect("data key").ciphertext;
        let backward = kms.generate_data_key(KEY_ID, &context, 32).expect("data key").ciphertext;

        let mut agent = BlockCipher::new(KEY_ID, Arc::new(kms.clone())).expect("agent");
        let mut client = BlockCipher::new(KEY_ID, Arc::new(kms)).expect("client");
        for (cipher, encrypt, decrypt) in
            [(&mut agent, &forward, &backward), (&mut client, &backward, &forward)]
        {
            cipher
                .update_encryption_key(KeyDirection::Encrypt, encrypt, SESSION_ID, TARGET_ID, false)
                .await
                .expect("encrypt key");
            cipher
                .update_encryption_key(KeyDirection::Decrypt, decrypt, SESSION_ID, TARGET_ID, false)
                .await
                .expect("decrypt key");
        }
        (agent, client)
    })
});

#[derive(Debug, Clone, Arbitrary)]
enum EnvelopeOperation {
    Roundtrip { plaintext: Vec<u8> },
    FlipBit { plaintext: Vec<u8>, position: u16, bit: u8 },
    Truncate { plaintext: Vec<u8>, keep: u16 },
    Extend { plaintext: Vec<u8>, suffix: Vec<u8> },
    Raw { bytes: Vec<u8> },
}

fn assert_rejected(result: Result<Vec<u8>, CryptoError>, len: usize) {
    match result {
        Ok(_) => panic!("modified envelope of {len} bytes was accepted"),
        Err(CryptoError::MalformedEnvelope { .. }) => assert!(len < ENVELOPE_OVERHEAD),
        Err(CryptoError::AuthenticationFailed) => assert!(len >= ENVELOPE_OVERHEAD),
        Err(other) => panic!("unexpected error: {other}"),
    }
}

fuzz_target!(|operations: Vec<EnvelopeOperation>| {
    let (agent, client) = &*PAIR;

    for op in operations.into_iter().take(64) {
        match op {
            EnvelopeOperation::Roundtrip { plaintext } => {
                // INVARIANT 1: valid envelopes open to the original plaintext
                let envelope = agent.encrypt_with_aes_gcm(&plaintext).expect("encrypt");
                assert_eq!(envelope.len(), plaintext.len() + ENVELOPE_OVERHEAD);
                assert_eq!(client.decrypt_with_aes_gcm(&envelope).expect("decrypt"), plaintext);
            },

            EnvelopeOperation::FlipBit { plaintext, position, bit } => {
                // INVARIANT 2: any flipped bit is detected
                let mut envelope = agent.encrypt_with_aes_gcm(&plaintext).expect("encrypt");
                let index = usize::from(position) % envelope.len();
                envelope[index] ^= 1 << (bit % 8);
                assert_rejected(client.decrypt_with_aes_gcm(&envelope), envelope.len());
            },

            EnvelopeOperation::Truncate { plaintext, keep } => {
                // INVARIANT 3: dropping trailing bytes is detected
                let envelope = agent.encrypt_with_aes_gcm(&plaintext).expect("encrypt");
                let keep = usize::from(keep) % envelope.len();
                assert_rejected(client.decrypt_with_aes_gcm(&envelope[..keep]), keep);
            },

            EnvelopeOperation::Extend { plaintext, suffix } => {
                // INVARIANT 4: appended bytes are detected
                if suffix.is_empty() {
                    continue;
                }
                let mut envelope = agent.encrypt_with_aes_gcm(&plaintext).expect("encrypt");
                envelope.extend_from_slice(&suffix);
                assert_rejected(client.decrypt_with_aes_gcm(&envelope), envelope.len());
            },

            EnvelopeOperation::Raw { bytes } => {
                // INVARIANT 5: forged input never authenticates
                assert_rejected(client.decrypt_with_aes_gcm(&bytes), bytes.len());
            },
        }
    }
});
