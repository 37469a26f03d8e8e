//! Fuzz target for the session channel failure policy
//!
//! Drives a channel with attacker-controlled traffic interleaved with valid
//! envelopes.
//!
//! # Invariants
//!
//! - `open` never panics
//! - The failure counter equals the current run of authentication failures
//! - The channel terminates exactly when that run reaches the limit
//! - A terminated channel accepts nothing

#![no_main]

use std::sync::Arc;

use arbitrary::Arbitrary;
use hostagent_crypto::{session_context, CryptoError, MemoryKms, DEFAULT_CONTEXT_NAMESPACE};
use hostagent_session::{ChannelConfig, ChannelError, HandshakeKeys, SessionChannel};
use libfuzzer_sys::fuzz_target;

const KEY_ID: &str = "alias/fuzz";
const SESSION_ID: &str = "fuzz-session";
const TARGET_ID: &str = "i-fuzz";

#[derive(Debug, Clone, Arbitrary)]
enum Incoming {
    Valid { payload: Vec<u8> },
    Forged { bytes: Vec<u8> },
}

#[derive(Debug, Clone, Arbitrary)]
struct PolicyScenario {
    max_auth_failures: u8,
    traffic: Vec<Incoming>,
}

fuzz_target!(|scenario: PolicyScenario| {
    let max_auth_failures = u32::from(scenario.max_auth_failures % 8) + 1;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime");

    let (agent, client) = runtime.block_on(async {
        let kms = MemoryKms::new();
        kms.create_key(KEY_ID).expect("create key");
        let context = session_context(DEFAULT_CONTEXT_NAMESPACE, SESSION_ID, TARGET_ID, None);
        let forward = kms.generate_data_key(KEY_ID, &context, 32).expect("data key").ciphertext;
        let backward = kms.generate_data_key(KEY_ID, &context, 32).expect("data key").ciphertext;
        let config = ChannelConfig { max_auth_failures, ..ChannelConfig::new(KEY_ID) };

        let mut agent = SessionChannel::new(SESSION_ID, TARGET_ID, config.clone(), Arc::new(kms.clone()))
            .expect("agent");
        let mut client =
            SessionChannel::new(SESSION_ID, TARGET_ID, config, Arc::new(kms)).expect("client");
        agent
            .establish(&HandshakeKeys { encrypt_blob: forward.clone(), decrypt_blob: backward.clone() })
            .await
            .expect("agent handshake");
        client
            .establish(&HandshakeKeys { encrypt_blob: backward, decrypt_blob: forward })
            .await
            .expect("client handshake");
        (agent, client)
    });

    let mut run = 0u32;
    let mut terminated = false;

    for incoming in scenario.traffic.into_iter().take(128) {
        let (envelope, payload) = match incoming {
            Incoming::Valid { payload } => (agent.seal(&payload).expect("seal"), Some(payload)),
            Incoming::Forged { bytes } => (bytes, None),
        };
        let result = client.open(&envelope);

        if terminated {
            // INVARIANT 1: nothing gets through after termination
            assert!(matches!(result, Err(ChannelError::Terminated { .. })));
            continue;
        }

        match (result, payload) {
            (Ok(plaintext), Some(payload)) => {
                assert_eq!(plaintext, payload);
                run = 0;
            },
            (Ok(_), None) => panic!("forged envelope accepted"),
            (Err(ChannelError::Crypto(CryptoError::MalformedEnvelope { .. })), None) => {},
            (Err(ChannelError::Crypto(CryptoError::AuthenticationFailed)), None) => {
                run += 1;
                assert!(run < max_auth_failures, "limit reached without termination");
            },
            (Err(ChannelError::Terminated { failures }), None) => {
                run += 1;
                // INVARIANT 2: termination happens exactly at the limit
                assert_eq!(failures, run);
                assert_eq!(run, max_auth_failures);
                terminated = true;
            },
            (Err(err), _) => panic!("unexpected error: {err}"),
        }

        // INVARIANT 3: counter tracks the current failure run
        assert_eq!(client.auth_failures(), run);
        assert_eq!(client.is_terminated(), terminated);
    }
});
