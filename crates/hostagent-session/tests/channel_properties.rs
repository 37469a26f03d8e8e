//! Property-based tests for the channel failure policy
//!
//! Feeds a channel an arbitrary mix of valid, tampered and truncated
//! envelopes and checks it against a simple model of the policy.

use std::sync::Arc;

use hostagent_crypto::{DEFAULT_CONTEXT_NAMESPACE, MemoryKms, session_context};
use hostagent_session::{ChannelConfig, ChannelError, HandshakeKeys, SessionChannel};
use proptest::prelude::*;

const KEY_ID: &str = "alias/session-manager";
const SESSION_ID: &str = "operator-proptest";
const TARGET_ID: &str = "i-00000000000000002";

#[derive(Debug, Clone, Copy)]
enum Incoming {
    Valid,
    Tampered,
    Truncated,
}

fn incoming() -> impl Strategy<Value = Incoming> {
    prop_oneof![Just(Incoming::Valid), Just(Incoming::Tampered), Just(Incoming::Truncated)]
}

fn established_pair(max_auth_failures: u32) -> (SessionChannel, SessionChannel) {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
    runtime.block_on(async {
        let kms = MemoryKms::new();
        kms.create_key(KEY_ID).unwrap();
        let context = session_context(DEFAULT_CONTEXT_NAMESPACE, SESSION_ID, TARGET_ID, None);
        let agent_to_client = kms.generate_data_key(KEY_ID, &context, 32).unwrap().ciphertext;
        let client_to_agent = kms.generate_data_key(KEY_ID, &context, 32).unwrap().ciphertext;
        let config = ChannelConfig { max_auth_failures, ..ChannelConfig::new(KEY_ID) };

        let mut agent =
            SessionChannel::new(SESSION_ID, TARGET_ID, config.clone(), Arc::new(kms.clone())).unwrap();
        let mut client = SessionChannel::new(SESSION_ID, TARGET_ID, config, Arc::new(kms)).unwrap();
        agent
            .establish(&HandshakeKeys {
                encrypt_blob: agent_to_client.clone(),
                decrypt_blob: client_to_agent.clone(),
            })
            .await
            .unwrap();
        client
            .establish(&HandshakeKeys { encrypt_blob: client_to_agent, decrypt_blob: agent_to_client })
            .await
            .unwrap();
        (agent, client)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: the channel terminates exactly when a run of consecutive
    /// authentication failures reaches the limit, and never before
    #[test]
    fn prop_failure_policy_matches_model(
        max_auth_failures in 1u32..5,
        traffic in prop::collection::vec(incoming(), 1..40),
    ) {
        let (agent, client) = established_pair(max_auth_failures);
        let mut run = 0u32;
        let mut terminated = false;

        for item in traffic {
            let envelope = agent.seal(b"payload").unwrap();
            let envelope = match item {
                Incoming::Valid => envelope,
                Incoming::Tampered => {
                    let mut tampered = envelope;
                    tampered[0] ^= 0x80;
                    tampered
                },
                Incoming::Truncated => envelope[..10].to_vec(),
            };

            let result = client.open(&envelope);

            if terminated {
                prop_assert!(matches!(result, Err(ChannelError::Terminated { .. })), "terminated channel accepted traffic");
                continue;
            }
            match item {
                Incoming::Valid => {
                    prop_assert_eq!(result.unwrap(), b"payload".to_vec());
                    run = 0;
                },
                Incoming::Tampered => {
                    run += 1;
                    if run >= max_auth_failures {
                        terminated = true;
                        prop_assert!(
                            matches!(result, Err(ChannelError::Terminated { failures }) if failures == run),
                            "expected termination after {} failures",
                            run
                        );
                    } else {
                        prop_assert!(result.is_err());
                    }
                },
                Incoming::Truncated => prop_assert!(result.is_err()),
            }

            prop_assert_eq!(client.is_terminated(), terminated);
            prop_assert_eq!(client.auth_failures(), run);
        }
    }
}
