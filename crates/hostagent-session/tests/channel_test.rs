//! Session channel handshake and failure-policy tests

use std::sync::Arc;

use hostagent_crypto::{
    CryptoError, DEFAULT_CONTEXT_NAMESPACE, KmsError, MemoryKms, SessionRole, session_context,
};
use hostagent_session::{ChannelConfig, ChannelError, HandshakeKeys, SessionChannel};

const KEY_ID: &str = "alias/session-manager";
const SESSION_ID: &str = "operator-5d6e7f";
const TARGET_ID: &str = "i-0fedcba987654321";

struct Setup {
    kms: MemoryKms,
    agent_keys: HandshakeKeys,
    client_keys: HandshakeKeys,
}

fn setup() -> Setup {
    let kms = MemoryKms::new();
    kms.create_key(KEY_ID).unwrap();
    let context = session_context(DEFAULT_CONTEXT_NAMESPACE, SESSION_ID, TARGET_ID, None);
    let agent_to_client = kms.generate_data_key(KEY_ID, &context, 32).unwrap().ciphertext;
    let client_to_agent = kms.generate_data_key(KEY_ID, &context, 32).unwrap().ciphertext;

    Setup {
        kms,
        agent_keys: HandshakeKeys {
            encrypt_blob: agent_to_client.clone(),
            decrypt_blob: client_to_agent.clone(),
        },
        client_keys: HandshakeKeys { encrypt_blob: client_to_agent, decrypt_blob: agent_to_client },
    }
}

fn channel(kms: &MemoryKms, config: ChannelConfig) -> SessionChannel {
    SessionChannel::new(SESSION_ID, TARGET_ID, config, Arc::new(kms.clone())).unwrap()
}

async fn established_pair(max_auth_failures: u32) -> (SessionChannel, SessionChannel) {
    let setup = setup();
    let config = ChannelConfig { max_auth_failures, ..ChannelConfig::new(KEY_ID) };

    let mut agent = channel(&setup.kms, config.clone());
    let mut client = channel(&setup.kms, config);
    agent.establish(&setup.agent_keys).await.unwrap();
    client.establish(&setup.client_keys).await.unwrap();
    (agent, client)
}

fn tampered(mut envelope: Vec<u8>) -> Vec<u8> {
    let last = envelope.len() - 1;
    envelope[last] ^= 0x01;
    envelope
}

#[tokio::test]
async fn established_pair_exchanges_payloads() {
    let (agent, client) = established_pair(3).await;

    assert!(agent.is_established());
    assert!(client.is_established());

    let envelope = agent.seal(b"whoami").unwrap();
    assert_eq!(client.open(&envelope).unwrap(), b"whoami");
    let envelope = client.seal(b"").unwrap();
    assert_eq!(agent.open(&envelope).unwrap(), b"");
}

#[tokio::test]
async fn terminates_after_consecutive_failures() {
    let (agent, client) = established_pair(3).await;

    for expected in 1..3 {
        let result = client.open(&tampered(agent.seal(b"x").unwrap()));
        assert!(matches!(result, Err(ChannelError::Crypto(CryptoError::AuthenticationFailed))));
        assert_eq!(client.auth_failures(), expected);
        assert!(!client.is_terminated());
    }

    let result = client.open(&tampered(agent.seal(b"x").unwrap()));
    assert!(matches!(result, Err(ChannelError::Terminated { failures: 3 })));
    assert!(client.is_terminated());

    // Valid traffic is refused from now on, in both directions
    let valid = agent.seal(b"too late").unwrap();
    assert!(matches!(client.open(&valid), Err(ChannelError::Terminated { .. })));
    assert!(matches!(client.seal(b"reply"), Err(ChannelError::Terminated { .. })));
}

#[tokio::test]
async fn success_resets_failure_count() {
    let (agent, client) = established_pair(2).await;

    assert!(client.open(&tampered(agent.seal(b"a").unwrap())).is_err());
    assert_eq!(client.auth_failures(), 1);

    assert_eq!(client.open(&agent.seal(b"b").unwrap()).unwrap(), b"b");
    assert_eq!(client.auth_failures(), 0);

    assert!(client.open(&tampered(agent.seal(b"c").unwrap())).is_err());
    assert!(!client.is_terminated());
}

#[tokio::test]
async fn malformed_envelopes_do_not_count() {
    let (_agent, client) = established_pair(1).await;

    for _ in 0..5 {
        let result = client.open(&[0u8; 10]);
        assert!(matches!(result, Err(ChannelError::Crypto(CryptoError::MalformedEnvelope { .. }))));
    }

    assert_eq!(client.auth_failures(), 0);
    assert!(!client.is_terminated());
}

#[tokio::test]
async fn terminated_channel_refuses_rekey() {
    let setup = setup();
    let config = ChannelConfig { max_auth_failures: 1, ..ChannelConfig::new(KEY_ID) };
    let mut client = channel(&setup.kms, config);
    client.establish(&setup.client_keys).await.unwrap();

    let _ = client.open(&[0u8; 64]);
    assert!(client.is_terminated());

    let result = client.establish(&setup.client_keys).await;
    assert!(matches!(result, Err(ChannelError::Terminated { failures: 1 })));
}

#[tokio::test]
async fn failed_handshake_leaves_channel_unestablished() {
    let setup = setup();
    let mut channel = channel(&setup.kms, ChannelConfig::new(KEY_ID));

    let keys = HandshakeKeys {
        encrypt_blob: setup.agent_keys.encrypt_blob.clone(),
        decrypt_blob: vec![0u8; 60],
    };
    let result = channel.establish(&keys).await;

    assert!(matches!(result, Err(ChannelError::Crypto(CryptoError::Kms(KmsError::InvalidCiphertext)))));
    assert!(!channel.is_established());
    assert!(matches!(channel.seal(b"x"), Err(ChannelError::NotEstablished)));
}

#[tokio::test]
async fn failed_rekey_leaves_channel_unestablished() {
    let setup = setup();
    let mut agent = channel(&setup.kms, ChannelConfig::new(KEY_ID));
    let mut client = channel(&setup.kms, ChannelConfig::new(KEY_ID));
    agent.establish(&setup.agent_keys).await.unwrap();
    client.establish(&setup.client_keys).await.unwrap();

    let context = session_context(DEFAULT_CONTEXT_NAMESPACE, SESSION_ID, TARGET_ID, None);
    let fresh_encrypt = setup.kms.generate_data_key(KEY_ID, &context, 32).unwrap().ciphertext;
    let result = agent
        .establish(&HandshakeKeys { encrypt_blob: fresh_encrypt, decrypt_blob: vec![0u8; 60] })
        .await;

    assert!(matches!(result, Err(ChannelError::Crypto(CryptoError::Kms(KmsError::InvalidCiphertext)))));
    assert!(!agent.is_established());
    assert!(matches!(agent.seal(b"x"), Err(ChannelError::NotEstablished)));
    assert!(matches!(agent.open(&client.seal(b"y").unwrap()), Err(ChannelError::NotEstablished)));

    // A later good handshake brings the channel back
    agent.establish(&setup.agent_keys).await.unwrap();
    assert_eq!(client.open(&agent.seal(b"back").unwrap()).unwrap(), b"back");
}

#[tokio::test]
async fn failed_split_rekey_leaves_channel_unestablished() {
    let setup = setup();
    let context = session_context(DEFAULT_CONTEXT_NAMESPACE, SESSION_ID, TARGET_ID, None);
    let blob = setup.kms.generate_data_key(KEY_ID, &context, 64).unwrap().ciphertext;
    let mut agent = channel(&setup.kms, ChannelConfig::new(KEY_ID));
    agent.establish_split(SessionRole::Agent, &blob).await.unwrap();

    let result = agent.establish_split(SessionRole::Agent, &setup.agent_keys.encrypt_blob).await;

    assert!(matches!(result, Err(ChannelError::Crypto(CryptoError::InvalidKeyLength { expected: 64, actual: 32 }))));
    assert!(!agent.is_established());
    assert!(matches!(agent.seal(b"x"), Err(ChannelError::NotEstablished)));
}

#[tokio::test]
async fn session_identity_is_bound() {
    let setup = setup();
    let mut intruder =
        SessionChannel::new("operator-other", TARGET_ID, ChannelConfig::new(KEY_ID), Arc::new(setup.kms.clone()))
            .unwrap();

    let result = intruder.establish(&setup.client_keys).await;

    assert!(result.is_err());
    assert!(!intruder.is_established());
}

#[tokio::test]
async fn random_challenge_handshake() {
    let kms = MemoryKms::new();
    kms.create_key(KEY_ID).unwrap();
    let config = ChannelConfig { use_random_challenge: true, ..ChannelConfig::new(KEY_ID) };

    let mut agent = channel(&kms, config.clone());
    let challenge = agent.random_challenge().unwrap().to_string();
    let context = session_context(DEFAULT_CONTEXT_NAMESPACE, SESSION_ID, TARGET_ID, Some(&challenge));
    let agent_to_client = kms.generate_data_key(KEY_ID, &context, 32).unwrap().ciphertext;
    let client_to_agent = kms.generate_data_key(KEY_ID, &context, 32).unwrap().ciphertext;

    agent
        .establish(&HandshakeKeys {
            encrypt_blob: agent_to_client.clone(),
            decrypt_blob: client_to_agent.clone(),
        })
        .await
        .unwrap();

    let client_keys = HandshakeKeys { encrypt_blob: client_to_agent, decrypt_blob: agent_to_client };

    // Without the agent's challenge the client cannot unwrap
    let mut stranger = channel(&kms, config.clone());
    assert!(stranger.establish(&client_keys).await.is_err());

    let mut client = channel(&kms, config).with_random_challenge(challenge);
    client.establish(&client_keys).await.unwrap();

    let envelope = client.seal(b"confirmed").unwrap();
    assert_eq!(agent.open(&envelope).unwrap(), b"confirmed");
}

#[tokio::test]
async fn split_key_handshake() {
    let kms = MemoryKms::new();
    kms.create_key(KEY_ID).unwrap();
    let context = session_context(DEFAULT_CONTEXT_NAMESPACE, SESSION_ID, TARGET_ID, None);
    let blob = kms.generate_data_key(KEY_ID, &context, 64).unwrap().ciphertext;

    let mut agent = channel(&kms, ChannelConfig::new(KEY_ID));
    let mut client = channel(&kms, ChannelConfig::new(KEY_ID));
    agent.establish_split(SessionRole::Agent, &blob).await.unwrap();
    client.establish_split(SessionRole::Client, &blob).await.unwrap();

    assert_eq!(client.open(&agent.seal(b"down").unwrap()).unwrap(), b"down");
    assert_eq!(agent.open(&client.seal(b"up").unwrap()).unwrap(), b"up");
}

#[tokio::test]
async fn rekey_switches_both_ends_to_new_keys() {
    let setup = setup();
    let mut agent = channel(&setup.kms, ChannelConfig::new(KEY_ID));
    let mut client = channel(&setup.kms, ChannelConfig::new(KEY_ID));
    agent.establish(&setup.agent_keys).await.unwrap();
    client.establish(&setup.client_keys).await.unwrap();
    let stale = agent.seal(b"old key").unwrap();

    let context = session_context(DEFAULT_CONTEXT_NAMESPACE, SESSION_ID, TARGET_ID, None);
    let agent_to_client = setup.kms.generate_data_key(KEY_ID, &context, 32).unwrap().ciphertext;
    let client_to_agent = setup.kms.generate_data_key(KEY_ID, &context, 32).unwrap().ciphertext;
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

    assert_eq!(client.open(&agent.seal(b"new key").unwrap()).unwrap(), b"new key");
    assert!(matches!(client.open(&stale), Err(ChannelError::Crypto(CryptoError::AuthenticationFailed))));
}
