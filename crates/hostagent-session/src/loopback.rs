//! In-process agent/client session over the in-memory key service.
//!
//! Plays both ends of a session: generates the two directional data keys the
//! way session setup would, establishes a mirrored channel pair and pushes
//! random payloads through it in both directions.

use std::sync::Arc;

use hostagent_crypto::{CryptoError, KEY_SIZE, MemoryKms, session_context};

use crate::{
    channel::{ChannelConfig, HandshakeKeys, SessionChannel},
    error::ChannelError,
};

/// Parameters for [`run_loopback`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackConfig {
    /// Session identifier bound into the key context
    pub session_id: String,
    /// Target identifier bound into the key context
    pub target_id: String,
    /// Master key created in the in-memory key service
    pub kms_key_id: String,
    /// Messages sent in each direction
    pub messages: usize,
    /// Size of each random payload in bytes
    pub payload_size: usize,
    /// Bind a random challenge into both unwraps
    pub use_random_challenge: bool,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            session_id: "loopback-session".to_string(),
            target_id: "i-loopback".to_string(),
            kms_key_id: "alias/loopback".to_string(),
            messages: 16,
            payload_size: 1024,
            use_random_challenge: false,
        }
    }
}

/// Outcome of a successful loopback run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackReport {
    /// Messages verified, both directions combined
    pub messages_verified: usize,
    /// Plaintext bytes sealed
    pub plaintext_bytes: usize,
    /// Envelope bytes produced
    pub envelope_bytes: usize,
    /// Unwrap calls served by the key service
    pub kms_unwraps: usize,
    /// Challenge bound into the key context, if any
    pub random_challenge: Option<String>,
}

/// Establish a mirrored session pair and verify traffic in both directions.
pub async fn run_loopback(config: &LoopbackConfig) -> Result<LoopbackReport, ChannelError> {
    let kms = MemoryKms::new();
    kms.create_key(config.kms_key_id.as_str())?;

    let channel_config = ChannelConfig {
        use_random_challenge: config.use_random_challenge,
        ..ChannelConfig::new(config.kms_key_id.as_str())
    };

    let mut agent = SessionChannel::new(
        config.session_id.as_str(),
        config.target_id.as_str(),
        channel_config.clone(),
        Arc::new(kms.clone()),
    )?;
    let random_challenge = if config.use_random_challenge {
        Some(agent.random_challenge()?.to_string())
    } else {
        None
    };

    let context = session_context(
        &channel_config.cipher.context_namespace,
        &config.session_id,
        &config.target_id,
        random_challenge.as_deref(),
    );
    let agent_to_client = kms.generate_data_key(&config.kms_key_id, &context, KEY_SIZE)?;
    let client_to_agent = kms.generate_data_key(&config.kms_key_id, &context, KEY_SIZE)?;
    tracing::debug!(session_id = %config.session_id, "generated directional data keys");

    agent
        .establish(&HandshakeKeys {
            encrypt_blob: agent_to_client.ciphertext.clone(),
            decrypt_blob: client_to_agent.ciphertext.clone(),
        })
        .await?;

    let mut client = SessionChannel::new(
        config.session_id.as_str(),
        config.target_id.as_str(),
        channel_config,
        Arc::new(kms.clone()),
    )?;
    if let Some(challenge) = &random_challenge {
        client = client.with_random_challenge(challenge.clone());
    }
    client
        .establish(&HandshakeKeys {
            encrypt_blob: client_to_agent.ciphertext,
            decrypt_blob: agent_to_client.ciphertext,
        })
        .await?;

    let mut report = LoopbackReport {
        messages_verified: 0,
        plaintext_bytes: 0,
        envelope_bytes: 0,
        kms_unwraps: 0,
        random_challenge,
    };

    for index in 0..config.messages {
        for (sender, from, to) in [("agent", &agent, &client), ("client", &client, &agent)] {
            let payload = random_payload(config.payload_size)?;
            let envelope = from.seal(&payload)?;

            if to.open(&envelope)? != payload {
                return Err(ChannelError::LoopbackMismatch { index, sender });
            }

            report.messages_verified += 1;
            report.plaintext_bytes += payload.len();
            report.envelope_bytes += envelope.len();
        }
    }

    report.kms_unwraps = kms.unwrap_count();
    tracing::info!(
        session_id = %config.session_id,
        messages = report.messages_verified,
        envelope_bytes = report.envelope_bytes,
        "loopback exchange verified"
    );
    Ok(report)
}

fn random_payload(len: usize) -> Result<Vec<u8>, ChannelError> {
    let mut payload = vec![0u8; len];
    getrandom::fill(&mut payload).map_err(CryptoError::from)?;
    Ok(payload)
}
