//! One encrypted session between the host agent and a remote client.
//!
//! A [`SessionChannel`] owns the session's [`BlockCipher`], runs the key
//! handshake for it, and applies the failure policy on incoming traffic:
//!
//! ```text
//! open(envelope)
//!   ├─ ok                    → failures = 0, plaintext
//!   ├─ malformed             → rejected, counter unchanged
//!   └─ authentication failed → failures += 1
//!                               └─ failures == max_auth_failures → terminated
//! ```
//!
//! A terminated channel refuses every further call. Seal and open take
//! `&self`, so an established channel can be shared between the reader and
//! writer halves of a transport.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use hostagent_crypto::{BlockCipher, CipherConfig, CipherState, KmsClient, SessionRole};

use crate::error::ChannelError;

/// Default number of consecutive authentication failures before termination.
pub const DEFAULT_MAX_AUTH_FAILURES: u32 = 3;

/// Configuration for a [`SessionChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Consecutive authentication failures after which the channel closes
    pub max_auth_failures: u32,
    /// Bind the random challenge into the key-unwrap context
    pub use_random_challenge: bool,
    /// Cipher configuration
    pub cipher: CipherConfig,
}

impl ChannelConfig {
    /// Configuration for `kms_key_id` with defaults everywhere else.
    pub fn new(kms_key_id: impl Into<String>) -> Self {
        Self { cipher: CipherConfig::new(kms_key_id), ..Self::default() }
    }

    /// Check the configuration can be used to open a channel.
    pub fn validate(&self) -> Result<(), ChannelError> {
        if self.max_auth_failures == 0 {
            return Err(ChannelError::InvalidConfig("max_auth_failures must be at least 1".to_string()));
        }
        self.cipher.validate()?;
        Ok(())
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_auth_failures: DEFAULT_MAX_AUTH_FAILURES,
            use_random_challenge: false,
            cipher: CipherConfig::default(),
        }
    }
}

/// Wrapped data keys received during session setup, one per direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeKeys {
    /// Blob for the key this end encrypts with
    pub encrypt_blob: Vec<u8>,
    /// Blob for the key this end decrypts with
    pub decrypt_blob: Vec<u8>,
}

/// Encrypted session channel with an authentication-failure policy.
#[derive(Debug)]
pub struct SessionChannel {
    session_id: String,
    target_id: String,
    config: ChannelConfig,
    cipher: BlockCipher,
    auth_failures: AtomicU32,
    terminated: AtomicBool,
}

impl SessionChannel {
    /// Create an unestablished channel for one session.
    pub fn new(
        session_id: impl Into<String>,
        target_id: impl Into<String>,
        config: ChannelConfig,
        kms: Arc<dyn KmsClient>,
    ) -> Result<Self, ChannelError> {
        config.validate()?;
        let cipher = BlockCipher::with_config(config.cipher.clone(), kms)?;

        Ok(Self {
            session_id: session_id.into(),
            target_id: target_id.into(),
            config,
            cipher,
            auth_failures: AtomicU32::new(0),
            terminated: AtomicBool::new(false),
        })
    }

    /// Bind the peer's random challenge instead of generating one.
    #[must_use]
    pub fn with_random_challenge(mut self, challenge: impl Into<String>) -> Self {
        self.cipher = self.cipher.with_random_challenge(challenge);
        self
    }

    /// Unwrap both directional keys.
    ///
    /// Calling this on an established channel re-keys both directions. Both
    /// blobs are unwrapped before either key is installed. If the handshake
    /// fails the channel drops its keys and reports itself unestablished
    /// until a later handshake succeeds.
    pub async fn establish(&mut self, keys: &HandshakeKeys) -> Result<(), ChannelError> {
        self.ensure_open()?;

        let result = self
            .cipher
            .update_encryption_keys(
                &keys.encrypt_blob,
                &keys.decrypt_blob,
                &self.session_id,
                &self.target_id,
                self.config.use_random_challenge,
            )
            .await;
        if let Err(err) = result {
            tracing::warn!(
                session_id = %self.session_id,
                target_id = %self.target_id,
                error = %err,
                "session key handshake failed"
            );
            self.cipher.clear_keys();
            return Err(err.into());
        }

        self.auth_failures.store(0, Ordering::Release);
        tracing::info!(session_id = %self.session_id, target_id = %self.target_id, "session channel established");
        Ok(())
    }

    /// Unwrap one 64-byte data key and split it between the directions.
    ///
    /// A failed handshake leaves the channel unestablished, as with
    /// [`establish()`](Self::establish).
    pub async fn establish_split(&mut self, role: SessionRole, blob: &[u8]) -> Result<(), ChannelError> {
        self.ensure_open()?;

        let result = self
            .cipher
            .update_session_keys(
                role,
                blob,
                &self.session_id,
                &self.target_id,
                self.config.use_random_challenge,
            )
            .await;
        if let Err(err) = result {
            tracing::warn!(session_id = %self.session_id, ?role, error = %err, "split key handshake failed");
            self.cipher.clear_keys();
            return Err(err.into());
        }

        self.auth_failures.store(0, Ordering::Release);
        tracing::info!(session_id = %self.session_id, ?role, "session channel established from split key");
        Ok(())
    }

    /// Encrypt an outgoing payload.
    pub fn seal(&self, payload: &[u8]) -> Result<Vec<u8>, ChannelError> {
        self.ensure_ready()?;
        Ok(self.cipher.encrypt_with_aes_gcm(payload)?)
    }

    /// Decrypt an incoming envelope, applying the failure policy.
    ///
    /// # Errors
    ///
    /// - `Crypto(AuthenticationFailed)`: envelope rejected, channel still open
    /// - `Terminated`: this failure reached `max_auth_failures`, or the
    ///   channel was already terminated
    /// - `Crypto(MalformedEnvelope)`: too short, not counted as a failure
    pub fn open(&self, envelope: &[u8]) -> Result<Vec<u8>, ChannelError> {
        self.ensure_ready()?;

        match self.cipher.decrypt_with_aes_gcm(envelope) {
            Ok(plaintext) => {
                self.auth_failures.store(0, Ordering::Release);
                Ok(plaintext)
            },
            Err(err) if err.is_authentication_failure() => {
                let failures = self.auth_failures.fetch_add(1, Ordering::AcqRel) + 1;
                tracing::warn!(
                    session_id = %self.session_id,
                    failures,
                    max_auth_failures = self.config.max_auth_failures,
                    "envelope failed authentication"
                );

                if failures >= self.config.max_auth_failures {
                    self.terminated.store(true, Ordering::Release);
                    tracing::warn!(session_id = %self.session_id, failures, "terminating session");
                    return Err(ChannelError::Terminated { failures });
                }
                Err(err.into())
            },
            Err(err) => Err(err.into()),
        }
    }

    /// Random challenge bound into the unwrap context.
    pub fn random_challenge(&self) -> Result<&str, ChannelError> {
        Ok(self.cipher.random_challenge()?)
    }

    /// True once both directions have keys.
    pub fn is_established(&self) -> bool {
        self.cipher.state() == CipherState::FullyReady
    }

    /// True after the failure policy closed the channel.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Current run of consecutive authentication failures.
    pub fn auth_failures(&self) -> u32 {
        self.auth_failures.load(Ordering::Acquire)
    }

    /// Session identifier.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Target (host) identifier.
    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    /// Channel configuration.
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Underlying cipher.
    pub fn cipher(&self) -> &BlockCipher {
        &self.cipher
    }

    fn ensure_open(&self) -> Result<(), ChannelError> {
        if self.is_terminated() {
            return Err(ChannelError::Terminated { failures: self.auth_failures() });
        }
        Ok(())
    }

    fn ensure_ready(&self) -> Result<(), ChannelError> {
        self.ensure_open()?;
        if !self.is_established() {
            return Err(ChannelError::NotEstablished);
        }
        Ok(())
    }
}
