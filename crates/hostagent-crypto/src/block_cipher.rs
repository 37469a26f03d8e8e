//! Session block cipher: KMS-unwrapped directional keys and AES-256-GCM
//! envelopes.
//!
//! # Key establishment
//!
//! ```text
//! wrapped key blob ──► KmsClient::unwrap(blob, context, kms_key_id)
//!                            │      context = { ns:SessionId, ns:TargetId,
//!                            │                  [ns:RandomChallenge] }
//!                            ▼
//!                     32-byte data key ──► slot (encrypt | decrypt)
//!                                          + fresh NonceGenerator
//! ```
//!
//! The key-management service checks the encryption context against the
//! context bound at wrap time. Peers that disagree on session id, target id
//! or random challenge fail the unwrap instead of deriving mismatched keys.
//!
//! # Envelope format
//!
//! ```text
//! [nonce: 12 bytes][ciphertext: N bytes][tag: 16 bytes]
//! ```
//!
//! The nonce comes from the sender's encrypt-direction counter. The receiver
//! decrypts with the nonce carried in the envelope.

use std::{
    fmt,
    sync::{Arc, OnceLock},
};

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use zeroize::{Zeroize, Zeroizing};

use crate::{
    config::CipherConfig,
    error::CryptoError,
    kms::{EncryptionContext, KmsClient},
    nonce::{NONCE_SIZE, NonceGenerator},
};

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// GCM authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Bytes an envelope adds on top of the plaintext.
pub const ENVELOPE_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// Encryption-context key suffix carrying the session id.
pub const SESSION_ID_CONTEXT_KEY: &str = "SessionId";

/// Encryption-context key suffix carrying the target id.
pub const TARGET_ID_CONTEXT_KEY: &str = "TargetId";

/// Encryption-context key suffix carrying the random challenge.
pub const RANDOM_CHALLENGE_CONTEXT_KEY: &str = "RandomChallenge";

/// Random bytes behind a generated challenge (hex-encoded on output).
const CHALLENGE_SIZE: usize = 32;

/// Which traffic direction a key protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyDirection {
    /// Outgoing envelopes
    Encrypt,
    /// Incoming envelopes
    Decrypt,
}

impl fmt::Display for KeyDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encrypt => f.write_str("encrypt"),
            Self::Decrypt => f.write_str("decrypt"),
        }
    }
}

/// Which end of a session this cipher sits on.
///
/// Only matters for split data keys, where both ends unwrap the same 64-byte
/// blob and must pick opposite halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// The host agent: decrypts with the first half, encrypts with the second
    Agent,
    /// The remote client: encrypts with the first half, decrypts with the
    /// second
    Client,
}

/// Readiness of a [`BlockCipher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherState {
    /// No key material yet
    Uninitialized,
    /// Only the encrypt direction has a key
    EncryptReady,
    /// Only the decrypt direction has a key
    DecryptReady,
    /// Both directions have keys
    FullyReady,
}

/// 32-byte AES key, zeroized on drop.
struct SessionKey {
    key: [u8; KEY_SIZE],
}

impl SessionKey {
    fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength { expected: KEY_SIZE, actual: bytes.len() });
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new((&self.key).into())
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Key plus the nonce stream that goes with it.
struct DirectionalKey {
    key: SessionKey,
    nonce: NonceGenerator,
}

impl DirectionalKey {
    fn new(key: SessionKey) -> Result<Self, CryptoError> {
        let nonce = NonceGenerator::new();
        nonce.initialize()?;
        Ok(Self { key, nonce })
    }
}

/// Build the encryption context that binds a data key to a session.
///
/// `challenge` adds the `RandomChallenge` entry when present.
pub fn session_context(
    namespace: &str,
    session_id: &str,
    target_id: &str,
    challenge: Option<&str>,
) -> EncryptionContext {
    let mut context = EncryptionContext::new();
    context.insert(format!("{namespace}:{SESSION_ID_CONTEXT_KEY}"), session_id.to_string());
    context.insert(format!("{namespace}:{TARGET_ID_CONTEXT_KEY}"), target_id.to_string());
    if let Some(challenge) = challenge {
        context.insert(format!("{namespace}:{RANDOM_CHALLENGE_CONTEXT_KEY}"), challenge.to_string());
    }
    context
}

/// Authenticated encryption for one session.
///
/// Holds one key and one nonce stream per direction. Key establishment takes
/// `&mut self`; encryption and decryption take `&self`, so the handshake
/// always completes before data flows and a fully established cipher can be
/// shared across threads.
///
/// # Security
///
/// - Keys come only from the key-management service, bound to session and
///   target identity
/// - Each direction has an independent counter nonce; re-keying a direction
///   replaces its nonce stream
/// - Key material is zeroized when replaced or dropped
/// - Encrypting or decrypting without a key fails; there is no zero-key path
pub struct BlockCipher {
    config: CipherConfig,
    kms: Arc<dyn KmsClient>,
    cipher_text_key: Vec<u8>,
    encryption: Option<DirectionalKey>,
    decryption: Option<DirectionalKey>,
    random_challenge: OnceLock<String>,
}

impl BlockCipher {
    /// Create a cipher that unwraps keys under `kms_key_id`.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig`: `kms_key_id` is empty
    pub fn new(kms_key_id: impl Into<String>, kms: Arc<dyn KmsClient>) -> Result<Self, CryptoError> {
        Self::with_config(CipherConfig::new(kms_key_id), kms)
    }

    /// Create a cipher from an explicit configuration.
    pub fn with_config(config: CipherConfig, kms: Arc<dyn KmsClient>) -> Result<Self, CryptoError> {
        config.validate()?;
        Ok(Self {
            config,
            kms,
            cipher_text_key: Vec::new(),
            encryption: None,
            decryption: None,
            random_challenge: OnceLock::new(),
        })
    }

    /// Use a challenge chosen by the peer instead of generating one.
    #[must_use]
    pub fn with_random_challenge(mut self, challenge: impl Into<String>) -> Self {
        self.random_challenge = OnceLock::from(challenge.into());
        self
    }

    /// Random challenge bound into the encryption context.
    ///
    /// Generated on first call (32 random bytes, lowercase hex) and stable
    /// afterwards.
    pub fn random_challenge(&self) -> Result<&str, CryptoError> {
        if let Some(challenge) = self.random_challenge.get() {
            return Ok(challenge.as_str());
        }

        let mut bytes = [0u8; CHALLENGE_SIZE];
        getrandom::fill(&mut bytes)?;
        let fresh = hex::encode(bytes);

        // A concurrent caller may have won the race; keep whichever landed.
        Ok(self.random_challenge.get_or_init(|| fresh).as_str())
    }

    /// Unwrap a data key and install it for `direction`.
    ///
    /// Calling this again for the same direction re-keys it: the old key is
    /// zeroized and a freshly seeded nonce generator replaces the old one.
    ///
    /// # Errors
    ///
    /// - `Kms`: the service rejected the unwrap (context mismatch, revoked
    ///   key, transport failure), passed through unchanged
    /// - `UnwrapTimeout`: the service did not answer in time
    /// - `InvalidKeyLength`: the unwrapped key is not 32 bytes
    /// - `RandomSource`: nonce or challenge generation failed
    ///
    /// On error the cipher is left exactly as it was.
    ///
    /// # Panics
    ///
    /// Panics if polled outside a Tokio runtime with the time driver
    /// enabled, since the unwrap is bounded by `tokio::time::timeout`.
    pub async fn update_encryption_key(
        &mut self,
        direction: KeyDirection,
        cipher_text_blob: &[u8],
        session_id: &str,
        target_id: &str,
        use_random_challenge: bool,
    ) -> Result<(), CryptoError> {
        tracing::debug!(
            session_id,
            target_id,
            %direction,
            use_random_challenge,
            kms_key_id = %self.config.kms_key_id,
            "unwrapping session key"
        );

        let context = self.encryption_context(session_id, target_id, use_random_challenge)?;
        let plaintext = self.unwrap_key(cipher_text_blob, &context).await?;
        let slot = DirectionalKey::new(SessionKey::from_slice(&plaintext)?)?;

        match direction {
            KeyDirection::Encrypt => self.encryption = Some(slot),
            KeyDirection::Decrypt => self.decryption = Some(slot),
        }
        self.cipher_text_key = cipher_text_blob.to_vec();

        tracing::debug!(session_id, %direction, state = ?self.state(), "session key installed");
        Ok(())
    }

    /// Unwrap both directional keys and install them together.
    ///
    /// Both blobs are unwrapped before either key is installed, so a failure
    /// on either direction leaves the cipher exactly as it was. On success
    /// `cipher_text_key` holds the decrypt-direction blob.
    ///
    /// # Panics
    ///
    /// Same runtime requirement as
    /// [`update_encryption_key()`](Self::update_encryption_key).
    pub async fn update_encryption_keys(
        &mut self,
        encrypt_blob: &[u8],
        decrypt_blob: &[u8],
        session_id: &str,
        target_id: &str,
        use_random_challenge: bool,
    ) -> Result<(), CryptoError> {
        tracing::debug!(session_id, target_id, use_random_challenge, "unwrapping session key pair");

        let context = self.encryption_context(session_id, target_id, use_random_challenge)?;
        let encrypt_key = self.unwrap_key(encrypt_blob, &context).await?;
        let decrypt_key = self.unwrap_key(decrypt_blob, &context).await?;

        let encryption = DirectionalKey::new(SessionKey::from_slice(&encrypt_key)?)?;
        let decryption = DirectionalKey::new(SessionKey::from_slice(&decrypt_key)?)?;

        self.encryption = Some(encryption);
        self.decryption = Some(decryption);
        self.cipher_text_key = decrypt_blob.to_vec();

        tracing::debug!(session_id, state = ?self.state(), "session key pair installed");
        Ok(())
    }

    /// Drop both directional keys, zeroizing them.
    ///
    /// The cipher returns to `Uninitialized`; the challenge and the last
    /// wrapped blob are kept.
    pub fn clear_keys(&mut self) {
        self.encryption = None;
        self.decryption = None;
    }

    /// Unwrap one 64-byte data key and install both directions from it.
    ///
    /// The agent decrypts with the first half and encrypts with the second;
    /// the client does the opposite, so the two ends interoperate.
    ///
    /// # Panics
    ///
    /// Same runtime requirement as
    /// [`update_encryption_key()`](Self::update_encryption_key).
    pub async fn update_session_keys(
        &mut self,
        role: SessionRole,
        cipher_text_blob: &[u8],
        session_id: &str,
        target_id: &str,
        use_random_challenge: bool,
    ) -> Result<(), CryptoError> {
        tracing::debug!(session_id, target_id, ?role, use_random_challenge, "unwrapping split data key");

        let context = self.encryption_context(session_id, target_id, use_random_challenge)?;
        let plaintext = self.unwrap_key(cipher_text_blob, &context).await?;
        if plaintext.len() != 2 * KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: 2 * KEY_SIZE,
                actual: plaintext.len(),
            });
        }

        let (first, second) = plaintext.split_at(KEY_SIZE);
        let (decrypt_half, encrypt_half) = match role {
            SessionRole::Agent => (first, second),
            SessionRole::Client => (second, first),
        };
        let decryption = DirectionalKey::new(SessionKey::from_slice(decrypt_half)?)?;
        let encryption = DirectionalKey::new(SessionKey::from_slice(encrypt_half)?)?;

        self.decryption = Some(decryption);
        self.encryption = Some(encryption);
        self.cipher_text_key = cipher_text_blob.to_vec();
        Ok(())
    }

    /// Encrypt `plaintext` into a `nonce || ciphertext || tag` envelope.
    ///
    /// # Errors
    ///
    /// - `KeyNotEstablished`: no encrypt-direction key yet
    /// - `EncryptionFailed`: plaintext exceeds the GCM length limit
    pub fn encrypt_with_aes_gcm(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let slot = self
            .encryption
            .as_ref()
            .ok_or(CryptoError::KeyNotEstablished { direction: KeyDirection::Encrypt })?;

        let nonce = slot.nonce.generate_nonce()?;
        let sealed = slot
            .key
            .cipher()
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut envelope = Vec::with_capacity(NONCE_SIZE + sealed.len());
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&sealed);
        Ok(envelope)
    }

    /// Decrypt an envelope produced by the peer's
    /// [`encrypt_with_aes_gcm()`](Self::encrypt_with_aes_gcm).
    ///
    /// # Errors
    ///
    /// - `KeyNotEstablished`: no decrypt-direction key yet
    /// - `MalformedEnvelope`: shorter than nonce plus tag
    /// - `AuthenticationFailed`: tag mismatch (tampering or wrong key)
    pub fn decrypt_with_aes_gcm(&self, envelope: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let slot = self
            .decryption
            .as_ref()
            .ok_or(CryptoError::KeyNotEstablished { direction: KeyDirection::Decrypt })?;

        if envelope.len() < ENVELOPE_OVERHEAD {
            return Err(CryptoError::MalformedEnvelope {
                len: envelope.len(),
                min: ENVELOPE_OVERHEAD,
            });
        }

        let (nonce, sealed) = envelope.split_at(NONCE_SIZE);
        slot.key
            .cipher()
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::AuthenticationFailed)
    }

    /// Last wrapped key blob successfully unwrapped.
    pub fn cipher_text_key(&self) -> &[u8] {
        &self.cipher_text_key
    }

    /// Master key identifier used for unwrapping.
    pub fn kms_key_id(&self) -> &str {
        &self.config.kms_key_id
    }

    /// Active configuration.
    pub fn config(&self) -> &CipherConfig {
        &self.config
    }

    /// Which directions have keys.
    pub fn state(&self) -> CipherState {
        match (self.encryption.is_some(), self.decryption.is_some()) {
            (false, false) => CipherState::Uninitialized,
            (true, false) => CipherState::EncryptReady,
            (false, true) => CipherState::DecryptReady,
            (true, true) => CipherState::FullyReady,
        }
    }

    /// Nonce generator for `direction`, if that direction has a key.
    ///
    /// Decryption never draws from its own generator; it exists so both
    /// directions have the same shape and can be inspected in tests.
    pub fn nonce_generator(&self, direction: KeyDirection) -> Option<&NonceGenerator> {
        let slot = match direction {
            KeyDirection::Encrypt => self.encryption.as_ref(),
            KeyDirection::Decrypt => self.decryption.as_ref(),
        };
        slot.map(|slot| &slot.nonce)
    }

    fn encryption_context(
        &self,
        session_id: &str,
        target_id: &str,
        use_random_challenge: bool,
    ) -> Result<EncryptionContext, CryptoError> {
        let challenge = if use_random_challenge { Some(self.random_challenge()?) } else { None };
        Ok(session_context(&self.config.context_namespace, session_id, target_id, challenge))
    }

    async fn unwrap_key(
        &self,
        blob: &[u8],
        context: &EncryptionContext,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let timeout = self.config.unwrap_timeout;
        let unwrap = self.kms.unwrap(blob, context, &self.config.kms_key_id);

        match tokio::time::timeout(timeout, unwrap).await {
            Ok(result) => result.map_err(|err| {
                tracing::debug!(error = %err, "key unwrap rejected");
                CryptoError::from(err)
            }),
            Err(_) => {
                tracing::debug!(?timeout, "key unwrap timed out");
                Err(CryptoError::UnwrapTimeout { timeout })
            },
        }
    }
}

impl fmt::Debug for BlockCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockCipher")
            .field("kms_key_id", &self.config.kms_key_id)
            .field("state", &self.state())
            .field("cipher_text_key_len", &self.cipher_text_key.len())
            .finish_non_exhaustive()
    }
}
