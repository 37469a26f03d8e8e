//! Error types for the session crypto core

use std::time::Duration;

use thiserror::Error;

use crate::{block_cipher::KeyDirection, kms::KmsError};

/// Errors from nonce generation, key establishment and envelope operations
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The OS random source could not produce entropy
    #[error("random source failure: {reason}")]
    RandomSource {
        /// Error reported by the entropy source
        reason: String,
    },

    /// `generate_nonce` was called before `initialize`
    #[error("nonce generator not initialized")]
    NonceNotInitialized,

    /// `initialize` was called on a generator that is already seeded
    #[error("nonce generator already initialized")]
    NonceAlreadyInitialized,

    /// The key-management service rejected the unwrap request
    #[error(transparent)]
    Kms(#[from] KmsError),

    /// The key-management service did not answer within the configured timeout
    #[error("key unwrap timed out after {timeout:?}")]
    UnwrapTimeout {
        /// Timeout that was exceeded
        timeout: Duration,
    },

    /// Unwrapped key material has the wrong size
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length
        expected: usize,
        /// Actual key length
        actual: usize,
    },

    /// Encrypt or decrypt was called before that direction's key was set
    #[error("{direction} key not established")]
    KeyNotEstablished {
        /// Direction without key material
        direction: KeyDirection,
    },

    /// Envelope is too short to hold a nonce and an authentication tag
    #[error("malformed envelope: {len} bytes, need at least {min}")]
    MalformedEnvelope {
        /// Length of the received envelope
        len: usize,
        /// Minimum envelope length
        min: usize,
    },

    /// Authentication tag did not verify (tampering or key mismatch)
    #[error("authentication failed: envelope rejected")]
    AuthenticationFailed,

    /// The AEAD refused to encrypt (plaintext too large for GCM)
    #[error("encryption failed")]
    EncryptionFailed,

    /// Cipher configuration is unusable
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CryptoError {
    /// Returns true if the session cannot continue after this error.
    ///
    /// Transient errors may succeed if the caller retries the whole handshake
    /// with fresh parameters. Nothing is retried inside the core.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Kms(err) => !err.is_transient(),
            Self::UnwrapTimeout { .. } => false,

            Self::RandomSource { .. }
            | Self::NonceNotInitialized
            | Self::NonceAlreadyInitialized
            | Self::InvalidKeyLength { .. }
            | Self::KeyNotEstablished { .. }
            | Self::MalformedEnvelope { .. }
            | Self::AuthenticationFailed
            | Self::EncryptionFailed
            | Self::InvalidConfig(_) => true,
        }
    }

    /// Returns true if this error reports a failed integrity check.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailed)
    }
}

impl From<getrandom::Error> for CryptoError {
    fn from(err: getrandom::Error) -> Self {
        Self::RandomSource { reason: err.to_string() }
    }
}
