//! Key-management error types.

use thiserror::Error;

/// Errors returned by a [`KmsClient`](super::KmsClient).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KmsError {
    /// No master key exists under this identifier
    #[error("unknown key: {key_id}")]
    UnknownKey {
        /// Requested key identifier
        key_id: String,
    },

    /// The master key exists but has been disabled or revoked
    #[error("key disabled: {key_id}")]
    KeyDisabled {
        /// Disabled key identifier
        key_id: String,
    },

    /// Ciphertext blob is corrupt, was wrapped under another key, or the
    /// encryption context does not match the one used at wrap time.
    #[error("invalid ciphertext for the given key and encryption context")]
    InvalidCiphertext,

    /// Caller is not allowed to use the key
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Request parameters are unusable (e.g. zero-length data key)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Service unreachable or temporarily failing
    #[error("key management service unavailable: {0}")]
    Unavailable(String),

    /// Service-side fault (entropy failure, broken key store)
    #[error("key management internal error: {0}")]
    Internal(String),
}

impl KmsError {
    /// Returns true if a fresh handshake may succeed where this one failed.
    ///
    /// Context mismatches and revoked keys are protocol-level problems and
    /// are never transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
