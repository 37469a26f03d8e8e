//! Session channel errors

use hostagent_crypto::{CryptoError, KmsError};
use thiserror::Error;

/// Errors from establishing and using a session channel
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Error from the crypto core (unwrap, encrypt, decrypt)
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Error from the key-management service outside of an unwrap
    /// (data key generation in the loopback driver)
    #[error("key management: {0}")]
    Kms(#[from] KmsError),

    /// `seal` or `open` was called before both directions had keys
    #[error("session channel not established")]
    NotEstablished,

    /// The channel was closed after repeated authentication failures
    #[error("session terminated after {failures} consecutive authentication failures")]
    Terminated {
        /// Consecutive failures that triggered termination
        failures: u32,
    },

    /// Channel configuration is unusable
    #[error("invalid channel configuration: {0}")]
    InvalidConfig(String),

    /// A loopback round trip returned something other than what was sent
    #[error("loopback message {index} from {sender} did not round-trip")]
    LoopbackMismatch {
        /// Position of the message in the exchange
        index: usize,
        /// Which end sealed the message
        sender: &'static str,
    },
}

impl ChannelError {
    /// Returns true if the channel cannot be used after this error.
    ///
    /// A single rejected envelope is not fatal to the channel; the failure
    /// policy decides when authentication failures end the session.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Crypto(err) => !err.is_authentication_failure() && err.is_fatal(),
            Self::Kms(err) => !err.is_transient(),
            Self::NotEstablished => false,
            Self::Terminated { .. } | Self::InvalidConfig(_) | Self::LoopbackMismatch { .. } => true,
        }
    }
}
