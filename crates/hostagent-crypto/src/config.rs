//! Block cipher configuration.

use std::time::Duration;

use crate::error::CryptoError;

/// Default namespace prefixed to every encryption-context key.
pub const DEFAULT_CONTEXT_NAMESPACE: &str = "aws:ssm";

/// Default bound on a single key unwrap round trip.
pub const DEFAULT_UNWRAP_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for a [`BlockCipher`](crate::BlockCipher).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherConfig {
    /// Identifier of the master key that wraps the session data keys
    pub kms_key_id: String,
    /// Upper bound on each unwrap call to the key-management service
    pub unwrap_timeout: Duration,
    /// Prefix of the encryption-context keys (`{namespace}:SessionId`, ...)
    pub context_namespace: String,
}

impl CipherConfig {
    /// Configuration for `kms_key_id` with default timeout and namespace.
    pub fn new(kms_key_id: impl Into<String>) -> Self {
        Self { kms_key_id: kms_key_id.into(), ..Self::default() }
    }

    /// Check the configuration can be used to establish keys.
    pub fn validate(&self) -> Result<(), CryptoError> {
        if self.kms_key_id.is_empty() {
            return Err(CryptoError::InvalidConfig("kms key id is empty".to_string()));
        }
        if self.context_namespace.is_empty() {
            return Err(CryptoError::InvalidConfig("context namespace is empty".to_string()));
        }
        if self.unwrap_timeout.is_zero() {
            return Err(CryptoError::InvalidConfig("unwrap timeout is zero".to_string()));
        }
        Ok(())
    }
}

impl Default for CipherConfig {
    fn default() -> Self {
        Self {
            kms_key_id: String::new(),
            unwrap_timeout: DEFAULT_UNWRAP_TIMEOUT,
            context_namespace: DEFAULT_CONTEXT_NAMESPACE.to_string(),
        }
    }
}
