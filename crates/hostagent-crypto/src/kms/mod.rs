//! Key-management service abstraction
//!
//! The session core never sees a master key. It hands an opaque ciphertext
//! blob plus an encryption context to a [`KmsClient`] and receives the raw
//! data key back. The service checks the context against the one bound at
//! wrap time and fails closed on any difference.
//!
//! The trait is async because the production client talks to a remote
//! service; callers bound each call with their own timeout.

mod chaotic;
mod error;
mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
pub use chaotic::ChaoticKms;
pub use error::KmsError;
pub use memory::{DataKey, MemoryKms};
use zeroize::Zeroizing;

/// Associated data bound into a key wrap/unwrap.
///
/// Ordered so every party serializes the same context identically.
pub type EncryptionContext = BTreeMap<String, String>;

/// Client for a key-management service that unwraps data keys.
///
/// Must be `Send + Sync`; a single client is shared by every session cipher
/// in the process.
#[async_trait]
pub trait KmsClient: Send + Sync {
    /// Decrypt a wrapped data key.
    ///
    /// # Invariants
    ///
    /// - Pre: `context` must equal the context used when the key was wrapped
    /// - Post: returned bytes are the plaintext data key, never partial
    async fn unwrap(
        &self,
        ciphertext: &[u8],
        context: &EncryptionContext,
        key_id: &str,
    ) -> Result<Zeroizing<Vec<u8>>, KmsError>;
}
