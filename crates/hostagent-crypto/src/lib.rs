//! Host agent session cryptography
//!
//! Authenticated encryption for interactive sessions between the host agent
//! and a remote client. Session data keys never exist in plaintext outside
//! the two endpoints: they travel wrapped by a key-management service and are
//! unwrapped here against an encryption context that names the session.
//!
//! # Key Lifecycle
//!
//! ```text
//! KMS master key (never leaves the service)
//!        │
//!        ▼ wrap(data key, {SessionId, TargetId, [RandomChallenge]})
//! Ciphertext key blob ──(handshake)──► BlockCipher
//!        │
//!        ▼ KmsClient::unwrap
//! Directional data keys (encrypt, decrypt)
//!        │
//!        ▼ AES-256-GCM with counter nonces
//! Envelopes: nonce || ciphertext || tag
//! ```
//!
//! # Security
//!
//! Identity binding:
//! - Data keys unwrap only under the exact session/target context
//! - The optional random challenge lets both ends confirm they unwrapped
//!   under the same context
//!
//! Nonce uniqueness:
//! - One randomly seeded 96-bit counter per direction
//! - Read-then-increment under a mutex; concurrent senders never collide
//! - Re-keying a direction installs a fresh counter
//!
//! Authenticity:
//! - Any modified envelope fails with `AuthenticationFailed`
//! - No plaintext is ever returned for an envelope that fails the tag check
//!
//! Hygiene:
//! - Key material is zeroized when replaced or dropped
//! - Nothing in this crate logs key material or plaintext

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod block_cipher;
pub mod config;
pub mod error;
pub mod kms;
pub mod nonce;

pub use block_cipher::{
    BlockCipher, CipherState, ENVELOPE_OVERHEAD, KEY_SIZE, KeyDirection, SessionRole, TAG_SIZE,
    session_context,
};
pub use config::{CipherConfig, DEFAULT_CONTEXT_NAMESPACE, DEFAULT_UNWRAP_TIMEOUT};
pub use error::CryptoError;
pub use kms::{ChaoticKms, DataKey, EncryptionContext, KmsClient, KmsError, MemoryKms};
pub use nonce::{NONCE_SIZE, NonceGenerator, NonceState};
