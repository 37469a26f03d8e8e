//! In-memory key-management service backed by AES-256-GCM master keys

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use async_trait::async_trait;
use zeroize::Zeroizing;

use super::{EncryptionContext, KmsClient, KmsError};

/// Master key size (AES-256).
const MASTER_KEY_SIZE: usize = 32;

/// Nonce prepended to each wrapped blob.
const BLOB_NONCE_SIZE: usize = 12;

/// GCM tag appended to each wrapped blob.
const BLOB_TAG_SIZE: usize = 16;

/// A freshly generated data key, in both plaintext and wrapped form.
pub struct DataKey {
    /// Raw key material for the local party
    pub plaintext: Zeroizing<Vec<u8>>,
    /// Wrapped blob to hand to the peer
    pub ciphertext: Vec<u8>,
}

/// In-memory key-management service for tests, fuzzing and loopback runs
///
/// Holds master keys in a shared map; clones refer to the same key store.
/// Wrapped blobs are `nonce || AES-256-GCM(master, data key)` with the
/// canonical encoding of the encryption context as associated data, so any
/// context difference at unwrap time fails authentication and surfaces as
/// [`KmsError::InvalidCiphertext`].
///
/// Uses `lock().expect()`, which panics if the mutex is poisoned. Acceptable
/// for test/simulation code.
#[derive(Clone, Default)]
pub struct MemoryKms {
    inner: Arc<Mutex<MemoryKmsInner>>,
}

#[derive(Default)]
struct MemoryKmsInner {
    keys: HashMap<String, MasterKey>,
    unwrap_count: usize,
}

struct MasterKey {
    material: Zeroizing<[u8; MASTER_KEY_SIZE]>,
    enabled: bool,
}

impl MemoryKms {
    /// Create an empty key store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a master key from OS randomness.
    ///
    /// Replaces any existing key with the same identifier.
    pub fn create_key(&self, key_id: impl Into<String>) -> Result<(), KmsError> {
        let mut material = Zeroizing::new([0u8; MASTER_KEY_SIZE]);
        getrandom::fill(&mut material[..])
            .map_err(|e| KmsError::Internal(format!("entropy failure: {e}")))?;
        self.lock().keys.insert(key_id.into(), MasterKey { material, enabled: true });
        Ok(())
    }

    /// Install a master key with known material.
    pub fn insert_key(&self, key_id: impl Into<String>, material: [u8; MASTER_KEY_SIZE]) {
        self.lock()
            .keys
            .insert(key_id.into(), MasterKey { material: Zeroizing::new(material), enabled: true });
    }

    /// Disable a master key; later wraps and unwraps under it fail.
    pub fn disable_key(&self, key_id: &str) -> Result<(), KmsError> {
        let mut inner = self.lock();
        let key = inner
            .keys
            .get_mut(key_id)
            .ok_or_else(|| KmsError::UnknownKey { key_id: key_id.to_string() })?;
        key.enabled = false;
        Ok(())
    }

    /// Wrap `plaintext` under `key_id`, binding `context`.
    pub fn wrap(
        &self,
        key_id: &str,
        plaintext: &[u8],
        context: &EncryptionContext,
    ) -> Result<Vec<u8>, KmsError> {
        let mut nonce = [0u8; BLOB_NONCE_SIZE];
        getrandom::fill(&mut nonce)
            .map_err(|e| KmsError::Internal(format!("entropy failure: {e}")))?;

        let aad = encode_context(context)?;
        let inner = self.lock();
        let cipher = inner.cipher_for(key_id)?;

        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad: &aad })
            .map_err(|_| KmsError::Internal("wrap encryption failed".to_string()))?;

        let mut blob = Vec::with_capacity(BLOB_NONCE_SIZE + sealed.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&sealed);
        Ok(blob)
    }

    /// Generate a random data key of `len` bytes and wrap it under `key_id`.
    pub fn generate_data_key(
        &self,
        key_id: &str,
        context: &EncryptionContext,
        len: usize,
    ) -> Result<DataKey, KmsError> {
        if len == 0 {
            return Err(KmsError::InvalidRequest("data key length must be non-zero".to_string()));
        }

        let mut plaintext = Zeroizing::new(vec![0u8; len]);
        getrandom::fill(plaintext.as_mut_slice())
            .map_err(|e| KmsError::Internal(format!("entropy failure: {e}")))?;
        let ciphertext = self.wrap(key_id, &plaintext, context)?;

        Ok(DataKey { plaintext, ciphertext })
    }

    /// Number of unwrap requests served, successful or not.
    pub fn unwrap_count(&self) -> usize {
        self.lock().unwrap_count
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, MemoryKmsInner> {
        self.inner.lock().expect("MemoryKms mutex poisoned")
    }
}

impl MemoryKmsInner {
    fn cipher_for(&self, key_id: &str) -> Result<Aes256Gcm, KmsError> {
        let key = self
            .keys
            .get(key_id)
            .ok_or_else(|| KmsError::UnknownKey { key_id: key_id.to_string() })?;
        if !key.enabled {
            return Err(KmsError::KeyDisabled { key_id: key_id.to_string() });
        }
        let material: &[u8; MASTER_KEY_SIZE] = &key.material;
        Ok(Aes256Gcm::new(material.into()))
    }
}

#[async_trait]
impl KmsClient for MemoryKms {
    async fn unwrap(
        &self,
        ciphertext: &[u8],
        context: &EncryptionContext,
        key_id: &str,
    ) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        let mut inner = self.lock();
        inner.unwrap_count += 1;
        let cipher = inner.cipher_for(key_id)?;
        drop(inner);

        if ciphertext.len() < BLOB_NONCE_SIZE + BLOB_TAG_SIZE {
            return Err(KmsError::InvalidCiphertext);
        }
        let (nonce, sealed) = ciphertext.split_at(BLOB_NONCE_SIZE);
        let aad = encode_context(context)?;

        cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: sealed, aad: &aad })
            .map(Zeroizing::new)
            .map_err(|_| KmsError::InvalidCiphertext)
    }
}

/// Canonical, unambiguous encoding of an encryption context.
///
/// Entries in key order, each as `len(key) || key || len(value) || value`
/// with 32-bit big-endian lengths.
fn encode_context(context: &EncryptionContext) -> Result<Vec<u8>, KmsError> {
    let mut out = Vec::new();
    for (key, value) in context {
        for part in [key, value] {
            out.extend_from_slice(&length_prefix(part.len())?);
            out.extend_from_slice(part.as_bytes());
        }
    }
    Ok(out)
}

/// 32-bit big-endian length; entries that do not fit are rejected.
fn length_prefix(len: usize) -> Result<[u8; 4], KmsError> {
    u32::try_from(len).map(u32::to_be_bytes).map_err(|_| {
        KmsError::InvalidRequest(format!("encryption context entry of {len} bytes is too long"))
    })
}
