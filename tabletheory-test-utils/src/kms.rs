//! A deterministic in-memory KMS fake: the data key for `key_id` is derived
//! from `key_id` itself, and the "wrapped" ciphertext blob is a reversible
//! transform of it, so generate/decrypt round-trip without any real KMS
//! call. Grounded on the same trait-seam testing style as `InMemoryStoreClient`.

use async_trait::async_trait;
use secrecy::SecretBox;
use sha2::{Digest, Sha256};
use tabletheory_core::EncryptionError;
use tabletheory_crypto::{GeneratedDataKey, KmsClient};

#[derive(Debug, Default)]
pub struct FakeKmsClient;

impl FakeKmsClient {
    pub fn new() -> Self {
        Self
    }

    fn derive(key_id: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(key_id.as_bytes());
        hasher.finalize().into()
    }
}

#[async_trait]
impl KmsClient for FakeKmsClient {
    async fn generate_data_key(&self, key_id: &str) -> Result<GeneratedDataKey, EncryptionError> {
        let plaintext = Self::derive(key_id);
        let mut wrapped = plaintext;
        wrapped.reverse();
        Ok(GeneratedDataKey {
            plaintext: SecretBox::new(Box::new(plaintext)),
            ciphertext_blob: wrapped.to_vec(),
        })
    }

    async fn decrypt(&self, _key_id: &str, ciphertext_blob: &[u8]) -> Result<SecretBox<[u8; 32]>, EncryptionError> {
        if ciphertext_blob.len() != 32 {
            return Err(EncryptionError::InvalidDataKey {
                key_id: _key_id.to_string(),
                reason: "ciphertext blob must be 32 bytes".to_string(),
            });
        }
        let mut plaintext = [0u8; 32];
        plaintext.copy_from_slice(ciphertext_blob);
        plaintext.reverse();
        Ok(SecretBox::new(Box::new(plaintext)))
    }
}
