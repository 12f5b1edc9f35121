//! The external KMS collaborator contract. Production code wires this to
//! `aws-sdk-kms`; tests wire it to an in-memory fake in
//! `tabletheory-test-utils`, kept trait-based so the core crate never needs
//! the real SDK to be exercised.

use async_trait::async_trait;
use secrecy::SecretBox;
use tabletheory_core::EncryptionError;

/// A freshly generated data key: the plaintext (kept secret, zeroized on
/// drop) and the KMS-wrapped ciphertext blob persisted alongside the
/// envelope.
pub struct GeneratedDataKey {
    pub plaintext: SecretBox<[u8; 32]>,
    pub ciphertext_blob: Vec<u8>,
}

#[async_trait]
pub trait KmsClient: Send + Sync {
    /// Request a fresh 256-bit data key under `key_id`.
    async fn generate_data_key(&self, key_id: &str) -> Result<GeneratedDataKey, EncryptionError>;

    /// Unwrap a previously wrapped data key under `key_id`.
    async fn decrypt(
        &self,
        key_id: &str,
        ciphertext_blob: &[u8],
    ) -> Result<SecretBox<[u8; 32]>, EncryptionError>;
}
