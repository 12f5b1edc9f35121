//! AES-256-GCM envelope encryption over a pluggable `KmsClient`.

use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use secrecy::ExposeSecret;
use tabletheory_core::{aad_for_attribute, AttributeValue, EncryptedEnvelope, EncryptionError};

use crate::kms::KmsClient;

/// Encrypts and decrypts individual attribute values via envelope
/// encryption: one fresh data key per call, wrapped by KMS, AES-256-GCM
/// sealed with the attribute name bound in as AAD.
pub struct EncryptionService {
    kms: Arc<dyn KmsClient>,
    key_id: String,
}

impl EncryptionService {
    pub fn new(kms: Arc<dyn KmsClient>, key_id: impl Into<String>) -> Self {
        Self {
            kms,
            key_id: key_id.into(),
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub async fn encrypt(
        &self,
        attr: &str,
        value: &AttributeValue,
    ) -> Result<EncryptedEnvelope, EncryptionError> {
        let data_key = self.kms.generate_data_key(&self.key_id).await?;
        if data_key.ciphertext_blob.is_empty() {
            return Err(EncryptionError::InvalidDataKey {
                key_id: self.key_id.clone(),
                reason: "KMS returned an empty wrapped-key ciphertext".to_string(),
            });
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(
            data_key.plaintext.expose_secret(),
        ));
        let mut nonce_bytes = [0u8; 12];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let plaintext_json = serde_json::to_vec(&value.to_tagged_json())
            .expect("attribute value always serializes to JSON");
        let aad = aad_for_attribute(attr);

        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: &plaintext_json,
                    aad: &aad,
                },
            )
            .map_err(|_| EncryptionError::DecryptionFailed {
                attr: attr.to_string(),
            })?;

        Ok(EncryptedEnvelope {
            version: tabletheory_core::ENVELOPE_VERSION,
            edk: data_key.ciphertext_blob,
            nonce: nonce_bytes.to_vec(),
            ciphertext,
        })
    }

    pub async fn decrypt(
        &self,
        attr: &str,
        envelope: &EncryptedEnvelope,
    ) -> Result<AttributeValue, EncryptionError> {
        if envelope.version != tabletheory_core::ENVELOPE_VERSION {
            return Err(EncryptionError::InvalidEnvelope {
                attr: attr.to_string(),
                reason: format!("unsupported envelope version {}", envelope.version),
            });
        }
        if envelope.nonce.len() != 12 {
            return Err(EncryptionError::InvalidEnvelope {
                attr: attr.to_string(),
                reason: "nonce must be 12 bytes".to_string(),
            });
        }

        let plaintext_key = self.kms.decrypt(&self.key_id, &envelope.edk).await?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(
            plaintext_key.expose_secret(),
        ));
        let nonce = Nonce::from_slice(&envelope.nonce);
        let aad = aad_for_attribute(attr);

        let plaintext_json = cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &envelope.ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| EncryptionError::DecryptionFailed {
                attr: attr.to_string(),
            })?;

        let value: serde_json::Value =
            serde_json::from_slice(&plaintext_json).map_err(|_| EncryptionError::DecryptionFailed {
                attr: attr.to_string(),
            })?;

        AttributeValue::from_tagged_json(attr, &value).map_err(|_| EncryptionError::DecryptionFailed {
            attr: attr.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::GeneratedDataKey;
    use async_trait::async_trait;
    use secrecy::SecretBox;
    use std::sync::Mutex;

    struct FakeKms {
        last_plaintext: Mutex<Option<[u8; 32]>>,
    }

    impl FakeKms {
        fn new() -> Self {
            Self {
                last_plaintext: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl KmsClient for FakeKms {
        async fn generate_data_key(&self, _key_id: &str) -> Result<GeneratedDataKey, EncryptionError> {
            let mut plaintext = [0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut plaintext);
            *self.last_plaintext.lock().unwrap() = Some(plaintext);
            Ok(GeneratedDataKey {
                plaintext: SecretBox::new(Box::new(plaintext)),
                ciphertext_blob: vec![0xAB; 48],
            })
        }

        async fn decrypt(
            &self,
            _key_id: &str,
            _ciphertext_blob: &[u8],
        ) -> Result<SecretBox<[u8; 32]>, EncryptionError> {
            let plaintext = self.last_plaintext.lock().unwrap().expect("encrypt ran first");
            Ok(SecretBox::new(Box::new(plaintext)))
        }
    }

    #[tokio::test]
    async fn round_trips_through_encrypt_decrypt() {
        let service = EncryptionService::new(Arc::new(FakeKms::new()), "alias/test");
        let original = AttributeValue::from("sensitive value");
        let envelope = service.encrypt("email", &original).await.unwrap();
        let decrypted = service.decrypt("email", &envelope).await.unwrap();
        assert_eq!(decrypted, original);
    }

    #[tokio::test]
    async fn tampered_attribute_name_fails_aad_check() {
        let service = EncryptionService::new(Arc::new(FakeKms::new()), "alias/test");
        let original = AttributeValue::from("sensitive value");
        let envelope = service.encrypt("email", &original).await.unwrap();
        let err = service.decrypt("email_other", &envelope).await.unwrap_err();
        assert!(matches!(err, EncryptionError::DecryptionFailed { .. }));
    }

    #[tokio::test]
    async fn rejects_wrong_envelope_version() {
        let service = EncryptionService::new(Arc::new(FakeKms::new()), "alias/test");
        let original = AttributeValue::from("x");
        let mut envelope = service.encrypt("email", &original).await.unwrap();
        envelope.version = 99;
        let err = service.decrypt("email", &envelope).await.unwrap_err();
        assert!(matches!(err, EncryptionError::InvalidEnvelope { .. }));
    }
}
