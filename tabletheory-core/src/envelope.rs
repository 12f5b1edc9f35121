//! Encrypted envelope — the per-attribute ciphertext shape produced by the
//! Encryption Service and stored as a map attribute on the wire.

use crate::attribute::AttributeValue;
use crate::error::EncryptionError;
use std::collections::BTreeMap;

pub const ENVELOPE_VERSION: i64 = 1;

/// AAD bound into the AEAD cipher for a given attribute name.
pub fn aad_for_attribute(attr: &str) -> Vec<u8> {
    format!("theorydb:encrypted:v1|attr={attr}").into_bytes()
}

/// `{v: 1, edk: bytes, nonce: 12 bytes, ct: bytes}` as stored on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct EncryptedEnvelope {
    pub version: i64,
    pub edk: Vec<u8>,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl EncryptedEnvelope {
    pub fn to_attribute_value(&self) -> AttributeValue {
        let mut map = BTreeMap::new();
        map.insert("v".to_string(), AttributeValue::N(self.version.to_string()));
        map.insert("edk".to_string(), AttributeValue::B(self.edk.clone()));
        map.insert("nonce".to_string(), AttributeValue::B(self.nonce.clone()));
        map.insert("ct".to_string(), AttributeValue::B(self.ciphertext.clone()));
        AttributeValue::M(map)
    }

    pub fn from_attribute_value(attr: &str, value: &AttributeValue) -> Result<Self, EncryptionError> {
        let map = match value {
            AttributeValue::M(map) => map,
            _ => {
                return Err(EncryptionError::InvalidEnvelope {
                    attr: attr.to_string(),
                    reason: "envelope must be a map attribute".into(),
                })
            }
        };

        let version = match map.get("v") {
            Some(AttributeValue::N(s)) => s.parse::<i64>().map_err(|_| {
                EncryptionError::InvalidEnvelope {
                    attr: attr.to_string(),
                    reason: "version is not numeric".into(),
                }
            })?,
            _ => {
                return Err(EncryptionError::InvalidEnvelope {
                    attr: attr.to_string(),
                    reason: "missing version field v".into(),
                })
            }
        };
        if version != ENVELOPE_VERSION {
            return Err(EncryptionError::InvalidEnvelope {
                attr: attr.to_string(),
                reason: format!("unsupported envelope version {version}"),
            });
        }

        let edk = match map.get("edk") {
            Some(AttributeValue::B(b)) if !b.is_empty() => b.clone(),
            _ => {
                return Err(EncryptionError::InvalidEnvelope {
                    attr: attr.to_string(),
                    reason: "missing or empty edk".into(),
                })
            }
        };

        let nonce = match map.get("nonce") {
            Some(AttributeValue::B(b)) if !b.is_empty() => b.clone(),
            _ => {
                return Err(EncryptionError::InvalidEnvelope {
                    attr: attr.to_string(),
                    reason: "missing or empty nonce".into(),
                })
            }
        };

        let ciphertext = match map.get("ct") {
            Some(AttributeValue::B(b)) => b.clone(),
            Some(AttributeValue::Null) | None => {
                return Err(EncryptionError::InvalidEnvelope {
                    attr: attr.to_string(),
                    reason: "missing ct".into(),
                })
            }
            _ => {
                return Err(EncryptionError::InvalidEnvelope {
                    attr: attr.to_string(),
                    reason: "ct must be binary".into(),
                })
            }
        };

        Ok(EncryptedEnvelope {
            version,
            edk,
            nonce,
            ciphertext,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_attribute_value() {
        let envelope = EncryptedEnvelope {
            version: 1,
            edk: vec![1, 2, 3],
            nonce: vec![0; 12],
            ciphertext: vec![9, 9, 9],
        };
        let av = envelope.to_attribute_value();
        let decoded = EncryptedEnvelope::from_attribute_value("email", &av).unwrap();
        assert_eq!(envelope, decoded);
    }

    #[test]
    fn rejects_wrong_version() {
        let mut map = BTreeMap::new();
        map.insert("v".to_string(), AttributeValue::N("2".into()));
        map.insert("edk".to_string(), AttributeValue::B(vec![1]));
        map.insert("nonce".to_string(), AttributeValue::B(vec![0; 12]));
        map.insert("ct".to_string(), AttributeValue::B(vec![1]));
        let av = AttributeValue::M(map);
        assert!(EncryptedEnvelope::from_attribute_value("email", &av).is_err());
    }

    #[test]
    fn rejects_empty_edk() {
        let mut map = BTreeMap::new();
        map.insert("v".to_string(), AttributeValue::N("1".into()));
        map.insert("edk".to_string(), AttributeValue::B(vec![]));
        map.insert("nonce".to_string(), AttributeValue::B(vec![0; 12]));
        map.insert("ct".to_string(), AttributeValue::B(vec![1]));
        let av = AttributeValue::M(map);
        assert!(EncryptedEnvelope::from_attribute_value("email", &av).is_err());
    }
}
