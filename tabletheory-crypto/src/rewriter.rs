//! Update-Expression Rewriter — walks a compiled `SET` clause and replaces
//! the right-hand side of every assignment to an encrypted attribute with
//! its encrypted envelope, in place, before the update reaches the store.

use std::collections::BTreeMap;

use tabletheory_core::{AttributeValue, EncryptionError};

use crate::service::EncryptionService;

/// Splits `s` on `sep` at paren-depth zero, so `if_not_exists(#n0, :v0)`
/// survives a split on `,` intact.
fn split_top_level(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in s.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth -= 1;
                current.push(c);
            }
            c if c == sep && depth == 0 => {
                parts.push(current.trim().to_string());
                current = String::new();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn split_sections(expr: &str) -> BTreeMap<&'static str, String> {
    const KEYWORDS: [&str; 4] = ["SET", "REMOVE", "ADD", "DELETE"];
    let mut sections = BTreeMap::new();
    let mut current: Option<&'static str> = None;
    let mut buf = String::new();
    for token in expr.split_whitespace() {
        if let Some(kw) = KEYWORDS.iter().find(|k| **k == token) {
            if let Some(cur) = current.take() {
                sections.insert(cur, buf.trim().to_string());
            }
            current = Some(kw);
            buf.clear();
        } else {
            if !buf.is_empty() {
                buf.push(' ');
            }
            buf.push_str(token);
        }
    }
    if let Some(cur) = current {
        sections.insert(cur, buf.trim().to_string());
    }
    sections
}

fn parse_assignment(assignment: &str) -> Option<(String, String)> {
    let idx = assignment.find('=')?;
    Some((
        assignment[..idx].trim().to_string(),
        assignment[idx + 1..].trim().to_string(),
    ))
}

pub struct UpdateRewriter<'a> {
    encryption: &'a EncryptionService,
}

impl<'a> UpdateRewriter<'a> {
    pub fn new(encryption: &'a EncryptionService) -> Self {
        Self { encryption }
    }

    /// Rewrite `update_expression`'s `SET` assignments in place, encrypting
    /// the bound value of every assignment whose attribute name resolves to
    /// an encrypted field. `attribute_values` is mutated directly.
    pub async fn rewrite(
        &self,
        update_expression: &str,
        attribute_names: &BTreeMap<String, String>,
        attribute_values: &mut BTreeMap<String, AttributeValue>,
        is_encrypted_attribute: impl Fn(&str) -> bool,
    ) -> Result<(), EncryptionError> {
        let sections = split_sections(update_expression);

        if let Some(add_section) = sections.get("ADD") {
            reject_encrypted_in_flat_section(add_section, attribute_names, &is_encrypted_attribute)?;
        }
        if let Some(delete_section) = sections.get("DELETE") {
            reject_encrypted_in_flat_section(delete_section, attribute_names, &is_encrypted_attribute)?;
        }

        if let Some(set_section) = sections.get("SET") {
            for assignment in split_top_level(set_section, ',') {
                let Some((lhs, rhs)) = parse_assignment(&assignment) else {
                    continue;
                };
                self.rewrite_assignment(
                    &lhs,
                    &rhs,
                    attribute_names,
                    attribute_values,
                    &is_encrypted_attribute,
                )
                .await?;
            }
        }

        Ok(())
    }

    async fn rewrite_assignment(
        &self,
        lhs: &str,
        rhs: &str,
        attribute_names: &BTreeMap<String, String>,
        attribute_values: &mut BTreeMap<String, AttributeValue>,
        is_encrypted_attribute: &impl Fn(&str) -> bool,
    ) -> Result<(), EncryptionError> {
        let base = lhs
            .find(['.', '['])
            .map(|idx| &lhs[..idx])
            .unwrap_or(lhs);
        let Some(attribute) = attribute_names.get(base) else {
            return Ok(());
        };
        if !is_encrypted_attribute(attribute) {
            return Ok(());
        }

        if lhs.contains('.') || lhs.contains('[') {
            return Err(EncryptionError::UnsupportedUpdateShape {
                attr: attribute.clone(),
                reason: "indexed or nested update paths are not supported on encrypted attributes"
                    .to_string(),
            });
        }

        if let Some(inner) = rhs.strip_prefix("if_not_exists(").and_then(|s| s.strip_suffix(')')) {
            let parts = split_top_level(inner, ',');
            if parts.len() != 2 {
                return Err(EncryptionError::UnsupportedUpdateShape {
                    attr: attribute.clone(),
                    reason: "malformed if_not_exists(...) default-value idiom".to_string(),
                });
            }
            return self
                .encrypt_value_placeholder(parts[1].trim(), attribute, attribute_values)
                .await;
        }

        if rhs.starts_with(':') {
            return self
                .encrypt_value_placeholder(rhs, attribute, attribute_values)
                .await;
        }

        Err(EncryptionError::UnsupportedUpdateShape {
            attr: attribute.clone(),
            reason: format!("unsupported update expression shape: {rhs}"),
        })
    }

    async fn encrypt_value_placeholder(
        &self,
        placeholder: &str,
        attribute: &str,
        attribute_values: &mut BTreeMap<String, AttributeValue>,
    ) -> Result<(), EncryptionError> {
        let value = attribute_values
            .get(placeholder)
            .cloned()
            .ok_or_else(|| EncryptionError::UnsupportedUpdateShape {
                attr: attribute.to_string(),
                reason: format!("missing bound value for placeholder {placeholder}"),
            })?;
        let envelope = self.encryption.encrypt(attribute, &value).await?;
        attribute_values.insert(placeholder.to_string(), envelope.to_attribute_value());
        Ok(())
    }
}

fn reject_encrypted_in_flat_section(
    section: &str,
    attribute_names: &BTreeMap<String, String>,
    is_encrypted_attribute: &impl Fn(&str) -> bool,
) -> Result<(), EncryptionError> {
    for clause in split_top_level(section, ',') {
        let name_placeholder = clause.split_whitespace().next().unwrap_or("");
        if let Some(attribute) = attribute_names.get(name_placeholder) {
            if is_encrypted_attribute(attribute) {
                return Err(EncryptionError::UnsupportedUpdateShape {
                    attr: attribute.clone(),
                    reason: "ADD/DELETE actions are not supported on encrypted attributes"
                        .to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::{GeneratedDataKey, KmsClient};
    use async_trait::async_trait;
    use rand::RngCore;
    use secrecy::SecretBox;
    use std::sync::{Arc, Mutex};

    struct FakeKms {
        last: Mutex<Option<[u8; 32]>>,
    }

    #[async_trait]
    impl KmsClient for FakeKms {
        async fn generate_data_key(&self, _key_id: &str) -> Result<GeneratedDataKey, EncryptionError> {
            let mut plaintext = [0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut plaintext);
            *self.last.lock().unwrap() = Some(plaintext);
            Ok(GeneratedDataKey {
                plaintext: SecretBox::new(Box::new(plaintext)),
                ciphertext_blob: vec![1, 2, 3, 4],
            })
        }

        async fn decrypt(
            &self,
            _key_id: &str,
            _blob: &[u8],
        ) -> Result<SecretBox<[u8; 32]>, EncryptionError> {
            Ok(SecretBox::new(Box::new(self.last.lock().unwrap().unwrap())))
        }
    }

    fn names(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn encrypts_plain_set_assignment() {
        let service = EncryptionService::new(
            Arc::new(FakeKms {
                last: Mutex::new(None),
            }),
            "alias/test",
        );
        let rewriter = UpdateRewriter::new(&service);
        let names = names(&[("#n0", "email")]);
        let mut values = BTreeMap::new();
        values.insert(":v0".to_string(), AttributeValue::from("a@example.com"));

        rewriter
            .rewrite("SET #n0 = :v0", &names, &mut values, |attr| attr == "email")
            .await
            .unwrap();

        assert!(matches!(values.get(":v0"), Some(AttributeValue::M(_))));
    }

    #[tokio::test]
    async fn rejects_indexed_path_on_encrypted_attribute() {
        let service = EncryptionService::new(
            Arc::new(FakeKms {
                last: Mutex::new(None),
            }),
            "alias/test",
        );
        let rewriter = UpdateRewriter::new(&service);
        let names = names(&[("#n0", "tags")]);
        let mut values = BTreeMap::new();
        values.insert(":v0".to_string(), AttributeValue::from("x"));

        let err = rewriter
            .rewrite("SET #n0[0] = :v0", &names, &mut values, |attr| attr == "tags")
            .await
            .unwrap_err();
        assert!(matches!(err, EncryptionError::UnsupportedUpdateShape { .. }));
    }

    #[tokio::test]
    async fn rejects_add_on_encrypted_attribute() {
        let service = EncryptionService::new(
            Arc::new(FakeKms {
                last: Mutex::new(None),
            }),
            "alias/test",
        );
        let rewriter = UpdateRewriter::new(&service);
        let names = names(&[("#n0", "counter")]);
        let mut values = BTreeMap::new();
        values.insert(":v0".to_string(), AttributeValue::from(1i64));

        let err = rewriter
            .rewrite("ADD #n0 :v0", &names, &mut values, |attr| attr == "counter")
            .await
            .unwrap_err();
        assert!(matches!(err, EncryptionError::UnsupportedUpdateShape { .. }));
    }

    #[tokio::test]
    async fn encrypts_if_not_exists_default_value() {
        let service = EncryptionService::new(
            Arc::new(FakeKms {
                last: Mutex::new(None),
            }),
            "alias/test",
        );
        let rewriter = UpdateRewriter::new(&service);
        let names = names(&[("#n0", "notes")]);
        let mut values = BTreeMap::new();
        values.insert(":v0".to_string(), AttributeValue::from("default"));

        rewriter
            .rewrite(
                "SET #n0 = if_not_exists(#n0, :v0)",
                &names,
                &mut values,
                |attr| attr == "notes",
            )
            .await
            .unwrap();

        assert!(matches!(values.get(":v0"), Some(AttributeValue::M(_))));
    }
}
