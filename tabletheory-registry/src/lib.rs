//! TableTheory Model Registry — parses `#[derive(Model)]` tag tokens into a
//! validated, cached `Schema`.
//!
//! Registration is idempotent per type identity and safe for concurrent
//! callers: the cache is a sharded concurrent map (`dashmap`) rather than a
//! single reader-preferring lock, which scales better under the kind of
//! read-mostly, high-fan-out access this registry sees in practice (see
//! DESIGN.md).

mod directive;
mod naming;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::sync::Arc;
use tabletheory_core::{
    FieldMetadata, Index, IndexType, KeyPosition, Model, ModelError, Projection, Schema,
};

const SCHEMA_FORMAT_VERSION: u32 = 1;

static SCHEMA_CACHE: Lazy<DashMap<TypeId, Arc<Schema>>> = Lazy::new(DashMap::new);

/// Session-level options that affect whether a schema may register.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryOptions {
    /// Whether an encryption key identifier has been configured on the
    /// session. Required (fail-closed) for any schema with encrypted
    /// fields.
    pub encryption_key_configured: bool,
}

/// Register (or fetch the cached registration of) `T`'s schema.
pub fn register<T: Model + Any>(opts: &RegistryOptions) -> Result<Arc<Schema>, ModelError> {
    let type_id = TypeId::of::<T>();
    if let Some(existing) = SCHEMA_CACHE.get(&type_id) {
        return Ok(existing.clone());
    }

    let schema = Arc::new(build_schema::<T>(opts)?);
    SCHEMA_CACHE.insert(type_id, schema.clone());
    tracing::debug!(table = %schema.table_name, "registered tabletheory model");
    Ok(schema)
}

/// Evict a cached schema (test/fixture support — not part of the stable
/// registration protocol, since real schemas never change shape at
/// runtime).
pub fn evict<T: Model + Any>() {
    SCHEMA_CACHE.remove(&TypeId::of::<T>());
}

fn build_schema<T: Model>(opts: &RegistryOptions) -> Result<Schema, ModelError> {
    let table_name = T::raw_table_name()
        .map(|s| s.to_string())
        .unwrap_or_else(|| naming::type_name_to_table_name(std::any::type_name::<T>()));

    let mut fields: BTreeMap<String, FieldMetadata> = BTreeMap::new();
    let mut attribute_to_field: BTreeMap<String, String> = BTreeMap::new();

    let mut pk_fields = Vec::new();
    let mut sk_fields = Vec::new();
    let mut created_at_fields = Vec::new();
    let mut updated_at_fields = Vec::new();
    let mut version_fields = Vec::new();
    let mut ttl_fields = Vec::new();
    let mut lsi_requests: Vec<(String, String)> = Vec::new(); // (lsi_name, sort_attr)
    let mut global_index_pk: BTreeMap<String, String> = BTreeMap::new();
    let mut global_index_sk: BTreeMap<String, String> = BTreeMap::new();

    for tag in T::raw_field_tags() {
        let parsed = directive::parse_directives(&table_name, tag.field_name, tag.directives)?;
        if parsed.skip {
            continue;
        }

        let attribute_name = parsed
            .attr_override
            .clone()
            .unwrap_or_else(|| naming::to_snake_case(tag.field_name));

        if let Some(existing_field) = attribute_to_field.get(&attribute_name) {
            if existing_field != tag.field_name {
                return Err(ModelError::DuplicateAttributeName {
                    table: table_name.clone(),
                    attribute: attribute_name,
                });
            }
        }
        attribute_to_field.insert(attribute_name.clone(), tag.field_name.to_string());

        let scalar_kind =
            directive::infer_scalar_kind(tag.type_hint, parsed.set, parsed.json_hint);

        for membership in &parsed.index_memberships {
            let target = match membership.key_position {
                KeyPosition::Partition => &mut global_index_pk,
                KeyPosition::Sort => &mut global_index_sk,
            };
            if let Some(existing) = target.get(&membership.index_name) {
                if existing != &attribute_name {
                    let position = match membership.key_position {
                        KeyPosition::Partition => "partition",
                        KeyPosition::Sort => "sort",
                    };
                    return Err(ModelError::DuplicateIndexKey {
                        table: table_name.clone(),
                        index: membership.index_name.clone(),
                        position,
                    });
                }
            } else {
                target.insert(membership.index_name.clone(), attribute_name.clone());
            }
        }

        for lsi_name in &parsed.lsi_names {
            lsi_requests.push((lsi_name.clone(), attribute_name.clone()));
        }

        if parsed.is_partition_key {
            pk_fields.push(tag.field_name.to_string());
        }
        if parsed.is_sort_key {
            sk_fields.push(tag.field_name.to_string());
        }
        if parsed.created_at {
            created_at_fields.push(tag.field_name.to_string());
        }
        if parsed.updated_at {
            updated_at_fields.push(tag.field_name.to_string());
        }
        if parsed.version {
            version_fields.push(tag.field_name.to_string());
        }
        if parsed.ttl {
            ttl_fields.push(tag.field_name.to_string());
        }

        let metadata = FieldMetadata {
            name: tag.field_name.to_string(),
            store_attribute_name: attribute_name,
            scalar_kind,
            is_partition_key: parsed.is_partition_key,
            is_sort_key: parsed.is_sort_key,
            is_created_at: parsed.created_at,
            is_updated_at: parsed.updated_at,
            is_version: parsed.version,
            is_ttl: parsed.ttl,
            is_encrypted: parsed.encrypted,
            is_set: parsed.set,
            omit_empty: parsed.omit_empty,
            index_memberships: parsed.index_memberships,
        };
        fields.insert(tag.field_name.to_string(), metadata);
    }

    let partition_key_field = match pk_fields.as_slice() {
        [] => {
            return Err(ModelError::MissingPartitionKey {
                table: table_name.clone(),
            })
        }
        [one] => one.clone(),
        many => {
            return Err(ModelError::DuplicatePartitionKey {
                table: table_name.clone(),
                fields: many.to_vec(),
            })
        }
    };
    if sk_fields.len() > 1 {
        return Err(ModelError::DuplicateSortKey {
            table: table_name.clone(),
            fields: sk_fields,
        });
    }
    require_at_most_one(&table_name, "created_at", &created_at_fields)?;
    require_at_most_one(&table_name, "updated_at", &updated_at_fields)?;
    require_at_most_one(&table_name, "version", &version_fields)?;
    require_at_most_one(&table_name, "ttl", &ttl_fields)?;

    if let Some(ttl_field_name) = ttl_fields.first() {
        let field = &fields[ttl_field_name];
        if field.scalar_kind != tabletheory_core::ScalarKind::Number {
            return Err(ModelError::InvalidTtlField {
                table: table_name.clone(),
                field: ttl_field_name.clone(),
            });
        }
    }

    let encrypted_fields: Vec<&FieldMetadata> =
        fields.values().filter(|f| f.is_encrypted).collect();
    for field in &encrypted_fields {
        if field.is_key_attribute() {
            return Err(ModelError::EncryptedFieldIsKey {
                table: table_name.clone(),
                field: field.name.clone(),
            });
        }
    }
    if !encrypted_fields.is_empty() && !opts.encryption_key_configured {
        return Err(ModelError::EncryptionNotConfigured {
            table: table_name.clone(),
        });
    }

    let partition_key = fields[&partition_key_field].store_attribute_name.clone();
    let sort_key = sk_fields
        .first()
        .map(|f| fields[f].store_attribute_name.clone());

    let mut indexes = Vec::new();
    let mut global_names: Vec<&String> = global_index_pk.keys().chain(global_index_sk.keys()).collect();
    global_names.sort();
    global_names.dedup();
    for name in global_names {
        let pk_attr = global_index_pk.get(name).cloned().unwrap_or_default();
        indexes.push(Index {
            name: name.clone(),
            index_type: IndexType::Global,
            partition_key_attr: pk_attr,
            sort_key_attr: global_index_sk.get(name).cloned(),
            projection: Projection::All,
        });
    }
    for (lsi_name, sort_attr) in lsi_requests {
        indexes.push(Index {
            name: lsi_name,
            index_type: IndexType::Local,
            partition_key_attr: partition_key.clone(),
            sort_key_attr: Some(sort_attr),
            projection: Projection::All,
        });
    }

    Ok(Schema {
        version: SCHEMA_FORMAT_VERSION,
        table_name,
        partition_key,
        sort_key,
        indexes,
        fields,
        attribute_to_field,
        created_at_field: created_at_fields.into_iter().next(),
        updated_at_field: updated_at_fields.into_iter().next(),
        version_field: version_fields.into_iter().next(),
        ttl_field: ttl_fields.into_iter().next(),
    })
}

fn require_at_most_one(table: &str, role: &'static str, fields: &[String]) -> Result<(), ModelError> {
    if fields.len() > 1 {
        Err(ModelError::DuplicateLifecycleRole {
            table: table.to_string(),
            role,
            fields: fields.to_vec(),
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabletheory_derive::Model;

    #[derive(Model)]
    #[table(name = "users")]
    struct User {
        #[tabletheory(pk)]
        id: String,
        #[tabletheory(index = "byEmail:pk")]
        email: String,
        #[tabletheory(version)]
        version: i64,
        #[tabletheory(created_at)]
        created_at: i64,
        #[tabletheory(updated_at)]
        updated_at: i64,
        name: String,
    }

    #[derive(Model)]
    struct Customer {
        #[tabletheory(pk)]
        id: String,
        #[tabletheory(encrypted)]
        email: String,
        email_hash: String,
    }

    #[derive(Model)]
    struct NoPartitionKey {
        name: String,
    }

    #[test]
    fn registers_valid_schema() {
        let opts = RegistryOptions::default();
        let schema = register::<User>(&opts).unwrap();
        assert_eq!(schema.table_name, "users");
        assert_eq!(schema.partition_key, "id");
        assert_eq!(schema.version_field.as_deref(), Some("version"));
        assert_eq!(schema.indexes.len(), 1);
        assert_eq!(schema.indexes[0].name, "byEmail");
    }

    #[test]
    fn table_name_falls_back_to_snake_case_type_name() {
        let opts = RegistryOptions::default();
        let schema = register::<Customer>(&RegistryOptions {
            encryption_key_configured: true,
            ..opts
        })
        .unwrap();
        assert_eq!(schema.table_name, "customer");
    }

    #[test]
    fn missing_partition_key_is_rejected() {
        let opts = RegistryOptions::default();
        let err = build_schema::<NoPartitionKey>(&opts).unwrap_err();
        assert!(matches!(err, ModelError::MissingPartitionKey { .. }));
    }

    #[test]
    fn encrypted_field_requires_session_key() {
        let opts = RegistryOptions::default();
        let err = build_schema::<Customer>(&opts).unwrap_err();
        assert!(matches!(err, ModelError::EncryptionNotConfigured { .. }));
    }

    #[derive(Model)]
    struct EncryptedKey {
        #[tabletheory(pk, encrypted)]
        id: String,
    }

    #[test]
    fn encrypted_key_attribute_is_rejected() {
        let opts = RegistryOptions {
            encryption_key_configured: true,
        };
        let err = build_schema::<EncryptedKey>(&opts).unwrap_err();
        assert!(matches!(err, ModelError::EncryptedFieldIsKey { .. }));
    }

    #[test]
    fn registration_is_idempotent() {
        let opts = RegistryOptions::default();
        let first = register::<User>(&opts).unwrap();
        let second = register::<User>(&opts).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
