//! Bridges a registered `Model` instance to and from the attribute map the
//! store client sends and receives, riding on the already-registered
//! `Schema` for field/attribute-name translation and on `serde_json` as the
//! intermediate representation the attribute codec itself speaks.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tabletheory_core::{
    attribute_value_to_json, json_to_attribute_value, AttributeValue, CodecError, Model, Schema,
    TableTheoryError, TableTheoryResult,
};

/// A registered model whose instances can be marshaled to and from an
/// attribute map. Blanket-implemented for any `Model` that is also
/// `Serialize + DeserializeOwned + Clone` — the registry only needs the
/// type's tag metadata, but the executor needs to read and write values too.
pub trait Item: Model + Serialize + DeserializeOwned + Clone {}
impl<T: Model + Serialize + DeserializeOwned + Clone> Item for T {}

fn is_empty_json(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.is_empty(),
        serde_json::Value::Array(a) => a.is_empty(),
        serde_json::Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Encode an `Item` instance into a store attribute map, keyed by
/// store-attribute name rather than Rust field name.
pub fn marshal<T: Item>(schema: &Schema, item: &T) -> TableTheoryResult<BTreeMap<String, AttributeValue>> {
    let encoded = serde_json::to_value(item).map_err(|e| {
        TableTheoryError::Codec(CodecError::InvalidEncoding {
            attr: schema.table_name.clone(),
            reason: format!("item did not serialize to a JSON object: {e}"),
        })
    })?;
    let object = encoded.as_object().ok_or_else(|| {
        TableTheoryError::Codec(CodecError::InvalidEncoding {
            attr: schema.table_name.clone(),
            reason: "item did not serialize to a JSON object".to_string(),
        })
    })?;

    let mut out = BTreeMap::new();
    for (field_name, meta) in &schema.fields {
        let json_value = object.get(field_name).cloned().unwrap_or(serde_json::Value::Null);
        if meta.omit_empty && is_empty_json(&json_value) {
            continue;
        }

        let value = json_to_attribute_value(&meta.store_attribute_name, &json_value, meta.scalar_kind, meta.is_set)?;

        if meta.is_key_attribute() {
            if let AttributeValue::S(s) = &value {
                if s.is_empty() {
                    return Err(TableTheoryError::Codec(CodecError::EmptyKeyAttribute {
                        attr: meta.store_attribute_name.clone(),
                    }));
                }
            }
        }

        out.insert(meta.store_attribute_name.clone(), value);
    }
    Ok(out)
}

/// Decode a store attribute map back into an `Item` instance.
pub fn unmarshal<T: Item>(schema: &Schema, map: &BTreeMap<String, AttributeValue>) -> TableTheoryResult<T> {
    let mut object = serde_json::Map::new();
    for (field_name, meta) in &schema.fields {
        if let Some(value) = map.get(&meta.store_attribute_name) {
            let json_value = attribute_value_to_json(&meta.store_attribute_name, value)?;
            object.insert(field_name.clone(), json_value);
        }
    }
    serde_json::from_value(serde_json::Value::Object(object)).map_err(|e| {
        TableTheoryError::Codec(CodecError::InvalidEncoding {
            attr: schema.table_name.clone(),
            reason: format!("item did not decode from the attribute map: {e}"),
        })
    })
}

/// Pull just the primary-key attributes out of a full attribute map.
pub fn extract_key(
    schema: &Schema,
    map: &BTreeMap<String, AttributeValue>,
) -> BTreeMap<String, AttributeValue> {
    let mut key = BTreeMap::new();
    if let Some(v) = map.get(&schema.partition_key) {
        key.insert(schema.partition_key.clone(), v.clone());
    }
    if let Some(sort_key) = &schema.sort_key {
        if let Some(v) = map.get(sort_key) {
            key.insert(sort_key.clone(), v.clone());
        }
    }
    key
}

fn attribute_for_role<'a>(schema: &'a Schema, field_name: &Option<String>) -> Option<&'a str> {
    field_name
        .as_ref()
        .and_then(|name| schema.fields.get(name))
        .map(|meta| meta.store_attribute_name.as_str())
}

/// Stamp `createdAt = updatedAt = now`, `version = 0` onto a freshly
/// marshaled item, in place.
pub fn stamp_for_create(schema: &Schema, map: &mut BTreeMap<String, AttributeValue>, now_epoch_seconds: i64) {
    if let Some(attr) = attribute_for_role(schema, &schema.created_at_field) {
        map.insert(attr.to_string(), AttributeValue::from(now_epoch_seconds));
    }
    if let Some(attr) = attribute_for_role(schema, &schema.updated_at_field) {
        map.insert(attr.to_string(), AttributeValue::from(now_epoch_seconds));
    }
    if let Some(attr) = attribute_for_role(schema, &schema.version_field) {
        map.insert(attr.to_string(), AttributeValue::from(0i64));
    }
}

/// Stamp `updatedAt = now` onto an update's SET clause target map, in place.
pub fn stamp_updated_at(schema: &Schema, map: &mut BTreeMap<String, AttributeValue>, now_epoch_seconds: i64) {
    if let Some(attr) = attribute_for_role(schema, &schema.updated_at_field) {
        map.insert(attr.to_string(), AttributeValue::from(now_epoch_seconds));
    }
}

/// The numeric value currently stored for the version field, if any.
pub fn current_version(schema: &Schema, map: &BTreeMap<String, AttributeValue>) -> Option<i64> {
    let attr = attribute_for_role(schema, &schema.version_field)?;
    match map.get(attr)? {
        AttributeValue::N(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tabletheory_core::RawFieldTag;
    use tabletheory_registry::{register, RegistryOptions};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Widget {
        id: String,
        label: String,
        count: i64,
        tags: Vec<String>,
    }

    impl Model for Widget {
        fn raw_table_name() -> Option<&'static str> {
            None
        }
        fn raw_field_tags() -> &'static [RawFieldTag] {
            &[
                RawFieldTag {
                    field_name: "id",
                    directives: &["pk"],
                    type_hint: "String",
                },
                RawFieldTag {
                    field_name: "label",
                    directives: &[],
                    type_hint: "String",
                },
                RawFieldTag {
                    field_name: "count",
                    directives: &[],
                    type_hint: "i64",
                },
                RawFieldTag {
                    field_name: "tags",
                    directives: &["set"],
                    type_hint: "Vec<String>",
                },
            ]
        }
    }

    #[test]
    fn marshal_unmarshal_round_trips() {
        let schema = register::<Widget>(&RegistryOptions::default()).unwrap();
        let widget = Widget {
            id: "w1".to_string(),
            label: "gizmo".to_string(),
            count: 3,
            tags: vec!["a".to_string(), "b".to_string()],
        };

        let map = marshal(&schema, &widget).unwrap();
        assert_eq!(map.get("id"), Some(&AttributeValue::S("w1".to_string())));
        assert!(matches!(map.get("tags"), Some(AttributeValue::Ss(_))));

        let decoded: Widget = unmarshal(&schema, &map).unwrap();
        assert_eq!(decoded.id, widget.id);
        assert_eq!(decoded.count, widget.count);
        assert_eq!(decoded.tags, widget.tags);
    }

    #[test]
    fn rejects_empty_partition_key() {
        let schema = register::<Widget>(&RegistryOptions::default()).unwrap();
        let widget = Widget {
            id: String::new(),
            label: "x".to_string(),
            count: 0,
            tags: Vec::new(),
        };
        let err = marshal(&schema, &widget).unwrap_err();
        assert!(matches!(
            err,
            TableTheoryError::Codec(CodecError::EmptyKeyAttribute { .. })
        ));
    }
}
