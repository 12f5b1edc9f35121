//! Attribute Codec — typed scalar/composite values and their tagged-union
//! wire representation.
//!
//! `AttributeValue` mirrors the store's own tagged union (`S, N, B, BOOL,
//! NULL, SS, NS, BS, L, M`). Numbers are always canonical decimal strings on
//! the wire; binary is raw bytes in-process and base64 only at JSON
//! boundaries (the cursor codec, stream images).

use std::collections::BTreeMap;
use thiserror::Error;

/// The scalar/composite kind a `FieldMetadata` declares for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    String,
    Number,
    Binary,
    Bool,
    StringSet,
    NumberSet,
    BinarySet,
    List,
    Map,
    Null,
}

impl ScalarKind {
    /// Whether this kind is one of the three set variants (`SS`, `NS`, `BS`).
    pub fn is_set(self) -> bool {
        matches!(
            self,
            ScalarKind::StringSet | ScalarKind::NumberSet | ScalarKind::BinarySet
        )
    }
}

/// A typed attribute value, mirroring the store's tagged union wire format.
///
/// This is the public sum-type boundary: native Rust values convert into it
/// through a small set of explicit `From` impls, and it is the type
/// filter/condition RHS literals are built from.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    S(String),
    /// Canonical decimal string, e.g. "42", "-3.5".
    N(String),
    B(Vec<u8>),
    Bool(bool),
    Null,
    Ss(Vec<String>),
    Ns(Vec<String>),
    Bs(Vec<Vec<u8>>),
    L(Vec<AttributeValue>),
    M(BTreeMap<String, AttributeValue>),
}

impl AttributeValue {
    /// The `ScalarKind` this value presents as on the wire.
    pub fn kind(&self) -> ScalarKind {
        match self {
            AttributeValue::S(_) => ScalarKind::String,
            AttributeValue::N(_) => ScalarKind::Number,
            AttributeValue::B(_) => ScalarKind::Binary,
            AttributeValue::Bool(_) => ScalarKind::Bool,
            AttributeValue::Null => ScalarKind::Null,
            AttributeValue::Ss(_) => ScalarKind::StringSet,
            AttributeValue::Ns(_) => ScalarKind::NumberSet,
            AttributeValue::Bs(_) => ScalarKind::BinarySet,
            AttributeValue::L(_) => ScalarKind::List,
            AttributeValue::M(_) => ScalarKind::Map,
        }
    }

    /// True for the empty-string case that key attributes must reject before
    /// any network I/O.
    pub fn is_empty_string(&self) -> bool {
        matches!(self, AttributeValue::S(s) if s.is_empty())
    }

    /// True for sets/lists that serialize as empty — empty sets never
    /// serialize onto the wire at all (omitted by the caller).
    pub fn is_empty_collection(&self) -> bool {
        match self {
            AttributeValue::Ss(v) => v.is_empty(),
            AttributeValue::Ns(v) => v.is_empty(),
            AttributeValue::Bs(v) => v.is_empty(),
            _ => false,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid encoding for attribute {attr}: {reason}")]
    InvalidEncoding { attr: String, reason: String },
    #[error("empty key attribute {attr}: key attributes may not be empty strings")]
    EmptyKeyAttribute { attr: String },
    #[error("unknown wire variant for attribute {attr}")]
    UnknownVariant { attr: String },
}

macro_rules! impl_from_number {
    ($($t:ty),*) => {
        $(
            impl From<$t> for AttributeValue {
                fn from(v: $t) -> Self {
                    AttributeValue::N(v.to_string())
                }
            }
        )*
    };
}

impl_from_number!(i8, i16, i32, i64, u8, u16, u32, u64, isize, usize);

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        // Canonical decimal string: trim a trailing ".0" the store would
        // otherwise round-trip losslessly but uglily.
        if v.fract() == 0.0 && v.is_finite() {
            AttributeValue::N(format!("{v:.0}"))
        } else {
            AttributeValue::N(format!("{v}"))
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::S(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::S(v)
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(v: Vec<u8>) -> Self {
        AttributeValue::B(v)
    }
}

impl<T: Into<AttributeValue>> From<Option<T>> for AttributeValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => AttributeValue::Null,
        }
    }
}

impl TryFrom<&AttributeValue> for i64 {
    type Error = CodecError;

    fn try_from(v: &AttributeValue) -> Result<Self, Self::Error> {
        match v {
            AttributeValue::N(s) => s.parse::<i64>().map_err(|e| CodecError::InvalidEncoding {
                attr: String::new(),
                reason: e.to_string(),
            }),
            _ => Err(CodecError::InvalidEncoding {
                attr: String::new(),
                reason: "expected N".into(),
            }),
        }
    }
}

impl TryFrom<&AttributeValue> for f64 {
    type Error = CodecError;

    fn try_from(v: &AttributeValue) -> Result<Self, Self::Error> {
        match v {
            AttributeValue::N(s) => s.parse::<f64>().map_err(|e| CodecError::InvalidEncoding {
                attr: String::new(),
                reason: e.to_string(),
            }),
            _ => Err(CodecError::InvalidEncoding {
                attr: String::new(),
                reason: "expected N".into(),
            }),
        }
    }
}

impl TryFrom<&AttributeValue> for String {
    type Error = CodecError;

    fn try_from(v: &AttributeValue) -> Result<Self, Self::Error> {
        match v {
            AttributeValue::S(s) => Ok(s.clone()),
            _ => Err(CodecError::InvalidEncoding {
                attr: String::new(),
                reason: "expected S".into(),
            }),
        }
    }
}

/// Convert a JSON value produced by `serde_json::to_value` on a user struct
/// into a wire attribute, following the field's declared `ScalarKind`.
///
/// This is the marshal-time half of the item codec: the Model Registry
/// drives one call per non-omitted field.
pub fn json_to_attribute_value(
    attr: &str,
    value: &serde_json::Value,
    kind: ScalarKind,
    is_set: bool,
) -> Result<AttributeValue, CodecError> {
    use serde_json::Value as J;

    if value.is_null() {
        return Ok(AttributeValue::Null);
    }

    match (kind, value) {
        (ScalarKind::String, J::String(s)) => Ok(AttributeValue::S(s.clone())),
        (ScalarKind::Number, J::Number(n)) => Ok(AttributeValue::N(n.to_string())),
        (ScalarKind::Bool, J::Bool(b)) => Ok(AttributeValue::Bool(*b)),
        (ScalarKind::Binary, J::String(s)) => {
            let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, s)
                .map_err(|e| CodecError::InvalidEncoding {
                    attr: attr.to_string(),
                    reason: e.to_string(),
                })?;
            Ok(AttributeValue::B(bytes))
        }
        (ScalarKind::Null, _) => Ok(AttributeValue::Null),
        (ScalarKind::List, J::Array(items)) if !is_set => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(json_scalar_to_attribute_value(attr, item)?);
            }
            Ok(AttributeValue::L(out))
        }
        (ScalarKind::StringSet, J::Array(items)) | (ScalarKind::List, J::Array(items))
            if is_set =>
        {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(
                    item.as_str()
                        .ok_or_else(|| CodecError::InvalidEncoding {
                            attr: attr.to_string(),
                            reason: "string set member must be a string".into(),
                        })?
                        .to_string(),
                );
            }
            Ok(AttributeValue::Ss(out))
        }
        (ScalarKind::NumberSet, J::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let n = item.as_f64().ok_or_else(|| CodecError::InvalidEncoding {
                    attr: attr.to_string(),
                    reason: "number set member must be a number".into(),
                })?;
                out.push(AttributeValue::from(n).canonical_number_string());
            }
            Ok(AttributeValue::Ns(out))
        }
        (ScalarKind::BinarySet, J::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let s = item.as_str().ok_or_else(|| CodecError::InvalidEncoding {
                    attr: attr.to_string(),
                    reason: "binary set member must be base64 string".into(),
                })?;
                out.push(
                    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, s)
                        .map_err(|e| CodecError::InvalidEncoding {
                            attr: attr.to_string(),
                            reason: e.to_string(),
                        })?,
                );
            }
            Ok(AttributeValue::Bs(out))
        }
        (ScalarKind::Map, J::Object(map)) => {
            let mut out = BTreeMap::new();
            for (k, v) in map {
                out.insert(k.clone(), json_scalar_to_attribute_value(attr, v)?);
            }
            Ok(AttributeValue::M(out))
        }
        _ => Err(CodecError::InvalidEncoding {
            attr: attr.to_string(),
            reason: format!("value does not match declared scalar kind {kind:?}"),
        }),
    }
}

fn json_scalar_to_attribute_value(
    attr: &str,
    value: &serde_json::Value,
) -> Result<AttributeValue, CodecError> {
    use serde_json::Value as J;
    match value {
        J::Null => Ok(AttributeValue::Null),
        J::Bool(b) => Ok(AttributeValue::Bool(*b)),
        J::Number(n) => Ok(AttributeValue::N(n.to_string())),
        J::String(s) => Ok(AttributeValue::S(s.clone())),
        J::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(json_scalar_to_attribute_value(attr, item)?);
            }
            Ok(AttributeValue::L(out))
        }
        J::Object(map) => {
            let mut out = BTreeMap::new();
            for (k, v) in map {
                out.insert(k.clone(), json_scalar_to_attribute_value(attr, v)?);
            }
            Ok(AttributeValue::M(out))
        }
    }
}

impl AttributeValue {
    fn canonical_number_string(&self) -> String {
        match self {
            AttributeValue::N(s) => s.clone(),
            _ => String::new(),
        }
    }
}

/// Decode a wire attribute back into a JSON value, the unmarshal-time half
/// of the item codec consumed by `serde_json::from_value`.
pub fn attribute_value_to_json(
    attr: &str,
    value: &AttributeValue,
) -> Result<serde_json::Value, CodecError> {
    use serde_json::Value as J;
    match value {
        AttributeValue::Null => Ok(J::Null),
        AttributeValue::S(s) => Ok(J::String(s.clone())),
        AttributeValue::N(s) => {
            let n: serde_json::Number = s.parse().map_err(|_| CodecError::InvalidEncoding {
                attr: attr.to_string(),
                reason: format!("not a canonical number: {s}"),
            })?;
            Ok(J::Number(n))
        }
        AttributeValue::Bool(b) => Ok(J::Bool(*b)),
        AttributeValue::B(bytes) => Ok(J::String(base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            bytes,
        ))),
        AttributeValue::Ss(items) => {
            Ok(J::Array(items.iter().cloned().map(J::String).collect()))
        }
        AttributeValue::Ns(items) => {
            let mut out = Vec::with_capacity(items.len());
            for s in items {
                let n: serde_json::Number =
                    s.parse().map_err(|_| CodecError::InvalidEncoding {
                        attr: attr.to_string(),
                        reason: format!("not a canonical number: {s}"),
                    })?;
                out.push(J::Number(n));
            }
            Ok(J::Array(out))
        }
        AttributeValue::Bs(items) => Ok(J::Array(
            items
                .iter()
                .map(|b| {
                    J::String(base64::Engine::encode(
                        &base64::engine::general_purpose::STANDARD,
                        b,
                    ))
                })
                .collect(),
        )),
        AttributeValue::L(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(attribute_value_to_json(attr, item)?);
            }
            Ok(J::Array(out))
        }
        AttributeValue::M(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), attribute_value_to_json(attr, v)?);
            }
            Ok(J::Object(out))
        }
    }
}

impl AttributeValue {
    /// Self-describing tagged JSON form used by the cursor codec and stream
    /// image decoding: `{"S": "..."}`, `{"N": "42"}`, `{"B": "<base64>"}`,
    /// and so on — one key per variant, unlike `attribute_value_to_json`
    /// which needs the field's declared `ScalarKind` to disambiguate.
    pub fn to_tagged_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            AttributeValue::S(s) => json!({"S": s}),
            AttributeValue::N(n) => json!({"N": n}),
            AttributeValue::B(b) => json!({
                "B": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b)
            }),
            AttributeValue::Bool(b) => json!({"BOOL": b}),
            AttributeValue::Null => json!({"NULL": true}),
            AttributeValue::Ss(items) => json!({"SS": items}),
            AttributeValue::Ns(items) => json!({"NS": items}),
            AttributeValue::Bs(items) => json!({
                "BS": items
                    .iter()
                    .map(|b| base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b))
                    .collect::<Vec<_>>()
            }),
            AttributeValue::L(items) => {
                json!({"L": items.iter().map(AttributeValue::to_tagged_json).collect::<Vec<_>>()})
            }
            AttributeValue::M(map) => {
                let obj: serde_json::Map<String, serde_json::Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_tagged_json()))
                    .collect();
                json!({"M": obj})
            }
        }
    }

    /// Inverse of `to_tagged_json`. Unknown variants fail with
    /// `CodecError::UnknownVariant`.
    pub fn from_tagged_json(attr: &str, value: &serde_json::Value) -> Result<Self, CodecError> {
        let obj = value.as_object().ok_or_else(|| CodecError::InvalidEncoding {
            attr: attr.to_string(),
            reason: "tagged attribute value must be a JSON object".into(),
        })?;
        if let Some(s) = obj.get("S") {
            return Ok(AttributeValue::S(
                s.as_str()
                    .ok_or_else(|| CodecError::UnknownVariant { attr: attr.to_string() })?
                    .to_string(),
            ));
        }
        if let Some(n) = obj.get("N") {
            return Ok(AttributeValue::N(
                n.as_str()
                    .ok_or_else(|| CodecError::UnknownVariant { attr: attr.to_string() })?
                    .to_string(),
            ));
        }
        if let Some(b) = obj.get("B") {
            let s = b
                .as_str()
                .ok_or_else(|| CodecError::UnknownVariant { attr: attr.to_string() })?;
            let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, s)
                .map_err(|e| CodecError::InvalidEncoding {
                    attr: attr.to_string(),
                    reason: e.to_string(),
                })?;
            return Ok(AttributeValue::B(bytes));
        }
        if let Some(b) = obj.get("BOOL") {
            return Ok(AttributeValue::Bool(b.as_bool().ok_or_else(|| {
                CodecError::UnknownVariant { attr: attr.to_string() }
            })?));
        }
        if obj.get("NULL").is_some() {
            return Ok(AttributeValue::Null);
        }
        if let Some(items) = obj.get("SS").and_then(|v| v.as_array()) {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(
                    item.as_str()
                        .ok_or_else(|| CodecError::UnknownVariant { attr: attr.to_string() })?
                        .to_string(),
                );
            }
            return Ok(AttributeValue::Ss(out));
        }
        if let Some(items) = obj.get("NS").and_then(|v| v.as_array()) {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(
                    item.as_str()
                        .ok_or_else(|| CodecError::UnknownVariant { attr: attr.to_string() })?
                        .to_string(),
                );
            }
            return Ok(AttributeValue::Ns(out));
        }
        if let Some(items) = obj.get("BS").and_then(|v| v.as_array()) {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let s = item
                    .as_str()
                    .ok_or_else(|| CodecError::UnknownVariant { attr: attr.to_string() })?;
                out.push(
                    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, s)
                        .map_err(|e| CodecError::InvalidEncoding {
                            attr: attr.to_string(),
                            reason: e.to_string(),
                        })?,
                );
            }
            return Ok(AttributeValue::Bs(out));
        }
        if let Some(items) = obj.get("L").and_then(|v| v.as_array()) {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(AttributeValue::from_tagged_json(attr, item)?);
            }
            return Ok(AttributeValue::L(out));
        }
        if let Some(map) = obj.get("M").and_then(|v| v.as_object()) {
            let mut out = BTreeMap::new();
            for (k, v) in map {
                out.insert(k.clone(), AttributeValue::from_tagged_json(attr, v)?);
            }
            return Ok(AttributeValue::M(out));
        }
        Err(CodecError::UnknownVariant { attr: attr.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_roundtrips_as_canonical_decimal() {
        let av: AttributeValue = 42i64.into();
        assert_eq!(av, AttributeValue::N("42".into()));
        let json = attribute_value_to_json("n", &av).unwrap();
        assert_eq!(json, serde_json::json!(42));
    }

    #[test]
    fn empty_string_is_flagged_but_not_rejected_here() {
        let av = AttributeValue::S(String::new());
        assert!(av.is_empty_string());
    }

    #[test]
    fn empty_set_is_flagged() {
        let av = AttributeValue::Ss(vec![]);
        assert!(av.is_empty_collection());
    }

    #[test]
    fn null_roundtrips_explicitly() {
        let av = AttributeValue::Null;
        let json = attribute_value_to_json("x", &av).unwrap();
        assert_eq!(json, serde_json::Value::Null);
    }

    #[test]
    fn binary_roundtrips_through_base64_json_bridge() {
        let bytes = vec![1u8, 2, 3, 255];
        let av: AttributeValue = bytes.clone().into();
        let json = attribute_value_to_json("b", &av).unwrap();
        let decoded = json_to_attribute_value("b", &json, ScalarKind::Binary, false).unwrap();
        assert_eq!(decoded, AttributeValue::B(bytes));
    }

    #[test]
    fn string_set_roundtrips() {
        let json = serde_json::json!(["a", "b", "c"]);
        let av = json_to_attribute_value("tags", &json, ScalarKind::StringSet, true).unwrap();
        assert_eq!(
            av,
            AttributeValue::Ss(vec!["a".into(), "b".into(), "c".into()])
        );
    }
}
