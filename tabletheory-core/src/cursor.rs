//! Cursor codec — opaque, round-trippable pagination tokens.
//!
//! Outer encoding is base64url-without-padding over UTF-8 JSON. Map keys in
//! `last_key` are sorted lexicographically (a `BTreeMap`) so two equal
//! cursors always encode to byte-identical bytes.

use crate::attribute::AttributeValue;
use crate::error::ExpressionError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    fn as_str(self) -> &'static str {
        match self {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "ASC" => Some(SortDirection::Ascending),
            "DESC" => Some(SortDirection::Descending),
            _ => None,
        }
    }
}

/// An opaque pagination cursor: the last evaluated key plus the index and
/// sort-direction context needed to resume a Query or Scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    pub last_key: BTreeMap<String, AttributeValue>,
    pub index: Option<String>,
    pub sort: Option<SortDirection>,
}

impl Cursor {
    pub fn new(last_key: BTreeMap<String, AttributeValue>) -> Self {
        Self {
            last_key,
            index: None,
            sort: None,
        }
    }

    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn with_sort(mut self, sort: SortDirection) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Encode to the opaque base64url-no-pad wire form.
    pub fn encode(&self) -> String {
        let mut last_key_json = serde_json::Map::new();
        for (k, v) in &self.last_key {
            last_key_json.insert(k.clone(), v.to_tagged_json());
        }
        let mut obj = serde_json::Map::new();
        obj.insert("lastKey".into(), serde_json::Value::Object(last_key_json));
        if let Some(index) = &self.index {
            obj.insert("index".into(), serde_json::Value::String(index.clone()));
        }
        if let Some(sort) = self.sort {
            obj.insert(
                "sort".into(),
                serde_json::Value::String(sort.as_str().to_string()),
            );
        }
        let json = serde_json::Value::Object(obj).to_string();
        URL_SAFE_NO_PAD.encode(json.as_bytes())
    }

    /// Decode from the opaque wire form. Rejects unknown attribute-value
    /// variants and malformed structure with `ExpressionError::MalformedCursor`.
    pub fn decode(encoded: &str) -> Result<Self, ExpressionError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| ExpressionError::MalformedCursor)?;
        let text = String::from_utf8(bytes).map_err(|_| ExpressionError::MalformedCursor)?;
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|_| ExpressionError::MalformedCursor)?;
        let obj = value.as_object().ok_or(ExpressionError::MalformedCursor)?;

        let last_key_json = obj
            .get("lastKey")
            .and_then(|v| v.as_object())
            .ok_or(ExpressionError::MalformedCursor)?;

        let mut last_key = BTreeMap::new();
        for (k, v) in last_key_json {
            let av = AttributeValue::from_tagged_json(k, v)
                .map_err(|_| ExpressionError::MalformedCursor)?;
            last_key.insert(k.clone(), av);
        }

        let index = obj
            .get("index")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let sort = match obj.get("sort").and_then(|v| v.as_str()) {
            Some(s) => Some(SortDirection::from_str(s).ok_or(ExpressionError::MalformedCursor)?),
            None => None,
        };

        Ok(Cursor {
            last_key,
            index,
            sort,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cursor() -> Cursor {
        let mut last_key = BTreeMap::new();
        last_key.insert("pk".to_string(), AttributeValue::S("u1".into()));
        last_key.insert("sk".to_string(), AttributeValue::N("3".into()));
        Cursor::new(last_key)
            .with_index("byEmail")
            .with_sort(SortDirection::Descending)
    }

    #[test]
    fn roundtrips_exactly() {
        let cursor = sample_cursor();
        let encoded = cursor.encode();
        let decoded = Cursor::decode(&encoded).unwrap();
        assert_eq!(cursor, decoded);
    }

    #[test]
    fn encoding_is_byte_stable_across_map_insertion_order() {
        let mut a = BTreeMap::new();
        a.insert("z".to_string(), AttributeValue::S("1".into()));
        a.insert("a".to_string(), AttributeValue::S("2".into()));
        let mut b = BTreeMap::new();
        b.insert("a".to_string(), AttributeValue::S("2".into()));
        b.insert("z".to_string(), AttributeValue::S("1".into()));
        assert_eq!(Cursor::new(a).encode(), Cursor::new(b).encode());
    }

    #[test]
    fn unknown_variant_fails_to_decode() {
        let json = r#"{"lastKey":{"pk":{"WAT":"x"}}}"#;
        let encoded = URL_SAFE_NO_PAD.encode(json.as_bytes());
        assert!(Cursor::decode(&encoded).is_err());
    }

    #[test]
    fn garbage_input_fails_to_decode() {
        assert!(Cursor::decode("not-valid-base64url!!!").is_err());
    }
}
