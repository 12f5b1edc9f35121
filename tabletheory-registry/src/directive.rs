//! Directive grammar parsing: turns the raw, comma-separated tag tokens the
//! derive macro extracts (`pk`, `sk`, `attr:<name>`, `index:<name>,pk|sk`,
//! `lsi:<name>`, `encrypted`, `set`, `omitempty`, `created_at`, `updated_at`,
//! `version`, `ttl`, `json`, `-`) into a structured per-field intermediate
//! form the registry assembles into a `Schema`.

use tabletheory_core::{IndexMembership, KeyPosition, ModelError, ScalarKind};

#[derive(Debug, Default, Clone)]
pub struct ParsedField {
    pub skip: bool,
    pub is_partition_key: bool,
    pub is_sort_key: bool,
    pub attr_override: Option<String>,
    pub index_memberships: Vec<IndexMembership>,
    pub lsi_names: Vec<String>,
    pub encrypted: bool,
    pub set: bool,
    pub omit_empty: bool,
    pub created_at: bool,
    pub updated_at: bool,
    pub version: bool,
    pub ttl: bool,
    pub json_hint: bool,
}

pub fn parse_directives(
    table: &str,
    field: &str,
    directives: &[&str],
) -> Result<ParsedField, ModelError> {
    let mut parsed = ParsedField::default();

    for raw in directives {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        if raw == "-" {
            parsed.skip = true;
            continue;
        }
        match raw {
            "pk" => parsed.is_partition_key = true,
            "sk" => parsed.is_sort_key = true,
            "encrypted" => parsed.encrypted = true,
            "set" => parsed.set = true,
            "omitempty" => parsed.omit_empty = true,
            "created_at" => parsed.created_at = true,
            "updated_at" => parsed.updated_at = true,
            "version" => parsed.version = true,
            "ttl" => parsed.ttl = true,
            "json" => parsed.json_hint = true,
            other => {
                if let Some(name) = other.strip_prefix("attr:") {
                    parsed.attr_override = Some(name.to_string());
                } else if let Some(name) = other.strip_prefix("lsi:") {
                    parsed.lsi_names.push(name.to_string());
                } else if let Some(rest) = other.strip_prefix("index:") {
                    let (index_name, position) = rest.split_once(',').ok_or_else(|| {
                        ModelError::UnrecognizedDirective {
                            table: table.to_string(),
                            field: field.to_string(),
                            directive: other.to_string(),
                        }
                    })?;
                    let key_position = match position {
                        "pk" => KeyPosition::Partition,
                        "sk" => KeyPosition::Sort,
                        _ => {
                            return Err(ModelError::UnrecognizedDirective {
                                table: table.to_string(),
                                field: field.to_string(),
                                directive: other.to_string(),
                            })
                        }
                    };
                    parsed.index_memberships.push(IndexMembership {
                        index_name: index_name.to_string(),
                        key_position,
                    });
                } else {
                    return Err(ModelError::UnrecognizedDirective {
                        table: table.to_string(),
                        field: field.to_string(),
                        directive: other.to_string(),
                    });
                }
            }
        }
    }

    Ok(parsed)
}

/// Infer a `ScalarKind` from the derive macro's stringified Rust type, the
/// `set` directive, and the `json` directive. `Option<T>` is unwrapped
/// before inference; the optionality itself is tracked separately via
/// `omitempty`/nullability at the codec layer, not in `ScalarKind`.
pub fn infer_scalar_kind(type_hint: &str, is_set: bool, json_hint: bool) -> ScalarKind {
    if json_hint {
        return ScalarKind::Map;
    }

    let compact: String = type_hint.chars().filter(|c| !c.is_whitespace()).collect();
    let inner = unwrap_option(&compact);

    if inner == "Vec<u8>" {
        return if is_set {
            ScalarKind::BinarySet
        } else {
            ScalarKind::Binary
        };
    }

    if let Some(elem) = inner.strip_prefix("Vec<").and_then(|s| s.strip_suffix('>')) {
        return if is_set {
            match elem {
                "String" | "&str" | "str" => ScalarKind::StringSet,
                "i8" | "i16" | "i32" | "i64" | "i128" | "isize" | "u8" | "u16" | "u32" | "u64"
                | "u128" | "usize" | "f32" | "f64" => ScalarKind::NumberSet,
                "Vec<u8>" => ScalarKind::BinarySet,
                _ => ScalarKind::List,
            }
        } else {
            ScalarKind::List
        };
    }

    match inner.as_str() {
        "String" | "&str" | "str" => ScalarKind::String,
        "bool" => ScalarKind::Bool,
        "i8" | "i16" | "i32" | "i64" | "i128" | "isize" | "u8" | "u16" | "u32" | "u64" | "u128"
        | "usize" | "f32" | "f64" => ScalarKind::Number,
        _ => ScalarKind::Map,
    }
}

fn unwrap_option(compact: &str) -> String {
    if let Some(rest) = compact
        .strip_prefix("Option<")
        .and_then(|s| s.strip_suffix('>'))
    {
        rest.to_string()
    } else {
        compact.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_number_for_integers() {
        assert_eq!(infer_scalar_kind("i64", false, false), ScalarKind::Number);
        assert_eq!(
            infer_scalar_kind("Option<i64>", false, false),
            ScalarKind::Number
        );
    }

    #[test]
    fn infers_binary_for_vec_u8() {
        assert_eq!(infer_scalar_kind("Vec<u8>", false, false), ScalarKind::Binary);
    }

    #[test]
    fn infers_string_set_when_set_directive_present() {
        assert_eq!(
            infer_scalar_kind("Vec<String>", true, false),
            ScalarKind::StringSet
        );
        assert_eq!(
            infer_scalar_kind("Vec<String>", false, false),
            ScalarKind::List
        );
    }

    #[test]
    fn json_hint_forces_map() {
        assert_eq!(infer_scalar_kind("String", false, true), ScalarKind::Map);
    }

    #[test]
    fn parses_index_directive() {
        let parsed = parse_directives("t", "f", &["index:byEmail,pk"]).unwrap();
        assert_eq!(parsed.index_memberships.len(), 1);
        assert_eq!(parsed.index_memberships[0].index_name, "byEmail");
        assert_eq!(
            parsed.index_memberships[0].key_position,
            KeyPosition::Partition
        );
    }

    #[test]
    fn rejects_unknown_directive() {
        assert!(parse_directives("t", "f", &["bogus"]).is_err());
    }
}
