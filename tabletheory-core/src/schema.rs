//! Schema data types — the canonical, validated shape a `Model` registers
//! into. Pure data: no parsing or validation logic lives here, only the
//! structures the derive macro emits raw tags into and the registry
//! validates and fills in.

use std::collections::BTreeMap;

/// One `#[tabletheory(...)]` field directive as emitted by the derive macro,
/// before the registry has parsed and validated it into `FieldMetadata`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFieldTag {
    pub field_name: &'static str,
    pub directives: &'static [&'static str],
    /// Stringified Rust field type (e.g. `"String"`, `"Vec < u8 >"`), used by
    /// the registry to infer a `ScalarKind` when one isn't forced by a
    /// directive.
    pub type_hint: &'static str,
}

/// Contract a `#[derive(Model)]`-annotated type implements: the compile-time
/// extraction half of the Model Registry pipeline. The derive macro only
/// extracts raw tag tokens; parsing them into a validated `Schema` is the
/// registry's job, not the macro's.
pub trait Model: Send + Sync + 'static {
    /// Explicit `#[table(name = "...")]` override, or `None` to fall back to
    /// a snake_case conversion of the struct name.
    fn raw_table_name() -> Option<&'static str>;

    /// One entry per struct field carrying a `#[tabletheory(...)]` attribute,
    /// plus an entry (with empty directives) for every other field so the
    /// registry can still see it exists.
    fn raw_field_tags() -> &'static [RawFieldTag];
}

/// Key position within a composite primary or secondary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPosition {
    Partition,
    Sort,
}

/// A field's membership in a named secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMembership {
    pub index_name: String,
    pub key_position: KeyPosition,
}

/// Index kind: global (its own partition space) or local (shares the table's
/// partition key, alternate sort key only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    Global,
    Local,
}

/// What a secondary index projects onto its own copy of the item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    All,
    KeysOnly,
    Include(Vec<String>),
}

/// A secondary index declared on a `Schema`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub name: String,
    pub index_type: IndexType,
    pub partition_key_attr: String,
    pub sort_key_attr: Option<String>,
    pub projection: Projection,
}

use crate::attribute::ScalarKind;

/// Per-field metadata computed by the Model Registry.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMetadata {
    pub name: String,
    pub store_attribute_name: String,
    pub scalar_kind: ScalarKind,
    pub is_partition_key: bool,
    pub is_sort_key: bool,
    pub is_created_at: bool,
    pub is_updated_at: bool,
    pub is_version: bool,
    pub is_ttl: bool,
    pub is_encrypted: bool,
    pub is_set: bool,
    pub omit_empty: bool,
    pub index_memberships: Vec<IndexMembership>,
}

impl FieldMetadata {
    pub fn is_key_attribute(&self) -> bool {
        self.is_partition_key
            || self.is_sort_key
            || !self.index_memberships.is_empty()
    }
}

/// The validated, cached schema for a registered model type.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    /// Schema-format marker for the derive macro's tag format; bumped only
    /// if the raw tag grammar changes in an incompatible way.
    pub version: u32,
    pub table_name: String,
    pub partition_key: String,
    pub sort_key: Option<String>,
    pub indexes: Vec<Index>,
    /// field name -> metadata
    pub fields: BTreeMap<String, FieldMetadata>,
    /// store-attribute name -> field name
    pub attribute_to_field: BTreeMap<String, String>,
    pub created_at_field: Option<String>,
    pub updated_at_field: Option<String>,
    pub version_field: Option<String>,
    pub ttl_field: Option<String>,
}

impl Schema {
    pub fn field_by_attribute(&self, attribute: &str) -> Option<&FieldMetadata> {
        self.attribute_to_field
            .get(attribute)
            .and_then(|name| self.fields.get(name))
    }

    pub fn is_encrypted_attribute(&self, attribute: &str) -> bool {
        self.field_by_attribute(attribute)
            .map(|f| f.is_encrypted)
            .unwrap_or(false)
    }

    pub fn key_attribute_names(&self) -> Vec<&str> {
        let mut out = vec![self.partition_key.as_str()];
        if let Some(sk) = &self.sort_key {
            out.push(sk.as_str());
        }
        out
    }

    pub fn index_by_name(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }
}
