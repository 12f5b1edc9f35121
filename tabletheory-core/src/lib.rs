//! TableTheory Core - Pure Data Types
//!
//! Attribute codec, schema data types, the error taxonomy, the cursor codec,
//! and the encrypted-envelope shape. No business logic: registration,
//! expression compilation, and encryption orchestration live in their own
//! crates.

mod attribute;
mod cursor;
mod envelope;
mod error;
mod schema;

pub use attribute::{
    attribute_value_to_json, json_to_attribute_value, AttributeValue, CodecError, ScalarKind,
};
pub use cursor::{Cursor, SortDirection};
pub use envelope::{aad_for_attribute, EncryptedEnvelope, ENVELOPE_VERSION};
pub use error::{
    EncryptionError, ExpressionError, LeaseError, ModelError, SecurityValidationError,
    TableTheoryError, TableTheoryResult, TransactionError,
};
pub use schema::{
    FieldMetadata, Index, IndexMembership, IndexType, KeyPosition, Model, Projection, RawFieldTag,
    Schema,
};
