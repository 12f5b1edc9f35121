//! Error taxonomy for TableTheory operations.
//!
//! Per-concern error enums aggregated under one top-level error via
//! `#[from]`, so callers can match narrowly or broadly.

use thiserror::Error;

/// Errors from schema registration/validation (Model Registry).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("schema {table} declares no partition key")]
    MissingPartitionKey { table: String },

    #[error("schema {table} declares more than one partition key: {fields:?}")]
    DuplicatePartitionKey { table: String, fields: Vec<String> },

    #[error("schema {table} declares more than one sort key: {fields:?}")]
    DuplicateSortKey { table: String, fields: Vec<String> },

    #[error("duplicate store-attribute name {attribute} on schema {table}")]
    DuplicateAttributeName { table: String, attribute: String },

    #[error("encrypted field {field} on schema {table} may not be a key attribute")]
    EncryptedFieldIsKey { table: String, field: String },

    #[error(
        "schema {table} has encrypted fields but no encryption key identifier was configured on the session"
    )]
    EncryptionNotConfigured { table: String },

    #[error("schema {table} declares more than one {role} field: {fields:?}")]
    DuplicateLifecycleRole {
        table: String,
        role: &'static str,
        fields: Vec<String>,
    },

    #[error("TTL field {field} on schema {table} must be numeric or time-convertible")]
    InvalidTtlField { table: String, field: String },

    #[error("unrecognized tag directive '{directive}' on field {field} of schema {table}")]
    UnrecognizedDirective {
        table: String,
        field: String,
        directive: String,
    },

    #[error("local secondary index {index} on schema {table} must share the table partition key")]
    LsiPartitionKeyMismatch { table: String, index: String },

    #[error("index {index} on schema {table} has conflicting {position} attributes")]
    DuplicateIndexKey {
        table: String,
        index: String,
        position: &'static str,
    },
}

/// Errors from the Expression Builder / Index Selector.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExpressionError {
    #[error("operator {operator} is not valid in this expression position")]
    InvalidOperator { operator: String },

    #[error("IN predicate accepts at most 100 values, got {count}")]
    TooManyInValues { count: usize },

    #[error("duplicate placeholder key {key} from merged raw expression fragment")]
    DuplicatePlaceholder { key: String },

    #[error("update expression is empty after compilation")]
    EmptyUpdateExpression,

    #[error("scan segment {segment} out of range for total segments {total}")]
    InvalidScanSegment { segment: u32, total: u32 },

    #[error("malformed cursor")]
    MalformedCursor,

    #[error("missing bound value reference for placeholder {placeholder}")]
    MissingBoundValue { placeholder: String },
}

/// Errors from the Encryption Service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncryptionError {
    #[error("encryption is not configured: schema has encrypted fields but no key id on session")]
    NotConfigured,

    #[error("invalid encrypted envelope for attribute {attr}: {reason}")]
    InvalidEnvelope { attr: String, reason: String },

    #[error("attribute {attr} is encrypted and cannot appear in a filter or condition predicate")]
    FieldNotQueryable { attr: String },

    #[error("KMS returned an invalid data key for key id {key_id}: {reason}")]
    InvalidDataKey { key_id: String, reason: String },

    #[error("decryption failed for attribute {attr}")]
    DecryptionFailed { attr: String },

    #[error("unsupported update expression shape for encrypted attribute {attr}: {reason}")]
    UnsupportedUpdateShape { attr: String, reason: String },

    #[error("KMS error: {0}")]
    Kms(String),
}

/// A lease-contention error from the Lease Manager.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LeaseError {
    #[error("lease for {key} is already held")]
    Held { key: String },

    #[error("lease for {key} is not owned by the supplied token")]
    NotOwned { key: String },
}

/// A single operation's failure reason inside a cancelled transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionError {
    pub operation_index: usize,
    pub operation: String,
    pub reason: String,
    pub is_condition_failure: bool,
}

impl std::fmt::Display for TransactionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "transact operation {} ({}) failed: {}",
            self.operation_index, self.operation, self.reason
        )
    }
}

impl std::error::Error for TransactionError {}

/// Injection-pattern guard failure on a field/operator/table/index name.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("security validation failed for {kind}: {detail}")]
pub struct SecurityValidationError {
    pub kind: String,
    pub detail: String,
}

/// Top-level error for all TableTheory operations.
#[derive(Debug, Clone, Error)]
pub enum TableTheoryError {
    #[error("item not found")]
    ItemNotFound,

    #[error("conditional write failed")]
    ConditionFailed,

    #[error("table not found")]
    TableNotFound,

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error(transparent)]
    Lease(#[from] LeaseError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Security(#[from] SecurityValidationError),

    #[error(transparent)]
    Codec(#[from] crate::attribute::CodecError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("store client error: {0}")]
    Store(String),
}

pub type TableTheoryResult<T> = Result<T, TableTheoryError>;
