//! The external store collaborator contract. Production code wires this to
//! `aws-sdk-dynamodb`; tests wire it to an in-memory fake in
//! `tabletheory-test-utils`. Kept trait-based so the executor never needs
//! the real SDK to be exercised.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tabletheory_core::AttributeValue;

use crate::cancellation::CancellationSignal;

pub type AttributeMap = BTreeMap<String, AttributeValue>;

#[derive(Debug, Clone)]
pub struct GetRequest {
    pub table_name: String,
    pub key: AttributeMap,
    pub index_name: Option<String>,
    pub consistent_read: bool,
    pub projection_expression: Option<String>,
    pub expression_attribute_names: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct GetResponse {
    pub item: Option<AttributeMap>,
}

#[derive(Debug, Clone)]
pub struct PutRequest {
    pub table_name: String,
    pub item: AttributeMap,
    pub condition_expression: Option<String>,
    pub expression_attribute_names: BTreeMap<String, String>,
    pub expression_attribute_values: BTreeMap<String, AttributeValue>,
}

#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub table_name: String,
    pub key: AttributeMap,
    pub update_expression: String,
    pub condition_expression: Option<String>,
    pub expression_attribute_names: BTreeMap<String, String>,
    pub expression_attribute_values: BTreeMap<String, AttributeValue>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateResponse {
    pub attributes: Option<AttributeMap>,
}

#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub table_name: String,
    pub key: AttributeMap,
    pub condition_expression: Option<String>,
    pub expression_attribute_names: BTreeMap<String, String>,
    pub expression_attribute_values: BTreeMap<String, AttributeValue>,
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub table_name: String,
    pub index_name: Option<String>,
    pub key_condition_expression: String,
    pub filter_expression: Option<String>,
    pub projection_expression: Option<String>,
    pub expression_attribute_names: BTreeMap<String, String>,
    pub expression_attribute_values: BTreeMap<String, AttributeValue>,
    pub consistent_read: bool,
    pub limit: Option<u32>,
    pub scan_forward: bool,
    pub exclusive_start_key: Option<AttributeMap>,
}

#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub table_name: String,
    pub index_name: Option<String>,
    pub filter_expression: Option<String>,
    pub projection_expression: Option<String>,
    pub expression_attribute_names: BTreeMap<String, String>,
    pub expression_attribute_values: BTreeMap<String, AttributeValue>,
    pub consistent_read: bool,
    pub limit: Option<u32>,
    pub exclusive_start_key: Option<AttributeMap>,
    pub segment: Option<u32>,
    pub total_segments: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct PageResponse {
    pub items: Vec<AttributeMap>,
    pub last_evaluated_key: Option<AttributeMap>,
}

#[derive(Debug, Clone)]
pub struct BatchGetRequest {
    pub table_name: String,
    pub keys: Vec<AttributeMap>,
    pub consistent_read: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BatchGetResponse {
    pub items: Vec<AttributeMap>,
    pub unprocessed_keys: Vec<AttributeMap>,
}

#[derive(Debug, Clone)]
pub enum BatchWriteOp {
    Put(AttributeMap),
    Delete(AttributeMap),
}

#[derive(Debug, Clone)]
pub struct BatchWriteRequest {
    pub table_name: String,
    pub operations: Vec<BatchWriteOp>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchWriteResponse {
    pub unprocessed: Vec<BatchWriteOp>,
}

#[derive(Debug, Clone)]
pub enum TransactWriteItem {
    Put {
        table_name: String,
        item: AttributeMap,
        condition_expression: Option<String>,
        expression_attribute_names: BTreeMap<String, String>,
        expression_attribute_values: BTreeMap<String, AttributeValue>,
    },
    Update {
        table_name: String,
        key: AttributeMap,
        update_expression: String,
        condition_expression: Option<String>,
        expression_attribute_names: BTreeMap<String, String>,
        expression_attribute_values: BTreeMap<String, AttributeValue>,
    },
    Delete {
        table_name: String,
        key: AttributeMap,
        condition_expression: Option<String>,
        expression_attribute_names: BTreeMap<String, String>,
        expression_attribute_values: BTreeMap<String, AttributeValue>,
    },
    ConditionCheck {
        table_name: String,
        key: AttributeMap,
        condition_expression: String,
        expression_attribute_names: BTreeMap<String, String>,
        expression_attribute_values: BTreeMap<String, AttributeValue>,
    },
}

impl TransactWriteItem {
    pub fn kind(&self) -> &'static str {
        match self {
            TransactWriteItem::Put { .. } => "Put",
            TransactWriteItem::Update { .. } => "Update",
            TransactWriteItem::Delete { .. } => "Delete",
            TransactWriteItem::ConditionCheck { .. } => "ConditionCheck",
        }
    }
}

/// One cancelled transact item's reason, as reported by the store.
#[derive(Debug, Clone)]
pub struct CancellationReason {
    pub operation_index: usize,
    pub code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingMode {
    PayPerRequest,
    Provisioned,
}

#[derive(Debug, Clone, Copy)]
pub struct ProvisionedThroughput {
    pub read_capacity_units: i64,
    pub write_capacity_units: i64,
}

#[derive(Debug, Clone)]
pub struct CreateTableRequest {
    pub table_name: String,
    pub billing_mode: BillingMode,
    pub throughput: Option<ProvisionedThroughput>,
    pub schema: std::sync::Arc<tabletheory_core::Schema>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Creating,
    Active,
    Updating,
    Deleting,
}

#[derive(Debug, Clone)]
pub struct TableDescription {
    pub table_name: String,
    pub status: TableStatus,
}

/// A store-level failure. Retryable failures are distinguished so the
/// batch/transact engines know whether to back off and retry or surface
/// immediately.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store request throttled")]
    Throttled,
    #[error("conditional check failed")]
    ConditionalCheckFailed,
    #[error("resource not found")]
    ResourceNotFound,
    #[error("transaction cancelled: {0:?}")]
    TransactionCancelled(Vec<CancellationReason>),
    #[error("operation cancelled")]
    Cancelled,
    #[error("store error: {0}")]
    Other(String),
}

/// The store operations the Query/Mutation Core, Batch & Transaction
/// Engine, and Schema Lifecycle compile descriptors against. Exactly the
/// surface named in the external-interfaces contract: every call takes a
/// descriptor and a cancellation signal.
#[async_trait]
pub trait StoreClient: Send + Sync {
    async fn get(&self, req: GetRequest, cancel: &CancellationSignal) -> Result<GetResponse, StoreError>;
    async fn put(&self, req: PutRequest, cancel: &CancellationSignal) -> Result<(), StoreError>;
    async fn update(
        &self,
        req: UpdateRequest,
        cancel: &CancellationSignal,
    ) -> Result<UpdateResponse, StoreError>;
    async fn delete(&self, req: DeleteRequest, cancel: &CancellationSignal) -> Result<(), StoreError>;
    async fn query(&self, req: QueryRequest, cancel: &CancellationSignal) -> Result<PageResponse, StoreError>;
    async fn scan(&self, req: ScanRequest, cancel: &CancellationSignal) -> Result<PageResponse, StoreError>;
    async fn batch_get(
        &self,
        req: BatchGetRequest,
        cancel: &CancellationSignal,
    ) -> Result<BatchGetResponse, StoreError>;
    async fn batch_write(
        &self,
        req: BatchWriteRequest,
        cancel: &CancellationSignal,
    ) -> Result<BatchWriteResponse, StoreError>;
    async fn transact_write(
        &self,
        items: Vec<TransactWriteItem>,
        cancel: &CancellationSignal,
    ) -> Result<(), StoreError>;
    async fn create_table(
        &self,
        req: CreateTableRequest,
        cancel: &CancellationSignal,
    ) -> Result<(), StoreError>;
    async fn describe_table(
        &self,
        table_name: &str,
        cancel: &CancellationSignal,
    ) -> Result<TableDescription, StoreError>;
    async fn delete_table(&self, table_name: &str, cancel: &CancellationSignal) -> Result<(), StoreError>;
    async fn update_time_to_live(
        &self,
        table_name: &str,
        attribute_name: &str,
        enabled: bool,
        cancel: &CancellationSignal,
    ) -> Result<(), StoreError>;
}
