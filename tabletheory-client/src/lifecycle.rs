//! Schema Lifecycle — create/describe/ensure/delete remote tables derived
//! from a `Schema`, with waiters for table-state transitions. Idempotent
//! "ensure the backing store matches the declared shape" entry points built
//! on top of a thin client trait, against the store's
//! `CreateTableRequest`/`TableDescription` surface instead of SQL DDL.

use std::sync::Arc;
use std::time::Duration;

use tabletheory_core::{Schema, TableTheoryError, TableTheoryResult};
use tracing::{debug, warn};

use crate::cancellation::CancellationSignal;
use crate::store::{
    BillingMode, CreateTableRequest, ProvisionedThroughput, StoreClient, StoreError, TableStatus,
};

/// Options governing table creation:
/// `CreateTable(schema, {billingMode, throughput?, waitForActive})`.
#[derive(Debug, Clone)]
pub struct CreateTableOptions {
    pub billing_mode: BillingMode,
    pub throughput: Option<ProvisionedThroughput>,
    pub wait_for_active: bool,
}

impl Default for CreateTableOptions {
    fn default() -> Self {
        Self {
            billing_mode: BillingMode::PayPerRequest,
            throughput: None,
            wait_for_active: true,
        }
    }
}

/// Options governing `DeleteTable`.
#[derive(Debug, Clone, Default)]
pub struct DeleteTableOptions {
    pub ignore_missing: bool,
}

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const POLL_MAX_ATTEMPTS: usize = 50;

fn validate_schema(schema: &Schema, options: &CreateTableOptions) -> TableTheoryResult<()> {
    if matches!(options.billing_mode, BillingMode::Provisioned) && options.throughput.is_none() {
        return Err(TableTheoryError::Store(
            "PROVISIONED billing mode requires an explicit throughput".to_string(),
        ));
    }
    for index in &schema.indexes {
        if index.index_type == tabletheory_core::IndexType::Local
            && index.partition_key_attr != schema.partition_key
        {
            return Err(TableTheoryError::Store(format!(
                "local secondary index {} must share the table's partition key {}, found {}",
                index.name, schema.partition_key, index.partition_key_attr
            )));
        }
    }
    Ok(())
}

fn map_store_error(err: StoreError) -> TableTheoryError {
    match err {
        StoreError::ResourceNotFound => TableTheoryError::TableNotFound,
        StoreError::Cancelled => TableTheoryError::Cancelled,
        StoreError::ConditionalCheckFailed => TableTheoryError::ConditionFailed,
        StoreError::Throttled => TableTheoryError::Store("request throttled".to_string()),
        StoreError::TransactionCancelled(_) => {
            TableTheoryError::Store("unexpected transaction cancellation".to_string())
        }
        StoreError::Other(detail) => TableTheoryError::Store(detail),
    }
}

/// Issues the store's table-create request for `schema`, rejecting invalid
/// combinations before any I/O: an LSI whose partition key differs from the
/// table's, or `PROVISIONED` billing without throughput.
pub async fn create_table(
    store: &dyn StoreClient,
    schema: Arc<Schema>,
    options: CreateTableOptions,
    cancel: &CancellationSignal,
) -> TableTheoryResult<()> {
    validate_schema(&schema, &options)?;

    let table_name = schema.table_name.clone();
    debug!(table = %table_name, "creating table");
    store
        .create_table(
            CreateTableRequest {
                table_name: table_name.clone(),
                billing_mode: options.billing_mode,
                throughput: options.throughput,
                schema,
            },
            cancel,
        )
        .await
        .map_err(map_store_error)?;

    if options.wait_for_active {
        wait_for_status(store, &table_name, TableStatus::Active, cancel).await?;
    }
    Ok(())
}

/// Creates the table if it does not already exist, treating
/// `ResourceNotFound` from `DescribeTable` as the create signal; otherwise a
/// no-op against whatever is already there.
pub async fn ensure_table(
    store: &dyn StoreClient,
    schema: Arc<Schema>,
    options: CreateTableOptions,
    cancel: &CancellationSignal,
) -> TableTheoryResult<()> {
    let table_name = schema.table_name.clone();
    match store.describe_table(&table_name, cancel).await {
        Ok(_) => Ok(()),
        Err(StoreError::ResourceNotFound) => create_table(store, schema, options, cancel).await,
        Err(e) => Err(map_store_error(e)),
    }
}

/// Deletes `table_name`. Under `ignore_missing`, a `ResourceNotFound` from
/// the store is treated as success since the desired end state — no table —
/// already holds.
pub async fn delete_table(
    store: &dyn StoreClient,
    table_name: &str,
    options: DeleteTableOptions,
    cancel: &CancellationSignal,
) -> TableTheoryResult<()> {
    match store.delete_table(table_name, cancel).await {
        Ok(()) => Ok(()),
        Err(StoreError::ResourceNotFound) if options.ignore_missing => Ok(()),
        Err(e) => Err(map_store_error(e)),
    }
}

async fn wait_for_status(
    store: &dyn StoreClient,
    table_name: &str,
    target: TableStatus,
    cancel: &CancellationSignal,
) -> TableTheoryResult<()> {
    for attempt in 0..POLL_MAX_ATTEMPTS {
        if cancel.is_cancelled() {
            return Err(TableTheoryError::Cancelled);
        }
        let description = store
            .describe_table(table_name, cancel)
            .await
            .map_err(map_store_error)?;
        if description.status == target {
            return Ok(());
        }
        warn!(table = %table_name, attempt, status = ?description.status, "waiting for table status");
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    Err(TableTheoryError::Store(format!(
        "table {table_name} did not reach {target:?} after {POLL_MAX_ATTEMPTS} polling attempts"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabletheory_core::{FieldMetadata, IndexMembership, KeyPosition, Projection, ScalarKind};
    use tabletheory_test_utils::InMemoryStoreClient;

    fn minimal_schema() -> Arc<Schema> {
        let mut fields = std::collections::BTreeMap::new();
        fields.insert(
            "pk".to_string(),
            FieldMetadata {
                name: "Pk".to_string(),
                store_attribute_name: "pk".to_string(),
                scalar_kind: ScalarKind::String,
                is_partition_key: true,
                is_sort_key: false,
                is_created_at: false,
                is_updated_at: false,
                is_version: false,
                is_ttl: false,
                is_encrypted: false,
                is_set: false,
                omit_empty: false,
                index_memberships: vec![IndexMembership {
                    index_name: "lsi".to_string(),
                    key_position: KeyPosition::Partition,
                }],
            },
        );
        let mut attribute_to_field = std::collections::BTreeMap::new();
        attribute_to_field.insert("pk".to_string(), "pk".to_string());
        Arc::new(Schema {
            version: 1,
            table_name: "widgets".to_string(),
            partition_key: "pk".to_string(),
            sort_key: None,
            indexes: vec![tabletheory_core::Index {
                name: "lsi".to_string(),
                index_type: tabletheory_core::IndexType::Local,
                partition_key_attr: "pk".to_string(),
                sort_key_attr: None,
                projection: Projection::All,
            }],
            fields,
            attribute_to_field,
            created_at_field: None,
            updated_at_field: None,
            version_field: None,
            ttl_field: None,
        })
    }

    #[tokio::test]
    async fn create_table_waits_for_active() {
        let store = InMemoryStoreClient::new();
        let cancel = CancellationSignal::never();
        create_table(&store, minimal_schema(), CreateTableOptions::default(), &cancel)
            .await
            .unwrap();
        let description = store.describe_table("widgets", &cancel).await.unwrap();
        assert_eq!(description.status, TableStatus::Active);
    }

    #[tokio::test]
    async fn create_table_rejects_mismatched_lsi_partition_key() {
        let store = InMemoryStoreClient::new();
        let cancel = CancellationSignal::never();
        let mut schema = (*minimal_schema()).clone();
        schema.indexes[0].partition_key_attr = "other".to_string();
        let err = create_table(&store, Arc::new(schema), CreateTableOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TableTheoryError::Store(_)));
    }

    #[tokio::test]
    async fn create_table_rejects_provisioned_without_throughput() {
        let store = InMemoryStoreClient::new();
        let cancel = CancellationSignal::never();
        let options = CreateTableOptions {
            billing_mode: BillingMode::Provisioned,
            throughput: None,
            wait_for_active: false,
        };
        let err = create_table(&store, minimal_schema(), options, &cancel).await.unwrap_err();
        assert!(matches!(err, TableTheoryError::Store(_)));
    }

    #[tokio::test]
    async fn ensure_table_creates_when_missing_then_is_a_no_op() {
        let store = InMemoryStoreClient::new();
        let cancel = CancellationSignal::never();
        ensure_table(&store, minimal_schema(), CreateTableOptions::default(), &cancel)
            .await
            .unwrap();
        ensure_table(&store, minimal_schema(), CreateTableOptions::default(), &cancel)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delete_table_ignores_missing_when_requested() {
        let store = InMemoryStoreClient::new();
        let cancel = CancellationSignal::never();
        let options = DeleteTableOptions { ignore_missing: true };
        delete_table(&store, "does-not-exist", options, &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn delete_table_surfaces_missing_without_ignore() {
        let store = InMemoryStoreClient::new();
        let cancel = CancellationSignal::never();
        let err = delete_table(&store, "does-not-exist", DeleteTableOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TableTheoryError::TableNotFound));
    }
}
