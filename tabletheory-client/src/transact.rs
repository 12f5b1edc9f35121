//! TransactWrite builder and cancellation-reason mapping. Up to 100
//! operations commit atomically or not at all; a cancelled transaction's
//! per-operation reasons are mapped back to a `TransactionError`, with the
//! `ConditionalCheckFailed` case additionally classified as
//! `TableTheoryError::ConditionFailed` for pattern-matching callers.

use tabletheory_core::{TableTheoryError, TableTheoryResult, TransactionError};

use crate::cancellation::CancellationSignal;
use crate::store::{StoreClient, StoreError, TransactWriteItem};

const MAX_TRANSACT_ITEMS: usize = 100;

/// Accumulates up to 100 write items for one atomic transaction.
#[derive(Debug, Clone, Default)]
pub struct TransactWriteBuilder {
    items: Vec<TransactWriteItem>,
}

impl TransactWriteBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, item: TransactWriteItem) -> TableTheoryResult<Self> {
        if self.items.len() >= MAX_TRANSACT_ITEMS {
            return Err(TableTheoryError::Transaction(TransactionError {
                operation_index: self.items.len(),
                operation: item.kind().to_string(),
                reason: "transaction exceeds the 100-operation limit".to_string(),
                is_condition_failure: false,
            }));
        }
        self.items.push(item);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Execute every accumulated item atomically. On a store-reported
/// cancellation, the first offending operation is surfaced as a
/// `TransactionError`; a `ConditionalCheckFailed` reason is additionally
/// exposed as `TableTheoryError::ConditionFailed`-classified via
/// `TransactionError::is_condition_failure`.
pub async fn execute(
    store: &dyn StoreClient,
    builder: TransactWriteBuilder,
    cancel: &CancellationSignal,
) -> TableTheoryResult<()> {
    if builder.items.is_empty() {
        return Ok(());
    }
    if builder.items.len() > MAX_TRANSACT_ITEMS {
        return Err(TableTheoryError::Transaction(TransactionError {
            operation_index: MAX_TRANSACT_ITEMS,
            operation: "TransactWrite".to_string(),
            reason: "transaction exceeds the 100-operation limit".to_string(),
            is_condition_failure: false,
        }));
    }

    let kinds: Vec<String> = builder.items.iter().map(|i| i.kind().to_string()).collect();
    match store.transact_write(builder.items, cancel).await {
        Ok(()) => Ok(()),
        Err(StoreError::TransactionCancelled(reasons)) => {
            let first = reasons.into_iter().next();
            match first {
                Some(reason) => {
                    let operation = kinds.get(reason.operation_index).cloned().unwrap_or_default();
                    let is_condition_failure = reason.code == "ConditionalCheckFailed";
                    Err(TableTheoryError::Transaction(TransactionError {
                        operation_index: reason.operation_index,
                        operation,
                        reason: reason.code,
                        is_condition_failure,
                    }))
                }
                None => Err(TableTheoryError::Cancelled),
            }
        }
        Err(StoreError::Cancelled) => Err(TableTheoryError::Cancelled),
        Err(StoreError::ConditionalCheckFailed) => Err(TableTheoryError::ConditionFailed),
        Err(StoreError::Throttled) => Err(TableTheoryError::Store("request throttled".to_string())),
        Err(StoreError::ResourceNotFound) => Err(TableTheoryError::TableNotFound),
        Err(StoreError::Other(detail)) => Err(TableTheoryError::Store(detail)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use tabletheory_core::AttributeValue;

    use crate::store::{
        BatchGetRequest, BatchGetResponse, BatchWriteRequest, BatchWriteResponse, CancellationReason,
        CreateTableRequest, DeleteRequest, GetRequest, GetResponse, PageResponse, PutRequest, QueryRequest,
        ScanRequest, TableDescription, UpdateRequest, UpdateResponse,
    };

    struct CancellingStore;

    #[async_trait]
    impl StoreClient for CancellingStore {
        async fn get(&self, _req: GetRequest, _cancel: &CancellationSignal) -> Result<GetResponse, StoreError> {
            unimplemented!()
        }
        async fn put(&self, _req: PutRequest, _cancel: &CancellationSignal) -> Result<(), StoreError> {
            unimplemented!()
        }
        async fn update(&self, _req: UpdateRequest, _cancel: &CancellationSignal) -> Result<UpdateResponse, StoreError> {
            unimplemented!()
        }
        async fn delete(&self, _req: DeleteRequest, _cancel: &CancellationSignal) -> Result<(), StoreError> {
            unimplemented!()
        }
        async fn query(&self, _req: QueryRequest, _cancel: &CancellationSignal) -> Result<PageResponse, StoreError> {
            unimplemented!()
        }
        async fn scan(&self, _req: ScanRequest, _cancel: &CancellationSignal) -> Result<PageResponse, StoreError> {
            unimplemented!()
        }
        async fn batch_get(
            &self,
            _req: BatchGetRequest,
            _cancel: &CancellationSignal,
        ) -> Result<BatchGetResponse, StoreError> {
            unimplemented!()
        }
        async fn batch_write(
            &self,
            _req: BatchWriteRequest,
            _cancel: &CancellationSignal,
        ) -> Result<BatchWriteResponse, StoreError> {
            unimplemented!()
        }
        async fn transact_write(
            &self,
            _items: Vec<TransactWriteItem>,
            _cancel: &CancellationSignal,
        ) -> Result<(), StoreError> {
            Err(StoreError::TransactionCancelled(vec![CancellationReason {
                operation_index: 1,
                code: "ConditionalCheckFailed".to_string(),
            }]))
        }
        async fn create_table(&self, _req: CreateTableRequest, _cancel: &CancellationSignal) -> Result<(), StoreError> {
            unimplemented!()
        }
        async fn describe_table(
            &self,
            _table_name: &str,
            _cancel: &CancellationSignal,
        ) -> Result<TableDescription, StoreError> {
            unimplemented!()
        }
        async fn delete_table(&self, _table_name: &str, _cancel: &CancellationSignal) -> Result<(), StoreError> {
            unimplemented!()
        }
        async fn update_time_to_live(
            &self,
            _table_name: &str,
            _attribute_name: &str,
            _enabled: bool,
            _cancel: &CancellationSignal,
        ) -> Result<(), StoreError> {
            unimplemented!()
        }
    }

    fn sample_key() -> BTreeMap<String, AttributeValue> {
        let mut key = BTreeMap::new();
        key.insert("id".to_string(), AttributeValue::S("b1".to_string()));
        key
    }

    #[tokio::test]
    async fn cancelled_transaction_maps_to_transaction_error_with_condition_flag() {
        let builder = TransactWriteBuilder::new()
            .push(TransactWriteItem::Put {
                table_name: "bookmarks".to_string(),
                item: sample_key(),
                condition_expression: None,
                expression_attribute_names: BTreeMap::new(),
                expression_attribute_values: BTreeMap::new(),
            })
            .unwrap()
            .push(TransactWriteItem::Update {
                table_name: "quota".to_string(),
                key: sample_key(),
                update_expression: "ADD #n0 :v0".to_string(),
                condition_expression: Some("#n1 > :v1".to_string()),
                expression_attribute_names: BTreeMap::new(),
                expression_attribute_values: BTreeMap::new(),
            })
            .unwrap();

        let store = CancellingStore;
        let err = execute(&store, builder, &CancellationSignal::never()).await.unwrap_err();
        match err {
            TableTheoryError::Transaction(e) => {
                assert_eq!(e.operation_index, 1);
                assert_eq!(e.operation, "Update");
                assert!(e.is_condition_failure);
            }
            other => panic!("expected TableTheoryError::Transaction, got {other:?}"),
        }
    }

    #[test]
    fn rejects_more_than_one_hundred_operations() {
        let mut builder = TransactWriteBuilder::new();
        for _ in 0..MAX_TRANSACT_ITEMS {
            builder = builder
                .push(TransactWriteItem::ConditionCheck {
                    table_name: "t".to_string(),
                    key: sample_key(),
                    condition_expression: "attribute_exists(#n0)".to_string(),
                    expression_attribute_names: BTreeMap::new(),
                    expression_attribute_values: BTreeMap::new(),
                })
                .unwrap();
        }
        let err = builder
            .push(TransactWriteItem::ConditionCheck {
                table_name: "t".to_string(),
                key: sample_key(),
                condition_expression: "attribute_exists(#n0)".to_string(),
                expression_attribute_names: BTreeMap::new(),
                expression_attribute_values: BTreeMap::new(),
            })
            .unwrap_err();
        assert!(matches!(err, TableTheoryError::Transaction(_)));
    }
}
