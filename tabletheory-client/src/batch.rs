//! Batch & Transaction Engine — BatchGet/BatchWrite chunking, fan-out, and
//! unprocessed-item retry with exponential backoff and jitter.

use std::collections::BTreeMap;

use tabletheory_core::AttributeValue;

use crate::cancellation::CancellationSignal;
use crate::retry::{BackoffPolicy, FanOutGate};
use crate::store::{
    BatchGetRequest, BatchGetResponse, BatchWriteOp, BatchWriteRequest, BatchWriteResponse, StoreClient, StoreError,
};

const BATCH_GET_CHUNK: usize = 100;
const BATCH_WRITE_CHUNK: usize = 25;

fn chunked<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    items.chunks(size.max(1)).map(|c| c.to_vec()).collect()
}

/// Outcome of a `batch_get` call: every item found, and the keys still
/// unprocessed after exhausting retries.
#[derive(Debug, Clone, Default)]
pub struct BatchGetOutcome {
    pub items: Vec<BTreeMap<String, AttributeValue>>,
    pub unprocessed_keys: Vec<BTreeMap<String, AttributeValue>>,
}

/// Fetch every key in `keys`, chunking into groups of at most 100,
/// fanning out through `gate`, and retrying unprocessed keys up to
/// `retry.max_attempts` times with backoff between rounds.
pub async fn batch_get(
    store: &dyn StoreClient,
    table_name: &str,
    keys: Vec<BTreeMap<String, AttributeValue>>,
    consistent_read: bool,
    gate: &FanOutGate,
    retry: &BackoffPolicy,
    cancel: &CancellationSignal,
) -> Result<BatchGetOutcome, StoreError> {
    let mut pending = keys;
    let mut items = Vec::new();
    let mut attempt = 0u32;

    loop {
        if pending.is_empty() || cancel.is_cancelled() {
            break;
        }
        let chunks = chunked(&pending, BATCH_GET_CHUNK);
        let mut next_pending = Vec::new();

        let dispatches = chunks.into_iter().map(|chunk| async move {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            match gate.try_acquire() {
                Ok(_permit) => store
                    .batch_get(
                        BatchGetRequest {
                            table_name: table_name.to_string(),
                            keys: chunk,
                            consistent_read,
                        },
                        cancel,
                    )
                    .await
                    .map(Some),
                // Admission denied this round: retry the whole chunk next round.
                Err(_) => Ok(Some(BatchGetResponse {
                    items: Vec::new(),
                    unprocessed_keys: chunk,
                })),
            }
        });
        let results: Vec<Result<Option<BatchGetResponse>, StoreError>> = futures_util::future::join_all(dispatches).await;
        for result in results {
            if let Some(response) = result? {
                items.extend(response.items);
                next_pending.extend(response.unprocessed_keys);
            }
        }
        pending = next_pending;
        if pending.is_empty() {
            break;
        }
        attempt += 1;
        if attempt >= retry.max_attempts {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(retry.delay_for_attempt(attempt)) => {}
            _ = cancel.cancelled() => break,
        }
    }

    Ok(BatchGetOutcome {
        items,
        unprocessed_keys: pending,
    })
}

/// Put/delete every operation in `operations`, chunking into groups of at
/// most 25, and retrying unprocessed operations up to `retry.max_attempts`
/// times. Returns whatever remains unprocessed after the final attempt.
pub async fn batch_write(
    store: &dyn StoreClient,
    table_name: &str,
    operations: Vec<BatchWriteOp>,
    gate: &FanOutGate,
    retry: &BackoffPolicy,
    cancel: &CancellationSignal,
) -> Result<Vec<BatchWriteOp>, StoreError> {
    let mut pending = operations;
    let mut attempt = 0u32;

    loop {
        if pending.is_empty() || cancel.is_cancelled() {
            break;
        }
        let chunks = chunked(&pending, BATCH_WRITE_CHUNK);
        let mut next_pending = Vec::new();

        let dispatches = chunks.into_iter().map(|chunk| async move {
            if cancel.is_cancelled() {
                return Ok(chunk);
            }
            match gate.try_acquire() {
                Ok(_permit) => {
                    let response = store
                        .batch_write(
                            BatchWriteRequest {
                                table_name: table_name.to_string(),
                                operations: chunk,
                            },
                            cancel,
                        )
                        .await?;
                    Ok(response.unprocessed)
                }
                // Admission denied this round: retry the whole chunk next round.
                Err(_) => Ok(chunk),
            }
        });
        let results: Vec<Result<Vec<BatchWriteOp>, StoreError>> = futures_util::future::join_all(dispatches).await;
        for result in results {
            next_pending.extend(result?);
        }
        pending = next_pending;
        if pending.is_empty() {
            break;
        }
        attempt += 1;
        if attempt >= retry.max_attempts {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(retry.delay_for_attempt(attempt)) => {}
            _ = cancel.cancelled() => break,
        }
    }

    Ok(pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tabletheory_core::AttributeValue;

    use crate::store::{
        CreateTableRequest, DeleteRequest, GetRequest, GetResponse, PageResponse, PutRequest, QueryRequest,
        ScanRequest, TableDescription, TransactWriteItem, UpdateRequest, UpdateResponse,
    };

    struct HalfUnprocessedStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StoreClient for HalfUnprocessedStore {
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
            req: BatchGetRequest,
            _cancel: &CancellationSignal,
        ) -> Result<BatchGetResponse, StoreError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let mid = req.keys.len() / 2;
            let (found, unprocessed) = if call == 0 {
                (req.keys[..mid].to_vec(), req.keys[mid..].to_vec())
            } else {
                (req.keys, Vec::new())
            };
            Ok(BatchGetResponse {
                items: found,
                unprocessed_keys: unprocessed,
            })
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
            unimplemented!()
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

    fn keys(n: usize) -> Vec<BTreeMap<String, AttributeValue>> {
        (0..n)
            .map(|i| {
                let mut m = BTreeMap::new();
                m.insert("id".to_string(), AttributeValue::S(format!("k{i}")));
                m
            })
            .collect()
    }

    #[tokio::test]
    async fn batch_get_retries_unprocessed_until_complete() {
        let store = HalfUnprocessedStore {
            calls: AtomicUsize::new(0),
        };
        let gate = FanOutGate::new(4);
        let retry = BackoffPolicy {
            initial: std::time::Duration::from_millis(1),
            factor: 1.0,
            max: std::time::Duration::from_millis(5),
            max_attempts: 5,
        };
        let outcome = batch_get(
            &store,
            "users",
            keys(50),
            false,
            &gate,
            &retry,
            &CancellationSignal::never(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.items.len(), 50);
        assert!(outcome.unprocessed_keys.is_empty());
    }

    #[tokio::test]
    async fn batch_get_surfaces_unprocessed_when_attempts_exhausted() {
        let store = HalfUnprocessedStore {
            calls: AtomicUsize::new(0),
        };
        let gate = FanOutGate::new(4);
        let retry = BackoffPolicy {
            initial: std::time::Duration::from_millis(1),
            factor: 1.0,
            max: std::time::Duration::from_millis(5),
            max_attempts: 1,
        };
        let outcome = batch_get(
            &store,
            "users",
            keys(50),
            false,
            &gate,
            &retry,
            &CancellationSignal::never(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.items.len(), 25);
        assert_eq!(outcome.unprocessed_keys.len(), 25);
    }
}
