//! Lease Manager — distributed lease acquisition/refresh/release over a
//! key-addressable item, used by external cache layers to serialize
//! cache-regeneration. Built on conditional writes against the store
//! instead of a dedicated lock table: the store itself is the only
//! coordination point, so `Acquire`/`Refresh`/`Release` each compile to a
//! single conditional Put/Update/Delete rather than a multi-step typestate
//! transition.

use std::collections::BTreeMap;
use std::sync::Arc;

use tabletheory_core::{AttributeValue, LeaseError, TableTheoryError, TableTheoryResult};
use tabletheory_expr::ExpressionBuilder;
use uuid::Uuid;

use crate::cancellation::CancellationSignal;
use crate::store::{DeleteRequest, PutRequest, StoreClient, StoreError, UpdateRequest};

const ATTR_KEY: &str = "lease_key";
const ATTR_TOKEN: &str = "lease_token";
const ATTR_EXPIRES_AT: &str = "lease_expires_at";
const ATTR_TTL: &str = "ttl";

/// An acquired lease: the key it guards, the token proving ownership, and
/// the unix-seconds timestamp it expires at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub key: String,
    pub token: String,
    pub expires_at: i64,
}

fn map_store_error(err: StoreError) -> TableTheoryError {
    match err {
        StoreError::ConditionalCheckFailed => TableTheoryError::ConditionFailed,
        StoreError::ResourceNotFound => TableTheoryError::TableNotFound,
        StoreError::Cancelled => TableTheoryError::Cancelled,
        StoreError::Throttled => TableTheoryError::Store("request throttled".to_string()),
        StoreError::TransactionCancelled(_) => TableTheoryError::Store("unexpected transaction cancellation".to_string()),
        StoreError::Other(detail) => TableTheoryError::Store(detail),
    }
}

/// Acquires, refreshes, and releases leases on items in `table_name`. One
/// manager per lease table; the table is expected to have `lease_key` as
/// its partition key (see `tabletheory_client::lifecycle` to provision it).
pub struct LeaseManager {
    store: Arc<dyn StoreClient>,
    table_name: String,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn StoreClient>, table_name: impl Into<String>) -> Self {
        Self {
            store,
            table_name: table_name.into(),
        }
    }

    /// Acquire a lease on `key` for `lease_seconds`, starting from `now`
    /// (caller-supplied unix-seconds clock, kept out of this module so
    /// callers stay deterministic in tests). Succeeds via a conditional Put
    /// with condition `attribute_not_exists(lease_key) OR lease_expires_at
    /// <= now`; failure maps to `ErrLeaseHeld`.
    pub async fn acquire(
        &self,
        key: &str,
        lease_seconds: i64,
        now: i64,
        cancel: &CancellationSignal,
    ) -> TableTheoryResult<Lease> {
        let token = Uuid::new_v4().to_string();
        let expires_at = now + lease_seconds;

        let mut expr = ExpressionBuilder::new();
        let key_name = expr.name_placeholder(ATTR_KEY);
        let expires_name = expr.name_placeholder(ATTR_EXPIRES_AT);
        let now_value = expr.value_placeholder(AttributeValue::from(now));
        let condition = format!("attribute_not_exists({key_name}) OR {expires_name} <= {now_value}");
        let (names, values) = expr.into_attribute_maps();

        let mut item: BTreeMap<String, AttributeValue> = BTreeMap::new();
        item.insert(ATTR_KEY.to_string(), AttributeValue::from(key));
        item.insert(ATTR_TOKEN.to_string(), AttributeValue::from(token.clone()));
        item.insert(ATTR_EXPIRES_AT.to_string(), AttributeValue::from(expires_at));
        item.insert(ATTR_TTL.to_string(), AttributeValue::from(expires_at));

        let result = self
            .store
            .put(
                PutRequest {
                    table_name: self.table_name.clone(),
                    item,
                    condition_expression: Some(condition),
                    expression_attribute_names: names,
                    expression_attribute_values: values,
                },
                cancel,
            )
            .await;

        match result {
            Ok(()) => Ok(Lease {
                key: key.to_string(),
                token,
                expires_at,
            }),
            Err(StoreError::ConditionalCheckFailed) => Err(TableTheoryError::Lease(LeaseError::Held {
                key: key.to_string(),
            })),
            Err(e) => Err(map_store_error(e)),
        }
    }

    /// Extend a held lease by `lease_seconds` from `now`, guarded by
    /// `lease_token = <token> AND lease_expires_at > now`. Failure maps to
    /// `ErrLeaseNotOwned` (covers both a wrong token and an already-expired
    /// lease someone else may have since acquired).
    pub async fn refresh(
        &self,
        lease: &Lease,
        lease_seconds: i64,
        now: i64,
        cancel: &CancellationSignal,
    ) -> TableTheoryResult<Lease> {
        let new_expires_at = now + lease_seconds;

        let mut expr = ExpressionBuilder::new();
        expr.set(ATTR_EXPIRES_AT, AttributeValue::from(new_expires_at));
        expr.set(ATTR_TTL, AttributeValue::from(new_expires_at));
        let token_name = expr.name_placeholder(ATTR_TOKEN);
        let token_value = expr.value_placeholder(AttributeValue::from(lease.token.clone()));
        let expires_name = expr.name_placeholder(ATTR_EXPIRES_AT);
        let now_value = expr.value_placeholder(AttributeValue::from(now));
        let condition = format!("{token_name} = {token_value} AND {expires_name} > {now_value}");
        let update_expression = expr.build_update_expression().map_err(TableTheoryError::Expression)?;
        let (names, values) = expr.into_attribute_maps();

        let mut key = BTreeMap::new();
        key.insert(ATTR_KEY.to_string(), AttributeValue::from(lease.key.clone()));

        let result = self
            .store
            .update(
                UpdateRequest {
                    table_name: self.table_name.clone(),
                    key,
                    update_expression,
                    condition_expression: Some(condition),
                    expression_attribute_names: names,
                    expression_attribute_values: values,
                },
                cancel,
            )
            .await;

        match result {
            Ok(_) => Ok(Lease {
                key: lease.key.clone(),
                token: lease.token.clone(),
                expires_at: new_expires_at,
            }),
            Err(StoreError::ConditionalCheckFailed) => Err(TableTheoryError::Lease(LeaseError::NotOwned {
                key: lease.key.clone(),
            })),
            Err(e) => Err(map_store_error(e)),
        }
    }

    /// Release a held lease, guarded by `lease_token = <token>`. A
    /// condition failure here (someone else already holds a newer lease
    /// under this key) is non-fatal: the caller's lease is already gone
    /// either way.
    pub async fn release(&self, lease: &Lease, cancel: &CancellationSignal) -> TableTheoryResult<()> {
        let mut expr = ExpressionBuilder::new();
        let token_name = expr.name_placeholder(ATTR_TOKEN);
        let token_value = expr.value_placeholder(AttributeValue::from(lease.token.clone()));
        let condition = format!("{token_name} = {token_value}");
        let (names, values) = expr.into_attribute_maps();

        let mut key = BTreeMap::new();
        key.insert(ATTR_KEY.to_string(), AttributeValue::from(lease.key.clone()));

        let result = self
            .store
            .delete(
                DeleteRequest {
                    table_name: self.table_name.clone(),
                    key,
                    condition_expression: Some(condition),
                    expression_attribute_names: names,
                    expression_attribute_values: values,
                },
                cancel,
            )
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(StoreError::ConditionalCheckFailed) => Ok(()),
            Err(e) => Err(map_store_error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabletheory_test_utils::InMemoryStoreClient;

    fn manager() -> LeaseManager {
        let store = Arc::new(InMemoryStoreClient::new());
        store.create_table_sync("leases");
        LeaseManager::new(store, "leases")
    }

    #[tokio::test]
    async fn acquire_then_acquire_again_is_held() {
        let manager = manager();
        let cancel = CancellationSignal::never();
        manager.acquire("cache:key", 30, 1_000, &cancel).await.unwrap();
        let err = manager.acquire("cache:key", 30, 1_000, &cancel).await.unwrap_err();
        assert!(matches!(err, TableTheoryError::Lease(LeaseError::Held { .. })));
    }

    #[tokio::test]
    async fn acquire_succeeds_after_expiry() {
        let manager = manager();
        let cancel = CancellationSignal::never();
        manager.acquire("cache:key", 10, 1_000, &cancel).await.unwrap();
        let second = manager.acquire("cache:key", 10, 1_020, &cancel).await.unwrap();
        assert_eq!(second.key, "cache:key");
    }

    #[tokio::test]
    async fn refresh_with_wrong_token_is_not_owned() {
        let manager = manager();
        let cancel = CancellationSignal::never();
        let lease = manager.acquire("cache:key", 30, 1_000, &cancel).await.unwrap();
        let forged = Lease {
            token: "not-the-real-token".to_string(),
            ..lease
        };
        let err = manager.refresh(&forged, 30, 1_010, &cancel).await.unwrap_err();
        assert!(matches!(err, TableTheoryError::Lease(LeaseError::NotOwned { .. })));
    }

    #[tokio::test]
    async fn refresh_extends_and_release_frees_the_key() {
        let manager = manager();
        let cancel = CancellationSignal::never();
        let lease = manager.acquire("cache:key", 30, 1_000, &cancel).await.unwrap();
        let refreshed = manager.refresh(&lease, 30, 1_010, &cancel).await.unwrap();
        assert_eq!(refreshed.expires_at, 1_040);
        manager.release(&refreshed, &cancel).await.unwrap();
        manager.acquire("cache:key", 30, 1_011, &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn release_with_stale_lease_is_non_fatal() {
        let manager = manager();
        let cancel = CancellationSignal::never();
        let lease = manager.acquire("cache:key", 10, 1_000, &cancel).await.unwrap();
        manager.acquire("cache:key", 10, 1_020, &cancel).await.unwrap();
        manager.release(&lease, &cancel).await.unwrap();
    }
}
