//! TableTheory client — wires the Model Registry, Expression Builder/Index
//! Selector, Encryption Service, and a caller-supplied `StoreClient` into a
//! single typed entry point: Query/Mutation Core, Batch & Transaction
//! Engine, Pagination Engine, Lease Manager, Lambda Optimizations, and
//! Schema Lifecycle.

pub mod batch;
pub mod builder;
pub mod cancellation;
pub mod compiler;
pub mod item;
pub mod lambda;
pub mod lease;
pub mod lifecycle;
pub mod pagination;
pub mod retry;
pub mod store;
pub mod transact;

use std::collections::BTreeMap;
use std::sync::Arc;

use tabletheory_core::{AttributeValue, Cursor, EncryptedEnvelope, Schema, SortDirection, TableTheoryError, TableTheoryResult};
use tabletheory_crypto::EncryptionService;
use tabletheory_registry::RegistryOptions;
use tracing::instrument;

use crate::builder::OperationBuilder;
use crate::cancellation::CancellationSignal;
use crate::compiler::CompiledRead;
use crate::item::Item;
use crate::retry::{BackoffPolicy, FanOutGate, ProtectionError};
use crate::store::{BatchWriteOp, PageResponse, StoreClient, StoreError};

pub use lease::{Lease, LeaseManager};
pub use lifecycle::{CreateTableOptions, DeleteTableOptions};
pub use transact::TransactWriteBuilder;

fn map_store_error(err: StoreError) -> TableTheoryError {
    match err {
        StoreError::ConditionalCheckFailed => TableTheoryError::ConditionFailed,
        StoreError::ResourceNotFound => TableTheoryError::TableNotFound,
        StoreError::Cancelled => TableTheoryError::Cancelled,
        StoreError::Throttled => TableTheoryError::Store("request throttled".to_string()),
        StoreError::TransactionCancelled(_) => {
            TableTheoryError::Store("unexpected transaction cancellation".to_string())
        }
        StoreError::Other(detail) => TableTheoryError::Store(detail),
    }
}

fn map_gate_error(err: ProtectionError) -> TableTheoryError {
    TableTheoryError::Store(err.to_string())
}

fn now_epoch_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

/// The outcome of a typed batch-get: every item decoded, and the raw keys
/// still unprocessed after exhausting retries.
#[derive(Debug, Clone, Default)]
pub struct TypedBatchGetOutcome<T> {
    pub items: Vec<T>,
    pub unprocessed_keys: Vec<BTreeMap<String, AttributeValue>>,
}

/// A decoded page of items plus an opaque cursor for the next page, if any.
#[derive(Debug, Clone, Default)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub cursor: Option<Cursor>,
}

/// The typed entry point: registers schemas, compiles operations, and
/// dispatches them against a `StoreClient`, applying envelope encryption
/// transparently when configured.
///
/// Cheap to clone (every field is an `Arc` or `Copy`), so a single client is
/// meant to be constructed once per process and shared — see
/// [`lambda::shared_client`] for the cold-start-sensitive variant of that
/// pattern.
#[derive(Clone)]
pub struct Client {
    store: Arc<dyn StoreClient>,
    encryption: Option<Arc<EncryptionService>>,
    registry_options: RegistryOptions,
    batch_gate: Arc<FanOutGate>,
    batch_retry: BackoffPolicy,
}

impl Client {
    pub fn new(store: Arc<dyn StoreClient>) -> Self {
        Self {
            store,
            encryption: None,
            registry_options: RegistryOptions {
                encryption_key_configured: false,
            },
            batch_gate: Arc::new(FanOutGate::new(10)),
            batch_retry: BackoffPolicy::default(),
        }
    }

    pub fn with_encryption(store: Arc<dyn StoreClient>, encryption: Arc<EncryptionService>) -> Self {
        Self {
            store,
            encryption: Some(encryption),
            registry_options: RegistryOptions {
                encryption_key_configured: true,
            },
            batch_gate: Arc::new(FanOutGate::new(10)),
            batch_retry: BackoffPolicy::default(),
        }
    }

    /// Overrides the default batch/scan fan-out concurrency (10).
    pub fn with_batch_concurrency(mut self, max_concurrency: usize) -> Self {
        self.batch_gate = Arc::new(FanOutGate::new(max_concurrency));
        self
    }

    pub fn with_batch_retry(mut self, retry: BackoffPolicy) -> Self {
        self.batch_retry = retry;
        self
    }

    pub fn store(&self) -> &Arc<dyn StoreClient> {
        &self.store
    }

    /// Registers `T` (if not already cached) and returns a fresh builder
    /// scoped to its schema.
    pub fn builder<T: Item>(&self) -> TableTheoryResult<OperationBuilder<T>> {
        let schema = tabletheory_registry::register::<T>(&self.registry_options)?;
        Ok(OperationBuilder::new(schema))
    }

    async fn encrypt_fields(&self, schema: &Schema, map: &mut BTreeMap<String, AttributeValue>) -> TableTheoryResult<()> {
        let Some(encryption) = &self.encryption else {
            return Ok(());
        };
        let encrypted_attrs: Vec<String> = schema
            .fields
            .values()
            .filter(|meta| meta.is_encrypted)
            .map(|meta| meta.store_attribute_name.clone())
            .collect();
        for attr in encrypted_attrs {
            if let Some(value) = map.get(&attr) {
                if matches!(value, AttributeValue::Null) {
                    continue;
                }
                let envelope = encryption.encrypt(&attr, value).await.map_err(TableTheoryError::Encryption)?;
                map.insert(attr, envelope.to_attribute_value());
            }
        }
        Ok(())
    }

    async fn decrypt_fields(&self, schema: &Schema, map: &mut BTreeMap<String, AttributeValue>) -> TableTheoryResult<()> {
        let Some(encryption) = &self.encryption else {
            return Ok(());
        };
        let encrypted_attrs: Vec<String> = schema
            .fields
            .values()
            .filter(|meta| meta.is_encrypted)
            .map(|meta| meta.store_attribute_name.clone())
            .collect();
        for attr in encrypted_attrs {
            if let Some(value) = map.get(&attr) {
                let envelope = EncryptedEnvelope::from_attribute_value(&attr, value).map_err(TableTheoryError::Encryption)?;
                let plaintext = encryption.decrypt(&attr, &envelope).await.map_err(TableTheoryError::Encryption)?;
                map.insert(attr, plaintext);
            }
        }
        Ok(())
    }

    async fn execute_read<T: Item>(
        &self,
        builder: &OperationBuilder<T>,
    ) -> TableTheoryResult<(Vec<BTreeMap<String, AttributeValue>>, Option<Cursor>)> {
        let table_name = builder.schema.table_name.clone();
        match compiler::compile_read(&table_name, builder)? {
            CompiledRead::Get(req) => {
                let response = self.store.get(req, &builder.cancel).await.map_err(map_store_error)?;
                Ok((response.item.into_iter().collect(), None))
            }
            CompiledRead::Query(req) => {
                let index = req.index_name.clone();
                let scan_forward = req.scan_forward;
                let response: PageResponse = self.store.query(req, &builder.cancel).await.map_err(map_store_error)?;
                let cursor = response.last_evaluated_key.map(|last_key| {
                    let mut cursor = Cursor::new(last_key).with_sort(if scan_forward {
                        SortDirection::Ascending
                    } else {
                        SortDirection::Descending
                    });
                    if let Some(index) = index {
                        cursor = cursor.with_index(index);
                    }
                    cursor
                });
                Ok((response.items, cursor))
            }
            CompiledRead::Scan(req) => {
                let index = req.index_name.clone();
                let response = self.store.scan(req, &builder.cancel).await.map_err(map_store_error)?;
                let cursor = response.last_evaluated_key.map(|last_key| {
                    let mut cursor = Cursor::new(last_key);
                    if let Some(index) = index {
                        cursor = cursor.with_index(index);
                    }
                    cursor
                });
                Ok((response.items, cursor))
            }
        }
    }

    /// Fetches a single item. If the accumulated predicates are exact
    /// key-equality the Index Selector compiled a `Get`; otherwise this
    /// runs whatever `Query`/`Scan` was compiled and returns its first
    /// result.
    #[instrument(skip_all, fields(table = %builder.schema.table_name))]
    pub async fn get<T: Item>(&self, builder: OperationBuilder<T>) -> TableTheoryResult<Option<T>> {
        let schema = builder.schema.clone();
        let (mut maps, _cursor) = self.execute_read(&builder).await?;
        let Some(mut map) = maps.pop() else {
            return Ok(None);
        };
        self.decrypt_fields(&schema, &mut map).await?;
        Ok(Some(item::unmarshal(&schema, &map)?))
    }

    /// Runs a Query or Scan (whichever the Index Selector compiled) and
    /// decodes every returned item.
    #[instrument(skip_all, fields(table = %builder.schema.table_name))]
    pub async fn list<T: Item>(&self, builder: OperationBuilder<T>) -> TableTheoryResult<Page<T>> {
        let schema = builder.schema.clone();
        let (maps, cursor) = self.execute_read(&builder).await?;
        let mut items = Vec::with_capacity(maps.len());
        for mut map in maps {
            self.decrypt_fields(&schema, &mut map).await?;
            items.push(item::unmarshal(&schema, &map)?);
        }
        Ok(Page { items, cursor })
    }

    async fn scan_segment<T: Item>(&self, builder: OperationBuilder<T>) -> TableTheoryResult<Page<T>> {
        let _permit = self.batch_gate.try_acquire().map_err(map_gate_error)?;
        self.list(builder).await
    }

    /// Fans `total_segments` concurrent scans out through the batch
    /// concurrency gate and merges their items; no ordering guarantee
    /// across segments.
    pub async fn scan_all_segments<T: Item>(
        &self,
        total_segments: u32,
        make_builder: impl Fn(u32, u32) -> OperationBuilder<T>,
    ) -> TableTheoryResult<Vec<T>> {
        let mut dispatches = Vec::new();
        for segment in pagination::segments(total_segments) {
            let segment = segment.validate()?;
            dispatches.push(self.scan_segment(make_builder(segment.segment, segment.total_segments)));
        }
        let results = futures_util::future::join_all(dispatches).await;
        let mut merged = Vec::new();
        for result in results {
            merged.extend(result?.items);
        }
        Ok(merged)
    }

    /// Marshals `item`, optionally guards with `attribute_not_exists(pk)`
    /// (via `builder.if_not_exists()`), stamps `created_at`/`updated_at`/
    /// `version = 0` on success, and reflects those stamps back onto `item`.
    #[instrument(skip_all, fields(table = %builder.schema.table_name))]
    pub async fn create<T: Item>(&self, builder: OperationBuilder<T>, item: &mut T) -> TableTheoryResult<()> {
        let schema = builder.schema.clone();
        let mut map = item::marshal(&schema, item)?;
        let now = now_epoch_seconds();
        item::stamp_for_create(&schema, &mut map, now);
        let observable: T = item::unmarshal(&schema, &map)?;

        let mut wire_map = map.clone();
        self.encrypt_fields(&schema, &mut wire_map).await?;

        let req = compiler::compile_put(
            &schema,
            &schema.table_name,
            wire_map,
            builder.if_not_exists,
            &builder.condition,
            &builder.raw_condition,
        )?;
        self.store.put(req, &builder.cancel).await.map_err(map_store_error)?;
        *item = observable;
        Ok(())
    }

    /// Derives the key and a SET clause from `item` (every non-key,
    /// non-lifecycle field, or only `builder.fields(...)` if set), appends
    /// `updated_at = now` and, for versioned schemas, a `version = <current>`
    /// guard plus `ADD version 1`. On success, `item` is updated in place to
    /// reflect the new `updated_at`/`version`.
    #[instrument(skip_all, fields(table = %builder.schema.table_name))]
    pub async fn update<T: Item>(&self, builder: OperationBuilder<T>, item: &mut T) -> TableTheoryResult<()> {
        let schema = builder.schema.clone();
        let mut map = item::marshal(&schema, item)?;
        let key = item::extract_key(&schema, &map);
        let now = now_epoch_seconds();

        let included_attrs: Vec<String> = match &builder.update_fields {
            Some(names) => names
                .iter()
                .filter_map(|field_name| schema.fields.get(field_name))
                .map(|meta| meta.store_attribute_name.clone())
                .collect(),
            None => schema
                .fields
                .values()
                .filter(|meta| !meta.is_key_attribute() && !meta.is_version && !meta.is_created_at && !meta.is_updated_at)
                .map(|meta| meta.store_attribute_name.clone())
                .collect(),
        };

        let mut set_values: BTreeMap<String, AttributeValue> = BTreeMap::new();
        for attr in &included_attrs {
            if let Some(value) = map.get(attr) {
                set_values.insert(attr.clone(), value.clone());
            }
        }

        if let Some(updated_at_field) = &schema.updated_at_field {
            let attr = schema.fields[updated_at_field].store_attribute_name.clone();
            map.insert(attr.clone(), AttributeValue::from(now));
            set_values.insert(attr, AttributeValue::from(now));
        }

        let version_guard = if let Some(version_field) = &schema.version_field {
            let attr = schema.fields[version_field].store_attribute_name.clone();
            let previous = item::current_version(&schema, &map).unwrap_or(0);
            map.insert(attr.clone(), AttributeValue::from(previous + 1));
            Some((attr, previous))
        } else {
            None
        };

        for (attr, value) in set_values.iter_mut() {
            if schema.is_encrypted_attribute(attr) && !matches!(value, AttributeValue::Null) {
                let envelope = self
                    .encryption
                    .as_ref()
                    .ok_or(TableTheoryError::Encryption(tabletheory_core::EncryptionError::NotConfigured))?
                    .encrypt(attr, value)
                    .await
                    .map_err(TableTheoryError::Encryption)?;
                *value = envelope.to_attribute_value();
            }
        }

        let req = compiler::compile_update(
            &schema,
            &schema.table_name,
            key,
            set_values,
            &[],
            version_guard.as_ref().map(|(attr, previous)| (attr.as_str(), *previous)),
            builder.if_exists,
            &builder.condition,
            &builder.raw_condition,
        )?;
        self.store.update(req, &builder.cancel).await.map_err(map_store_error)?;
        *item = item::unmarshal(&schema, &map)?;
        Ok(())
    }

    /// Derives the key from `item` and deletes it, applying the same
    /// optional version guard and user conditions as `update`.
    #[instrument(skip_all, fields(table = %builder.schema.table_name))]
    pub async fn delete<T: Item>(&self, builder: OperationBuilder<T>, item: &T) -> TableTheoryResult<()> {
        let schema = builder.schema.clone();
        let map = item::marshal(&schema, item)?;
        let key = item::extract_key(&schema, &map);

        let version_guard = schema.version_field.as_ref().map(|version_field| {
            let attr = schema.fields[version_field].store_attribute_name.clone();
            let previous = item::current_version(&schema, &map).unwrap_or(0);
            (attr, previous)
        });

        let req = compiler::compile_delete(
            &schema,
            &schema.table_name,
            key,
            version_guard.as_ref().map(|(attr, previous)| (attr.as_str(), *previous)),
            builder.if_exists,
            &builder.condition,
            &builder.raw_condition,
        )?;
        self.store.delete(req, &builder.cancel).await.map_err(map_store_error)?;
        Ok(())
    }

    /// Fetches every key in `keys`, chunked and retried per the client's
    /// configured batch concurrency and backoff, decoding found items and
    /// surfacing whatever remains unprocessed after the final attempt.
    pub async fn batch_get<T: Item>(
        &self,
        keys: Vec<BTreeMap<String, AttributeValue>>,
        consistent_read: bool,
        cancel: &CancellationSignal,
    ) -> TableTheoryResult<TypedBatchGetOutcome<T>> {
        let schema = tabletheory_registry::register::<T>(&self.registry_options)?;
        let outcome = batch::batch_get(
            self.store.as_ref(),
            &schema.table_name,
            keys,
            consistent_read,
            &self.batch_gate,
            &self.batch_retry,
            cancel,
        )
        .await
        .map_err(map_store_error)?;

        let mut items = Vec::with_capacity(outcome.items.len());
        for mut map in outcome.items {
            self.decrypt_fields(&schema, &mut map).await?;
            items.push(item::unmarshal(&schema, &map)?);
        }
        Ok(TypedBatchGetOutcome {
            items,
            unprocessed_keys: outcome.unprocessed_keys,
        })
    }

    /// Puts/deletes every operation in `operations` against `table_name`,
    /// chunked and retried per the client's batch configuration. Returns
    /// whatever remains unprocessed after the final attempt.
    pub async fn batch_write(
        &self,
        table_name: &str,
        operations: Vec<BatchWriteOp>,
        cancel: &CancellationSignal,
    ) -> TableTheoryResult<Vec<BatchWriteOp>> {
        batch::batch_write(
            self.store.as_ref(),
            table_name,
            operations,
            &self.batch_gate,
            &self.batch_retry,
            cancel,
        )
        .await
        .map_err(map_store_error)
    }

    /// Executes a `TransactWriteBuilder` atomically.
    pub async fn transact(&self, builder: TransactWriteBuilder, cancel: &CancellationSignal) -> TableTheoryResult<()> {
        transact::execute(self.store.as_ref(), builder, cancel).await
    }

    /// A Lease Manager scoped to `table_name`, sharing this client's store
    /// connection.
    pub fn lease_manager(&self, table_name: impl Into<String>) -> LeaseManager {
        LeaseManager::new(self.store.clone(), table_name)
    }

    pub async fn create_table(
        &self,
        schema: Arc<Schema>,
        options: CreateTableOptions,
        cancel: &CancellationSignal,
    ) -> TableTheoryResult<()> {
        lifecycle::create_table(self.store.as_ref(), schema, options, cancel).await
    }

    pub async fn ensure_table(
        &self,
        schema: Arc<Schema>,
        options: CreateTableOptions,
        cancel: &CancellationSignal,
    ) -> TableTheoryResult<()> {
        lifecycle::ensure_table(self.store.as_ref(), schema, options, cancel).await
    }

    pub async fn delete_table(
        &self,
        table_name: &str,
        options: DeleteTableOptions,
        cancel: &CancellationSignal,
    ) -> TableTheoryResult<()> {
        lifecycle::delete_table(self.store.as_ref(), table_name, options, cancel).await
    }
}

#[cfg(test)]
mod client_scenarios {
    use super::*;
    use tabletheory_core::RawFieldTag;
    use tabletheory_crypto::{GeneratedDataKey, KmsClient};
    use tabletheory_expr::{Operator, Predicate};
    use tabletheory_test_utils::InMemoryStoreClient;

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    struct User {
        id: String,
        name: String,
        version: i64,
    }

    impl tabletheory_core::Model for User {
        fn raw_table_name() -> Option<&'static str> {
            Some("users")
        }
        fn raw_field_tags() -> &'static [RawFieldTag] {
            &[
                RawFieldTag {
                    field_name: "id",
                    directives: &["pk"],
                    type_hint: "String",
                },
                RawFieldTag {
                    field_name: "name",
                    directives: &[],
                    type_hint: "String",
                },
                RawFieldTag {
                    field_name: "version",
                    directives: &["version"],
                    type_hint: "i64",
                },
            ]
        }
    }

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    struct Customer {
        id: String,
        email: String,
        email_hash: String,
    }

    impl tabletheory_core::Model for Customer {
        fn raw_table_name() -> Option<&'static str> {
            Some("customers")
        }
        fn raw_field_tags() -> &'static [RawFieldTag] {
            &[
                RawFieldTag {
                    field_name: "id",
                    directives: &["pk"],
                    type_hint: "String",
                },
                RawFieldTag {
                    field_name: "email",
                    directives: &["encrypted"],
                    type_hint: "String",
                },
                RawFieldTag {
                    field_name: "email_hash",
                    directives: &["index:byEmailHash,pk"],
                    type_hint: "String",
                },
            ]
        }
    }

    struct FakeKms;

    #[async_trait::async_trait]
    impl KmsClient for FakeKms {
        async fn generate_data_key(&self, _key_id: &str) -> Result<GeneratedDataKey, tabletheory_core::EncryptionError> {
            Ok(GeneratedDataKey {
                plaintext: secrecy::SecretBox::new(Box::new([7u8; 32])),
                ciphertext_blob: vec![0xCD; 32],
            })
        }
        async fn decrypt(
            &self,
            _key_id: &str,
            _ciphertext_blob: &[u8],
        ) -> Result<secrecy::SecretBox<[u8; 32]>, tabletheory_core::EncryptionError> {
            Ok(secrecy::SecretBox::new(Box::new([7u8; 32])))
        }
    }

    fn client() -> (Client, Arc<InMemoryStoreClient>) {
        let store = Arc::new(InMemoryStoreClient::new());
        store.create_table_sync("users");
        (Client::new(store.clone()), store)
    }

    #[tokio::test]
    async fn create_then_get_idempotency_guard() {
        let (client, _store) = client();
        let mut user = User {
            id: "u1".to_string(),
            name: "a".to_string(),
            version: 0,
        };
        client
            .create(client.builder::<User>().unwrap().if_not_exists(), &mut user)
            .await
            .unwrap();
        assert_eq!(user.version, 0);

        let mut duplicate = User {
            id: "u1".to_string(),
            name: "b".to_string(),
            version: 0,
        };
        let err = client
            .create(client.builder::<User>().unwrap().if_not_exists(), &mut duplicate)
            .await
            .unwrap_err();
        assert!(matches!(err, TableTheoryError::ConditionFailed));

        let fetched = client
            .get(client.builder::<User>().unwrap().r#where(Predicate::eq("id", "u1")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.name, "a");
        assert_eq!(fetched.version, 0);
    }

    #[tokio::test]
    async fn optimistic_lock_race() {
        let (client, _store) = client();
        let mut user = User {
            id: "u1".to_string(),
            name: "a".to_string(),
            version: 0,
        };
        client.create(client.builder::<User>().unwrap(), &mut user).await.unwrap();

        let mut first_update = user.clone();
        first_update.name = "b".to_string();
        client.update(client.builder::<User>().unwrap(), &mut first_update).await.unwrap();
        assert_eq!(first_update.version, 1);

        let mut stale_update = user;
        stale_update.name = "c".to_string();
        let err = client
            .update(client.builder::<User>().unwrap(), &mut stale_update)
            .await
            .unwrap_err();
        assert!(matches!(err, TableTheoryError::ConditionFailed));

        let fetched = client
            .get(client.builder::<User>().unwrap().r#where(Predicate::eq("id", "u1")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.name, "b");
        assert_eq!(fetched.version, 1);
    }

    #[tokio::test]
    async fn encrypted_round_trip_with_aad_binding() {
        let store = Arc::new(InMemoryStoreClient::new());
        store.create_table_sync("customers");
        let encryption = Arc::new(EncryptionService::new(Arc::new(FakeKms), "alias/test"));
        let client = Client::with_encryption(store.clone(), encryption);

        let mut customer = Customer {
            id: "c1".to_string(),
            email: "a@x".to_string(),
            email_hash: "hash-a-x".to_string(),
        };
        client.create(client.builder::<Customer>().unwrap(), &mut customer).await.unwrap();

        let raw = store.raw_item("customers", "id", "c1").unwrap();
        assert!(matches!(raw.get("email"), Some(AttributeValue::M(_))));

        let fetched = client
            .get(client.builder::<Customer>().unwrap().r#where(Predicate::eq("id", "c1")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.email, "a@x");

        store.tamper_binary_field("customers", "id", "c1", "email", "ct");
        let err = client
            .get(client.builder::<Customer>().unwrap().r#where(Predicate::eq("id", "c1")))
            .await
            .unwrap_err();
        assert!(matches!(err, TableTheoryError::Encryption(_)));
    }

    #[tokio::test]
    async fn encrypted_field_query_rejection() {
        let store = Arc::new(InMemoryStoreClient::new());
        store.create_table_sync("customers");
        let encryption = Arc::new(EncryptionService::new(Arc::new(FakeKms), "alias/test"));
        let client = Client::with_encryption(store, encryption);

        let builder = client
            .builder::<Customer>()
            .unwrap()
            .filter(Predicate::new("email", Operator::Eq, vec![AttributeValue::from("a@x")]));
        let err = client.list(builder).await.unwrap_err();
        assert!(matches!(
            err,
            TableTheoryError::Encryption(tabletheory_core::EncryptionError::FieldNotQueryable { .. })
        ));
    }

    #[tokio::test]
    async fn cursor_stability_across_pages() {
        let (client, _store) = client();
        for (id, name) in [("u1", "a"), ("u2", "b")] {
            let mut user = User {
                id: id.to_string(),
                name: name.to_string(),
                version: 0,
            };
            client.create(client.builder::<User>().unwrap(), &mut user).await.unwrap();
        }

        let first_page = client
            .list(client.builder::<User>().unwrap().filter(Predicate::exists("id")).limit(1))
            .await
            .unwrap();
        assert_eq!(first_page.items.len(), 1);
        let cursor = first_page.cursor.expect("first page should yield a cursor");

        let second_page = client
            .list(
                client
                    .builder::<User>()
                    .unwrap()
                    .filter(Predicate::exists("id"))
                    .limit(1)
                    .cursor(cursor.clone()),
            )
            .await
            .unwrap();
        assert_eq!(second_page.items.len(), 1);
        assert_ne!(first_page.items[0].id, second_page.items[0].id);
        assert_eq!(cursor.encode(), cursor.clone().encode());
    }
}
