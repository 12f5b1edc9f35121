//! In-memory `StoreClient`/`KmsClient` fakes for TableTheory's own test
//! suite and for downstream crates that want to exercise a `Client` without
//! a live store.
//!
//! An `Arc<RwLock<HashMap<..>>>` per entity type behind the same trait the
//! real backend implements, so executor code never needs to know which one
//! it is talking to.

mod eval;
mod kms;
mod store;

pub use kms::FakeKmsClient;
pub use store::InMemoryStoreClient;

#[cfg(test)]
mod proptests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;
    use tabletheory_client::cancellation::CancellationSignal;
    use tabletheory_client::store::{GetRequest, PutRequest, StoreClient};
    use tabletheory_core::AttributeValue;

    use super::InMemoryStoreClient;

    fn arbitrary_attribute_value() -> impl Strategy<Value = AttributeValue> {
        prop_oneof![
            "[a-z]{0,12}".prop_map(AttributeValue::S),
            any::<i64>().prop_map(AttributeValue::from),
            any::<bool>().prop_map(AttributeValue::Bool),
        ]
    }

    proptest! {
        /// Whatever scalar is put under a key comes back unchanged from a
        /// consistent Get — the fake adds no encoding of its own.
        #[test]
        fn put_then_get_roundtrips_scalar(name in "[a-z]{1,8}", value in arbitrary_attribute_value()) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let store = InMemoryStoreClient::new();
                store.create_table_sync("roundtrip");
                let cancel = CancellationSignal::never();
                let mut item = BTreeMap::new();
                item.insert("id".to_string(), AttributeValue::from(name.clone()));
                item.insert("value".to_string(), value.clone());
                store
                    .put(
                        PutRequest {
                            table_name: "roundtrip".to_string(),
                            item,
                            condition_expression: None,
                            expression_attribute_names: BTreeMap::new(),
                            expression_attribute_values: BTreeMap::new(),
                        },
                        &cancel,
                    )
                    .await
                    .unwrap();

                let mut key = BTreeMap::new();
                key.insert("id".to_string(), AttributeValue::from(name));
                let response = store
                    .get(
                        GetRequest {
                            table_name: "roundtrip".to_string(),
                            key,
                            index_name: None,
                            consistent_read: true,
                            projection_expression: None,
                            expression_attribute_names: BTreeMap::new(),
                        },
                        &cancel,
                    )
                    .await
                    .unwrap();
                let item = response.item.unwrap();
                prop_assert_eq!(item.get("value"), Some(&value));
            });
        }
    }
}
