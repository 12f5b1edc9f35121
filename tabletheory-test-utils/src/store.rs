//! The in-memory `StoreClient`. One table is a `Vec<AttributeMap>` behind a
//! lock; Get/Update/Delete match against the request's own `key` map, Query
//! and Scan filter the whole table through the expression evaluator, and Put
//! (which carries no separate key) derives the item it would overwrite from
//! the attribute names its own condition expression references — the same
//! attributes the caller already put into the item it is writing.
//!
//! An `Arc<RwLock<HashMap<..>>>` standing in for a real backend behind the
//! trait real code talks to, so a test never needs to know it isn't hitting
//! the genuine store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tabletheory_client::cancellation::CancellationSignal;
use tabletheory_client::store::{
    AttributeMap, BatchGetRequest, BatchGetResponse, BatchWriteOp, BatchWriteRequest, BatchWriteResponse,
    CreateTableRequest, DeleteRequest, GetRequest, GetResponse, PageResponse, PutRequest, QueryRequest,
    ScanRequest, StoreClient, StoreError, TableDescription, TableStatus, TransactWriteItem, UpdateRequest,
    UpdateResponse,
};
use tabletheory_core::{AttributeValue, Schema};

use crate::eval::{eval_expression, split_clause_items, split_update_sections};

#[derive(Default)]
struct Table {
    schema: Option<Arc<Schema>>,
    items: Vec<AttributeMap>,
}

/// An in-memory stand-in for a hosted key-value store, keyed by table name.
pub struct InMemoryStoreClient {
    tables: RwLock<HashMap<String, Table>>,
}

impl Default for InMemoryStoreClient {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStoreClient {
    pub fn new() -> Self {
        Self { tables: RwLock::new(HashMap::new()) }
    }

    /// Registers `table_name` with no declared schema, for tests that only
    /// exercise Get/Put/Update/Delete against an explicit key map and never
    /// need the Schema Lifecycle.
    pub fn create_table_sync(&self, table_name: &str) {
        self.tables.write().unwrap().entry(table_name.to_string()).or_default();
    }

    /// The raw stored item whose `key_attr` attribute equals `key_val`,
    /// bypassing decryption — for tests asserting on wire-level ciphertext.
    pub fn raw_item(&self, table_name: &str, key_attr: &str, key_val: &str) -> Option<AttributeMap> {
        let tables = self.tables.read().unwrap();
        let table = tables.get(table_name)?;
        table
            .items
            .iter()
            .find(|item| matches!(item.get(key_attr), Some(AttributeValue::S(s)) if s == key_val))
            .cloned()
    }

    /// Flips a bit inside one binary field of an encrypted envelope map
    /// attribute, simulating ciphertext tampering for AEAD-integrity tests.
    pub fn tamper_binary_field(&self, table_name: &str, key_attr: &str, key_val: &str, attr_name: &str, envelope_field: &str) {
        let mut tables = self.tables.write().unwrap();
        let Some(table) = tables.get_mut(table_name) else { return };
        for item in table.items.iter_mut() {
            if !matches!(item.get(key_attr), Some(AttributeValue::S(s)) if s == key_val) {
                continue;
            }
            if let Some(AttributeValue::M(envelope)) = item.get_mut(attr_name) {
                if let Some(AttributeValue::B(bytes)) = envelope.get_mut(envelope_field) {
                    match bytes.first_mut() {
                        Some(first) => *first ^= 0xFF,
                        None => bytes.push(0xFF),
                    }
                }
            }
        }
    }
}

fn matches_key(item: &AttributeMap, key: &AttributeMap) -> bool {
    key.iter().all(|(k, v)| item.get(k) == Some(v))
}

fn extract_calls(expr: &str, func: &str) -> Vec<String> {
    let pat = format!("{func}(");
    let mut out = Vec::new();
    let mut start = 0;
    while let Some(pos) = expr[start..].find(pat.as_str()) {
        let begin = start + pos + pat.len();
        match expr[begin..].find(')') {
            Some(end_rel) => {
                out.push(expr[begin..begin + end_rel].trim().to_string());
                start = begin + end_rel + 1;
            }
            None => break,
        }
    }
    out
}

/// Put requests carry no explicit key, only the item and an optional
/// condition. The attributes an `attribute_not_exists`/`attribute_exists`
/// clause names are always also present in the item being written (the
/// model's own partition key, or a hand-built item's own identity field),
/// so probing the table for an existing item sharing those attribute values
/// recovers the same identity a real store resolves from its declared key
/// schema. With no such clause, fall back to matching the full item.
fn put_identity_probe(
    condition: &Option<String>,
    names: &BTreeMap<String, String>,
    item: &AttributeMap,
) -> Vec<(String, AttributeValue)> {
    if let Some(cond) = condition {
        let mut tokens = extract_calls(cond, "attribute_not_exists");
        tokens.extend(extract_calls(cond, "attribute_exists"));
        let probe: Vec<(String, AttributeValue)> = tokens
            .iter()
            .filter_map(|token| names.get(token))
            .filter_map(|attr| item.get(attr).map(|v| (attr.clone(), v.clone())))
            .collect();
        if !probe.is_empty() {
            return probe;
        }
    }
    item.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

fn apply_update_expression(expr: &str, names: &BTreeMap<String, String>, values: &BTreeMap<String, AttributeValue>, item: &mut AttributeMap) {
    for (keyword, body) in split_update_sections(expr) {
        match keyword {
            "SET" => apply_set(body, names, values, item),
            "REMOVE" => apply_remove(body, names, item),
            "ADD" => apply_add(body, names, values, item),
            "DELETE" => apply_delete(body, names, values, item),
            _ => {}
        }
    }
}

fn apply_set(body: &str, names: &BTreeMap<String, String>, values: &BTreeMap<String, AttributeValue>, item: &mut AttributeMap) {
    for assignment in split_clause_items(body) {
        let (name_tok, value_expr) = assignment.split_once(" = ").expect("SET assignment missing =");
        let attr = names.get(name_tok.trim()).expect("unresolved SET name placeholder").clone();
        let value_expr = value_expr.trim();
        if let Some(inner) = value_expr.strip_prefix("if_not_exists(").and_then(|s| s.strip_suffix(')')) {
            let (_, default_tok) = inner.split_once(", ").expect("if_not_exists missing default arg");
            if !item.contains_key(&attr) {
                item.insert(attr, values.get(default_tok.trim()).expect("unresolved if_not_exists default").clone());
            }
        } else {
            item.insert(attr, values.get(value_expr).expect("unresolved SET value placeholder").clone());
        }
    }
}

fn apply_remove(body: &str, names: &BTreeMap<String, String>, item: &mut AttributeMap) {
    for name_tok in split_clause_items(body) {
        let attr = names.get(name_tok.trim()).expect("unresolved REMOVE name placeholder");
        item.remove(attr);
    }
}

fn apply_add(body: &str, names: &BTreeMap<String, String>, values: &BTreeMap<String, AttributeValue>, item: &mut AttributeMap) {
    for clause in split_clause_items(body) {
        let (name_tok, value_tok) = clause.split_once(' ').expect("ADD clause missing value");
        let attr = names.get(name_tok.trim()).expect("unresolved ADD name placeholder").clone();
        let delta = values.get(value_tok.trim()).expect("unresolved ADD value placeholder").clone();
        match delta {
            AttributeValue::N(delta_n) => {
                let current: f64 = match item.get(&attr) {
                    Some(AttributeValue::N(n)) => n.parse().unwrap_or(0.0),
                    _ => 0.0,
                };
                let sum = current + delta_n.parse::<f64>().unwrap_or(0.0);
                item.insert(attr, AttributeValue::from(sum));
            }
            AttributeValue::Ss(mut delta_set) => {
                let mut current = match item.remove(&attr) {
                    Some(AttributeValue::Ss(set)) => set,
                    _ => Vec::new(),
                };
                current.append(&mut delta_set);
                current.sort();
                current.dedup();
                item.insert(attr, AttributeValue::Ss(current));
            }
            AttributeValue::Ns(mut delta_set) => {
                let mut current = match item.remove(&attr) {
                    Some(AttributeValue::Ns(set)) => set,
                    _ => Vec::new(),
                };
                current.append(&mut delta_set);
                current.sort();
                current.dedup();
                item.insert(attr, AttributeValue::Ns(current));
            }
            other => {
                item.insert(attr, other);
            }
        }
    }
}

fn apply_delete(body: &str, names: &BTreeMap<String, String>, values: &BTreeMap<String, AttributeValue>, item: &mut AttributeMap) {
    for clause in split_clause_items(body) {
        let (name_tok, value_tok) = clause.split_once(' ').expect("DELETE clause missing value");
        let attr = names.get(name_tok.trim()).expect("unresolved DELETE name placeholder");
        let removed = values.get(value_tok.trim()).expect("unresolved DELETE value placeholder");
        match (item.get_mut(attr), removed) {
            (Some(AttributeValue::Ss(set)), AttributeValue::Ss(doomed)) => set.retain(|v| !doomed.contains(v)),
            (Some(AttributeValue::Ns(set)), AttributeValue::Ns(doomed)) => set.retain(|v| !doomed.contains(v)),
            (Some(AttributeValue::Bs(set)), AttributeValue::Bs(doomed)) => set.retain(|v| !doomed.contains(v)),
            _ => {}
        }
    }
}

fn paginate(items: Vec<AttributeMap>, exclusive_start_key: Option<AttributeMap>, limit: Option<u32>) -> PageResponse {
    let start = match exclusive_start_key {
        Some(esk) => items.iter().position(|it| *it == esk).map(|i| i + 1).unwrap_or(0),
        None => 0,
    };
    let remaining = if start >= items.len() { &items[0..0] } else { &items[start..] };
    let take = limit.map(|l| l as usize).unwrap_or(remaining.len());
    let page: Vec<AttributeMap> = remaining.iter().take(take).cloned().collect();
    let consumed = start + page.len();
    let last_evaluated_key = if consumed < items.len() { page.last().cloned() } else { None };
    PageResponse { items: page, last_evaluated_key }
}

fn transact_item_parts(
    item: &TransactWriteItem,
) -> (&str, Option<&BTreeMap<String, String>>, Option<&BTreeMap<String, AttributeValue>>, Option<&str>) {
    match item {
        TransactWriteItem::Put { table_name, condition_expression, expression_attribute_names, expression_attribute_values, .. } => {
            (table_name, Some(expression_attribute_names), Some(expression_attribute_values), condition_expression.as_deref())
        }
        TransactWriteItem::Update { table_name, condition_expression, expression_attribute_names, expression_attribute_values, .. } => {
            (table_name, Some(expression_attribute_names), Some(expression_attribute_values), condition_expression.as_deref())
        }
        TransactWriteItem::Delete { table_name, condition_expression, expression_attribute_names, expression_attribute_values, .. } => {
            (table_name, Some(expression_attribute_names), Some(expression_attribute_values), condition_expression.as_deref())
        }
        TransactWriteItem::ConditionCheck { table_name, condition_expression, expression_attribute_names, expression_attribute_values, .. } => {
            (table_name, Some(expression_attribute_names), Some(expression_attribute_values), Some(condition_expression.as_str()))
        }
    }
}

#[async_trait]
impl StoreClient for InMemoryStoreClient {
    async fn get(&self, req: GetRequest, _cancel: &CancellationSignal) -> Result<GetResponse, StoreError> {
        let tables = self.tables.read().unwrap();
        let table = tables.get(&req.table_name).ok_or(StoreError::ResourceNotFound)?;
        let item = table.items.iter().find(|it| matches_key(it, &req.key)).cloned();
        Ok(GetResponse { item })
    }

    async fn put(&self, req: PutRequest, _cancel: &CancellationSignal) -> Result<(), StoreError> {
        let mut tables = self.tables.write().unwrap();
        let table = tables.entry(req.table_name.clone()).or_default();
        let probe = put_identity_probe(&req.condition_expression, &req.expression_attribute_names, &req.item);
        let existing_index = table.items.iter().position(|it| probe.iter().all(|(k, v)| it.get(k) == Some(v)));
        let existing = existing_index.map(|i| table.items[i].clone()).unwrap_or_default();
        if let Some(condition) = &req.condition_expression {
            if !eval_expression(condition, &req.expression_attribute_names, &req.expression_attribute_values, &existing) {
                return Err(StoreError::ConditionalCheckFailed);
            }
        }
        match existing_index {
            Some(i) => table.items[i] = req.item,
            None => table.items.push(req.item),
        }
        Ok(())
    }

    async fn update(&self, req: UpdateRequest, _cancel: &CancellationSignal) -> Result<UpdateResponse, StoreError> {
        let mut tables = self.tables.write().unwrap();
        let table = tables.entry(req.table_name.clone()).or_default();
        let index = table.items.iter().position(|it| matches_key(it, &req.key));
        let existing = index.map(|i| table.items[i].clone()).unwrap_or_default();
        if let Some(condition) = &req.condition_expression {
            if !eval_expression(condition, &req.expression_attribute_names, &req.expression_attribute_values, &existing) {
                return Err(StoreError::ConditionalCheckFailed);
            }
        }
        let mut item = match index {
            Some(i) => table.items[i].clone(),
            None => req.key.clone(),
        };
        apply_update_expression(&req.update_expression, &req.expression_attribute_names, &req.expression_attribute_values, &mut item);
        match index {
            Some(i) => table.items[i] = item.clone(),
            None => table.items.push(item.clone()),
        }
        Ok(UpdateResponse { attributes: Some(item) })
    }

    async fn delete(&self, req: DeleteRequest, _cancel: &CancellationSignal) -> Result<(), StoreError> {
        let mut tables = self.tables.write().unwrap();
        let table = tables.get_mut(&req.table_name).ok_or(StoreError::ResourceNotFound)?;
        let index = table.items.iter().position(|it| matches_key(it, &req.key));
        let existing = index.map(|i| table.items[i].clone()).unwrap_or_default();
        if let Some(condition) = &req.condition_expression {
            if !eval_expression(condition, &req.expression_attribute_names, &req.expression_attribute_values, &existing) {
                return Err(StoreError::ConditionalCheckFailed);
            }
        }
        if let Some(i) = index {
            table.items.remove(i);
        }
        Ok(())
    }

    async fn query(&self, req: QueryRequest, _cancel: &CancellationSignal) -> Result<PageResponse, StoreError> {
        let tables = self.tables.read().unwrap();
        let table = tables.get(&req.table_name).ok_or(StoreError::ResourceNotFound)?;
        let mut candidates: Vec<AttributeMap> = table
            .items
            .iter()
            .filter(|item| eval_expression(&req.key_condition_expression, &req.expression_attribute_names, &req.expression_attribute_values, item))
            .filter(|item| match &req.filter_expression {
                Some(f) => eval_expression(f, &req.expression_attribute_names, &req.expression_attribute_values, item),
                None => true,
            })
            .cloned()
            .collect();
        if !req.scan_forward {
            candidates.reverse();
        }
        Ok(paginate(candidates, req.exclusive_start_key, req.limit))
    }

    async fn scan(&self, req: ScanRequest, _cancel: &CancellationSignal) -> Result<PageResponse, StoreError> {
        let tables = self.tables.read().unwrap();
        let table = tables.get(&req.table_name).ok_or(StoreError::ResourceNotFound)?;
        let mut candidates: Vec<AttributeMap> = table
            .items
            .iter()
            .filter(|item| match &req.filter_expression {
                Some(f) => eval_expression(f, &req.expression_attribute_names, &req.expression_attribute_values, item),
                None => true,
            })
            .cloned()
            .collect();
        if let (Some(segment), Some(total)) = (req.segment, req.total_segments) {
            if total > 0 {
                candidates = candidates.into_iter().enumerate().filter(|(i, _)| (*i as u32) % total == segment).map(|(_, it)| it).collect();
            }
        }
        Ok(paginate(candidates, req.exclusive_start_key, req.limit))
    }

    async fn batch_get(&self, req: BatchGetRequest, _cancel: &CancellationSignal) -> Result<BatchGetResponse, StoreError> {
        let tables = self.tables.read().unwrap();
        let Some(table) = tables.get(&req.table_name) else {
            return Ok(BatchGetResponse::default());
        };
        let items = req
            .keys
            .iter()
            .filter_map(|key| table.items.iter().find(|it| matches_key(it, key)).cloned())
            .collect();
        Ok(BatchGetResponse { items, unprocessed_keys: Vec::new() })
    }

    async fn batch_write(&self, req: BatchWriteRequest, _cancel: &CancellationSignal) -> Result<BatchWriteResponse, StoreError> {
        let mut tables = self.tables.write().unwrap();
        let table = tables.entry(req.table_name.clone()).or_default();
        let key_attrs: Option<Vec<String>> = table.schema.as_ref().map(|s| s.key_attribute_names().into_iter().map(str::to_string).collect());
        for op in req.operations {
            match op {
                BatchWriteOp::Put(item) => {
                    let index = match &key_attrs {
                        Some(attrs) => table.items.iter().position(|it| attrs.iter().all(|a| it.get(a) == item.get(a))),
                        None => table.items.iter().position(|it| *it == item),
                    };
                    match index {
                        Some(i) => table.items[i] = item,
                        None => table.items.push(item),
                    }
                }
                BatchWriteOp::Delete(key) => {
                    if let Some(i) = table.items.iter().position(|it| matches_key(it, &key)) {
                        table.items.remove(i);
                    }
                }
            }
        }
        Ok(BatchWriteResponse::default())
    }

    async fn transact_write(&self, items: Vec<TransactWriteItem>, _cancel: &CancellationSignal) -> Result<(), StoreError> {
        let mut tables = self.tables.write().unwrap();

        for (idx, transact_item) in items.iter().enumerate() {
            let (table_name, names, values, condition) = transact_item_parts(transact_item);
            let key: Option<&AttributeMap> = match transact_item {
                TransactWriteItem::Update { key, .. }
                | TransactWriteItem::Delete { key, .. }
                | TransactWriteItem::ConditionCheck { key, .. } => Some(key),
                TransactWriteItem::Put { .. } => None,
            };
            let existing = match (tables.get(table_name), key, transact_item) {
                (Some(table), Some(key), _) => table.items.iter().find(|it| matches_key(it, key)).cloned().unwrap_or_default(),
                (Some(table), None, TransactWriteItem::Put { condition_expression, expression_attribute_names, item, .. }) => {
                    let probe = put_identity_probe(condition_expression, expression_attribute_names, item);
                    table.items.iter().find(|it| probe.iter().all(|(k, v)| it.get(k) == Some(v))).cloned().unwrap_or_default()
                }
                _ => AttributeMap::default(),
            };
            if let Some(condition) = condition {
                if !eval_expression(condition, names.unwrap(), values.unwrap(), &existing) {
                    return Err(StoreError::TransactionCancelled(vec![tabletheory_client::store::CancellationReason {
                        operation_index: idx,
                        code: "ConditionalCheckFailed".to_string(),
                    }]));
                }
            }
        }

        for transact_item in items {
            match transact_item {
                TransactWriteItem::Put { table_name, item, condition_expression, expression_attribute_names, .. } => {
                    let table = tables.entry(table_name).or_default();
                    let probe = put_identity_probe(&condition_expression, &expression_attribute_names, &item);
                    let index = table.items.iter().position(|it| probe.iter().all(|(k, v)| it.get(k) == Some(v)));
                    match index {
                        Some(i) => table.items[i] = item,
                        None => table.items.push(item),
                    }
                }
                TransactWriteItem::Update { table_name, key, update_expression, expression_attribute_names, expression_attribute_values, .. } => {
                    let table = tables.entry(table_name).or_default();
                    let index = table.items.iter().position(|it| matches_key(it, &key));
                    let mut item = match index {
                        Some(i) => table.items[i].clone(),
                        None => key.clone(),
                    };
                    apply_update_expression(&update_expression, &expression_attribute_names, &expression_attribute_values, &mut item);
                    match index {
                        Some(i) => table.items[i] = item,
                        None => table.items.push(item),
                    }
                }
                TransactWriteItem::Delete { table_name, key, .. } => {
                    if let Some(table) = tables.get_mut(&table_name) {
                        if let Some(i) = table.items.iter().position(|it| matches_key(it, &key)) {
                            table.items.remove(i);
                        }
                    }
                }
                TransactWriteItem::ConditionCheck { .. } => {}
            }
        }
        Ok(())
    }

    async fn create_table(&self, req: CreateTableRequest, _cancel: &CancellationSignal) -> Result<(), StoreError> {
        let mut tables = self.tables.write().unwrap();
        let table = tables.entry(req.table_name).or_default();
        table.schema = Some(req.schema);
        Ok(())
    }

    async fn describe_table(&self, table_name: &str, _cancel: &CancellationSignal) -> Result<TableDescription, StoreError> {
        let tables = self.tables.read().unwrap();
        if tables.contains_key(table_name) {
            Ok(TableDescription { table_name: table_name.to_string(), status: TableStatus::Active })
        } else {
            Err(StoreError::ResourceNotFound)
        }
    }

    async fn delete_table(&self, table_name: &str, _cancel: &CancellationSignal) -> Result<(), StoreError> {
        let mut tables = self.tables.write().unwrap();
        if tables.remove(table_name).is_some() {
            Ok(())
        } else {
            Err(StoreError::ResourceNotFound)
        }
    }

    async fn update_time_to_live(&self, _table_name: &str, _attribute_name: &str, _enabled: bool, _cancel: &CancellationSignal) -> Result<(), StoreError> {
        Ok(())
    }
}
