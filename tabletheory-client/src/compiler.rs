//! Turns accumulated builder state into an operation descriptor: picks
//! Get/Query/Scan for reads, and renders Put/Update/Delete expressions for
//! writes. The encrypted-field query-time guard runs here, before any
//! expression is handed to the store.

use std::collections::BTreeMap;
use std::sync::Arc;

use tabletheory_core::{AttributeValue, Schema, TableTheoryError, TableTheoryResult};
use tabletheory_expr::{ConditionMode, ExpressionBuilder, FilterClause, Operator, Predicate};

use crate::builder::{OperationBuilder, RawCondition};
use crate::item::Item;
use crate::store::{DeleteRequest, GetRequest, PutRequest, QueryRequest, ScanRequest, UpdateRequest};

/// Which read shape a builder compiled to.
pub enum CompiledRead {
    Get(GetRequest),
    Query(QueryRequest),
    Scan(ScanRequest),
}

fn flatten_filter(clause: &FilterClause, out: &mut Vec<Predicate>) {
    match clause {
        FilterClause::Predicate(p) => out.push(p.clone()),
        FilterClause::And(items) | FilterClause::Or(items) => {
            for item in items {
                flatten_filter(item, out);
            }
        }
    }
}

fn guard_encrypted(schema: &Schema, predicates: &[Predicate]) -> TableTheoryResult<()> {
    tabletheory_crypto::guard_predicates(predicates, |attr| schema.is_encrypted_attribute(attr))
        .map_err(TableTheoryError::Encryption)
}

fn guard_raw_condition_attrs(schema: &Schema, raw: &RawCondition) -> TableTheoryResult<()> {
    for attribute in raw.names.values() {
        if schema.is_encrypted_attribute(attribute) {
            return Err(TableTheoryError::Encryption(
                tabletheory_core::EncryptionError::FieldNotQueryable {
                    attr: attribute.clone(),
                },
            ));
        }
    }
    Ok(())
}

fn resolve_select_attr(schema: &Schema, name: &str) -> String {
    schema
        .fields
        .get(name)
        .map(|meta| meta.store_attribute_name.clone())
        .unwrap_or_else(|| name.to_string())
}

/// If `predicates` is exactly an equality match on every key attribute and
/// nothing else, the corresponding key map; otherwise `None`.
fn single_item_key(schema: &Schema, predicates: &[Predicate]) -> Option<BTreeMap<String, AttributeValue>> {
    let required = schema.key_attribute_names();
    if predicates.len() != required.len() {
        return None;
    }
    let mut key = BTreeMap::new();
    for attr in &required {
        let matching: Vec<&Predicate> = predicates.iter().filter(|p| p.attribute == *attr).collect();
        if matching.len() != 1 {
            return None;
        }
        let predicate = matching[0];
        if predicate.operator != Operator::Eq {
            return None;
        }
        key.insert(attr.to_string(), predicate.values[0].clone());
    }
    Some(key)
}

fn build_condition(
    expr: &mut ExpressionBuilder,
    condition: &Option<Predicate>,
    raw_condition: &Option<RawCondition>,
) -> TableTheoryResult<()> {
    if let Some(predicate) = condition {
        expr.with_condition(predicate.clone())
            .map_err(TableTheoryError::Expression)?;
    }
    if let Some(raw) = raw_condition {
        expr.add_raw_condition(raw.expression.clone(), raw.names.clone(), raw.values.clone())
            .map_err(TableTheoryError::Expression)?;
    }
    Ok(())
}

/// Compile a Get/Query/Scan from the builder's accumulated `Where`/`Filter`
/// state. `table_name` is the schema's table name, or the index-qualified
/// equivalent if the store requires it verbatim (it does not; it is
/// carried alongside `index_name` instead).
pub fn compile_read<T: Item>(table_name: &str, builder: &OperationBuilder<T>) -> TableTheoryResult<CompiledRead> {
    let schema = builder.schema.as_ref();

    let mut all_predicates = builder.where_predicates.clone();
    if let Some(clause) = &builder.explicit_filter {
        flatten_filter(clause, &mut all_predicates);
    }
    guard_encrypted(schema, &all_predicates)?;

    if builder.explicit_filter.is_none() && builder.explicit_index.is_none() {
        if let Some(key) = single_item_key(schema, &builder.where_predicates) {
            let mut expr = ExpressionBuilder::new();
            for field in &builder.select {
                expr.project(&resolve_select_attr(schema, field));
            }
            let projection_expression = expr.build_projection_expression();
            let (names, _values) = expr.into_attribute_maps();
            return Ok(CompiledRead::Get(GetRequest {
                table_name: table_name.to_string(),
                key,
                index_name: None,
                consistent_read: builder.consistent_read,
                projection_expression,
                expression_attribute_names: names,
            }));
        }
    }

    let selection = tabletheory_expr::select_index(schema, &builder.where_predicates, builder.explicit_index.as_deref());

    let mut expr = ExpressionBuilder::new();
    for key_predicate in &selection.key_predicates {
        expr.add_key_condition(key_predicate.clone())
            .map_err(TableTheoryError::Expression)?;
    }
    if !selection.remaining_filters.is_empty() {
        let clause = FilterClause::And(
            selection
                .remaining_filters
                .iter()
                .cloned()
                .map(FilterClause::Predicate)
                .collect(),
        );
        expr.merge_filter_clause(clause, false)
            .map_err(TableTheoryError::Expression)?;
    }
    if let Some(clause) = &builder.explicit_filter {
        expr.merge_filter_clause(clause.clone(), false)
            .map_err(TableTheoryError::Expression)?;
    }
    for field in &builder.select {
        expr.project(&resolve_select_attr(schema, field));
    }

    let key_condition_expression = expr.build_key_condition_expression();
    let filter_expression = expr.build_filter_expression();
    let projection_expression = expr.build_projection_expression();
    let (names, values) = expr.into_attribute_maps();

    let exclusive_start_key = builder.cursor.as_ref().map(|c| c.last_key.clone());

    match (selection.selected, key_condition_expression) {
        (tabletheory_expr::SelectedIndex::Primary, Some(kce)) => Ok(CompiledRead::Query(QueryRequest {
            table_name: table_name.to_string(),
            index_name: None,
            key_condition_expression: kce,
            filter_expression,
            projection_expression,
            expression_attribute_names: names,
            expression_attribute_values: values,
            consistent_read: builder.consistent_read,
            limit: builder.limit,
            scan_forward: builder.order == tabletheory_core::SortDirection::Ascending,
            exclusive_start_key,
        })),
        (tabletheory_expr::SelectedIndex::Named(index_name), Some(kce)) => Ok(CompiledRead::Query(QueryRequest {
            table_name: table_name.to_string(),
            index_name: Some(index_name),
            key_condition_expression: kce,
            filter_expression,
            projection_expression,
            expression_attribute_names: names,
            expression_attribute_values: values,
            consistent_read: builder.consistent_read,
            limit: builder.limit,
            scan_forward: builder.order == tabletheory_core::SortDirection::Ascending,
            exclusive_start_key,
        })),
        (selected, _) => {
            let index_name = match selected {
                tabletheory_expr::SelectedIndex::Scan(name) => name,
                _ => None,
            };
            Ok(CompiledRead::Scan(ScanRequest {
                table_name: table_name.to_string(),
                index_name,
                filter_expression,
                projection_expression,
                expression_attribute_names: names,
                expression_attribute_values: values,
                consistent_read: builder.consistent_read,
                limit: builder.limit,
                exclusive_start_key,
                segment: None,
                total_segments: None,
            }))
        }
    }
}

/// Compile a Create. `item_map` is already marshaled and lifecycle-stamped
/// by the caller; this only renders the guard/condition expression.
pub fn compile_put(
    schema: &Schema,
    table_name: &str,
    item_map: BTreeMap<String, AttributeValue>,
    if_not_exists: bool,
    condition: &Option<Predicate>,
    raw_condition: &Option<RawCondition>,
) -> TableTheoryResult<PutRequest> {
    guard_write_condition(schema, condition, raw_condition)?;
    let mut expr = ExpressionBuilder::new();
    let has_user_condition = condition.is_some() || raw_condition.is_some();
    if if_not_exists && has_user_condition {
        expr.with_condition(Predicate::not_exists(schema.partition_key.clone()))
            .map_err(TableTheoryError::Expression)?;
    }
    build_condition(&mut expr, condition, raw_condition)?;

    let mode = if if_not_exists && !has_user_condition {
        ConditionMode::GuardedCreate {
            partition_key_attribute: &schema.partition_key,
        }
    } else {
        ConditionMode::WriteOnly
    };
    let condition_expression = expr.build_condition_expression(mode);
    let (expression_attribute_names, expression_attribute_values) = expr.into_attribute_maps();

    Ok(PutRequest {
        table_name: table_name.to_string(),
        item: item_map,
        condition_expression,
        expression_attribute_names,
        expression_attribute_values,
    })
}

/// Compile an Update. `set_values` (already includes the `updatedAt` stamp)
/// become `SET` assignments; `remove_fields` become `REMOVE` targets.
/// `version_guard` is `(version_attribute, previous_version)`, present only
/// for versioned schemas, producing the optimistic-lock condition plus the
/// `ADD version 1` increment.
#[allow(clippy::too_many_arguments)]
pub fn compile_update(
    schema: &Schema,
    table_name: &str,
    key: BTreeMap<String, AttributeValue>,
    set_values: BTreeMap<String, AttributeValue>,
    remove_fields: &[String],
    version_guard: Option<(&str, i64)>,
    if_exists: bool,
    condition: &Option<Predicate>,
    raw_condition: &Option<RawCondition>,
) -> TableTheoryResult<UpdateRequest> {
    guard_write_condition(schema, condition, raw_condition)?;
    let mut expr = ExpressionBuilder::new();
    for (attr, value) in &set_values {
        expr.set(attr, value.clone());
    }
    for attr in remove_fields {
        expr.remove(attr);
    }
    if let Some((version_attr, previous)) = version_guard {
        expr.add_to(version_attr, AttributeValue::from(1i64));
        expr.with_condition(Predicate::eq(version_attr, previous))
            .map_err(TableTheoryError::Expression)?;
    }
    if if_exists {
        expr.with_condition(Predicate::exists(schema.partition_key.clone()))
            .map_err(TableTheoryError::Expression)?;
    }
    build_condition(&mut expr, condition, raw_condition)?;

    let update_expression = expr.build_update_expression().map_err(TableTheoryError::Expression)?;
    let condition_expression = expr.build_condition_expression(ConditionMode::WriteOnly);
    let (expression_attribute_names, expression_attribute_values) = expr.into_attribute_maps();

    Ok(UpdateRequest {
        table_name: table_name.to_string(),
        key,
        update_expression,
        condition_expression,
        expression_attribute_names,
        expression_attribute_values,
    })
}

pub fn compile_delete(
    schema: &Schema,
    table_name: &str,
    key: BTreeMap<String, AttributeValue>,
    version_guard: Option<(&str, i64)>,
    if_exists: bool,
    condition: &Option<Predicate>,
    raw_condition: &Option<RawCondition>,
) -> TableTheoryResult<DeleteRequest> {
    guard_write_condition(schema, condition, raw_condition)?;
    let mut expr = ExpressionBuilder::new();
    if let Some((version_attr, previous)) = version_guard {
        expr.with_condition(Predicate::eq(version_attr, previous))
            .map_err(TableTheoryError::Expression)?;
    }
    if if_exists {
        expr.with_condition(Predicate::exists(schema.partition_key.clone()))
            .map_err(TableTheoryError::Expression)?;
    }
    build_condition(&mut expr, condition, raw_condition)?;

    let condition_expression = expr.build_condition_expression(ConditionMode::WriteOnly);
    let (expression_attribute_names, expression_attribute_values) = expr.into_attribute_maps();

    Ok(DeleteRequest {
        table_name: table_name.to_string(),
        key,
        condition_expression,
        expression_attribute_names,
        expression_attribute_values,
    })
}

pub(crate) fn guard_write_condition(
    schema: &Schema,
    condition: &Option<Predicate>,
    raw_condition: &Option<RawCondition>,
) -> TableTheoryResult<()> {
    if let Some(predicate) = condition {
        guard_encrypted(schema, std::slice::from_ref(predicate))?;
    }
    if let Some(raw) = raw_condition {
        guard_raw_condition_attrs(schema, raw)?;
    }
    Ok(())
}
