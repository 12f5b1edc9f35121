//! Index Selector — given a normalized predicate set and a `Schema`'s
//! indexes, picks which index (if any) a `Query` should run against, or
//! falls back to `Scan`.

use tabletheory_core::{Index, IndexType, Schema};

use crate::operator::Operator;
use crate::predicate::Predicate;

/// The index an operation was routed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectedIndex {
    /// The table's own primary key.
    Primary,
    /// A named global or local secondary index.
    Named(String),
    /// No usable index: full scan, optionally restricted to a named index's
    /// projection (when the caller named an index but it can't be queried,
    /// or the schema declares none).
    Scan(Option<String>),
}

/// The outcome of index selection: which index was picked, which
/// predicates became key conditions, and which remain as filters.
#[derive(Debug, Clone)]
pub struct SelectionResult {
    pub selected: SelectedIndex,
    pub key_predicates: Vec<Predicate>,
    pub remaining_filters: Vec<Predicate>,
}

struct Candidate<'a> {
    name: Option<&'a str>,
    partition_key_attr: &'a str,
    sort_key_attr: Option<&'a str>,
}

fn candidates(schema: &Schema) -> Vec<Candidate<'_>> {
    let mut out = vec![Candidate {
        name: None,
        partition_key_attr: &schema.partition_key,
        sort_key_attr: schema.sort_key.as_deref(),
    }];
    for index in &schema.indexes {
        out.push(Candidate {
            name: Some(index.name.as_str()),
            partition_key_attr: &index.partition_key_attr,
            sort_key_attr: index.sort_key_attr.as_deref(),
        });
    }
    out
}

fn find_eq_predicate<'a>(predicates: &'a [Predicate], attribute: &str) -> Option<&'a Predicate> {
    predicates
        .iter()
        .find(|p| p.attribute == attribute && p.operator == Operator::Eq)
}

fn find_sort_predicate<'a>(predicates: &'a [Predicate], attribute: &str) -> Option<&'a Predicate> {
    predicates.iter().find(|p| p.attribute == attribute)
}

fn partition_predicates(
    candidate: &Candidate<'_>,
    predicates: &[Predicate],
) -> (Vec<Predicate>, Vec<Predicate>) {
    let mut key_predicates = Vec::new();
    let mut remaining = Vec::new();
    for predicate in predicates {
        let is_partition_match =
            predicate.attribute == candidate.partition_key_attr && predicate.operator == Operator::Eq;
        let is_sort_match = candidate
            .sort_key_attr
            .map(|sk| predicate.attribute == sk)
            .unwrap_or(false);
        if is_partition_match || is_sort_match {
            key_predicates.push(predicate.clone());
        } else {
            remaining.push(predicate.clone());
        }
    }
    (key_predicates, remaining)
}

/// Select an index for a query given its predicate set. `explicit_index`
/// bypasses automatic selection — if the partition-key predicate is absent
/// under an explicit index, the operation falls back to `Scan` on that
/// index rather than erroring.
pub fn select_index(
    schema: &Schema,
    predicates: &[Predicate],
    explicit_index: Option<&str>,
) -> SelectionResult {
    let candidates = candidates(schema);

    if let Some(explicit) = explicit_index {
        let candidate = candidates.iter().find(|c| c.name == Some(explicit));
        return match candidate {
            Some(c) if find_eq_predicate(predicates, c.partition_key_attr).is_some() => {
                let (key_predicates, remaining_filters) = partition_predicates(c, predicates);
                SelectionResult {
                    selected: SelectedIndex::Named(explicit.to_string()),
                    key_predicates,
                    remaining_filters,
                }
            }
            _ => SelectionResult {
                selected: SelectedIndex::Scan(Some(explicit.to_string())),
                key_predicates: Vec::new(),
                remaining_filters: predicates.to_vec(),
            },
        };
    }

    let mut best: Option<(&Candidate<'_>, bool)> = None;
    for candidate in &candidates {
        if find_eq_predicate(predicates, candidate.partition_key_attr).is_none() {
            continue;
        }
        let has_sort_match = candidate
            .sort_key_attr
            .map(|sk| find_sort_predicate(predicates, sk).is_some())
            .unwrap_or(false);
        best = match best {
            None => Some((candidate, has_sort_match)),
            Some((_, existing_has_sort)) if has_sort_match && !existing_has_sort => {
                Some((candidate, has_sort_match))
            }
            Some(existing) => Some(existing),
        };
    }

    match best {
        Some((candidate, _)) => {
            let (key_predicates, remaining_filters) = partition_predicates(candidate, predicates);
            let selected = match candidate.name {
                None => SelectedIndex::Primary,
                Some(name) => SelectedIndex::Named(name.to_string()),
            };
            SelectionResult {
                selected,
                key_predicates,
                remaining_filters,
            }
        }
        None => SelectionResult {
            selected: SelectedIndex::Scan(None),
            key_predicates: Vec::new(),
            remaining_filters: predicates.to_vec(),
        },
    }
}

/// True if the index's partition key differs from the table's own
/// partition key — a local secondary index is never allowed to declare
/// this (see `ModelError::LsiPartitionKeyMismatch`); this helper exists for
/// table-creation-time validation in the Schema Lifecycle component.
pub fn is_local_index_partition_key_mismatch(schema: &Schema, index: &Index) -> bool {
    index.index_type == IndexType::Local && index.partition_key_attr != schema.partition_key
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tabletheory_core::Projection;

    fn schema_with_gsi() -> Schema {
        Schema {
            version: 1,
            table_name: "users".to_string(),
            partition_key: "id".to_string(),
            sort_key: None,
            indexes: vec![Index {
                name: "byEmail".to_string(),
                index_type: IndexType::Global,
                partition_key_attr: "email".to_string(),
                sort_key_attr: Some("created_at".to_string()),
                projection: Projection::All,
            }],
            fields: BTreeMap::new(),
            attribute_to_field: BTreeMap::new(),
            created_at_field: None,
            updated_at_field: None,
            version_field: None,
            ttl_field: None,
        }
    }

    #[test]
    fn prefers_primary_key_equality() {
        let schema = schema_with_gsi();
        let predicates = vec![Predicate::eq("id", "u1")];
        let result = select_index(&schema, &predicates, None);
        assert_eq!(result.selected, SelectedIndex::Primary);
        assert_eq!(result.key_predicates.len(), 1);
    }

    #[test]
    fn falls_back_to_gsi_when_primary_key_absent() {
        let schema = schema_with_gsi();
        let predicates = vec![Predicate::eq("email", "a@example.com")];
        let result = select_index(&schema, &predicates, None);
        assert_eq!(result.selected, SelectedIndex::Named("byEmail".to_string()));
    }

    #[test]
    fn no_equality_predicate_falls_back_to_scan() {
        let schema = schema_with_gsi();
        let predicates = vec![Predicate::gt("created_at", 0i64)];
        let result = select_index(&schema, &predicates, None);
        assert_eq!(result.selected, SelectedIndex::Scan(None));
        assert_eq!(result.remaining_filters.len(), 1);
    }

    #[test]
    fn explicit_index_without_partition_predicate_scans() {
        let schema = schema_with_gsi();
        let predicates = vec![Predicate::gt("created_at", 0i64)];
        let result = select_index(&schema, &predicates, Some("byEmail"));
        assert_eq!(result.selected, SelectedIndex::Scan(Some("byEmail".to_string())));
    }
}
