//! The Expression Builder — maintains mutable placeholder-allocation state
//! across a single operation's key conditions, filters, conditions, update
//! clauses, and projection list, then renders each into the store's
//! placeholder-substituted expression strings.
//!
//! Placeholders are allocated eagerly, at the moment an attribute name or
//! literal value is written into an expression, rather than deferred to a
//! later render pass: references resolve as definitions are walked instead
//! of in a second pass.

use std::collections::BTreeMap;

use tabletheory_core::{AttributeValue, ExpressionError};

use crate::operator::Operator;
use crate::predicate::{FilterClause, Predicate};

/// How `build_condition_expression` should combine accumulated clauses.
#[derive(Debug, Clone, Copy)]
pub enum ConditionMode<'a> {
    /// Only user-supplied write conditions (`WithCondition`/
    /// `WithConditionExpression`).
    WriteOnly,
    /// User-supplied conditions plus the operation's key predicates,
    /// rendered as additional AND-ed guards.
    WriteAndWhere,
    /// Key predicates are already the item identity (update/delete by
    /// primary key) and must not be repeated as conditions.
    SkipKeyConditions,
    /// No conditions were supplied: default to `attribute_not_exists(pk)`
    /// for guarded creates.
    GuardedCreate { partition_key_attribute: &'a str },
}

/// The result of compiling a builder's accumulated state: placeholder-
/// substituted expression strings plus the two attribute maps the store
/// request carries alongside them.
#[derive(Debug, Clone, Default)]
pub struct CompiledExpression {
    pub key_condition_expression: Option<String>,
    pub filter_expression: Option<String>,
    pub condition_expression: Option<String>,
    pub update_expression: Option<String>,
    pub projection_expression: Option<String>,
    pub expression_attribute_names: BTreeMap<String, String>,
    pub expression_attribute_values: BTreeMap<String, AttributeValue>,
}

#[derive(Debug, Clone)]
enum RenderedClause {
    Leaf(String),
    And(Vec<RenderedClause>),
    Or(Vec<RenderedClause>),
}

fn render_tree(clause: &RenderedClause) -> String {
    match clause {
        RenderedClause::Leaf(s) => s.clone(),
        RenderedClause::And(items) => format!(
            "({})",
            items.iter().map(render_tree).collect::<Vec<_>>().join(" AND ")
        ),
        RenderedClause::Or(items) => format!(
            "({})",
            items.iter().map(render_tree).collect::<Vec<_>>().join(" OR ")
        ),
    }
}

fn render_operator(operator: Operator, name: &str, values: &[String]) -> String {
    match operator {
        Operator::Eq => format!("{name} = {}", values[0]),
        Operator::Lt => format!("{name} < {}", values[0]),
        Operator::Le => format!("{name} <= {}", values[0]),
        Operator::Gt => format!("{name} > {}", values[0]),
        Operator::Ge => format!("{name} >= {}", values[0]),
        Operator::Between => format!("{name} BETWEEN {} AND {}", values[0], values[1]),
        Operator::BeginsWith => format!("begins_with({name}, {})", values[0]),
        Operator::Contains => format!("contains({name}, {})", values[0]),
        Operator::In => format!("{name} IN ({})", values.join(", ")),
        Operator::Exists => format!("attribute_exists({name})"),
        Operator::NotExists => format!("attribute_not_exists({name})"),
    }
}

#[derive(Debug, Clone)]
enum SetValue {
    Value(String),
    IfNotExists {
        name_placeholder: String,
        default_placeholder: String,
    },
}

#[derive(Debug, Clone)]
struct SetAction {
    name_placeholder: String,
    value: SetValue,
}

#[derive(Debug, Default)]
pub struct ExpressionBuilder {
    name_counter: u32,
    value_counter: u32,
    names: BTreeMap<String, String>,
    placeholder_to_attribute: BTreeMap<String, String>,
    values: BTreeMap<String, AttributeValue>,
    key_condition_fragments: Vec<String>,
    filter_root: Option<RenderedClause>,
    condition_root: Option<RenderedClause>,
    raw_condition_fragments: Vec<String>,
    set_actions: Vec<SetAction>,
    remove_actions: Vec<String>,
    add_actions: Vec<(String, String)>,
    delete_actions: Vec<(String, String)>,
    projection: Vec<String>,
}

impl ExpressionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate (or reuse) a `#nK` placeholder for an attribute name.
    pub fn name_placeholder(&mut self, attribute: &str) -> String {
        if let Some(existing) = self.names.get(attribute) {
            return existing.clone();
        }
        let placeholder = format!("#n{}", self.name_counter);
        self.name_counter += 1;
        self.names.insert(attribute.to_string(), placeholder.clone());
        self.placeholder_to_attribute
            .insert(placeholder.clone(), attribute.to_string());
        placeholder
    }

    /// Allocate a fresh `:vK` placeholder for a literal value. Every value
    /// gets its own placeholder, even if an identical value was bound
    /// earlier under a different attribute.
    pub fn value_placeholder(&mut self, value: AttributeValue) -> String {
        let placeholder = format!(":v{}", self.value_counter);
        self.value_counter += 1;
        self.values.insert(placeholder.clone(), value);
        placeholder
    }

    fn render_predicate(&mut self, predicate: &Predicate) -> Result<String, ExpressionError> {
        if predicate.operator == Operator::In && predicate.values.len() > 100 {
            return Err(ExpressionError::TooManyInValues {
                count: predicate.values.len(),
            });
        }
        if let Some(expected) = predicate.operator.expected_value_count() {
            if expected != predicate.values.len() {
                return Err(ExpressionError::InvalidOperator {
                    operator: format!("{:?}", predicate.operator),
                });
            }
        }
        let name = self.name_placeholder(&predicate.attribute);
        let values: Vec<String> = predicate
            .values
            .iter()
            .cloned()
            .map(|v| self.value_placeholder(v))
            .collect();
        Ok(render_operator(predicate.operator, &name, &values))
    }

    fn render_clause_tree(&mut self, clause: FilterClause) -> Result<RenderedClause, ExpressionError> {
        Ok(match clause {
            FilterClause::Predicate(p) => RenderedClause::Leaf(self.render_predicate(&p)?),
            FilterClause::And(items) => RenderedClause::And(
                items
                    .into_iter()
                    .map(|c| self.render_clause_tree(c))
                    .collect::<Result<_, _>>()?,
            ),
            FilterClause::Or(items) => RenderedClause::Or(
                items
                    .into_iter()
                    .map(|c| self.render_clause_tree(c))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    /// Add a key condition predicate. Only operators valid in key
    /// conditions (`=, <, <=, >, >=, BETWEEN, BEGINS_WITH`) are accepted.
    pub fn add_key_condition(&mut self, predicate: Predicate) -> Result<(), ExpressionError> {
        if !predicate.operator.is_valid_in_key_condition() {
            return Err(ExpressionError::InvalidOperator {
                operator: format!("{:?}", predicate.operator),
            });
        }
        let fragment = self.render_predicate(&predicate)?;
        self.key_condition_fragments.push(fragment);
        Ok(())
    }

    fn push_filter(&mut self, clause: FilterClause, or: bool) -> Result<(), ExpressionError> {
        let rendered = self.render_clause_tree(clause)?;
        self.filter_root = Some(match self.filter_root.take() {
            None => rendered,
            Some(existing) => {
                if or {
                    RenderedClause::Or(vec![existing, rendered])
                } else {
                    RenderedClause::And(vec![existing, rendered])
                }
            }
        });
        Ok(())
    }

    pub fn filter(&mut self, predicate: Predicate) -> Result<(), ExpressionError> {
        self.push_filter(FilterClause::Predicate(predicate), false)
    }

    pub fn or_filter(&mut self, predicate: Predicate) -> Result<(), ExpressionError> {
        self.push_filter(FilterClause::Predicate(predicate), true)
    }

    pub fn filter_group(&mut self, predicates: Vec<Predicate>) -> Result<(), ExpressionError> {
        self.push_filter(
            FilterClause::And(predicates.into_iter().map(FilterClause::Predicate).collect()),
            false,
        )
    }

    pub fn or_filter_group(&mut self, predicates: Vec<Predicate>) -> Result<(), ExpressionError> {
        self.push_filter(
            FilterClause::And(predicates.into_iter().map(FilterClause::Predicate).collect()),
            true,
        )
    }

    /// Merge an already-assembled filter clause tree (e.g. one built up by
    /// a caller combining several `FilterGroup`/`OrFilterGroup` calls of
    /// its own) into the accumulated filter, AND-ed or OR-ed with whatever
    /// is already there.
    pub fn merge_filter_clause(&mut self, clause: FilterClause, or: bool) -> Result<(), ExpressionError> {
        self.push_filter(clause, or)
    }

    pub fn with_condition(&mut self, predicate: Predicate) -> Result<(), ExpressionError> {
        let rendered = RenderedClause::Leaf(self.render_predicate(&predicate)?);
        self.condition_root = Some(match self.condition_root.take() {
            None => rendered,
            Some(existing) => RenderedClause::And(vec![existing, rendered]),
        });
        Ok(())
    }

    /// Merge a user-supplied raw `WithConditionExpression` fragment and its
    /// bindings. A placeholder token that already maps to a *different*
    /// attribute (names) or that already has a bound value (values) is a
    /// fatal conflict.
    pub fn add_raw_condition(
        &mut self,
        expression: impl Into<String>,
        names: BTreeMap<String, String>,
        values: BTreeMap<String, AttributeValue>,
    ) -> Result<(), ExpressionError> {
        for (placeholder, attribute) in &names {
            match self.placeholder_to_attribute.get(placeholder) {
                Some(existing) if existing != attribute => {
                    return Err(ExpressionError::DuplicatePlaceholder {
                        key: placeholder.clone(),
                    })
                }
                Some(_) => {}
                None => {
                    self.placeholder_to_attribute
                        .insert(placeholder.clone(), attribute.clone());
                    self.names.entry(attribute.clone()).or_insert_with(|| placeholder.clone());
                }
            }
        }
        for placeholder in values.keys() {
            if self.values.contains_key(placeholder) {
                return Err(ExpressionError::DuplicatePlaceholder {
                    key: placeholder.clone(),
                });
            }
        }
        self.values.extend(values);
        self.raw_condition_fragments.push(expression.into());
        Ok(())
    }

    pub fn set(&mut self, attribute: &str, value: AttributeValue) {
        let name = self.name_placeholder(attribute);
        let value_ph = self.value_placeholder(value);
        self.set_actions.push(SetAction {
            name_placeholder: name,
            value: SetValue::Value(value_ph),
        });
    }

    pub fn set_if_not_exists(&mut self, attribute: &str, default: AttributeValue) {
        let name = self.name_placeholder(attribute);
        let default_ph = self.value_placeholder(default);
        self.set_actions.push(SetAction {
            name_placeholder: name.clone(),
            value: SetValue::IfNotExists {
                name_placeholder: name,
                default_placeholder: default_ph,
            },
        });
    }

    pub fn remove(&mut self, attribute: &str) {
        let name = self.name_placeholder(attribute);
        self.remove_actions.push(name);
    }

    pub fn add_to(&mut self, attribute: &str, value: AttributeValue) {
        let name = self.name_placeholder(attribute);
        let value_ph = self.value_placeholder(value);
        self.add_actions.push((name, value_ph));
    }

    pub fn delete_from(&mut self, attribute: &str, value: AttributeValue) {
        let name = self.name_placeholder(attribute);
        let value_ph = self.value_placeholder(value);
        self.delete_actions.push((name, value_ph));
    }

    pub fn project(&mut self, attribute: &str) {
        let name = self.name_placeholder(attribute);
        if !self.projection.contains(&name) {
            self.projection.push(name);
        }
    }

    pub fn build_key_condition_expression(&self) -> Option<String> {
        if self.key_condition_fragments.is_empty() {
            None
        } else {
            Some(self.key_condition_fragments.join(" AND "))
        }
    }

    pub fn build_filter_expression(&self) -> Option<String> {
        self.filter_root.as_ref().map(render_tree)
    }

    pub fn build_condition_expression(&mut self, mode: ConditionMode<'_>) -> Option<String> {
        let mut clauses = Vec::new();
        if let Some(root) = &self.condition_root {
            clauses.push(render_tree(root));
        }
        if let ConditionMode::WriteAndWhere = mode {
            clauses.extend(self.key_condition_fragments.iter().cloned());
        }
        for raw in &self.raw_condition_fragments {
            clauses.push(format!("({raw})"));
        }
        if clauses.is_empty() {
            if let ConditionMode::GuardedCreate {
                partition_key_attribute,
            } = mode
            {
                let name = self.name_placeholder(partition_key_attribute);
                clauses.push(format!("attribute_not_exists({name})"));
            }
        }
        if clauses.is_empty() {
            None
        } else {
            Some(clauses.join(" AND "))
        }
    }

    /// `SET`/`REMOVE`/`ADD`/`DELETE` clauses joined in that order.
    /// Empty (no update actions accumulated) is a fatal error, matching the
    /// invariant that an update must touch at least one attribute.
    pub fn build_update_expression(&self) -> Result<String, ExpressionError> {
        let mut clauses = Vec::new();
        if !self.set_actions.is_empty() {
            let parts: Vec<String> = self
                .set_actions
                .iter()
                .map(|a| match &a.value {
                    SetValue::Value(v) => format!("{} = {}", a.name_placeholder, v),
                    SetValue::IfNotExists {
                        name_placeholder,
                        default_placeholder,
                    } => format!(
                        "{} = if_not_exists({}, {})",
                        a.name_placeholder, name_placeholder, default_placeholder
                    ),
                })
                .collect();
            clauses.push(format!("SET {}", parts.join(", ")));
        }
        if !self.remove_actions.is_empty() {
            clauses.push(format!("REMOVE {}", self.remove_actions.join(", ")));
        }
        if !self.add_actions.is_empty() {
            let parts: Vec<String> = self
                .add_actions
                .iter()
                .map(|(n, v)| format!("{n} {v}"))
                .collect();
            clauses.push(format!("ADD {}", parts.join(", ")));
        }
        if !self.delete_actions.is_empty() {
            let parts: Vec<String> = self
                .delete_actions
                .iter()
                .map(|(n, v)| format!("{n} {v}"))
                .collect();
            clauses.push(format!("DELETE {}", parts.join(", ")));
        }
        if clauses.is_empty() {
            return Err(ExpressionError::EmptyUpdateExpression);
        }
        Ok(clauses.join(" "))
    }

    pub fn has_update_actions(&self) -> bool {
        !self.set_actions.is_empty()
            || !self.remove_actions.is_empty()
            || !self.add_actions.is_empty()
            || !self.delete_actions.is_empty()
    }

    pub fn build_projection_expression(&self) -> Option<String> {
        if self.projection.is_empty() {
            None
        } else {
            Some(self.projection.join(", "))
        }
    }

    /// Consume the builder, returning the final `#placeholder -> attribute`
    /// and `:placeholder -> value` maps for attachment to a store request.
    pub fn into_attribute_maps(self) -> (BTreeMap<String, String>, BTreeMap<String, AttributeValue>) {
        let names = self
            .names
            .into_iter()
            .map(|(attribute, placeholder)| (placeholder, attribute))
            .collect();
        (names, self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_condition_joins_with_and() {
        let mut b = ExpressionBuilder::new();
        b.add_key_condition(Predicate::eq("id", "abc")).unwrap();
        b.add_key_condition(Predicate::gt("created_at", 100i64)).unwrap();
        assert_eq!(
            b.build_key_condition_expression().unwrap(),
            "#n0 = :v0 AND #n1 > :v1"
        );
    }

    #[test]
    fn key_condition_rejects_contains() {
        let mut b = ExpressionBuilder::new();
        let err = b.add_key_condition(Predicate::contains("tags", "x")).unwrap_err();
        assert!(matches!(err, ExpressionError::InvalidOperator { .. }));
    }

    #[test]
    fn filter_and_or_nest_correctly() {
        let mut b = ExpressionBuilder::new();
        b.filter(Predicate::eq("status", "active")).unwrap();
        b.or_filter(Predicate::eq("status", "pending")).unwrap();
        assert_eq!(
            b.build_filter_expression().unwrap(),
            "(#n0 = :v0 OR #n0 = :v1)"
        );
    }

    #[test]
    fn in_predicate_over_100_values_is_rejected() {
        let mut b = ExpressionBuilder::new();
        let values: Vec<AttributeValue> = (0..101).map(|i| AttributeValue::from(i as i64)).collect();
        let err = b.filter(Predicate::is_in("id", values)).unwrap_err();
        assert!(matches!(err, ExpressionError::TooManyInValues { count: 101 }));
    }

    #[test]
    fn guarded_create_defaults_to_attribute_not_exists() {
        let mut b = ExpressionBuilder::new();
        let expr = b
            .build_condition_expression(ConditionMode::GuardedCreate {
                partition_key_attribute: "id",
            })
            .unwrap();
        assert_eq!(expr, "attribute_not_exists(#n0)");
    }

    #[test]
    fn update_expression_orders_clauses_and_rejects_empty() {
        let mut b = ExpressionBuilder::new();
        assert!(matches!(
            b.build_update_expression().unwrap_err(),
            ExpressionError::EmptyUpdateExpression
        ));
        b.set("name", AttributeValue::from("alice"));
        b.remove("stale_field");
        b.add_to("version", AttributeValue::from(1i64));
        let expr = b.build_update_expression().unwrap();
        assert!(expr.starts_with("SET "));
        assert!(expr.contains(" REMOVE "));
        assert!(expr.contains(" ADD "));
    }

    #[test]
    fn set_if_not_exists_uses_if_not_exists_idiom() {
        let mut b = ExpressionBuilder::new();
        b.set_if_not_exists("counter", AttributeValue::from(0i64));
        let expr = b.build_update_expression().unwrap();
        assert!(expr.contains("if_not_exists(#n0, :v0)"));
    }

    #[test]
    fn raw_condition_conflicting_placeholder_is_rejected() {
        let mut b = ExpressionBuilder::new();
        b.with_condition(Predicate::eq("email", "a@example.com")).unwrap();
        let mut names = BTreeMap::new();
        names.insert("#n0".to_string(), "different_attr".to_string());
        let err = b
            .add_raw_condition("#n0 = :raw", names, BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, ExpressionError::DuplicatePlaceholder { .. }));
    }
}
