//! The fluent builder surface: `Where`/`Filter`/`OrFilter`/`FilterGroup`/
//! `OrFilterGroup` accumulate predicates, everything else configures how
//! the compiler turns them into an operation descriptor. The builder owns
//! no I/O — `compiler` consumes its accumulated state by reference.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use tabletheory_core::{AttributeValue, Cursor, Schema, SortDirection};
use tabletheory_expr::{FilterClause, Predicate};

use crate::cancellation::CancellationSignal;
use crate::item::Item;
use crate::retry::BackoffPolicy;

/// A raw, user-supplied `WithConditionExpression` fragment plus its
/// placeholder bindings, merged into the compiled condition expression.
#[derive(Debug, Clone)]
pub struct RawCondition {
    pub expression: String,
    pub names: BTreeMap<String, String>,
    pub values: BTreeMap<String, AttributeValue>,
}

/// Accumulates predicates and options for a single Get/Query/Scan/Create/
/// Update/Delete operation on one model type. One instance per operation;
/// concurrent reuse of a single builder across tasks is undefined, matching
/// the shared-nothing-builder-state scheduling model.
pub struct OperationBuilder<T: Item> {
    pub(crate) schema: Arc<Schema>,
    pub(crate) where_predicates: Vec<Predicate>,
    pub(crate) explicit_filter: Option<FilterClause>,
    pub(crate) explicit_index: Option<String>,
    pub(crate) limit: Option<u32>,
    pub(crate) offset: Option<u32>,
    pub(crate) order: SortDirection,
    pub(crate) select: Vec<String>,
    pub(crate) consistent_read: bool,
    pub(crate) cancel: CancellationSignal,
    pub(crate) retry: BackoffPolicy,
    pub(crate) condition: Option<Predicate>,
    pub(crate) raw_condition: Option<RawCondition>,
    pub(crate) if_not_exists: bool,
    pub(crate) if_exists: bool,
    pub(crate) cursor: Option<Cursor>,
    pub(crate) update_fields: Option<Vec<String>>,
    _marker: PhantomData<T>,
}

impl<T: Item> OperationBuilder<T> {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            where_predicates: Vec::new(),
            explicit_filter: None,
            explicit_index: None,
            limit: None,
            offset: None,
            order: SortDirection::Ascending,
            select: Vec::new(),
            consistent_read: false,
            cancel: CancellationSignal::never(),
            retry: BackoffPolicy::default(),
            condition: None,
            raw_condition: None,
            if_not_exists: false,
            if_exists: false,
            cursor: None,
            update_fields: None,
            _marker: PhantomData,
        }
    }

    /// A predicate eligible to become either a key condition (if the
    /// Index Selector can cover it) or a filter, once it doesn't.
    pub fn r#where(mut self, predicate: Predicate) -> Self {
        self.where_predicates.push(predicate);
        self
    }

    fn push_filter(mut self, clause: FilterClause, or: bool) -> Self {
        self.explicit_filter = Some(match self.explicit_filter.take() {
            None => clause,
            Some(existing) => {
                if or {
                    existing.or_with(clause)
                } else {
                    existing.and_with(clause)
                }
            }
        });
        self
    }

    /// A predicate that always lands in filter position, never eligible as
    /// a key condition.
    pub fn filter(self, predicate: Predicate) -> Self {
        self.push_filter(FilterClause::Predicate(predicate), false)
    }

    pub fn or_filter(self, predicate: Predicate) -> Self {
        self.push_filter(FilterClause::Predicate(predicate), true)
    }

    pub fn filter_group(self, predicates: Vec<Predicate>) -> Self {
        self.push_filter(
            FilterClause::And(predicates.into_iter().map(FilterClause::Predicate).collect()),
            false,
        )
    }

    pub fn or_filter_group(self, predicates: Vec<Predicate>) -> Self {
        self.push_filter(
            FilterClause::And(predicates.into_iter().map(FilterClause::Predicate).collect()),
            true,
        )
    }

    /// Bypass automatic index selection: target this index by name.
    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.explicit_index = Some(name.into());
        self
    }

    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }

    /// Recorded on the compiled descriptor for executor-visible handling;
    /// the store itself provides no native offset semantics.
    pub fn offset(mut self, n: u32) -> Self {
        self.offset = Some(n);
        self
    }

    pub fn order_by(mut self, direction: SortDirection) -> Self {
        self.order = direction;
        self
    }

    pub fn select(mut self, fields: Vec<impl Into<String>>) -> Self {
        self.select = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn consistent_read(mut self, consistent: bool) -> Self {
        self.consistent_read = consistent;
        self
    }

    pub fn with_context(mut self, cancel: CancellationSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_retry(mut self, policy: BackoffPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Resume a prior Query/Scan from an opaque cursor.
    pub fn cursor(mut self, cursor: Cursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// Guard a Create with `attribute_not_exists(pk)`.
    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }

    /// Guard an Update/Delete with `attribute_exists(pk)`.
    pub fn if_exists(mut self) -> Self {
        self.if_exists = true;
        self
    }

    pub fn with_condition(mut self, predicate: Predicate) -> Self {
        self.condition = Some(predicate);
        self
    }

    pub fn with_condition_expression(
        mut self,
        expression: impl Into<String>,
        names: BTreeMap<String, String>,
        values: BTreeMap<String, AttributeValue>,
    ) -> Self {
        self.raw_condition = Some(RawCondition {
            expression: expression.into(),
            names,
            values,
        });
        self
    }

    /// Restrict an Update to these field names; unset means "every
    /// non-key, non-lifecycle field present on the bound object."
    pub fn fields(mut self, names: Vec<impl Into<String>>) -> Self {
        self.update_fields = Some(names.into_iter().map(Into::into).collect());
        self
    }
}
