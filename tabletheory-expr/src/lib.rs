//! TableTheory Expression Builder & Index Selector
//!
//! Compiles a builder's accumulated predicates, update actions, and raw
//! fragments into the store's placeholder-substituted expression strings,
//! and picks which index (if any) a query should run against.

mod builder;
mod operator;
mod predicate;
mod selector;

pub use builder::{CompiledExpression, ConditionMode, ExpressionBuilder};
pub use operator::Operator;
pub use predicate::{FilterClause, Predicate};
pub use selector::{select_index, SelectedIndex, SelectionResult};
