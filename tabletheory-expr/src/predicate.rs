//! A single attribute predicate, and the AND/OR clause tree filters and
//! conditions compile from.

use crate::operator::Operator;
use tabletheory_core::AttributeValue;

#[derive(Debug, Clone)]
pub struct Predicate {
    pub attribute: String,
    pub operator: Operator,
    pub values: Vec<AttributeValue>,
}

impl Predicate {
    pub fn new(attribute: impl Into<String>, operator: Operator, values: Vec<AttributeValue>) -> Self {
        Self {
            attribute: attribute.into(),
            operator,
            values,
        }
    }

    pub fn eq(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self::new(attribute, Operator::Eq, vec![value.into()])
    }

    pub fn lt(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self::new(attribute, Operator::Lt, vec![value.into()])
    }

    pub fn le(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self::new(attribute, Operator::Le, vec![value.into()])
    }

    pub fn gt(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self::new(attribute, Operator::Gt, vec![value.into()])
    }

    pub fn ge(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self::new(attribute, Operator::Ge, vec![value.into()])
    }

    pub fn between(
        attribute: impl Into<String>,
        lower: impl Into<AttributeValue>,
        upper: impl Into<AttributeValue>,
    ) -> Self {
        Self::new(attribute, Operator::Between, vec![lower.into(), upper.into()])
    }

    pub fn begins_with(attribute: impl Into<String>, prefix: impl Into<AttributeValue>) -> Self {
        Self::new(attribute, Operator::BeginsWith, vec![prefix.into()])
    }

    pub fn contains(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self::new(attribute, Operator::Contains, vec![value.into()])
    }

    pub fn is_in(attribute: impl Into<String>, values: Vec<AttributeValue>) -> Self {
        Self::new(attribute, Operator::In, values)
    }

    pub fn exists(attribute: impl Into<String>) -> Self {
        Self::new(attribute, Operator::Exists, Vec::new())
    }

    pub fn not_exists(attribute: impl Into<String>) -> Self {
        Self::new(attribute, Operator::NotExists, Vec::new())
    }
}

/// A filter or condition clause tree assembled by `Filter`/`OrFilter`/
/// `FilterGroup`/`OrFilterGroup`.
#[derive(Debug, Clone)]
pub enum FilterClause {
    Predicate(Predicate),
    And(Vec<FilterClause>),
    Or(Vec<FilterClause>),
}

impl FilterClause {
    pub fn and_with(self, other: FilterClause) -> FilterClause {
        match self {
            FilterClause::And(mut clauses) => {
                clauses.push(other);
                FilterClause::And(clauses)
            }
            existing => FilterClause::And(vec![existing, other]),
        }
    }

    pub fn or_with(self, other: FilterClause) -> FilterClause {
        match self {
            FilterClause::Or(mut clauses) => {
                clauses.push(other);
                FilterClause::Or(clauses)
            }
            existing => FilterClause::Or(vec![existing, other]),
        }
    }
}

impl From<Predicate> for FilterClause {
    fn from(p: Predicate) -> Self {
        FilterClause::Predicate(p)
    }
}
