//! Operators accepted in key conditions and filter predicates.

/// A comparison or predicate operator. Key conditions accept only the first
/// seven variants; filters additionally accept `Contains`, `In`, `Exists`,
/// and `NotExists`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Between,
    BeginsWith,
    Contains,
    In,
    Exists,
    NotExists,
}

impl Operator {
    pub fn is_valid_in_key_condition(self) -> bool {
        matches!(
            self,
            Operator::Eq
                | Operator::Lt
                | Operator::Le
                | Operator::Gt
                | Operator::Ge
                | Operator::Between
                | Operator::BeginsWith
        )
    }

    pub fn is_equality(self) -> bool {
        matches!(self, Operator::Eq)
    }

    /// Number of `AttributeValue` operands this operator expects, where
    /// known statically. `Between` takes exactly two; `In` is variable
    /// length (checked separately against the 100-item cap); `Exists` and
    /// `NotExists` take none.
    pub fn expected_value_count(self) -> Option<usize> {
        match self {
            Operator::Between => Some(2),
            Operator::Exists | Operator::NotExists => Some(0),
            Operator::In => None,
            _ => Some(1),
        }
    }
}
