//! Aggregate call binding
//!
//! Aggregate calls found while compiling a grouped statement are lifted
//! out of the expression and replaced by a hidden column. The grouping
//! stage computes each bound call once per group and stores the result
//! under that hidden key.

use crate::sql::ast::Expr;

pub const HIDDEN_AGGREGATE_PREFIX: &str = "#agg";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "COUNT" => Some(AggregateFunction::Count),
            "SUM" => Some(AggregateFunction::Sum),
            "AVG" => Some(AggregateFunction::Avg),
            "MIN" => Some(AggregateFunction::Min),
            "MAX" => Some(AggregateFunction::Max),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
        }
    }
}

/// One aggregate call lifted out of an expression
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateCall {
    /// Hidden column the result is stored under
    pub key: String,
    pub function: AggregateFunction,
    /// `None` for `COUNT(*)`
    pub argument: Option<Expr>,
    pub distinct: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AggregateBinder {
    calls: Vec<AggregateCall>,
}

impl AggregateBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hidden key for this call; identical calls share one key.
    pub fn bind(
        &mut self,
        function: AggregateFunction,
        argument: Option<Expr>,
        distinct: bool,
    ) -> String {
        if let Some(existing) = self
            .calls
            .iter()
            .find(|c| c.function == function && c.argument == argument && c.distinct == distinct)
        {
            return existing.key.clone();
        }
        let key = format!("{}{}", HIDDEN_AGGREGATE_PREFIX, self.calls.len());
        self.calls.push(AggregateCall {
            key: key.clone(),
            function,
            argument,
            distinct,
        });
        key
    }

    pub fn calls(&self) -> &[AggregateCall] {
        &self.calls
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }
}

pub fn is_hidden_column(name: &str) -> bool {
    name.starts_with(HIDDEN_AGGREGATE_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_calls_share_key() {
        let mut binder = AggregateBinder::new();
        let a = binder.bind(AggregateFunction::Sum, Some(Expr::Column("v".into())), false);
        let b = binder.bind(AggregateFunction::Sum, Some(Expr::Column("v".into())), false);
        let c = binder.bind(AggregateFunction::Sum, Some(Expr::Column("v".into())), true);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(binder.len(), 2);
        assert!(is_hidden_column(&a));
    }
}
