//! Predicates of the form `column OP (literal | column)`
//!
//! Conditions are evaluated against a tuple and its layout. Joins evaluate
//! against the concatenated tuple so both sides resolve through one layout.

use std::cmp::Ordering;
use std::fmt;

use super::errors::ExecutorResult;
use super::tuple::{ColumnRef, Tuple, TupleLayout, Value};

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CompOp {
    /// Applies the operator to an ordering of `lhs` relative to `rhs`.
    pub fn holds(&self, ordering: Ordering) -> bool {
        match self {
            CompOp::Eq => ordering == Ordering::Equal,
            CompOp::Ne => ordering != Ordering::Equal,
            CompOp::Lt => ordering == Ordering::Less,
            CompOp::Gt => ordering == Ordering::Greater,
            CompOp::Le => ordering != Ordering::Greater,
            CompOp::Ge => ordering != Ordering::Less,
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(self, CompOp::Lt | CompOp::Gt | CompOp::Le | CompOp::Ge)
    }
}

impl fmt::Display for CompOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompOp::Eq => "=",
            CompOp::Ne => "<>",
            CompOp::Lt => "<",
            CompOp::Gt => ">",
            CompOp::Le => "<=",
            CompOp::Ge => ">=",
        };
        write!(f, "{}", s)
    }
}

/// Right-hand side of a condition
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    Column(ColumnRef),
}

/// A single predicate
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub lhs: ColumnRef,
    pub op: CompOp,
    pub rhs: Operand,
}

impl Condition {
    pub fn literal(lhs: ColumnRef, op: CompOp, value: Value) -> Self {
        Self {
            lhs,
            op,
            rhs: Operand::Literal(value),
        }
    }

    pub fn columns(lhs: ColumnRef, op: CompOp, rhs: ColumnRef) -> Self {
        Self {
            lhs,
            op,
            rhs: Operand::Column(rhs),
        }
    }

    /// Literal operand, if any.
    pub fn literal_value(&self) -> Option<&Value> {
        match &self.rhs {
            Operand::Literal(v) => Some(v),
            Operand::Column(_) => None,
        }
    }

    /// Evaluates the condition; incomparable values never match.
    pub fn eval(&self, layout: &TupleLayout, tuple: &Tuple) -> ExecutorResult<bool> {
        let lhs = tuple.value(layout.column(&self.lhs)?)?;
        let rhs = match &self.rhs {
            Operand::Literal(v) => v.clone(),
            Operand::Column(col) => tuple.value(layout.column(col)?)?,
        };
        Ok(lhs
            .compare(&rhs)
            .map(|ordering| self.op.holds(ordering))
            .unwrap_or(false))
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.rhs {
            Operand::Literal(v) => write!(f, "{} {} {}", self.lhs, self.op, v),
            Operand::Column(c) => write!(f, "{} {} {}", self.lhs, self.op, c),
        }
    }
}

/// All conditions must hold (AND semantics).
pub fn eval_all(conditions: &[Condition], layout: &TupleLayout, tuple: &Tuple) -> ExecutorResult<bool> {
    for cond in conditions {
        if !cond.eval(layout, tuple)? {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::tuple::ColType;

    fn layout() -> TupleLayout {
        TupleLayout::new("t", &[("a", ColType::Int), ("b", ColType::Int)])
    }

    fn row(a: i32, b: i32) -> Tuple {
        Tuple::from_values(&layout(), &[Value::Int(a), Value::Int(b)]).unwrap()
    }

    #[test]
    fn test_literal_comparisons() {
        let l = layout();
        let a = ColumnRef::new("t", "a");
        let t = row(5, 9);
        assert!(Condition::literal(a.clone(), CompOp::Eq, Value::Int(5)).eval(&l, &t).unwrap());
        assert!(Condition::literal(a.clone(), CompOp::Ge, Value::Int(5)).eval(&l, &t).unwrap());
        assert!(!Condition::literal(a.clone(), CompOp::Gt, Value::Int(5)).eval(&l, &t).unwrap());
        assert!(Condition::literal(a, CompOp::Ne, Value::Int(4)).eval(&l, &t).unwrap());
    }

    #[test]
    fn test_column_comparison() {
        let cond = Condition::columns(ColumnRef::new("t", "a"), CompOp::Lt, ColumnRef::new("t", "b"));
        assert!(cond.eval(&layout(), &row(1, 2)).unwrap());
        assert!(!cond.eval(&layout(), &row(2, 2)).unwrap());
    }

    #[test]
    fn test_type_mismatch_never_matches() {
        let cond = Condition::literal(ColumnRef::new("t", "a"), CompOp::Eq, Value::str("x"));
        assert!(!cond.eval(&layout(), &row(1, 2)).unwrap());
    }

    #[test]
    fn test_unknown_column_is_error() {
        let cond = Condition::literal(ColumnRef::new("t", "zzz"), CompOp::Eq, Value::Int(1));
        assert!(cond.eval(&layout(), &row(1, 2)).is_err());
    }

    #[test]
    fn test_eval_all_and_semantics() {
        let conds = vec![
            Condition::literal(ColumnRef::new("t", "a"), CompOp::Gt, Value::Int(0)),
            Condition::literal(ColumnRef::new("t", "b"), CompOp::Lt, Value::Int(5)),
        ];
        assert!(eval_all(&conds, &layout(), &row(1, 4)).unwrap());
        assert!(!eval_all(&conds, &layout(), &row(1, 6)).unwrap());
    }
}
