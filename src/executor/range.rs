//! Key-range derivation for index scans
//!
//! Index columns are walked in declared order:
//! 1. A column bound by equality copies the literal into both bounds
//! 2. The first column bound by an inequality sets the partial key for the
//!    operator and pads the remaining columns with min/max sentinels
//! 3. Derivation stops at the first inequality or the first unbound column
//!
//! Conditions that cannot bound the range (`<>`, column-to-column) are left to
//! the residual filter.

use super::condition::{CompOp, Condition};
use super::tuple::{ColMeta, Value};

/// One end of a key range.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyBound {
    pub key: Vec<Value>,
    pub inclusive: bool,
}

impl KeyBound {
    pub fn inclusive(key: Vec<Value>) -> Self {
        Self {
            key,
            inclusive: true,
        }
    }

    pub fn exclusive(key: Vec<Value>) -> Self {
        Self {
            key,
            inclusive: false,
        }
    }
}

/// How the range was bounded; drives the lock policy.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeShape {
    /// No index column is bound
    FullScan,
    /// Only equality conditions; `full_key` when every index column is bound
    Equality { full_key: bool },
    /// Equality prefix followed by one inequality. `probe` is the prefix plus
    /// the inequality literal.
    Inequality { op: CompOp, probe: Vec<Value> },
}

/// A derived `[lower, upper)` key range.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRange {
    pub lower: KeyBound,
    pub upper: KeyBound,
    pub shape: RangeShape,
}

impl KeyRange {
    pub fn is_full_scan(&self) -> bool {
        self.shape == RangeShape::FullScan
    }
}

/// Derives the scan range for `index_columns` from `conditions`.
pub fn derive_key_range(index_columns: &[ColMeta], conditions: &[Condition]) -> KeyRange {
    let mut lower = Vec::with_capacity(index_columns.len());
    let mut upper = Vec::with_capacity(index_columns.len());

    for (pos, col) in index_columns.iter().enumerate() {
        let rest = &index_columns[pos + 1..];

        if let Some(value) = find_bound(col, conditions, |op| op == CompOp::Eq) {
            lower.push(value.clone());
            upper.push(value);
            continue;
        }

        let Some((op, value)) = find_range_bound(col, conditions) else {
            break;
        };

        let mut probe = lower.clone();
        probe.push(value.clone());

        let range = match op {
            CompOp::Gt => {
                lower.push(value);
                lower.extend(rest.iter().map(|c| c.col_type.max_value()));
                upper.push(col.col_type.max_value());
                upper.extend(rest.iter().map(|c| c.col_type.max_value()));
                KeyRange {
                    lower: KeyBound::exclusive(lower),
                    upper: KeyBound::inclusive(upper),
                    shape: RangeShape::Inequality { op, probe },
                }
            }
            CompOp::Ge => {
                lower.push(value);
                lower.extend(rest.iter().map(|c| c.col_type.min_value()));
                upper.push(col.col_type.max_value());
                upper.extend(rest.iter().map(|c| c.col_type.max_value()));
                KeyRange {
                    lower: KeyBound::inclusive(lower),
                    upper: KeyBound::inclusive(upper),
                    shape: RangeShape::Inequality { op, probe },
                }
            }
            CompOp::Lt => {
                lower.push(col.col_type.min_value());
                lower.extend(rest.iter().map(|c| c.col_type.min_value()));
                upper.push(value);
                upper.extend(rest.iter().map(|c| c.col_type.min_value()));
                KeyRange {
                    lower: KeyBound::inclusive(lower),
                    upper: KeyBound::exclusive(upper),
                    shape: RangeShape::Inequality { op, probe },
                }
            }
            _ => {
                // Le
                lower.push(col.col_type.min_value());
                lower.extend(rest.iter().map(|c| c.col_type.min_value()));
                upper.push(value);
                upper.extend(rest.iter().map(|c| c.col_type.max_value()));
                KeyRange {
                    lower: KeyBound::inclusive(lower),
                    upper: KeyBound::inclusive(upper),
                    shape: RangeShape::Inequality { op, probe },
                }
            }
        };
        return range;
    }

    let bound = lower.len();
    let shape = if bound == 0 {
        RangeShape::FullScan
    } else {
        RangeShape::Equality {
            full_key: bound == index_columns.len(),
        }
    };
    for col in &index_columns[bound..] {
        lower.push(col.col_type.min_value());
        upper.push(col.col_type.max_value());
    }
    KeyRange {
        lower: KeyBound::inclusive(lower),
        upper: KeyBound::inclusive(upper),
        shape,
    }
}

fn find_bound(
    col: &ColMeta,
    conditions: &[Condition],
    accept: impl Fn(CompOp) -> bool,
) -> Option<Value> {
    conditions
        .iter()
        .filter(|c| col.table == c.lhs.table && col.name == c.lhs.column && accept(c.op))
        .find_map(|c| c.literal_value().cloned())
}

fn find_range_bound(col: &ColMeta, conditions: &[Condition]) -> Option<(CompOp, Value)> {
    conditions
        .iter()
        .filter(|c| col.table == c.lhs.table && col.name == c.lhs.column && c.op.is_range())
        .find_map(|c| c.literal_value().map(|v| (c.op, v.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::tuple::{ColType, ColumnRef, TupleLayout};

    fn two_col_index() -> Vec<ColMeta> {
        TupleLayout::new("t", &[("c1", ColType::Int), ("c2", ColType::Int)])
            .columns()
            .to_vec()
    }

    fn cond(col: &str, op: CompOp, v: i32) -> Condition {
        Condition::literal(ColumnRef::new("t", col), op, Value::Int(v))
    }

    #[test]
    fn test_equality_then_greater() {
        let range = derive_key_range(
            &two_col_index(),
            &[cond("c1", CompOp::Eq, 5), cond("c2", CompOp::Gt, 3)],
        );
        assert_eq!(range.lower, KeyBound::exclusive(vec![Value::Int(5), Value::Int(3)]));
        assert_eq!(
            range.upper,
            KeyBound::inclusive(vec![Value::Int(5), Value::Int(i32::MAX)])
        );
        assert_eq!(
            range.shape,
            RangeShape::Inequality {
                op: CompOp::Gt,
                probe: vec![Value::Int(5), Value::Int(3)]
            }
        );
    }

    #[test]
    fn test_less_than_pads_rest_with_min() {
        let range = derive_key_range(&two_col_index(), &[cond("c1", CompOp::Lt, 10)]);
        assert_eq!(
            range.lower,
            KeyBound::inclusive(vec![Value::Int(i32::MIN), Value::Int(i32::MIN)])
        );
        assert_eq!(
            range.upper,
            KeyBound::exclusive(vec![Value::Int(10), Value::Int(i32::MIN)])
        );
    }

    #[test]
    fn test_full_key_equality() {
        let range = derive_key_range(
            &two_col_index(),
            &[cond("c2", CompOp::Eq, 1), cond("c1", CompOp::Eq, 2)],
        );
        assert_eq!(range.shape, RangeShape::Equality { full_key: true });
        assert_eq!(range.lower.key, vec![Value::Int(2), Value::Int(1)]);
        assert_eq!(range.lower.key, range.upper.key);
    }

    #[test]
    fn test_prefix_equality_pads_sentinels() {
        let range = derive_key_range(&two_col_index(), &[cond("c1", CompOp::Eq, 2)]);
        assert_eq!(range.shape, RangeShape::Equality { full_key: false });
        assert_eq!(range.lower.key[1], Value::Int(i32::MIN));
        assert_eq!(range.upper.key[1], Value::Int(i32::MAX));
    }

    #[test]
    fn test_unbound_leading_column_is_full_scan() {
        let range = derive_key_range(
            &two_col_index(),
            &[cond("c2", CompOp::Eq, 1), cond("c1", CompOp::Ne, 4)],
        );
        assert!(range.is_full_scan());
    }

    #[test]
    fn test_float_bounds_cover_infinities() {
        let cols = TupleLayout::new("t", &[("f", ColType::Float)]).columns().to_vec();
        let lt = derive_key_range(
            &cols,
            &[Condition::literal(ColumnRef::new("t", "f"), CompOp::Lt, Value::Float(5.0))],
        );
        let gt = derive_key_range(
            &cols,
            &[Condition::literal(ColumnRef::new("t", "f"), CompOp::Gt, Value::Float(0.0))],
        );

        let neg_inf = Value::Float(f32::NEG_INFINITY);
        let pos_inf = Value::Float(f32::INFINITY);
        assert_eq!(lt.lower.key[0].cmp_total(&neg_inf), std::cmp::Ordering::Less);
        assert_eq!(gt.upper.key[0].cmp_total(&pos_inf), std::cmp::Ordering::Greater);
    }
}
