//! Tuples, column layouts and typed values
//!
//! A tuple is a fixed-length byte buffer owned by the storage layer. The
//! executors treat it as an opaque copyable value and only look inside it
//! through a `TupleLayout`.

use std::cmp::Ordering;
use std::fmt;

use super::errors::{ExecutorError, ExecutorResult};

/// Table identifier
pub type TableId = u32;

/// Row address inside an index: page and slot.
///
/// Ordering follows index order, which lets a cursor compare its position
/// against the upper bound of its range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rid {
    pub page_no: u32,
    pub slot_no: u32,
}

impl Rid {
    /// Marker for "no row"
    pub const INVALID: Rid = Rid {
        page_no: u32::MAX,
        slot_no: u32::MAX,
    };

    pub fn new(page_no: u32, slot_no: u32) -> Self {
        Self { page_no, slot_no }
    }

    pub fn is_valid(&self) -> bool {
        *self != Rid::INVALID
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_no, self.slot_no)
    }
}

/// Per-row header maintained by the transaction layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TupleHeader {
    /// Transaction that last wrote the row
    pub txn_id: u64,
    /// Deletion mark
    pub deleted: bool,
    /// Undo pointer
    pub rollback: Rid,
}

impl Default for TupleHeader {
    fn default() -> Self {
        Self {
            txn_id: 0,
            deleted: false,
            rollback: Rid::INVALID,
        }
    }
}

/// A row: header plus fixed-length column data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    pub header: TupleHeader,
    pub data: Vec<u8>,
}

impl Tuple {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            header: TupleHeader::default(),
            data,
        }
    }

    /// Builds a tuple from one value per column of `layout`.
    pub fn from_values(layout: &TupleLayout, values: &[Value]) -> ExecutorResult<Self> {
        if values.len() != layout.columns().len() {
            return Err(ExecutorError::execution_failed(format!(
                "Expected {} values, got {}",
                layout.columns().len(),
                values.len()
            )));
        }
        let mut data = vec![0u8; layout.tuple_len()];
        for (col, value) in layout.columns().iter().zip(values) {
            value.encode_into(col, &mut data[col.offset..col.offset + col.len])?;
        }
        Ok(Self::new(data))
    }

    /// Concatenation used by joins: left columns then right columns.
    pub fn join(left: &Tuple, right: &Tuple) -> Tuple {
        let mut data = Vec::with_capacity(left.data.len() + right.data.len());
        data.extend_from_slice(&left.data);
        data.extend_from_slice(&right.data);
        Tuple::new(data)
    }

    /// Raw bytes of one column.
    pub fn column_bytes(&self, col: &ColMeta) -> ExecutorResult<&[u8]> {
        self.data
            .get(col.offset..col.offset + col.len)
            .ok_or_else(|| {
                ExecutorError::execution_failed(format!(
                    "Column {} out of tuple bounds ({} bytes)",
                    col.name,
                    self.data.len()
                ))
            })
    }

    /// Typed value of one column.
    pub fn value(&self, col: &ColMeta) -> ExecutorResult<Value> {
        Ok(Value::decode(col.col_type, self.column_bytes(col)?))
    }

    /// Bytes this tuple occupies in a checkpoint record.
    pub fn encoded_len(&self) -> usize {
        // txn_id + deleted + rollback + data length prefix + data
        8 + 1 + 8 + 4 + self.data.len()
    }
}

/// Column type with its fixed byte width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColType {
    Int,
    Float,
    Str(usize),
}

impl ColType {
    pub fn width(&self) -> usize {
        match self {
            ColType::Int | ColType::Float => 4,
            ColType::Str(len) => *len,
        }
    }

    /// Smallest value of this type, used to pad lower range bounds.
    ///
    /// Floats order by `total_cmp`, so the ends are the negative and positive
    /// quiet NaNs rather than the finite extremes.
    pub fn min_value(&self) -> Value {
        match self {
            ColType::Int => Value::Int(i32::MIN),
            ColType::Float => Value::Float(f32::from_bits(0xFFFF_FFFF)),
            ColType::Str(len) => Value::Str(vec![0x00; *len]),
        }
    }

    /// Largest value of this type, used to pad upper range bounds.
    pub fn max_value(&self) -> Value {
        match self {
            ColType::Int => Value::Int(i32::MAX),
            ColType::Float => Value::Float(f32::from_bits(0x7FFF_FFFF)),
            ColType::Str(len) => Value::Str(vec![0xFF; *len]),
        }
    }
}

/// Reference to a column by table and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// Placement of one column inside a tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColMeta {
    pub table: String,
    pub name: String,
    pub col_type: ColType,
    pub offset: usize,
    pub len: usize,
}

impl ColMeta {
    pub fn matches(&self, col: &ColumnRef) -> bool {
        self.table == col.table && self.name == col.column
    }
}

/// Ordered column placements and the total tuple width.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TupleLayout {
    columns: Vec<ColMeta>,
    tuple_len: usize,
}

impl TupleLayout {
    /// Lays out `columns` of `table` back to back.
    pub fn new(table: &str, columns: &[(&str, ColType)]) -> Self {
        let mut offset = 0;
        let mut metas = Vec::with_capacity(columns.len());
        for (name, col_type) in columns {
            let len = col_type.width();
            metas.push(ColMeta {
                table: table.to_string(),
                name: name.to_string(),
                col_type: *col_type,
                offset,
                len,
            });
            offset += len;
        }
        Self {
            columns: metas,
            tuple_len: offset,
        }
    }

    pub fn from_columns(columns: Vec<ColMeta>) -> Self {
        let tuple_len = columns.iter().map(|c| c.offset + c.len).max().unwrap_or(0);
        Self { columns, tuple_len }
    }

    /// Layout of `Tuple::join(left, right)`.
    pub fn join(left: &TupleLayout, right: &TupleLayout) -> Self {
        let mut columns = left.columns.clone();
        columns.extend(right.columns.iter().map(|c| ColMeta {
            offset: c.offset + left.tuple_len,
            ..c.clone()
        }));
        Self {
            columns,
            tuple_len: left.tuple_len + right.tuple_len,
        }
    }

    pub fn columns(&self) -> &[ColMeta] {
        &self.columns
    }

    pub fn tuple_len(&self) -> usize {
        self.tuple_len
    }

    pub fn column(&self, col: &ColumnRef) -> ExecutorResult<&ColMeta> {
        self.columns
            .iter()
            .find(|c| c.matches(col))
            .ok_or_else(|| ExecutorError::execution_failed(format!("Unknown column {}", col)))
    }

    pub fn contains(&self, col: &ColumnRef) -> bool {
        self.columns.iter().any(|c| c.matches(col))
    }
}

/// A typed column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Float(f32),
    Str(Vec<u8>),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(s.as_bytes().to_vec())
    }

    pub fn decode(col_type: ColType, bytes: &[u8]) -> Value {
        match col_type {
            ColType::Int => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(&bytes[..4]);
                Value::Int(i32::from_le_bytes(buf))
            }
            ColType::Float => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(&bytes[..4]);
                Value::Float(f32::from_le_bytes(buf))
            }
            ColType::Str(_) => Value::Str(bytes.to_vec()),
        }
    }

    /// Writes the value into a column slot, zero-padding strings.
    pub fn encode_into(&self, col: &ColMeta, out: &mut [u8]) -> ExecutorResult<()> {
        match (self, col.col_type) {
            (Value::Int(v), ColType::Int) => out.copy_from_slice(&v.to_le_bytes()),
            (Value::Float(v), ColType::Float) => out.copy_from_slice(&v.to_le_bytes()),
            (Value::Str(s), ColType::Str(len)) => {
                if s.len() > len {
                    return Err(ExecutorError::execution_failed(format!(
                        "String of {} bytes does not fit column {} ({} bytes)",
                        s.len(),
                        col.name,
                        len
                    )));
                }
                out.fill(0);
                out[..s.len()].copy_from_slice(s);
            }
            _ => {
                return Err(ExecutorError::execution_failed(format!(
                    "Value {:?} does not match type of column {}",
                    self, col.name
                )))
            }
        }
        Ok(())
    }

    /// Comparison used by predicates. `None` when the types are incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => Some(a.total_cmp(b)),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(&(*b as f64)),
            (Value::Float(a), Value::Int(b)) => (*a as f64).partial_cmp(&(*b as f64)),
            (Value::Str(a), Value::Str(b)) => Some(trim_padding(a).cmp(trim_padding(b))),
            _ => None,
        }
    }

    /// Total order used for index keys; mismatched types order by type.
    pub fn cmp_total(&self, other: &Value) -> Ordering {
        self.compare(other)
            .unwrap_or_else(|| self.type_rank().cmp(&other.type_rank()))
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Int(_) => 0,
            Value::Float(_) => 1,
            Value::Str(_) => 2,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{:?}", String::from_utf8_lossy(trim_padding(s))),
        }
    }
}

fn trim_padding(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |p| p + 1);
    &bytes[..end]
}

/// Lexicographic comparison of two keys.
pub fn compare_keys(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        match x.cmp_total(y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> TupleLayout {
        TupleLayout::new("people", &[("id", ColType::Int), ("name", ColType::Str(8))])
    }

    #[test]
    fn test_layout_offsets() {
        let layout = people();
        assert_eq!(layout.tuple_len(), 12);
        assert_eq!(layout.columns()[1].offset, 4);
    }

    #[test]
    fn test_tuple_values() {
        let layout = people();
        let t = Tuple::from_values(&layout, &[Value::Int(7), Value::str("ann")]).unwrap();
        let name = layout.column(&ColumnRef::new("people", "name")).unwrap();
        assert_eq!(t.value(&layout.columns()[0]).unwrap(), Value::Int(7));
        assert_eq!(
            t.value(name).unwrap().compare(&Value::str("ann")),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn test_join_layout_shifts_right_columns() {
        let left = people();
        let right = TupleLayout::new("pets", &[("owner", ColType::Int)]);
        let joined = TupleLayout::join(&left, &right);
        let owner = joined.column(&ColumnRef::new("pets", "owner")).unwrap();
        assert_eq!(owner.offset, 12);
        assert_eq!(joined.tuple_len(), 16);
    }

    #[test]
    fn test_string_too_long_rejected() {
        let layout = people();
        let result = Tuple::from_values(&layout, &[Value::Int(1), Value::str("much too long")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_key_ordering_uses_sentinels() {
        let low = vec![Value::Int(5), ColType::Int.min_value()];
        let high = vec![Value::Int(5), ColType::Int.max_value()];
        let mid = vec![Value::Int(5), Value::Int(3)];
        assert_eq!(compare_keys(&low, &mid), Ordering::Less);
        assert_eq!(compare_keys(&mid, &high), Ordering::Less);
    }

    #[test]
    fn test_float_sentinels_bracket_every_value() {
        let min = ColType::Float.min_value();
        let max = ColType::Float.max_value();
        for v in [f32::NEG_INFINITY, f32::MIN, 0.0, f32::MAX, f32::INFINITY, f32::NAN] {
            let v = Value::Float(v);
            assert_ne!(min.cmp_total(&v), Ordering::Greater);
            assert_ne!(max.cmp_total(&v), Ordering::Less);
        }
    }
}

