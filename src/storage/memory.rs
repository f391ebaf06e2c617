//! In-memory clustering index

use std::cmp::Ordering;

use super::index::IndexStorage;
use crate::executor::{
    compare_keys, ColMeta, ColumnRef, ExecutorError, ExecutorResult, Rid, TableId, Tuple,
    TupleLayout, Value,
};

/// Rows per page when mapping positions onto `Rid`s.
const SLOTS_PER_PAGE: u32 = 64;

/// Immutable, key-ordered rows of a single table.
///
/// Rows with equal keys keep their insertion order.
#[derive(Debug, Clone)]
pub struct MemoryIndex {
    table_id: TableId,
    table_name: String,
    layout: TupleLayout,
    index_columns: Vec<ColMeta>,
    entries: Vec<(Vec<Value>, Tuple)>,
}

impl MemoryIndex {
    /// Builds an index over `rows`, keyed by `key_columns` of `layout`.
    pub fn new(
        table_id: TableId,
        layout: TupleLayout,
        key_columns: &[&str],
        rows: Vec<Vec<Value>>,
    ) -> ExecutorResult<Self> {
        let table_name = layout
            .columns()
            .first()
            .map(|c| c.table.clone())
            .ok_or_else(|| ExecutorError::execution_failed("Index layout has no columns"))?;

        let mut index_columns = Vec::with_capacity(key_columns.len());
        for name in key_columns {
            let col = layout.column(&ColumnRef::new(table_name.as_str(), *name))?;
            index_columns.push(col.clone());
        }

        let mut entries = Vec::with_capacity(rows.len());
        for values in rows {
            let tuple = Tuple::from_values(&layout, &values)?;
            let mut key = Vec::with_capacity(index_columns.len());
            for col in &index_columns {
                key.push(tuple.value(col)?);
            }
            entries.push((key, tuple));
        }
        entries.sort_by(|a, b| compare_keys(&a.0, &b.0));

        Ok(Self {
            table_id,
            table_name,
            layout,
            index_columns,
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Position of the `n`-th row in key order.
    pub fn rid_of(&self, n: usize) -> Rid {
        position_to_rid(n)
    }

    fn partition_point(&self, key: &[Value], inclusive: bool) -> usize {
        self.entries.partition_point(|(row_key, _)| {
            let ordering = compare_prefix(row_key, key);
            if inclusive {
                ordering == Ordering::Less
            } else {
                ordering != Ordering::Greater
            }
        })
    }

    fn position(&self, rid: Rid) -> ExecutorResult<usize> {
        let pos = rid_to_position(rid);
        if pos > self.entries.len() {
            return Err(ExecutorError::execution_failed(format!(
                "Rid {} outside index of {} rows",
                rid,
                self.entries.len()
            )));
        }
        Ok(pos)
    }
}

impl IndexStorage for MemoryIndex {
    fn table_id(&self) -> TableId {
        self.table_id
    }

    fn table_name(&self) -> &str {
        &self.table_name
    }

    fn layout(&self) -> &TupleLayout {
        &self.layout
    }

    fn index_columns(&self) -> &[ColMeta] {
        &self.index_columns
    }

    fn lower_bound(&self, key: &[Value]) -> ExecutorResult<Rid> {
        Ok(position_to_rid(self.partition_point(key, true)))
    }

    fn upper_bound(&self, key: &[Value]) -> ExecutorResult<Rid> {
        Ok(position_to_rid(self.partition_point(key, false)))
    }

    fn first_rid(&self) -> Rid {
        position_to_rid(0)
    }

    fn end_rid(&self) -> Rid {
        position_to_rid(self.entries.len())
    }

    fn next_rid(&self, rid: Rid) -> ExecutorResult<Rid> {
        let pos = self.position(rid)?;
        Ok(position_to_rid((pos + 1).min(self.entries.len())))
    }

    fn key_at(&self, rid: Rid) -> ExecutorResult<Option<Vec<Value>>> {
        let pos = self.position(rid)?;
        Ok(self.entries.get(pos).map(|(key, _)| key.clone()))
    }

    fn get_row(&self, rid: Rid) -> ExecutorResult<Tuple> {
        let pos = self.position(rid)?;
        self.entries
            .get(pos)
            .map(|(_, tuple)| tuple.clone())
            .ok_or_else(|| ExecutorError::execution_failed(format!("No row at {}", rid)))
    }
}

/// Compares a full row key against a possibly shorter search key.
fn compare_prefix(row_key: &[Value], key: &[Value]) -> Ordering {
    let n = key.len().min(row_key.len());
    compare_keys(&row_key[..n], &key[..n])
}

fn position_to_rid(pos: usize) -> Rid {
    let pos = pos as u32;
    Rid::new(pos / SLOTS_PER_PAGE, pos % SLOTS_PER_PAGE)
}

fn rid_to_position(rid: Rid) -> usize {
    (rid.page_no as usize) * (SLOTS_PER_PAGE as usize) + rid.slot_no as usize
}
