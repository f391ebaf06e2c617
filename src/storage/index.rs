//! Index collaborator interface

use crate::executor::{
    ColMeta, ExecutorResult, KeyBound, Rid, TableId, Tuple, TupleLayout, Value,
};

/// Ordered access to a clustering index.
///
/// Positions are `Rid`s ordered in key order; `end_rid()` is the position
/// past the last row and compares greater than every row position.
pub trait IndexStorage: Send + Sync {
    fn table_id(&self) -> TableId;

    fn table_name(&self) -> &str;

    /// Layout of the rows returned by `get_row`
    fn layout(&self) -> &TupleLayout;

    /// Index key columns in declared order
    fn index_columns(&self) -> &[ColMeta];

    /// First position whose key is `>= key`
    fn lower_bound(&self, key: &[Value]) -> ExecutorResult<Rid>;

    /// First position whose key is `> key`
    fn upper_bound(&self, key: &[Value]) -> ExecutorResult<Rid>;

    fn first_rid(&self) -> Rid;

    fn end_rid(&self) -> Rid;

    /// Position following `rid`, or `end_rid()`
    fn next_rid(&self, rid: Rid) -> ExecutorResult<Rid>;

    /// Key stored at `rid`, `None` at the end position
    fn key_at(&self, rid: Rid) -> ExecutorResult<Option<Vec<Value>>>;

    fn get_row(&self, rid: Rid) -> ExecutorResult<Tuple>;

    /// Opens a cursor over the positions between two key bounds.
    fn open_cursor(&self, lower: &KeyBound, upper: &KeyBound) -> ExecutorResult<IndexCursor> {
        let lo = if lower.inclusive {
            self.lower_bound(&lower.key)?
        } else {
            self.upper_bound(&lower.key)?
        };
        let hi = if upper.inclusive {
            self.upper_bound(&upper.key)?
        } else {
            self.lower_bound(&upper.key)?
        };
        Ok(IndexCursor::new(lo, hi))
    }

    /// Opens a cursor over the whole index.
    fn open_full_cursor(&self) -> IndexCursor {
        IndexCursor::new(self.first_rid(), self.end_rid())
    }
}

/// Position inside `[lower, upper)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexCursor {
    lower: Rid,
    upper: Rid,
    position: Rid,
}

impl IndexCursor {
    pub fn new(lower: Rid, upper: Rid) -> Self {
        Self {
            lower,
            upper,
            position: lower,
        }
    }

    /// Reopens a range with the cursor already at `position`.
    pub fn at(position: Rid, lower: Rid, upper: Rid) -> Self {
        Self {
            lower,
            upper,
            position,
        }
    }

    pub fn lower(&self) -> Rid {
        self.lower
    }

    pub fn upper(&self) -> Rid {
        self.upper
    }

    /// Row under the cursor, `None` once the range is exhausted
    pub fn current(&self) -> Option<Rid> {
        if self.position >= self.upper {
            None
        } else {
            Some(self.position)
        }
    }

    pub fn is_empty_range(&self) -> bool {
        self.lower >= self.upper
    }

    /// Moves to the next position and returns it, or `None` at the end.
    pub fn advance(&mut self, index: &dyn IndexStorage) -> ExecutorResult<Option<Rid>> {
        if self.current().is_none() {
            return Ok(None);
        }
        self.position = index.next_rid(self.position)?;
        Ok(self.current())
    }
}
