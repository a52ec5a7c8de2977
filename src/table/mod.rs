//! Client-side caches of server tables.
//!
//! A table cache loads a complete snapshot of one server table on first use,
//! serves it until told the server state changed, and then drops it so the
//! next access reloads from scratch.
//!
//! # Key Components
//!
//! - [`Row`]: contract every cached row type implements.
//! - [`MemoryTable`](memory::MemoryTable): snapshot held as an in-memory list.
//! - [`DiskTable`](disk::DiskTable): snapshot spilled to a fixed-width record
//!   file, for tables too large to keep as objects.
//! - [`UnionView`](union::UnionView): several tables of different row types
//!   sharing one supertype, queried as one set.
//!
//! Unique lookups go through column indexes: sorted copies of the current
//! snapshot, built lazily per column and binary searched with the same
//! [`Value`] ordering used to sort them.
use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use log::warn;

use crate::{error::ClientResult, protocol::Decoder};

pub mod disk;
pub mod memory;
mod row;
pub mod union;
mod value;

pub use disk::{DiskSnapshot, DiskTable};
pub use memory::{MemorySnapshot, MemoryTable};
pub use row::{Column, FixedRecord, Row};
pub use union::{UnionSource, UnionView};
pub use value::Value;

/// Server identifier of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table #{}", self.0)
    }
}

/// Where table caches get their rows from.
pub trait TableSource: Send + Sync {
    /// Streams every row of `table`, handing the decoder to `on_row` once
    /// per row. Nothing is published if this returns an error.
    fn fetch_table(
        &self,
        table: TableId,
        on_row: &mut dyn FnMut(&mut Decoder<'_>) -> ClientResult<()>,
    ) -> ClientResult<()>;
}

/// Read access to an immutable snapshot, independent of where rows live.
pub trait RowSequence<R>: Clone + Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn row(&self, index: usize) -> ClientResult<R>;

    fn to_vec(&self) -> ClientResult<Vec<R>> {
        (0..self.len()).map(|i| self.row(i)).collect()
    }

    /// Whether both handles refer to the very same snapshot.
    fn same_as(&self, other: &Self) -> bool;

    /// Load counter of the table when this snapshot was published.
    fn generation(&self) -> u64;
}

/// Type-erased side of a table cache, used by the connector to apply
/// invalidations and gather statistics.
pub trait InvalidateTable: Send + Sync {
    fn table_id(&self) -> TableId;

    /// Forgets the snapshot and indexes. Idempotent; does not refetch.
    fn clear_cache(&self);

    fn stats(&self) -> TableStats;
}

/// Full cache contract shared by the memory and disk strategies.
pub trait CachedTable: InvalidateTable {
    type Row: Row;
    type Snapshot: RowSequence<Self::Row>;

    /// Current snapshot, loading it first when the cache is empty.
    fn rows(&self) -> ClientResult<Self::Snapshot>;

    /// Row whose unique `column` equals `value`.
    fn unique_row(&self, column: usize, value: &Value) -> ClientResult<Option<Self::Row>>;

    fn get(&self, key: &<Self::Row as Row>::Key) -> ClientResult<Option<Self::Row>> {
        self.unique_row(<Self::Row as Row>::KEY_COLUMN, &key.clone().into())
    }
}

/// Point in time counters of one table cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStats {
    pub table: TableId,
    pub name: &'static str,
    pub loaded: bool,
    pub rows: usize,
    /// `rows()` calls served without a fetch.
    pub hits: u64,
    pub loads: u64,
    /// Column indexes currently built.
    pub indexes: usize,
}

const NOT_LOADED: i64 = -1;

/// Load bookkeeping shared by both cache strategies.
#[derive(Debug)]
pub(crate) struct LoadState {
    last_loaded: i64,
    generation: u64,
}

impl LoadState {
    pub fn new() -> Self {
        Self {
            last_loaded: NOT_LOADED,
            generation: 0,
        }
    }

    /// Whether the current snapshot may be served. A clock that moved
    /// backwards since the load counts as not loaded.
    pub fn is_fresh(&self, now: i64, table: TableId) -> bool {
        if self.last_loaded == NOT_LOADED {
            return false;
        }
        if now < self.last_loaded {
            warn!("clock moved backwards for {table}, reloading");
            return false;
        }
        true
    }

    pub fn is_loaded(&self) -> bool {
        self.last_loaded != NOT_LOADED
    }

    /// Records a successful load and returns the new snapshot generation.
    pub fn loaded(&mut self, now: i64) -> u64 {
        self.last_loaded = now;
        self.generation += 1;
        self.generation
    }

    pub fn clear(&mut self) {
        self.last_loaded = NOT_LOADED;
    }

    #[cfg(test)]
    pub fn set_last_loaded(&mut self, millis: i64) {
        self.last_loaded = millis;
    }
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_state_transitions() {
        let table = TableId(1);
        let mut state = LoadState::new();
        assert!(!state.is_fresh(10, table));

        assert_eq!(state.loaded(10), 1);
        assert!(state.is_fresh(10, table));
        assert!(state.is_fresh(50, table));
        assert!(!state.is_fresh(5, table));

        state.clear();
        assert!(!state.is_loaded());
        assert_eq!(state.loaded(20), 2);
    }
}
