use std::{
    collections::HashMap,
    ops::Deref,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use log::{debug, trace};
use parking_lot::Mutex;

use crate::error::{ClientError, ClientResult};

use super::{
    CachedTable, InvalidateTable, LoadState, Row, RowSequence, TableId, TableSource, TableStats,
    Value, now_millis, row::is_unique,
};

/// Immutable list of every row of a table at one point in time.
#[derive(Debug, Clone)]
pub struct MemorySnapshot<R> {
    rows: Arc<Vec<R>>,
    generation: u64,
}

impl<R> MemorySnapshot<R> {
    pub fn as_slice(&self) -> &[R] {
        &self.rows
    }
}

impl<R> Deref for MemorySnapshot<R> {
    type Target = [R];

    fn deref(&self) -> &[R] {
        &self.rows
    }
}

impl<R: Row> RowSequence<R> for MemorySnapshot<R> {
    fn len(&self) -> usize {
        self.rows.len()
    }

    fn row(&self, index: usize) -> ClientResult<R> {
        self.rows
            .get(index)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("row {index} of {}", R::NAME)))
    }

    fn to_vec(&self) -> ClientResult<Vec<R>> {
        Ok(self.rows.as_ref().clone())
    }

    fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.rows, &other.rows)
    }

    fn generation(&self) -> u64 {
        self.generation
    }
}

struct State<R> {
    load: LoadState,
    snapshot: Option<MemorySnapshot<R>>,
    /// Sorted copies of `snapshot`, keyed by column.
    indexes: HashMap<usize, Arc<Vec<R>>>,
}

impl<R> State<R> {
    fn clear(&mut self) {
        self.load.clear();
        self.snapshot = None;
        self.indexes.clear();
    }
}

/// Table cache holding its snapshot as an in-memory list.
pub struct MemoryTable<R: Row> {
    source: Arc<dyn TableSource>,
    state: Mutex<State<R>>,
    hits: AtomicU64,
    loads: AtomicU64,
}

impl<R: Row> MemoryTable<R> {
    pub fn new(source: Arc<dyn TableSource>) -> Self {
        Self {
            source,
            state: Mutex::new(State {
                load: LoadState::new(),
                snapshot: None,
                indexes: HashMap::new(),
            }),
            hits: AtomicU64::new(0),
            loads: AtomicU64::new(0),
        }
    }

    fn fresh_snapshot(state: &State<R>) -> Option<MemorySnapshot<R>> {
        if state.load.is_fresh(now_millis(), R::TABLE) {
            state.snapshot.clone()
        } else {
            None
        }
    }

    fn snapshot_locked(&self, state: &mut State<R>) -> ClientResult<MemorySnapshot<R>> {
        match Self::fresh_snapshot(state) {
            Some(snapshot) => Ok(snapshot),
            None => self.load_locked(state),
        }
    }

    fn load_locked(&self, state: &mut State<R>) -> ClientResult<MemorySnapshot<R>> {
        state.clear();
        let started = Instant::now();
        let mut rows = Vec::new();
        self.source.fetch_table(R::TABLE, &mut |dec| {
            let version = dec.version();
            rows.push(R::read_from(dec, version)?);
            Ok(())
        })?;

        let generation = state.load.loaded(now_millis());
        let snapshot = MemorySnapshot {
            rows: Arc::new(rows),
            generation,
        };
        state.snapshot = Some(snapshot.clone());
        self.loads.fetch_add(1, Ordering::Relaxed);
        debug!(
            "loaded {} rows of {} in {:?}",
            snapshot.len(),
            R::NAME,
            started.elapsed()
        );
        Ok(snapshot)
    }

    fn index_locked(&self, state: &mut State<R>, column: usize) -> ClientResult<Arc<Vec<R>>> {
        let snapshot = self.snapshot_locked(state)?;
        if let Some(index) = state.indexes.get(&column) {
            return Ok(Arc::clone(index));
        }

        let mut sorted = snapshot.as_slice().to_vec();
        sorted.sort_by_cached_key(|row| row.column_value(column));
        trace!("built index on column {column} of {}", R::NAME);

        let index = Arc::new(sorted);
        state.indexes.insert(column, Arc::clone(&index));
        Ok(index)
    }
}

impl<R: Row> InvalidateTable for MemoryTable<R> {
    fn table_id(&self) -> TableId {
        R::TABLE
    }

    fn clear_cache(&self) {
        self.state.lock().clear();
        debug!("cleared cache of {}", R::NAME);
    }

    fn stats(&self) -> TableStats {
        let state = self.state.lock();
        TableStats {
            table: R::TABLE,
            name: R::NAME,
            loaded: state.load.is_loaded(),
            rows: state.snapshot.as_ref().map_or(0, |s| s.len()),
            hits: self.hits.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            indexes: state.indexes.len(),
        }
    }
}

impl<R: Row> CachedTable for MemoryTable<R> {
    type Row = R;
    type Snapshot = MemorySnapshot<R>;

    fn rows(&self) -> ClientResult<MemorySnapshot<R>> {
        let mut state = self.state.lock();
        if let Some(snapshot) = Self::fresh_snapshot(&state) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(snapshot);
        }
        self.load_locked(&mut state)
    }

    fn unique_row(&self, column: usize, value: &Value) -> ClientResult<Option<R>> {
        if !is_unique::<R>(column) {
            return Err(ClientError::NotUnique {
                table: R::TABLE,
                column,
            });
        }

        let index = {
            let mut state = self.state.lock();
            self.index_locked(&mut state, column)?
        };
        Ok(index
            .binary_search_by(|row| row.column_value(column).cmp(value))
            .ok()
            .map(|pos| index[pos].clone()))
    }
}
