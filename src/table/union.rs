//! Several tables of different row types queried as one set.
//!
//! Members are kept in a fixed order. The combined row list is cached and
//! only recomputed when the generation of at least one member's snapshot
//! moved since the last computation.
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use log::trace;
use parking_lot::Mutex;

use crate::error::ClientResult;

use super::{CachedTable, Row, RowSequence, Value};

/// One member of a [`UnionView`], seen through the shared row type `T`.
pub trait UnionSource<K, T>: Send + Sync {
    /// Generation of the current snapshot, loading it if needed.
    fn generation(&self) -> ClientResult<u64>;

    /// Every row of the current snapshot with the generation it came from.
    fn collect(&self) -> ClientResult<(u64, Vec<T>)>;

    fn find(&self, key: &K) -> ClientResult<Option<T>>;

    fn find_unique(&self, column: usize, value: &Value) -> ClientResult<Option<T>>;
}

impl<C, T> UnionSource<<C::Row as Row>::Key, T> for C
where
    C: CachedTable,
    C::Row: Into<T>,
{
    fn generation(&self) -> ClientResult<u64> {
        Ok(self.rows()?.generation())
    }

    fn collect(&self) -> ClientResult<(u64, Vec<T>)> {
        let snapshot = self.rows()?;
        let rows = snapshot.to_vec()?.into_iter().map(Into::into).collect();
        Ok((snapshot.generation(), rows))
    }

    fn find(&self, key: &<C::Row as Row>::Key) -> ClientResult<Option<T>> {
        Ok(self.get(key)?.map(Into::into))
    }

    fn find_unique(&self, column: usize, value: &Value) -> ClientResult<Option<T>> {
        Ok(self.unique_row(column, value)?.map(Into::into))
    }
}

struct Combined<T> {
    generations: Vec<u64>,
    rows: Arc<Vec<T>>,
}

pub struct UnionView<K, T> {
    members: Vec<Arc<dyn UnionSource<K, T>>>,
    combined: Mutex<Option<Combined<T>>>,
    computations: AtomicU64,
}

impl<K, T> UnionView<K, T> {
    pub fn new(members: Vec<Arc<dyn UnionSource<K, T>>>) -> Self {
        Self {
            members,
            combined: Mutex::new(None),
            computations: AtomicU64::new(0),
        }
    }

    pub fn members(&self) -> usize {
        self.members.len()
    }

    /// How many times the combined list was rebuilt.
    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::Relaxed)
    }

    /// Rows of every member, in member order.
    pub fn get_all(&self) -> ClientResult<Arc<Vec<T>>> {
        let mut combined = self.combined.lock();

        let generations = self
            .members
            .iter()
            .map(|m| m.generation())
            .collect::<ClientResult<Vec<_>>>()?;
        if let Some(current) = combined.as_ref() {
            if current.generations == generations {
                return Ok(Arc::clone(&current.rows));
            }
        }

        let mut generations = Vec::with_capacity(self.members.len());
        let mut rows = Vec::new();
        for member in &self.members {
            let (generation, member_rows) = member.collect()?;
            generations.push(generation);
            rows.extend(member_rows);
        }
        let rows = Arc::new(rows);
        *combined = Some(Combined {
            generations,
            rows: Arc::clone(&rows),
        });
        self.computations.fetch_add(1, Ordering::Relaxed);
        trace!("recomputed union of {} tables", self.members.len());
        Ok(rows)
    }

    /// First member holding `key` wins.
    pub fn get(&self, key: &K) -> ClientResult<Option<T>> {
        for member in &self.members {
            if let Some(row) = member.find(key)? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    /// Unique lookup in every member. Uniqueness holds per member only, so
    /// several rows may come back.
    pub fn filter_unique(&self, column: usize, value: &Value) -> ClientResult<Vec<T>> {
        let mut found = Vec::new();
        for member in &self.members {
            found.extend(member.find_unique(column, value)?);
        }
        Ok(found)
    }
}
