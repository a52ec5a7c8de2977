//! Table cache that spills its snapshot to a record file.
//!
//! Rows are kept in fixed-width records, encoded at the protocol version of
//! the session that fetched them, and materialized on demand by offset. Unique column indexes are
//! separate record files holding the same records in column order, searched
//! by bisecting record offsets.
use std::{
    collections::HashMap,
    marker::PhantomData,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use log::{debug, trace};
use parking_lot::Mutex;

use crate::{
    error::{ClientError, ClientResult},
    protocol::{Decoder, Encoder, ProtocolVersion},
    storage::{RecordFile, RecordWriter},
};

use super::{
    CachedTable, FixedRecord, InvalidateTable, LoadState, RowSequence, TableId, TableSource,
    TableStats, Value, now_millis, row::is_unique,
};

fn decode_record<R: FixedRecord>(
    file: &RecordFile,
    index: usize,
    version: ProtocolVersion,
) -> ClientResult<R> {
    let payload = file.read_payload(index)?;
    let mut bytes = payload.as_slice();
    R::read_from(&mut Decoder::new(&mut bytes, version), version)
}

fn encode_record<R: FixedRecord>(
    row: &R,
    buf: &mut Vec<u8>,
    version: ProtocolVersion,
) -> ClientResult<()> {
    buf.clear();
    row.write_to(&mut Encoder::new(buf, version), version)
}

/// Handle to one immutable, file-backed snapshot.
#[derive(Debug)]
pub struct DiskSnapshot<R> {
    file: Arc<RecordFile>,
    /// Version the records were encoded at; fields it lacks keep defaults.
    version: ProtocolVersion,
    generation: u64,
    _row: PhantomData<fn() -> R>,
}

impl<R> Clone for DiskSnapshot<R> {
    fn clone(&self) -> Self {
        Self {
            file: Arc::clone(&self.file),
            version: self.version,
            generation: self.generation,
            _row: PhantomData,
        }
    }
}

impl<R: FixedRecord> RowSequence<R> for DiskSnapshot<R> {
    fn len(&self) -> usize {
        self.file.len()
    }

    fn row(&self, index: usize) -> ClientResult<R> {
        decode_record(&self.file, index, self.version)
    }

    fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.file, &other.file)
    }

    fn generation(&self) -> u64 {
        self.generation
    }
}

struct State<R> {
    load: LoadState,
    snapshot: Option<DiskSnapshot<R>>,
    indexes: HashMap<usize, Arc<RecordFile>>,
}

impl<R> State<R> {
    fn clear(&mut self) {
        self.load.clear();
        self.snapshot = None;
        self.indexes.clear();
    }
}

/// Table cache backed by scratch record files.
pub struct DiskTable<R: FixedRecord> {
    source: Arc<dyn TableSource>,
    spill_dir: Option<PathBuf>,
    state: Mutex<State<R>>,
    hits: AtomicU64,
    loads: AtomicU64,
}

impl<R: FixedRecord> DiskTable<R> {
    pub fn new(source: Arc<dyn TableSource>, spill_dir: Option<PathBuf>) -> Self {
        Self {
            source,
            spill_dir,
            state: Mutex::new(State {
                load: LoadState::new(),
                snapshot: None,
                indexes: HashMap::new(),
            }),
            hits: AtomicU64::new(0),
            loads: AtomicU64::new(0),
        }
    }

    fn fresh_snapshot(state: &State<R>) -> Option<DiskSnapshot<R>> {
        if state.load.is_fresh(now_millis(), R::TABLE) {
            state.snapshot.clone()
        } else {
            None
        }
    }

    fn snapshot_locked(&self, state: &mut State<R>) -> ClientResult<DiskSnapshot<R>> {
        match Self::fresh_snapshot(state) {
            Some(snapshot) => Ok(snapshot),
            None => self.load_locked(state),
        }
    }

    fn load_locked(&self, state: &mut State<R>) -> ClientResult<DiskSnapshot<R>> {
        state.clear();
        let started = Instant::now();
        let mut writer = RecordWriter::create(R::NAME, R::RECORD_SIZE, self.spill_dir.as_deref())?;
        let mut buf = Vec::with_capacity(R::RECORD_SIZE);
        let mut version = ProtocolVersion::CURRENT;
        self.source.fetch_table(R::TABLE, &mut |dec| {
            version = dec.version();
            let row = R::read_from(dec, version)?;
            encode_record(&row, &mut buf, version)?;
            writer.append(&buf)?;
            Ok(())
        })?;
        let file = writer.finish()?;

        let generation = state.load.loaded(now_millis());
        let snapshot = DiskSnapshot {
            file: Arc::new(file),
            version,
            generation,
            _row: PhantomData,
        };
        state.snapshot = Some(snapshot.clone());
        self.loads.fetch_add(1, Ordering::Relaxed);
        debug!(
            "spilled {} rows of {} to disk in {:?}",
            snapshot.len(),
            R::NAME,
            started.elapsed()
        );
        Ok(snapshot)
    }

    fn index_locked(
        &self,
        state: &mut State<R>,
        column: usize,
    ) -> ClientResult<(Arc<RecordFile>, ProtocolVersion)> {
        let snapshot = self.snapshot_locked(state)?;
        if let Some(index) = state.indexes.get(&column) {
            return Ok((Arc::clone(index), snapshot.version));
        }

        let source = &snapshot.file;
        let mut keyed = Vec::with_capacity(source.len());
        for position in 0..source.len() {
            let row: R = decode_record(source, position, snapshot.version)?;
            keyed.push((row.column_value(column), position));
        }
        keyed.sort_by(|a, b| a.0.cmp(&b.0));

        let name = format!("{}-{}", R::NAME, R::columns()[column].name);
        let mut writer = RecordWriter::create(&name, R::RECORD_SIZE, self.spill_dir.as_deref())?;
        let mut record = vec![0; R::RECORD_SIZE];
        for (_, position) in keyed {
            source.read_record(position, &mut record)?;
            writer.append_record(&record)?;
        }
        let index = Arc::new(writer.finish()?);
        trace!("built on-disk index {name} with {} records", index.len());

        state.indexes.insert(column, Arc::clone(&index));
        Ok((index, snapshot.version))
    }
}

/// Bisects a column-sorted record file.
fn search<R: FixedRecord>(
    index: &RecordFile,
    version: ProtocolVersion,
    column: usize,
    value: &Value,
) -> ClientResult<Option<R>> {
    let (mut lo, mut hi) = (0, index.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let row: R = decode_record(index, mid, version)?;
        match row.column_value(column).cmp(value) {
            std::cmp::Ordering::Less => lo = mid + 1,
            std::cmp::Ordering::Greater => hi = mid,
            std::cmp::Ordering::Equal => return Ok(Some(row)),
        }
    }
    Ok(None)
}

impl<R: FixedRecord> InvalidateTable for DiskTable<R> {
    fn table_id(&self) -> TableId {
        R::TABLE
    }

    fn clear_cache(&self) {
        self.state.lock().clear();
        debug!("cleared disk cache of {}", R::NAME);
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

impl<R: FixedRecord> CachedTable for DiskTable<R> {
    type Row = R;
    type Snapshot = DiskSnapshot<R>;

    fn rows(&self) -> ClientResult<DiskSnapshot<R>> {
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

        let (index, version) = {
            let mut state = self.state.lock();
            self.index_locked(&mut state, column)?
        };
        search(&index, version, column, value)
    }
}
