//! Fixed-width record files.
//!
//! A [`RecordFile`] stores an immutable sequence of equally sized records so
//! record `i` lives at byte offset `i * record_size`. Each record holds a
//! big-endian `u32` payload length followed by the payload and zero padding.
//!
//! # Lifecycle
//!
//! Records are appended through a [`RecordWriter`], which turns into a
//! read-only [`RecordFile`] once [`RecordWriter::finish`] is called. Each file
//! lives in its own temporary directory, removed when the file is dropped;
//! an abandoned writer cleans up the same way.
use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use log::trace;
use parking_lot::Mutex;
use tempdir::TempDir;

use super::{
    StorageError,
    header::record::{RECORD_BODY, RECORD_LEN, RECORD_LEN_SIZE, max_payload},
};

const FILE_NAME: &str = "records.dat";

/// Appends records to a new scratch file.
pub struct RecordWriter {
    name: String,
    record_size: usize,
    len: usize,
    writer: BufWriter<File>,
    path: PathBuf,
    dir: TempDir,
}

impl RecordWriter {
    /// Creates an empty record file under `spill_dir`, or the system
    /// temporary directory when none is given.
    pub fn create(
        name: &str,
        record_size: usize,
        spill_dir: Option<&Path>,
    ) -> Result<Self, StorageError> {
        if record_size < RECORD_BODY {
            return Err(StorageError::RecordSizeTooSmall {
                name: name.to_string(),
                size: record_size,
                min: RECORD_BODY,
            });
        }
        let dir = match spill_dir {
            Some(base) => TempDir::new_in(base, name)?,
            None => TempDir::new(name)?,
        };
        let path = dir.path().join(FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)?;
        trace!("created record file {path:?}");

        Ok(Self {
            name: name.to_string(),
            record_size,
            len: 0,
            writer: BufWriter::new(file),
            path,
            dir,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends one payload, padding it to the record size.
    pub fn append(&mut self, payload: &[u8]) -> Result<(), StorageError> {
        let max = max_payload(self.record_size);
        if payload.len() > max {
            return Err(StorageError::RecordTooLarge {
                name: self.name.clone(),
                size: payload.len(),
                max,
            });
        }

        let mut record = vec![0; self.record_size];
        let len = payload.len() as u32;
        record[RECORD_LEN..RECORD_LEN + RECORD_LEN_SIZE].clone_from_slice(&len.to_be_bytes());
        record[RECORD_BODY..RECORD_BODY + payload.len()].clone_from_slice(payload);
        self.append_record(&record)
    }

    /// Appends a complete record as read from another file of the same width.
    pub fn append_record(&mut self, record: &[u8]) -> Result<(), StorageError> {
        debug_assert_eq!(record.len(), self.record_size);
        self.writer.write_all(record)?;
        self.len += 1;
        Ok(())
    }

    /// Flushes everything written so far and reopens the file read-only.
    pub fn finish(self) -> Result<RecordFile, StorageError> {
        let RecordWriter {
            name,
            record_size,
            len,
            writer,
            path,
            dir,
        } = self;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        drop(file);

        let file = File::open(&path)?;
        Ok(RecordFile {
            name,
            record_size,
            len,
            file: Mutex::new(file),
            path,
            _dir: dir,
        })
    }
}

/// Read-only sequence of fixed-width records.
pub struct RecordFile {
    name: String,
    record_size: usize,
    len: usize,
    file: Mutex<File>,
    path: PathBuf,
    // Dropped last so the file handle closes before the directory goes away.
    _dir: TempDir,
}

impl RecordFile {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the complete record at `index` into `buf`.
    pub fn read_record(&self, index: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        if index >= self.len {
            return Err(StorageError::OutOfBounds {
                index,
                len: self.len,
            });
        }
        debug_assert_eq!(buf.len(), self.record_size);

        let offset = (index * self.record_size) as u64;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    /// Returns the payload stored at `index`, without header or padding.
    pub fn read_payload(&self, index: usize) -> Result<Vec<u8>, StorageError> {
        let mut record = vec![0; self.record_size];
        self.read_record(index, &mut record)?;

        let len = u32::from_be_bytes(
            record[RECORD_LEN..RECORD_LEN + RECORD_LEN_SIZE]
                .try_into()
                .map_err(|_| StorageError::Corrupt {
                    index,
                    cause: "failed to get length bytes".into(),
                })?,
        ) as usize;
        if len > max_payload(self.record_size) {
            return Err(StorageError::Corrupt {
                index,
                cause: format!("payload length {len} in {}", self.name),
            });
        }

        record.truncate(RECORD_BODY + len);
        record.drain(..RECORD_BODY);
        Ok(record)
    }
}

impl std::fmt::Debug for RecordFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordFile")
            .field("name", &self.name)
            .field("record_size", &self.record_size)
            .field("len", &self.len)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_payloads() {
        let mut writer = RecordWriter::create("records", 16, None).unwrap();
        writer.append(b"alpha").unwrap();
        writer.append(b"").unwrap();
        writer.append(b"twelve bytes").unwrap();
        let file = writer.finish().unwrap();

        assert_eq!(file.len(), 3);
        assert_eq!(file.read_payload(0).unwrap(), b"alpha");
        assert_eq!(file.read_payload(1).unwrap(), b"");
        assert_eq!(file.read_payload(2).unwrap(), b"twelve bytes");
        assert_eq!(std::fs::metadata(file.path()).unwrap().len(), 48);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let mut writer = RecordWriter::create("records", 8, None).unwrap();
        let err = writer.append(b"too long for it").unwrap_err();
        assert!(matches!(err, StorageError::RecordTooLarge { max: 4, .. }));
        assert!(writer.is_empty());
    }

    #[test]
    fn record_size_must_fit_the_header() {
        assert!(matches!(
            RecordWriter::create("tiny", 3, None),
            Err(StorageError::RecordSizeTooSmall { size: 3, min: 4, .. })
        ));
        let mut writer = RecordWriter::create("header-only", 4, None).unwrap();
        writer.append(b"").unwrap();
        assert_eq!(writer.finish().unwrap().read_payload(0).unwrap(), b"");
    }

    #[test]
    #[should_panic(expected = "OutOfBounds")]
    fn read_past_end() {
        let file = RecordWriter::create("records", 8, None)
            .unwrap()
            .finish()
            .unwrap();
        file.read_payload(0).unwrap();
    }

    #[test]
    fn copy_records_between_files() {
        let mut writer = RecordWriter::create("source", 12, None).unwrap();
        writer.append(b"b").unwrap();
        writer.append(b"a").unwrap();
        let source = writer.finish().unwrap();

        let mut copy = RecordWriter::create("copy", 12, None).unwrap();
        let mut buf = vec![0; source.record_size()];
        for index in [1, 0] {
            source.read_record(index, &mut buf).unwrap();
            copy.append_record(&buf).unwrap();
        }
        let copy = copy.finish().unwrap();
        assert_eq!(copy.read_payload(0).unwrap(), b"a");
        assert_eq!(copy.read_payload(1).unwrap(), b"b");
    }

    #[test]
    fn scratch_directory_removed_on_drop() {
        let base = TempDir::new("spill").unwrap();
        let mut writer = RecordWriter::create("records", 8, Some(base.path())).unwrap();
        writer.append(b"x").unwrap();
        let file = writer.finish().unwrap();

        let path = file.path().to_path_buf();
        assert!(path.starts_with(base.path()));
        assert!(path.exists());

        drop(file);
        assert!(!path.exists());
    }
}
