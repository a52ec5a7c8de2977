//! Scratch storage for table caches that spill to disk.
pub mod record;

pub use error::StorageError;
pub use record::{RecordFile, RecordWriter};

pub mod header {
    pub mod record {
        pub(crate) const RECORD_LEN_SIZE: usize = size_of::<u32>();

        pub(crate) const RECORD_LEN: usize = 0;
        pub(crate) const RECORD_BODY: usize = RECORD_LEN + RECORD_LEN_SIZE;

        /// Largest payload a record of `record_size` bytes can hold.
        pub(crate) const fn max_payload(record_size: usize) -> usize {
            record_size.saturating_sub(RECORD_BODY)
        }
    }
}

pub mod error {
    use std::io;

    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum StorageError {
        #[error("record file I/O error: {0}")]
        Io(#[from] io::Error),

        #[error("[record][{name}] encoded size {size} exceeds the {max} bytes available")]
        RecordTooLarge {
            name: String,
            size: usize,
            max: usize,
        },

        #[error("[record][{name}] record size {size} is below the {min} byte header")]
        RecordSizeTooSmall {
            name: String,
            size: usize,
            min: usize,
        },

        #[error("record {index} out of bounds (len {len})")]
        OutOfBounds { index: usize, len: usize },

        #[error("[record][{index}] corrupt: {cause}")]
        Corrupt { index: usize, cause: String },
    }
}
