use std::fmt;

use crate::{
    error::ClientResult,
    protocol::{Decoder, Encoder, ProtocolVersion},
};

use super::{TableId, Value};

/// Describes one column of a row type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    /// Whether no two rows of the table share a value in this column.
    pub unique: bool,
}

impl Column {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            unique: false,
        }
    }

    pub const fn unique(name: &'static str) -> Self {
        Self { name, unique: true }
    }
}

/// A record of one server table.
///
/// Rows are immutable once decoded; a change on the server shows up as a new
/// row in a freshly loaded snapshot. Both codec methods must agree on which
/// fields exist at a given [`ProtocolVersion`].
pub trait Row: Clone + Send + Sync + 'static {
    type Key: Clone + Into<Value> + fmt::Debug + Send + Sync;

    /// Server identifier of the table holding these rows.
    const TABLE: TableId;
    const NAME: &'static str;
    /// Index of the column holding [`Row::key`].
    const KEY_COLUMN: usize = 0;

    fn columns() -> &'static [Column];

    fn key(&self) -> Self::Key;

    /// Value of column `index`; out of range columns are `Null`.
    fn column_value(&self, index: usize) -> Value;

    fn read_from(dec: &mut Decoder<'_>, version: ProtocolVersion) -> ClientResult<Self>;

    fn write_to(&self, enc: &mut Encoder<'_>, version: ProtocolVersion) -> ClientResult<()>;
}

/// A row whose encoding always fits in a fixed number of bytes, so it can
/// be spilled to a record file and addressed by offset.
pub trait FixedRecord: Row {
    /// Bytes reserved per record, including the length header.
    const RECORD_SIZE: usize;
}

/// Whether `column` of `R` is declared unique.
pub(crate) fn is_unique<R: Row>(column: usize) -> bool {
    R::columns().get(column).is_some_and(|c| c.unique)
}
