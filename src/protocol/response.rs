use std::fmt;

use crate::{
    error::{ClientError, ClientResult},
    table::TableId,
};

use super::{Decoder, Encoder};

pub(crate) const DONE: u8 = 0;
pub(crate) const NEXT: u8 = 1;
pub(crate) const ERROR: u8 = 2;

/// Terminates an encoded [`InvalidateList`].
const END_OF_LIST: i64 = -1;

/// First byte of every response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    /// Success; command specific result fields follow.
    Done,
    /// A streamed chunk follows; more codes come after it.
    Next,
    Error(ErrorCode),
}

impl ResponseCode {
    /// Reads the status byte. For errors the code is consumed as well, the
    /// message that follows is left for the caller.
    pub fn read(dec: &mut Decoder<'_>) -> ClientResult<Self> {
        match dec.read_u8()? {
            DONE => Ok(ResponseCode::Done),
            NEXT => Ok(ResponseCode::Next),
            ERROR => {
                let code = u32::try_from(dec.read_uvarint()?)
                    .map_err(|_| ClientError::protocol("error code out of range"))?;
                Ok(ResponseCode::Error(ErrorCode::from_code(code)))
            }
            other => Err(ClientError::protocol(format!(
                "unexpected response code {other}"
            ))),
        }
    }

    pub fn write(&self, enc: &mut Encoder<'_>) -> ClientResult<()> {
        match self {
            ResponseCode::Done => enc.write_u8(DONE),
            ResponseCode::Next => enc.write_u8(NEXT),
            ResponseCode::Error(code) => {
                enc.write_u8(ERROR)?;
                enc.write_uvarint(u64::from(code.code()))
            }
        }
    }
}

/// Server side failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Io,
    Sql,
    PermissionDenied,
    NotFound,
    InvalidArgument,
    Internal,
    Unknown(u32),
}

impl ErrorCode {
    pub fn code(self) -> u32 {
        match self {
            ErrorCode::Io => 1,
            ErrorCode::Sql => 2,
            ErrorCode::PermissionDenied => 3,
            ErrorCode::NotFound => 4,
            ErrorCode::InvalidArgument => 5,
            ErrorCode::Internal => 6,
            ErrorCode::Unknown(code) => code,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            1 => ErrorCode::Io,
            2 => ErrorCode::Sql,
            3 => ErrorCode::PermissionDenied,
            4 => ErrorCode::NotFound,
            5 => ErrorCode::InvalidArgument,
            6 => ErrorCode::Internal,
            code => ErrorCode::Unknown(code),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Io => write!(f, "i/o"),
            ErrorCode::Sql => write!(f, "sql"),
            ErrorCode::PermissionDenied => write!(f, "permission denied"),
            ErrorCode::NotFound => write!(f, "not found"),
            ErrorCode::InvalidArgument => write!(f, "invalid argument"),
            ErrorCode::Internal => write!(f, "internal"),
            ErrorCode::Unknown(code) => write!(f, "code {code}"),
        }
    }
}

/// Tables whose server side state changed while executing a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidateList {
    tables: Vec<TableId>,
}

impl InvalidateList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table, ignoring duplicates.
    pub fn push(&mut self, table: TableId) {
        if !self.tables.contains(&table) {
            self.tables.push(table);
        }
    }

    pub fn tables(&self) -> &[TableId] {
        &self.tables
    }

    pub fn contains(&self, table: TableId) -> bool {
        self.tables.contains(&table)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn read(dec: &mut Decoder<'_>) -> ClientResult<Self> {
        let mut list = InvalidateList::new();
        loop {
            match dec.read_varint()? {
                END_OF_LIST => return Ok(list),
                id => {
                    let id = u32::try_from(id)
                        .map_err(|_| ClientError::protocol(format!("invalid table id {id}")))?;
                    list.push(TableId(id));
                }
            }
        }
    }

    pub fn write(&self, enc: &mut Encoder<'_>) -> ClientResult<()> {
        for table in &self.tables {
            enc.write_varint(i64::from(table.0))?;
        }
        enc.write_varint(END_OF_LIST)
    }
}

impl FromIterator<TableId> for InvalidateList {
    fn from_iter<I: IntoIterator<Item = TableId>>(iter: I) -> Self {
        let mut list = InvalidateList::new();
        for table in iter {
            list.push(table);
        }
        list
    }
}
