//! Client error types.
use std::{io, time::Duration};

use thiserror::Error;

use crate::{protocol::ErrorCode, storage::StorageError, table::TableId};

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur while talking to the server or serving cached tables.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Failed to establish a connection.
    #[error("connection error: {0}")]
    Connection(#[source] io::Error),

    /// I/O failure on an established connection.
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("tls error: {0}")]
    Tls(String),

    /// The peer sent something this client cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server reported an error; the message is the server's own text.
    #[error("server error ({code}): {message}")]
    Remote { code: ErrorCode, message: String },

    #[error("no connection available after {waited:?} (max {max} connections)")]
    PoolExhausted { max: usize, waited: Duration },

    #[error("not found: {0}")]
    NotFound(String),

    /// Unique lookup attempted on a column that is not declared unique.
    #[error("column {column} of table {table} is not unique")]
    NotUnique { table: TableId, column: usize },

    #[error("failed to encode message: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("failed to decode message: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("connector has been shut down")]
    Closed,
}

impl ClientError {
    /// Creates a server error from an error code and message.
    pub fn remote(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Remote {
            code,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Whether the failure leaves the connection in an unknown state.
    ///
    /// Such connections must never be returned to the pool, and read-only
    /// requests that failed this way may be retried on a fresh connection.
    pub fn is_connection_level(&self) -> bool {
        match self {
            ClientError::Connection(_)
            | ClientError::Io(_)
            | ClientError::Tls(_)
            | ClientError::Protocol(_)
            | ClientError::Encode(_) => true,
            // A truncated stream surfaces as a decode error.
            ClientError::Decode(_) => true,
            _ => false,
        }
    }
}
