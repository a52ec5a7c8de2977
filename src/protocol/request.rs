use std::fmt;

/// Command identifiers understood by the server.
///
/// Core commands used by the cache and connector are named; any other
/// server command can be issued through [`CommandId::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandId {
    Ping,
    /// Streams every row of one table as `NEXT` chunks.
    GetTable,
    /// Marks a table stale on the server; answered with an invalidate list.
    InvalidateTable,
    /// Closes the session on the server side.
    Quit,
    Other(u32),
}

impl CommandId {
    pub fn code(self) -> u32 {
        match self {
            CommandId::Ping => 1,
            CommandId::GetTable => 2,
            CommandId::InvalidateTable => 3,
            CommandId::Quit => 4,
            CommandId::Other(code) => code,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            1 => CommandId::Ping,
            2 => CommandId::GetTable,
            3 => CommandId::InvalidateTable,
            4 => CommandId::Quit,
            code => CommandId::Other(code),
        }
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandId::Other(code) => write!(f, "command #{code}"),
            named => write!(f, "{named:?}"),
        }
    }
}
