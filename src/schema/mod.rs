//! Row types of the server tables this crate ships adapters for.
//!
//! The cache layer never looks at concrete row types; these exist for the
//! tables the command line tool shows and as a reference for writing more.
mod account;
mod server;

use crate::table::TableId;

pub use account::{LinuxUser, MysqlUser, PostgresUser, Principal};
pub use server::Server;

pub const SERVERS: TableId = TableId(5);
pub const MYSQL_USERS: TableId = TableId(7);
pub const POSTGRES_USERS: TableId = TableId(8);
pub const LINUX_USERS: TableId = TableId(12);

/// Column positions shared by every account table.
pub mod columns {
    pub use super::account::{DISABLED, USERNAME};
}
