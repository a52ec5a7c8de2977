//! Login accounts of the different services.
//!
//! Every account kind lives in its own server table, keyed by username. The
//! [`Principal`] supertype lets callers query them together through a
//! [`UnionView`](crate::table::UnionView).
use crate::{
    error::ClientResult,
    protocol::{Decoder, Encoder, ProtocolVersion},
    table::{Column, FixedRecord, Row, TableId, Value},
};

use super::{LINUX_USERS, MYSQL_USERS, POSTGRES_USERS};

/// Columns every account kind starts with.
pub const USERNAME: usize = 0;
pub const DISABLED: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinuxUser {
    pub username: String,
    pub disabled: bool,
    pub uid: i32,
    pub home: String,
    pub shell: String,
}

impl LinuxUser {
    pub const UID: usize = 2;
    pub const HOME: usize = 3;
    pub const SHELL: usize = 4;
}

const LINUX_COLUMNS: &[Column] = &[
    Column::unique("username"),
    Column::new("disabled"),
    Column::unique("uid"),
    Column::new("home"),
    Column::new("shell"),
];

impl Row for LinuxUser {
    type Key = String;

    const TABLE: TableId = LINUX_USERS;
    const NAME: &'static str = "linux_users";

    fn columns() -> &'static [Column] {
        LINUX_COLUMNS
    }

    fn key(&self) -> String {
        self.username.clone()
    }

    fn column_value(&self, index: usize) -> Value {
        match index {
            USERNAME => self.username.as_str().into(),
            DISABLED => self.disabled.into(),
            Self::UID => self.uid.into(),
            Self::HOME => self.home.as_str().into(),
            Self::SHELL => self.shell.as_str().into(),
            _ => Value::Null,
        }
    }

    fn read_from(dec: &mut Decoder<'_>, _version: ProtocolVersion) -> ClientResult<Self> {
        Ok(Self {
            username: dec.read_string()?,
            disabled: dec.read_bool()?,
            uid: dec.read_int()?,
            home: dec.read_string()?,
            shell: dec.read_string()?,
        })
    }

    fn write_to(&self, enc: &mut Encoder<'_>, _version: ProtocolVersion) -> ClientResult<()> {
        enc.write_str(&self.username)?;
        enc.write_bool(self.disabled)?;
        enc.write_varint(i64::from(self.uid))?;
        enc.write_str(&self.home)?;
        enc.write_str(&self.shell)
    }
}

impl FixedRecord for LinuxUser {
    const RECORD_SIZE: usize = 384;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MysqlUser {
    pub username: String,
    pub disabled: bool,
    /// Added in protocol 1.1; `0` (unlimited) from older peers.
    pub max_connections: i32,
    pub host: Option<String>,
}

impl MysqlUser {
    pub const MAX_CONNECTIONS: usize = 2;
    pub const HOST: usize = 3;
}

const MYSQL_COLUMNS: &[Column] = &[
    Column::unique("username"),
    Column::new("disabled"),
    Column::new("max_connections"),
    Column::new("host"),
];

impl Row for MysqlUser {
    type Key = String;

    const TABLE: TableId = MYSQL_USERS;
    const NAME: &'static str = "mysql_users";

    fn columns() -> &'static [Column] {
        MYSQL_COLUMNS
    }

    fn key(&self) -> String {
        self.username.clone()
    }

    fn column_value(&self, index: usize) -> Value {
        match index {
            USERNAME => self.username.as_str().into(),
            DISABLED => self.disabled.into(),
            Self::MAX_CONNECTIONS => self.max_connections.into(),
            Self::HOST => self.host.clone().into(),
            _ => Value::Null,
        }
    }

    fn read_from(dec: &mut Decoder<'_>, version: ProtocolVersion) -> ClientResult<Self> {
        let username = dec.read_string()?;
        let disabled = dec.read_bool()?;
        let max_connections = if version >= ProtocolVersion::V1_1 {
            dec.read_int()?
        } else {
            0
        };
        let host = dec.read_nullable_string()?;
        Ok(Self {
            username,
            disabled,
            max_connections,
            host,
        })
    }

    fn write_to(&self, enc: &mut Encoder<'_>, version: ProtocolVersion) -> ClientResult<()> {
        enc.write_str(&self.username)?;
        enc.write_bool(self.disabled)?;
        if version >= ProtocolVersion::V1_1 {
            enc.write_varint(i64::from(self.max_connections))?;
        }
        enc.write_nullable_str(self.host.as_deref())
    }
}

impl FixedRecord for MysqlUser {
    const RECORD_SIZE: usize = 256;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresUser {
    pub username: String,
    pub disabled: bool,
    pub superuser: bool,
}

impl PostgresUser {
    pub const SUPERUSER: usize = 2;
}

const POSTGRES_COLUMNS: &[Column] = &[
    Column::unique("username"),
    Column::new("disabled"),
    Column::new("superuser"),
];

impl Row for PostgresUser {
    type Key = String;

    const TABLE: TableId = POSTGRES_USERS;
    const NAME: &'static str = "postgres_users";

    fn columns() -> &'static [Column] {
        POSTGRES_COLUMNS
    }

    fn key(&self) -> String {
        self.username.clone()
    }

    fn column_value(&self, index: usize) -> Value {
        match index {
            USERNAME => self.username.as_str().into(),
            DISABLED => self.disabled.into(),
            Self::SUPERUSER => self.superuser.into(),
            _ => Value::Null,
        }
    }

    fn read_from(dec: &mut Decoder<'_>, _version: ProtocolVersion) -> ClientResult<Self> {
        Ok(Self {
            username: dec.read_string()?,
            disabled: dec.read_bool()?,
            superuser: dec.read_bool()?,
        })
    }

    fn write_to(&self, enc: &mut Encoder<'_>, _version: ProtocolVersion) -> ClientResult<()> {
        enc.write_str(&self.username)?;
        enc.write_bool(self.disabled)?;
        enc.write_bool(self.superuser)
    }
}

impl FixedRecord for PostgresUser {
    const RECORD_SIZE: usize = 128;
}

/// Any account, whatever service it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Linux(LinuxUser),
    Mysql(MysqlUser),
    Postgres(PostgresUser),
}

impl Principal {
    pub fn username(&self) -> &str {
        match self {
            Principal::Linux(u) => &u.username,
            Principal::Mysql(u) => &u.username,
            Principal::Postgres(u) => &u.username,
        }
    }

    pub fn disabled(&self) -> bool {
        match self {
            Principal::Linux(u) => u.disabled,
            Principal::Mysql(u) => u.disabled,
            Principal::Postgres(u) => u.disabled,
        }
    }
}

impl From<LinuxUser> for Principal {
    fn from(value: LinuxUser) -> Self {
        Principal::Linux(value)
    }
}

impl From<MysqlUser> for Principal {
    fn from(value: MysqlUser) -> Self {
        Principal::Mysql(value)
    }
}

impl From<PostgresUser> for Principal {
    fn from(value: PostgresUser) -> Self {
        Principal::Postgres(value)
    }
}
