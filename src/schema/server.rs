use crate::{
    error::ClientResult,
    protocol::{Decoder, Encoder, ProtocolVersion},
    table::{Column, FixedRecord, Row, TableId, Value},
};

use super::SERVERS;

/// A managed server.
#[derive(Debug, Clone, PartialEq)]
pub struct Server {
    pub id: i32,
    pub hostname: String,
    /// Retired in protocol 1.2; empty when talking to newer peers.
    pub farm: String,
    pub description: Option<String>,
    /// Added in protocol 1.1; older peers imply `true`.
    pub monitoring_enabled: bool,
    /// Milliseconds since the epoch.
    pub last_seen: i64,
    /// Added in protocol 1.2.
    pub load: f32,
}

impl Server {
    pub const ID: usize = 0;
    pub const HOSTNAME: usize = 1;
    pub const FARM: usize = 2;
    pub const DESCRIPTION: usize = 3;
    pub const MONITORING_ENABLED: usize = 4;
    pub const LAST_SEEN: usize = 5;
    pub const LOAD: usize = 6;

    pub fn new(id: i32, hostname: impl Into<String>) -> Self {
        Self {
            id,
            hostname: hostname.into(),
            farm: String::new(),
            description: None,
            monitoring_enabled: true,
            last_seen: 0,
            load: 0.0,
        }
    }
}

const COLUMNS: &[Column] = &[
    Column::unique("id"),
    Column::unique("hostname"),
    Column::new("farm"),
    Column::new("description"),
    Column::new("monitoring_enabled"),
    Column::new("last_seen"),
    Column::new("load"),
];

impl Row for Server {
    type Key = i32;

    const TABLE: TableId = SERVERS;
    const NAME: &'static str = "servers";

    fn columns() -> &'static [Column] {
        COLUMNS
    }

    fn key(&self) -> i32 {
        self.id
    }

    fn column_value(&self, index: usize) -> Value {
        match index {
            Self::ID => self.id.into(),
            Self::HOSTNAME => self.hostname.as_str().into(),
            Self::FARM => self.farm.as_str().into(),
            Self::DESCRIPTION => self.description.clone().into(),
            Self::MONITORING_ENABLED => self.monitoring_enabled.into(),
            Self::LAST_SEEN => self.last_seen.into(),
            Self::LOAD => self.load.into(),
            _ => Value::Null,
        }
    }

    fn read_from(dec: &mut Decoder<'_>, version: ProtocolVersion) -> ClientResult<Self> {
        let id = dec.read_int()?;
        let hostname = dec.read_string()?;
        let farm = if version < ProtocolVersion::V1_2 {
            dec.read_string()?
        } else {
            String::new()
        };
        let description = dec.read_nullable_string()?;
        let monitoring_enabled = if version >= ProtocolVersion::V1_1 {
            dec.read_bool()?
        } else {
            true
        };
        let last_seen = dec.read_i64()?;
        let load = if version >= ProtocolVersion::V1_2 {
            dec.read_f32()?
        } else {
            0.0
        };

        Ok(Self {
            id,
            hostname,
            farm,
            description,
            monitoring_enabled,
            last_seen,
            load,
        })
    }

    fn write_to(&self, enc: &mut Encoder<'_>, version: ProtocolVersion) -> ClientResult<()> {
        enc.write_varint(i64::from(self.id))?;
        enc.write_str(&self.hostname)?;
        if version < ProtocolVersion::V1_2 {
            enc.write_str(&self.farm)?;
        }
        enc.write_nullable_str(self.description.as_deref())?;
        if version >= ProtocolVersion::V1_1 {
            enc.write_bool(self.monitoring_enabled)?;
        }
        enc.write_i64(self.last_seen)?;
        if version >= ProtocolVersion::V1_2 {
            enc.write_f32(self.load)?;
        }
        Ok(())
    }
}

impl FixedRecord for Server {
    const RECORD_SIZE: usize = 512;
}
