pub mod connector;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod schema;
pub mod storage;
pub mod table;

pub use connector::{Connector, ConnectorConfig, ConnectorFactory, ConnectorStats};
pub use error::{ClientError, ClientResult};
pub use table::{CachedTable, DiskTable, MemoryTable, Row, RowSequence, TableId, UnionView};
