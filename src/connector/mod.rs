//! Client facade tying the pool, the request primitives and the table caches
//! together.
//!
//! A [`Connector`] owns one pool of sessions for one [`ConnectorConfig`] and
//! a registry of every table cache bound to it. Mutating requests return an
//! [`InvalidateList`]; the connector clears exactly the registered caches
//! named in it, which reload lazily on their next access.
//!
//! Connectors are shared through a [`ConnectorFactory`], which hands out one
//! connector per distinct configuration.
use std::{collections::HashMap, sync::Arc, time::Duration};

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::{
    error::ClientResult,
    pool::{ConnectionPool, PoolStats},
    protocol::{CommandId, Decoder, Encoder, InvalidateList},
    table::{
        DiskTable, FixedRecord, InvalidateTable, MemoryTable, Row, TableId, TableSource,
        TableStats,
    },
};

mod config;
mod requester;

pub use config::{ConnectorConfig, DEFAULT_PORT};
pub use requester::{Requester, SessionFactory, UpdateFailure};

/// Point in time counters of a connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorStats {
    pub pool: PoolStats,
    /// Registered tables, ordered by table id.
    pub tables: Vec<TableStats>,
}

pub struct Connector {
    config: ConnectorConfig,
    requester: Arc<Requester>,
    tables: RwLock<HashMap<TableId, Vec<Arc<dyn InvalidateTable>>>>,
}

impl Connector {
    /// Creates the connector and its pool. No session is opened until the
    /// first request.
    pub fn new(config: ConnectorConfig) -> Self {
        let pool = Arc::new(ConnectionPool::new(
            SessionFactory::new(config.clone()),
            config.pool_config(),
        ));
        if let Some(idle_timeout) = config.idle_timeout {
            pool.start_sweeper((idle_timeout / 2).max(Duration::from_millis(100)));
        }

        Self {
            requester: Arc::new(Requester::new(pool, config.retries)),
            config,
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Row source for table caches bound to this connector.
    pub fn source(&self) -> Arc<dyn TableSource> {
        self.requester.clone()
    }

    /// Creates an in-memory cache of `R`'s table and registers it.
    pub fn memory_table<R: Row>(&self) -> Arc<MemoryTable<R>> {
        let table = Arc::new(MemoryTable::new(self.source()));
        self.register(table.clone());
        table
    }

    /// Creates a disk-backed cache of `R`'s table and registers it.
    pub fn disk_table<R: FixedRecord>(&self) -> Arc<DiskTable<R>> {
        let table = Arc::new(DiskTable::new(self.source(), self.config.spill_dir.clone()));
        self.register(table.clone());
        table
    }

    /// Registers a table cache built elsewhere so invalidations reach it.
    pub fn register(&self, table: Arc<dyn InvalidateTable>) {
        let id = table.table_id();
        self.tables.write().entry(id).or_default().push(table);
        debug!("registered cache of {id}");
    }

    /// Clears the registered caches of every listed table.
    pub fn apply_invalidate_list(&self, list: &InvalidateList) {
        let tables = self.tables.read();
        for id in list.tables() {
            match tables.get(id) {
                Some(caches) => {
                    for cache in caches {
                        cache.clear_cache();
                    }
                    debug!("invalidated {id}");
                }
                None => warn!("server invalidated unregistered {id}"),
            }
        }
    }

    pub fn request<T>(
        &self,
        command: CommandId,
        write_args: impl FnMut(&mut Encoder<'_>) -> ClientResult<()>,
        read_result: impl FnMut(&mut Decoder<'_>) -> ClientResult<T>,
    ) -> ClientResult<T> {
        self.requester.request(command, write_args, read_result)
    }

    /// Runs a mutating command and applies the invalidate list it returns.
    pub fn update<T>(
        &self,
        command: CommandId,
        write_args: impl FnOnce(&mut Encoder<'_>) -> ClientResult<()>,
        read_result: impl FnOnce(&mut Decoder<'_>) -> ClientResult<T>,
    ) -> ClientResult<T> {
        match self.requester.update(command, write_args, read_result) {
            Ok((result, list)) => {
                self.apply_invalidate_list(&list);
                Ok(result)
            }
            Err(failure) => {
                if failure.acknowledged {
                    warn!("{command} applied but its reply was lost, clearing every cache");
                    self.clear_all();
                }
                Err(failure.error)
            }
        }
    }

    /// Clears every registered cache.
    pub fn clear_all(&self) {
        for caches in self.tables.read().values() {
            for cache in caches {
                cache.clear_cache();
            }
        }
    }

    pub fn dump(
        &self,
        command: CommandId,
        write_args: impl FnMut(&mut Encoder<'_>) -> ClientResult<()>,
    ) -> ClientResult<String> {
        self.requester.dump(command, write_args)
    }

    pub fn ping(&self) -> ClientResult<Duration> {
        self.requester.ping()
    }

    /// Asks the server to treat `table` as changed.
    pub fn invalidate(&self, table: TableId) -> ClientResult<()> {
        self.update(
            CommandId::InvalidateTable,
            |enc| enc.write_varint(i64::from(table.0)),
            |_| Ok(()),
        )
    }

    pub fn stats(&self) -> ConnectorStats {
        let mut tables: Vec<_> = self
            .tables
            .read()
            .values()
            .flatten()
            .map(|table| table.stats())
            .collect();
        tables.sort_by_key(|stats| stats.table);
        ConnectorStats {
            pool: self.requester.pool().stats(),
            tables,
        }
    }

    /// Closes idle sessions; later requests fail with
    /// [`ClientError::Closed`](crate::error::ClientError::Closed).
    pub fn shutdown(&self) {
        self.requester.pool().shutdown();
        info!(
            "connector for {}@{}:{} shut down",
            self.config.connect_as, self.config.host, self.config.port
        );
    }
}

/// Registry handing out one [`Connector`] per configuration.
#[derive(Default)]
pub struct ConnectorFactory {
    connectors: Mutex<HashMap<ConnectorConfig, Arc<Connector>>>,
}

impl ConnectorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the connector for `config`, creating it on first use.
    pub fn get_or_create(&self, config: ConnectorConfig) -> Arc<Connector> {
        let mut connectors = self.connectors.lock();
        if let Some(connector) = connectors.get(&config) {
            return Arc::clone(connector);
        }

        debug!("creating connector for {}@{}", config.connect_as, config.host);
        let connector = Arc::new(Connector::new(config.clone()));
        connectors.insert(config, Arc::clone(&connector));
        connector
    }

    /// Connector running requests as `connect_as`, with the same server,
    /// credentials and pool parameters as `connector`.
    pub fn switch_user(&self, connector: &Connector, connect_as: &str) -> Arc<Connector> {
        self.get_or_create(connector.config().clone().with_connect_as(connect_as))
    }

    pub fn len(&self) -> usize {
        self.connectors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shuts every connector down and forgets them.
    pub fn shutdown_all(&self) {
        let connectors: Vec<_> = self.connectors.lock().drain().map(|(_, c)| c).collect();
        for connector in connectors {
            connector.shutdown();
        }
    }
}
