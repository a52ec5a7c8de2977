use std::{net::IpAddr, path::PathBuf, time::Duration};

use crate::{pool::PoolConfig, protocol::TlsConfig};

pub const DEFAULT_PORT: u16 = 4582;

/// Everything needed to open sessions to one server as one identity.
///
/// Two connectors built from equal configurations are interchangeable, so the
/// configuration doubles as the key of the
/// [`ConnectorFactory`](super::ConnectorFactory) registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectorConfig {
    pub host: String,
    pub port: u16,
    /// Local address outgoing connections are bound to.
    pub local_ip: Option<IpAddr>,
    /// Identity the requests run as.
    pub connect_as: String,
    /// Identity whose credentials are checked.
    pub authenticate_as: String,
    pub password: String,
    pub tls: Option<TlsConfig>,

    pub pool_size: usize,
    pub max_connection_age: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub allocate_timeout: Option<Duration>,
    pub connect_timeout: Duration,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    /// Extra attempts for read-only requests failing at connection level.
    pub retries: u32,
    /// Directory for the scratch files of disk tables. Defaults to the system
    /// temporary directory.
    pub spill_dir: Option<PathBuf>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        let pool = PoolConfig::default();
        Self {
            host: "localhost".into(),
            port: DEFAULT_PORT,
            local_ip: None,
            connect_as: String::new(),
            authenticate_as: String::new(),
            password: String::new(),
            tls: None,
            pool_size: pool.max_connections,
            max_connection_age: pool.max_age,
            idle_timeout: pool.idle_timeout,
            allocate_timeout: pool.allocate_timeout,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Some(Duration::from_secs(5 * 60)),
            write_timeout: Some(Duration::from_secs(60)),
            retries: 2,
            spill_dir: None,
        }
    }
}

impl ConnectorConfig {
    /// Connects to `host:port` and authenticates as `username`, running
    /// requests as that same user.
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            host: host.into(),
            port,
            connect_as: username.clone(),
            authenticate_as: username,
            ..Default::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_connect_as(mut self, connect_as: impl Into<String>) -> Self {
        self.connect_as = connect_as.into();
        self
    }

    pub fn with_local_ip(mut self, local_ip: IpAddr) -> Self {
        self.local_ip = Some(local_ip);
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_max_connection_age(mut self, age: Duration) -> Self {
        self.max_connection_age = Some(age);
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_allocate_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.allocate_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_spill_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spill_dir = Some(dir.into());
        self
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_connections: self.pool_size.max(1),
            max_age: self.max_connection_age,
            idle_timeout: self.idle_timeout,
            allocate_timeout: self.allocate_timeout,
        }
    }
}
