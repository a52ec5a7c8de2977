use std::{error::Error, net::IpAddr, path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use tablelink::{
    CachedTable, Connector, ConnectorConfig, RowSequence,
    connector::DEFAULT_PORT,
    protocol::{CommandId, TlsConfig},
    schema::Server,
    table::Value,
};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server to connect to
    #[arg(long, env = "TABLELINK_HOST", default_value = "localhost")]
    host: String,
    #[arg(long, env = "TABLELINK_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Local address to connect from
    #[arg(long, env = "TABLELINK_LOCAL_IP")]
    local_ip: Option<IpAddr>,
    /// User whose credentials are checked
    #[arg(long, short, env = "TABLELINK_USER")]
    user: String,
    #[arg(long, env = "TABLELINK_PASSWORD", hide_env_values = true, default_value = "")]
    password: String,
    /// Run requests as this user instead of `--user`
    #[arg(long, env = "TABLELINK_CONNECT_AS")]
    connect_as: Option<String>,
    /// PEM bundle of trusted CAs; enables TLS
    #[arg(long, env = "TABLELINK_CA_FILE")]
    ca_file: Option<PathBuf>,
    /// Connect timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout: u64,
    /// Directory for disk table scratch files
    #[arg(long, env = "TABLELINK_SPILL_DIR")]
    spill_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Measure the round trip of a ping
    Ping {
        #[arg(long, short, default_value_t = 1)]
        count: usize,
    },
    /// Load the server table and print pool and cache counters
    Stats,
    /// List servers, or look one up by hostname
    Servers {
        hostname: Option<String>,
        /// Cache the table on disk instead of in memory
        #[arg(long)]
        disk: bool,
    },
    /// Print the text a dump command streams back
    Dump {
        /// Numeric command identifier
        command: u32,
    },
}

impl Cli {
    fn connector_config(&self) -> ConnectorConfig {
        let mut config = ConnectorConfig::new(&self.host, self.port, &self.user)
            .with_password(&self.password)
            .with_connect_timeout(Duration::from_secs(self.timeout));
        if let Some(connect_as) = &self.connect_as {
            config = config.with_connect_as(connect_as);
        }
        if let Some(local_ip) = self.local_ip {
            config = config.with_local_ip(local_ip);
        }
        if let Some(ca_file) = &self.ca_file {
            config = config.with_tls(TlsConfig::new(ca_file));
        }
        if let Some(spill_dir) = &self.spill_dir {
            config = config.with_spill_dir(spill_dir);
        }
        config.with_idle_timeout(None)
    }
}

fn print_servers(servers: &[Server]) {
    for server in servers {
        println!(
            "{:>6}  {:<32} {:>5.2}  {}",
            server.id,
            server.hostname,
            server.load,
            server.description.as_deref().unwrap_or("-")
        );
    }
}

fn list_servers<T>(table: &T, hostname: Option<&str>) -> Result<(), Box<dyn Error>>
where
    T: CachedTable<Row = Server>,
{
    match hostname {
        Some(hostname) => {
            match table.unique_row(Server::HOSTNAME, &Value::from(hostname))? {
                Some(server) => print_servers(&[server]),
                None => eprintln!("no server named {hostname}"),
            }
        }
        None => print_servers(&table.rows()?.to_vec()?),
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let connector = Connector::new(cli.connector_config());

    match &cli.command {
        Command::Ping { count } => {
            for _ in 0..*count {
                let elapsed = connector.ping()?;
                println!("pong from {} in {elapsed:?}", cli.host);
            }
        }
        Command::Stats => {
            connector.memory_table::<Server>().rows()?;
            let stats = connector.stats();
            println!("{:#?}", stats.pool);
            for table in stats.tables {
                println!(
                    "{:<16} {:>8} rows  loaded={} hits={} loads={} indexes={}",
                    table.name, table.rows, table.loaded, table.hits, table.loads, table.indexes
                );
            }
        }
        Command::Servers { hostname, disk } => {
            if *disk {
                list_servers(&*connector.disk_table::<Server>(), hostname.as_deref())?;
            } else {
                list_servers(&*connector.memory_table::<Server>(), hostname.as_deref())?;
            }
        }
        Command::Dump { command } => {
            let text = connector.dump(CommandId::Other(*command), |_| Ok(()))?;
            print!("{text}");
        }
    }

    connector.shutdown();
    Ok(())
}
