use std::{
    cell::Cell,
    sync::Arc,
    time::{Duration, Instant},
};

use log::{debug, trace, warn};

use crate::{
    error::{ClientError, ClientResult},
    pool::{Connect, ConnectionPool},
    protocol::{CommandId, Decoder, Encoder, InvalidateList, ResponseCode, Session},
    table::{TableId, TableSource},
};

use super::ConnectorConfig;

/// Opens authenticated sessions for a [`ConnectionPool`].
pub struct SessionFactory {
    config: ConnectorConfig,
}

impl SessionFactory {
    pub fn new(config: ConnectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }
}

impl Connect for SessionFactory {
    type Connection = Session;

    fn connect(&self) -> ClientResult<Session> {
        Session::open(&self.config)
    }

    fn is_closed(&self, conn: &Session) -> bool {
        conn.is_broken()
    }

    fn close(&self, conn: Session) {
        conn.close();
    }
}

/// A mutating request that failed.
#[derive(Debug)]
pub struct UpdateFailure {
    pub error: ClientError,
    /// The server had answered `DONE`, so the change was applied but the
    /// tables it touched are unknown.
    pub acknowledged: bool,
}

impl From<UpdateFailure> for ClientError {
    fn from(failure: UpdateFailure) -> Self {
        failure.error
    }
}

/// Runs requests on pooled sessions.
///
/// A session whose request failed at connection level, or whose reply was
/// only partly read, is closed rather than pooled. Read-only requests are retried on a fresh session after such
/// failures; mutating ones never are.
pub struct Requester {
    pool: Arc<ConnectionPool<SessionFactory>>,
    retries: u32,
}

impl Requester {
    pub fn new(pool: Arc<ConnectionPool<SessionFactory>>, retries: u32) -> Self {
        Self { pool, retries }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<SessionFactory>> {
        &self.pool
    }

    fn with_session<T>(
        &self,
        op: &mut dyn FnMut(&mut Session) -> ClientResult<T>,
    ) -> ClientResult<T> {
        let mut conn = self.pool.allocate()?;
        match op(&mut *conn) {
            Ok(value) => {
                conn.release();
                Ok(value)
            }
            Err(e) if e.is_connection_level() || conn.is_broken() => {
                conn.mark_broken();
                conn.invalidate();
                Err(e)
            }
            Err(e) => {
                conn.release();
                Err(e)
            }
        }
    }

    fn with_retries<T>(
        &self,
        command: CommandId,
        op: &mut dyn FnMut(&mut Session) -> ClientResult<T>,
        retryable: &dyn Fn() -> bool,
    ) -> ClientResult<T> {
        let mut attempt = 0;
        loop {
            match self.with_session(op) {
                Err(e) if e.is_connection_level() && attempt < self.retries && retryable() => {
                    attempt += 1;
                    warn!("{command} failed ({e}), retrying ({attempt}/{})", self.retries);
                }
                result => return result,
            }
        }
    }

    /// Read-only request: `DONE` followed by whatever `read_result` reads.
    pub fn request<T>(
        &self,
        command: CommandId,
        mut write_args: impl FnMut(&mut Encoder<'_>) -> ClientResult<()>,
        mut read_result: impl FnMut(&mut Decoder<'_>) -> ClientResult<T>,
    ) -> ClientResult<T> {
        self.with_retries(
            command,
            &mut |session| {
                session.write_request(command, &mut write_args)?;
                session.expect_done()?;
                let result = read_result(&mut session.decoder());
                if result.is_err() {
                    // Whatever follows the failed field is still unread.
                    session.mark_broken();
                }
                result
            },
            &|| true,
        )
    }

    /// Mutating request. Returns the result together with the tables the
    /// server reported as changed; the caller applies the list.
    pub fn update<T>(
        &self,
        command: CommandId,
        write_args: impl FnOnce(&mut Encoder<'_>) -> ClientResult<()>,
        read_result: impl FnOnce(&mut Decoder<'_>) -> ClientResult<T>,
    ) -> Result<(T, InvalidateList), UpdateFailure> {
        let mut exchange = Some((write_args, read_result));
        let acknowledged = Cell::new(false);
        self.with_session(&mut |session| {
            let Some((write_args, read_result)) = exchange.take() else {
                return Err(ClientError::protocol("update issued twice"));
            };
            session.write_request(command, write_args)?;
            session.expect_done()?;
            acknowledged.set(true);
            let result = read_result(&mut session.decoder());
            let exchange = match result {
                Ok(result) => session.read_invalidate_list().map(|list| (result, list)),
                Err(e) => Err(e),
            };
            if exchange.is_err() {
                session.mark_broken();
            }
            exchange
        })
        .map_err(|error| UpdateFailure {
            error,
            acknowledged: acknowledged.get(),
        })
    }

    /// Read-only request answered with `NEXT` text chunks.
    pub fn dump(
        &self,
        command: CommandId,
        mut write_args: impl FnMut(&mut Encoder<'_>) -> ClientResult<()>,
    ) -> ClientResult<String> {
        self.with_retries(
            command,
            &mut |session| {
                session.write_request(command, &mut write_args)?;
                let mut out = String::new();
                while session.read_status()? == ResponseCode::Next {
                    out.push_str(&session.decoder().read_string()?);
                }
                Ok(out)
            },
            &|| true,
        )
    }

    /// Round trip time of a `Ping`.
    pub fn ping(&self) -> ClientResult<Duration> {
        let started = Instant::now();
        self.request(CommandId::Ping, |_| Ok(()), |_| Ok(()))?;
        let elapsed = started.elapsed();
        trace!("ping answered in {elapsed:?}");
        Ok(elapsed)
    }
}

impl TableSource for Requester {
    /// Retried like any read-only request, but only while no row has been
    /// handed to `on_row`.
    fn fetch_table(
        &self,
        table: TableId,
        on_row: &mut dyn FnMut(&mut Decoder<'_>) -> ClientResult<()>,
    ) -> ClientResult<()> {
        let delivered = Cell::new(0usize);
        let rows = self.with_retries(
            CommandId::GetTable,
            &mut |session| {
                session.write_request(CommandId::GetTable, |enc| {
                    enc.write_varint(i64::from(table.0))
                })?;
                while session.read_status()? == ResponseCode::Next {
                    if let Err(e) = on_row(&mut session.decoder()) {
                        // The rest of the table is still in flight.
                        session.mark_broken();
                        return Err(e);
                    }
                    delivered.set(delivered.get() + 1);
                }
                Ok(delivered.get())
            },
            &|| delivered.get() == 0,
        )?;
        debug!("fetched {rows} rows of {table}");
        Ok(())
    }
}
