//! In-process server speaking the client protocol, for end-to-end tests.
use std::{
    collections::HashMap,
    io::{Read, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
};

use log::{debug, info, warn};
use parking_lot::Mutex;
use rustls::{ServerConfig, ServerConnection, StreamOwned};

use crate::{
    connector::ConnectorConfig,
    error::{ClientError, ClientResult},
    table::{Row, TableId},
};

use super::{
    CommandId, Encoder, ErrorCode, InvalidateList, ProtocolTransport, ProtocolVersion,
    ResponseCode, ThreadPool,
};

/// Rows of one table, encoded once per protocol version.
type EncodedRows = Arc<HashMap<ProtocolVersion, Vec<Vec<u8>>>>;

/// What the server does for a command outside the core set.
#[derive(Clone)]
pub enum Handler {
    /// Reads one string argument, answers its length and the given list.
    Update(Vec<TableId>),
    /// Streams each chunk as a `NEXT` string.
    Dump(Vec<String>),
    Fail(ErrorCode, String),
}

#[derive(Default)]
struct State {
    max_version: Mutex<Option<ProtocolVersion>>,
    password: Mutex<Option<String>>,
    tables: Mutex<HashMap<TableId, EncodedRows>>,
    handlers: Mutex<HashMap<u32, Handler>>,
    fetches: Mutex<HashMap<TableId, usize>>,
    logins: Mutex<Vec<String>>,
    connections: AtomicUsize,
    drop_requests: AtomicUsize,
    streams: Mutex<Vec<TcpStream>>,
    stopped: AtomicBool,
}

pub struct FakeServer {
    address: SocketAddr,
    state: Arc<State>,
    acceptor: Option<JoinHandle<()>>,
}

impl FakeServer {
    pub fn start() -> Self {
        Self::listen_with(None)
    }

    /// Serves every connection over TLS with the given certificate setup.
    pub fn start_tls(tls: Arc<ServerConfig>) -> Self {
        Self::listen_with(Some(tls))
    }

    fn listen_with(tls: Option<Arc<ServerConfig>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind fake server");
        let address = listener.local_addr().expect("no local address");
        let state = Arc::new(State::default());

        let acceptor = {
            let state = Arc::clone(&state);
            thread::spawn(move || listen(listener, state, tls))
        };
        info!("fake server listening at {address}");

        Self {
            address,
            state,
            acceptor: Some(acceptor),
        }
    }

    /// Client configuration pointing at this server.
    pub fn config(&self, username: &str) -> ConnectorConfig {
        ConnectorConfig::new("127.0.0.1", self.address.port(), username)
    }

    /// Highest version the server agrees to.
    pub fn set_max_version(&self, version: ProtocolVersion) {
        *self.state.max_version.lock() = Some(version);
    }

    pub fn set_password(&self, password: &str) {
        *self.state.password.lock() = Some(password.to_string());
    }

    pub fn set_rows<R: Row>(&self, rows: Vec<R>) {
        let mut encoded = HashMap::new();
        for version in ProtocolVersion::ALL {
            let mut per_row = Vec::with_capacity(rows.len());
            for row in &rows {
                let mut buf = Vec::new();
                row.write_to(&mut Encoder::new(&mut buf, version), version)
                    .expect("failed to encode row");
                per_row.push(buf);
            }
            encoded.insert(version, per_row);
        }
        self.state.tables.lock().insert(R::TABLE, Arc::new(encoded));
    }

    pub fn handle(&self, command: u32, handler: Handler) {
        self.state.handlers.lock().insert(command, handler);
    }

    /// Closes the connections receiving the next `count` requests without
    /// answering.
    pub fn drop_requests(&self, count: usize) {
        self.state.drop_requests.store(count, Ordering::SeqCst);
    }

    pub fn fetches(&self, table: TableId) -> usize {
        self.state.fetches.lock().get(&table).copied().unwrap_or(0)
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn logins(&self) -> Vec<String> {
        self.state.logins.lock().clone()
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.state.stopped.store(true, Ordering::SeqCst);
        for stream in self.state.streams.lock().drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
        let _ = TcpStream::connect(self.address);
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }
    }
}

fn listen(listener: TcpListener, state: Arc<State>, tls: Option<Arc<ServerConfig>>) {
    let pool = ThreadPool::new(8);

    for stream in listener.incoming() {
        if state.stopped.load(Ordering::SeqCst) {
            break;
        }
        match stream {
            Ok(stream) => {
                let control = match stream.try_clone() {
                    Ok(control) => control,
                    Err(e) => {
                        warn!("failed to clone connection: {e}");
                        continue;
                    }
                };
                if let Ok(clone) = control.try_clone() {
                    state.streams.lock().push(clone);
                }
                state.connections.fetch_add(1, Ordering::SeqCst);
                let state = Arc::clone(&state);
                let tls = tls.clone();
                pool.execute(move || {
                    let result = match tls {
                        Some(tls) => ServerConnection::new(tls)
                            .map_err(|e| ClientError::Tls(e.to_string()))
                            .and_then(|conn| {
                                handle_connection(StreamOwned::new(conn, stream), &control, &state)
                            }),
                        None => handle_connection(stream, &control, &state),
                    };
                    if let Err(e) = result {
                        debug!("fake server connection ended: {e}");
                    }
                });
            }
            Err(e) => warn!("broken connection: {e:?}"),
        }
    }

    // Workers may still be blocked on clients that never said goodbye.
    for stream in state.streams.lock().drain(..) {
        let _ = stream.shutdown(Shutdown::Both);
    }
}

fn respond<S: Read + Write>(
    transport: &mut ProtocolTransport<S>,
    build: impl FnOnce(&mut Encoder<'_>) -> ClientResult<()>,
) -> ClientResult<()> {
    let mut buf = Vec::new();
    build(&mut Encoder::new(&mut buf, transport.version()))?;
    transport.write_raw(&buf)
}

fn fail<S: Read + Write>(
    transport: &mut ProtocolTransport<S>,
    code: ErrorCode,
    message: &str,
) -> ClientResult<()> {
    respond(transport, |enc| {
        ResponseCode::Error(code).write(enc)?;
        enc.write_str(message)
    })
}

fn command_id(code: u64) -> ClientResult<CommandId> {
    u32::try_from(code)
        .map(CommandId::from_code)
        .map_err(|_| ClientError::protocol(format!("command {code} out of range")))
}

/// Serves one client. `control` is the underlying socket, used to drop the
/// connection without answering.
fn handle_connection<S: Read + Write>(
    stream: S,
    control: &TcpStream,
    state: &State,
) -> ClientResult<()> {
    let mut transport = ProtocolTransport::new(stream, ProtocolVersion::V1_0);

    let (offered, connect_as, password) = {
        let mut dec = transport.decoder();
        let offered = dec.read_uvarint()?;
        let connect_as = dec.read_string()?;
        let _authenticate_as = dec.read_string()?;
        let password = dec.read_string()?;
        (offered, connect_as, password)
    };

    if let Some(expected) = state.password.lock().clone() {
        if expected != password {
            return fail(&mut transport, ErrorCode::PermissionDenied, "bad credentials");
        }
    }

    let offered = u32::try_from(offered)
        .ok()
        .and_then(ProtocolVersion::from_code)
        .unwrap_or(ProtocolVersion::CURRENT);
    let negotiated = match *state.max_version.lock() {
        Some(max) => offered.min(max),
        None => offered,
    };
    respond(&mut transport, |enc| {
        ResponseCode::Done.write(enc)?;
        enc.write_uvarint(u64::from(negotiated.code()))
    })?;
    transport.set_version(negotiated);
    state.logins.lock().push(connect_as);

    loop {
        let command = command_id(transport.decoder().read_uvarint()?)?;

        let pending = state.drop_requests.load(Ordering::SeqCst);
        if pending > 0 {
            state.drop_requests.store(pending - 1, Ordering::SeqCst);
            debug!("fake server dropping connection on {command}");
            control.shutdown(Shutdown::Both)?;
            return Ok(());
        }

        match command {
            CommandId::Quit => return Ok(()),
            CommandId::Ping => respond(&mut transport, |enc| ResponseCode::Done.write(enc))?,
            CommandId::GetTable => {
                let table = TableId(transport.decoder().read_int()? as u32);
                let rows = state.tables.lock().get(&table).cloned();
                match rows {
                    Some(rows) => {
                        *state.fetches.lock().entry(table).or_default() += 1;
                        let empty = Vec::new();
                        let encoded = rows.get(&transport.version()).unwrap_or(&empty);
                        respond(&mut transport, |enc| {
                            for row in encoded {
                                ResponseCode::Next.write(enc)?;
                                enc.write_raw(row)?;
                            }
                            ResponseCode::Done.write(enc)
                        })?;
                    }
                    None => {
                        fail(&mut transport, ErrorCode::NotFound, &format!("{table} not found"))?
                    }
                }
            }
            CommandId::InvalidateTable => {
                let table = TableId(transport.decoder().read_int()? as u32);
                respond(&mut transport, |enc| {
                    ResponseCode::Done.write(enc)?;
                    InvalidateList::from_iter([table]).write(enc)
                })?;
            }
            CommandId::Other(code) => {
                let handler = state.handlers.lock().get(&code).cloned();
                match handler {
                    Some(Handler::Update(tables)) => {
                        let arg = transport.decoder().read_string()?;
                        respond(&mut transport, |enc| {
                            ResponseCode::Done.write(enc)?;
                            enc.write_uvarint(arg.len() as u64)?;
                            tables.iter().copied().collect::<InvalidateList>().write(enc)
                        })?;
                    }
                    Some(Handler::Dump(chunks)) => respond(&mut transport, |enc| {
                        for chunk in &chunks {
                            ResponseCode::Next.write(enc)?;
                            enc.write_str(chunk)?;
                        }
                        ResponseCode::Done.write(enc)
                    })?,
                    Some(Handler::Fail(code, message)) => fail(&mut transport, code, &message)?,
                    None => fail(
                        &mut transport,
                        ErrorCode::InvalidArgument,
                        &format!("unknown {command}"),
                    )?,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_ids_outside_u32_are_rejected() {
        assert_eq!(command_id(2).unwrap(), CommandId::GetTable);
        assert_eq!(command_id(40).unwrap(), CommandId::Other(40));
        assert!(matches!(
            command_id(u64::from(u32::MAX) + 1),
            Err(ClientError::Protocol(_))
        ));
    }
}
