use std::{
    io::{self, BufReader, Read, Write},
    net::{SocketAddr, TcpStream, ToSocketAddrs},
};

use log::{debug, info, trace};
use rustls::{ClientConnection, StreamOwned, pki_types::ServerName};
use socket2::{Domain, Protocol, SockRef, Socket, Type};

use crate::{
    connector::ConnectorConfig,
    error::{ClientError, ClientResult},
};

use super::{CommandId, Decoder, Encoder, InvalidateList, ProtocolVersion, ResponseCode, tls};

/// Strictly ordered request/response exchange over one byte stream.
///
/// Requests are assembled in memory and written in one piece; responses are
/// read through a buffer. A transport that hit an I/O or framing failure is
/// flagged broken and must not be reused.
pub struct ProtocolTransport<T: Read + Write> {
    stream: BufReader<T>,
    version: ProtocolVersion,
    broken: bool,
}

impl<T: Read + Write> ProtocolTransport<T> {
    pub fn new(stream: T, version: ProtocolVersion) -> Self {
        Self {
            stream: BufReader::new(stream),
            version,
            broken: false,
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: ProtocolVersion) {
        self.version = version;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn decoder(&mut self) -> Decoder<'_> {
        Decoder::new(&mut self.stream, self.version)
    }

    #[cfg(test)]
    pub(crate) fn get_mut(&mut self) -> &mut T {
        self.stream.get_mut()
    }

    /// Sends a command identifier followed by its arguments.
    pub fn write_request<F>(&mut self, command: CommandId, args: F) -> ClientResult<()>
    where
        F: FnOnce(&mut Encoder<'_>) -> ClientResult<()>,
    {
        trace!("writing request {command}");
        let mut buf = Vec::new();
        let mut enc = Encoder::new(&mut buf, self.version);
        enc.write_uvarint(u64::from(command.code()))?;
        args(&mut enc)?;
        self.write_raw(&buf)
    }

    /// Writes an already encoded message and flushes it.
    pub fn write_raw(&mut self, bytes: &[u8]) -> ClientResult<()> {
        let stream = self.stream.get_mut();
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(())
    }

    /// Reads the raw response code without interpreting errors.
    pub fn read_code(&mut self) -> ClientResult<ResponseCode> {
        ResponseCode::read(&mut self.decoder())
    }

    /// Reads a response code, raising server errors as [`ClientError::Remote`].
    pub fn read_status(&mut self) -> ClientResult<ResponseCode> {
        match self.read_code()? {
            ResponseCode::Error(code) => {
                let message = self.decoder().read_string()?;
                debug!("server reported {code} error: {message}");
                Err(ClientError::remote(code, message))
            }
            status => Ok(status),
        }
    }

    /// Reads a status that must be `DONE`.
    pub fn expect_done(&mut self) -> ClientResult<()> {
        match self.read_status()? {
            ResponseCode::Done => Ok(()),
            other => Err(ClientError::protocol(format!(
                "expected DONE, received {other:?}"
            ))),
        }
    }

    pub fn read_invalidate_list(&mut self) -> ClientResult<InvalidateList> {
        InvalidateList::read(&mut self.decoder())
    }
}

/// A connected byte stream, plain or TLS.
pub enum Stream {
    Tcp(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf),
            Stream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.write(buf),
            Stream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.flush(),
            Stream::Tls(s) => s.flush(),
        }
    }
}

/// One authenticated connection to the server.
pub type Session = ProtocolTransport<Stream>;

impl ProtocolTransport<Stream> {
    /// Connects, optionally wraps the socket in TLS, and negotiates the
    /// protocol version.
    pub fn open(config: &ConnectorConfig) -> ClientResult<Session> {
        let tcp = connect_tcp(config)?;
        let stream = match &config.tls {
            Some(tls_config) => {
                let client_config = tls::client_config(tls_config)?;
                let name = tls_config
                    .server_name
                    .clone()
                    .unwrap_or_else(|| config.host.clone());
                let server_name = ServerName::try_from(name)
                    .map_err(|e| ClientError::Tls(format!("invalid server name: {e}")))?;
                let conn = ClientConnection::new(client_config, server_name)
                    .map_err(|e| ClientError::Tls(e.to_string()))?;
                Stream::Tls(Box::new(StreamOwned::new(conn, tcp)))
            }
            None => Stream::Tcp(tcp),
        };

        let mut session = ProtocolTransport::new(stream, ProtocolVersion::CURRENT);
        session.handshake(config)?;
        info!(
            "connected to {}:{} as {} (protocol {})",
            config.host, config.port, config.connect_as, session.version
        );
        Ok(session)
    }

    fn handshake(&mut self, config: &ConnectorConfig) -> ClientResult<()> {
        let mut buf = Vec::new();
        let mut enc = Encoder::new(&mut buf, self.version);
        enc.write_uvarint(u64::from(ProtocolVersion::CURRENT.code()))?;
        enc.write_str(&config.connect_as)?;
        enc.write_str(&config.authenticate_as)?;
        enc.write_str(&config.password)?;
        self.write_raw(&buf)?;

        self.expect_done()?;
        let code = self.decoder().read_uvarint()?;
        let version = u32::try_from(code)
            .ok()
            .and_then(ProtocolVersion::from_code)
            .ok_or_else(|| {
                ClientError::protocol(format!("server selected unknown protocol version {code}"))
            })?;
        if version > ProtocolVersion::CURRENT {
            return Err(ClientError::protocol(format!(
                "server selected protocol {version}, newer than {}",
                ProtocolVersion::CURRENT
            )));
        }
        self.set_version(version);
        Ok(())
    }

    /// Says goodbye to the server. Failures are ignored; the socket is
    /// dropped either way.
    pub fn close(mut self) {
        if !self.broken {
            let _ = self.write_request(CommandId::Quit, |_| Ok(()));
        }
        debug!("session closed");
    }
}

fn connect_tcp(config: &ConnectorConfig) -> ClientResult<TcpStream> {
    let addrs: Vec<SocketAddr> = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(ClientError::Connection)?
        .collect();

    let mut last_err = None;
    for addr in addrs {
        match connect_addr(config, addr) {
            Ok(stream) => {
                stream
                    .set_read_timeout(config.read_timeout)
                    .map_err(ClientError::Connection)?;
                stream
                    .set_write_timeout(config.write_timeout)
                    .map_err(ClientError::Connection)?;
                stream.set_nodelay(true).map_err(ClientError::Connection)?;
                SockRef::from(&stream)
                    .set_keepalive(true)
                    .map_err(ClientError::Connection)?;
                return Ok(stream);
            }
            Err(e) => {
                debug!("failed to connect to {addr}: {e}");
                last_err = Some(e);
            }
        }
    }

    Err(ClientError::Connection(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no address found for {}", config.host),
        )
    })))
}

fn connect_addr(config: &ConnectorConfig, addr: SocketAddr) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    if let Some(local_ip) = config.local_ip {
        socket.bind(&SocketAddr::new(local_ip, 0).into())?;
    }
    socket.connect_timeout(&addr.into(), config.connect_timeout)?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Seek, SeekFrom};

    use crate::protocol::{ErrorCode, response};

    use super::*;

    fn transport(bytes: Vec<u8>) -> ProtocolTransport<Cursor<Vec<u8>>> {
        ProtocolTransport::new(Cursor::new(bytes), ProtocolVersion::CURRENT)
    }

    #[test]
    fn write_request_frames_command() {
        let mut transport = transport(Vec::new());
        transport
            .write_request(CommandId::GetTable, |enc| enc.write_varint(5))
            .unwrap();

        let stream = transport.get_mut();
        stream.seek(SeekFrom::Start(0)).unwrap();
        let mut dec = Decoder::new(stream, ProtocolVersion::CURRENT);
        assert_eq!(dec.read_uvarint().unwrap(), 2);
        assert_eq!(dec.read_varint().unwrap(), 5);
    }

    #[test]
    fn remote_error_carries_message() {
        let mut bytes = Vec::new();
        let mut enc = Encoder::new(&mut bytes, ProtocolVersion::CURRENT);
        ResponseCode::Error(ErrorCode::PermissionDenied)
            .write(&mut enc)
            .unwrap();
        enc.write_str("access to table 12 denied").unwrap();

        let err = transport(bytes).read_status().unwrap_err();
        match err {
            ClientError::Remote { code, message } => {
                assert_eq!(code, ErrorCode::PermissionDenied);
                assert_eq!(message, "access to table 12 denied");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn next_is_not_done() {
        let err = transport(vec![response::NEXT]).expect_done().unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[test]
    fn done_then_invalidate_list() {
        let mut bytes = vec![response::DONE];
        let list: InvalidateList = [crate::table::TableId(3)].into_iter().collect();
        list.write(&mut Encoder::new(&mut bytes, ProtocolVersion::CURRENT))
            .unwrap();

        let mut transport = transport(bytes);
        transport.expect_done().unwrap();
        assert_eq!(transport.read_invalidate_list().unwrap(), list);
    }
}
