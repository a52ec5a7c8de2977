//! Client-server communication protocol.
//!
//! This module defines the wire format spoken between tablelink clients and the
//! management server: the primitive encodings, request and response framing,
//! protocol version negotiation, and the transport session that carries them
//! over TCP or TLS.
//!
//! # Overview
//!
//! Every exchange is one request followed by one response on a single session;
//! a session never has more than one request in flight.
//!
//! - A request is a command identifier followed by command specific arguments.
//! - A response starts with a one byte [`ResponseCode`]: `DONE`, `NEXT` (a
//!   streamed chunk follows; used for whole-table fetches and bulk dumps) or an
//!   error code with the server's message.
//! - Mutating commands append an [`InvalidateList`] after their result fields.
//!
//! # Binary Format
//!
//! - Integers, strings and byte blobs are variable length (bincode varint).
//! - `int64` and `float32` are fixed width, big-endian.
//! - Booleans are a single byte.
//!
//! # Versioning
//!
//! The client offers [`ProtocolVersion::CURRENT`] during the handshake and the
//! server answers with the version to use. Row codecs compare against the
//! negotiated version to include or skip fields added or retired later, so
//! peers at different supported versions never misalign the stream.
//!
//! # See Also
//!
//! - [`connector`](crate::connector): Pools sessions and applies invalidations.
mod codec;
mod request;
mod response;
#[cfg(test)]
pub(crate) mod server;
#[cfg(test)]
mod thread;
mod tls;
mod transport;
mod version;

#[cfg(test)]
use thread::ThreadPool;

pub use codec::{Decoder, Encoder};
pub use request::CommandId;
pub use response::{ErrorCode, InvalidateList, ResponseCode};
pub use tls::TlsConfig;
pub use transport::{ProtocolTransport, Session, Stream};
pub use version::ProtocolVersion;
