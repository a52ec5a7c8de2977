//! Wire primitives shared by requests, responses and row codecs.
//!
//! Integers, strings and byte blobs use bincode's variable length integer
//! encoding (signed values are zig-zag encoded). `int64` and `float32` use
//! the fixed width big-endian configuration so they always take 8 and 4 bytes.
use std::io::{Read, Write};

use bincode::{
    Decode, Encode,
    config::{BigEndian, Configuration, Fixint, Varint},
    decode_from_std_read, encode_into_std_write,
};

use crate::error::{ClientError, ClientResult};

use super::ProtocolVersion;

pub(crate) fn varint_config() -> Configuration<BigEndian, Varint> {
    bincode::config::standard().with_big_endian()
}

pub(crate) fn fixed_config() -> Configuration<BigEndian, Fixint> {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

/// Writes protocol primitives for a negotiated [`ProtocolVersion`].
pub struct Encoder<'a> {
    out: &'a mut dyn Write,
    version: ProtocolVersion,
}

impl<'a> Encoder<'a> {
    pub fn new(out: &'a mut dyn Write, version: ProtocolVersion) -> Self {
        Self { out, version }
    }

    /// Version the peer expects; row codecs branch on it.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    fn varint<E: Encode>(&mut self, value: E) -> ClientResult<()> {
        encode_into_std_write(value, &mut self.out, varint_config())?;
        Ok(())
    }

    fn fixed<E: Encode>(&mut self, value: E) -> ClientResult<()> {
        encode_into_std_write(value, &mut self.out, fixed_config())?;
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> ClientResult<()> {
        self.out.write_all(&[value])?;
        Ok(())
    }

    /// Zig-zag variable length integer.
    pub fn write_varint(&mut self, value: i64) -> ClientResult<()> {
        self.varint(value)
    }

    pub fn write_uvarint(&mut self, value: u64) -> ClientResult<()> {
        self.varint(value)
    }

    /// Length-prefixed UTF-8.
    pub fn write_str(&mut self, value: &str) -> ClientResult<()> {
        self.varint(value)
    }

    /// Presence flag followed by the string when present.
    pub fn write_nullable_str(&mut self, value: Option<&str>) -> ClientResult<()> {
        self.varint(value)
    }

    pub fn write_bool(&mut self, value: bool) -> ClientResult<()> {
        self.write_u8(u8::from(value))
    }

    pub fn write_i64(&mut self, value: i64) -> ClientResult<()> {
        self.fixed(value)
    }

    pub fn write_f32(&mut self, value: f32) -> ClientResult<()> {
        self.fixed(value)
    }

    pub fn write_bytes(&mut self, value: &[u8]) -> ClientResult<()> {
        self.varint(value)
    }

    /// Copies already encoded bytes, without a length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) -> ClientResult<()> {
        self.out.write_all(bytes)?;
        Ok(())
    }

    pub fn flush(&mut self) -> ClientResult<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Reads protocol primitives written by an [`Encoder`] at the same version.
pub struct Decoder<'a> {
    input: &'a mut dyn Read,
    version: ProtocolVersion,
}

impl<'a> Decoder<'a> {
    pub fn new(input: &'a mut dyn Read, version: ProtocolVersion) -> Self {
        Self { input, version }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    fn varint<D: Decode<()>>(&mut self) -> ClientResult<D> {
        Ok(decode_from_std_read(&mut self.input, varint_config())?)
    }

    fn fixed<D: Decode<()>>(&mut self) -> ClientResult<D> {
        Ok(decode_from_std_read(&mut self.input, fixed_config())?)
    }

    pub fn read_u8(&mut self) -> ClientResult<u8> {
        let mut buf = [0; 1];
        self.input.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_varint(&mut self) -> ClientResult<i64> {
        self.varint()
    }

    pub fn read_uvarint(&mut self) -> ClientResult<u64> {
        self.varint()
    }

    /// Signed varint that must fit an `i32` column.
    pub fn read_int(&mut self) -> ClientResult<i32> {
        let value = self.read_varint()?;
        i32::try_from(value)
            .map_err(|_| ClientError::protocol(format!("integer {value} out of range")))
    }

    pub fn read_string(&mut self) -> ClientResult<String> {
        self.varint()
    }

    pub fn read_nullable_string(&mut self) -> ClientResult<Option<String>> {
        self.varint()
    }

    pub fn read_bool(&mut self) -> ClientResult<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ClientError::protocol(format!("invalid boolean byte {other}"))),
        }
    }

    pub fn read_i64(&mut self) -> ClientResult<i64> {
        self.fixed()
    }

    pub fn read_f32(&mut self) -> ClientResult<f32> {
        self.fixed()
    }

    pub fn read_bytes(&mut self) -> ClientResult<Vec<u8>> {
        self.varint()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn primitives_round_trip() {
        let mut buf = Vec::new();
        let mut enc = Encoder::new(&mut buf, ProtocolVersion::CURRENT);
        enc.write_varint(-5).unwrap();
        enc.write_uvarint(300).unwrap();
        enc.write_str("mail.example.com").unwrap();
        enc.write_nullable_str(None).unwrap();
        enc.write_nullable_str(Some("x")).unwrap();
        enc.write_bool(true).unwrap();
        enc.write_i64(i64::MIN).unwrap();
        enc.write_f32(0.25).unwrap();
        enc.write_bytes(&[1, 2, 3]).unwrap();

        let mut cursor = Cursor::new(buf);
        let mut dec = Decoder::new(&mut cursor, ProtocolVersion::CURRENT);
        assert_eq!(dec.read_varint().unwrap(), -5);
        assert_eq!(dec.read_uvarint().unwrap(), 300);
        assert_eq!(dec.read_string().unwrap(), "mail.example.com");
        assert_eq!(dec.read_nullable_string().unwrap(), None);
        assert_eq!(dec.read_nullable_string().unwrap(), Some("x".to_string()));
        assert!(dec.read_bool().unwrap());
        assert_eq!(dec.read_i64().unwrap(), i64::MIN);
        assert_eq!(dec.read_f32().unwrap(), 0.25);
        assert_eq!(dec.read_bytes().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn fixed_width_values() {
        let mut buf = Vec::new();
        let mut enc = Encoder::new(&mut buf, ProtocolVersion::CURRENT);
        enc.write_i64(1).unwrap();
        enc.write_f32(1.0).unwrap();
        assert_eq!(buf.len(), 12);
        assert_eq!(&buf[..8], &1_i64.to_be_bytes());
    }

    #[test]
    fn small_varints_are_compact() {
        let mut buf = Vec::new();
        let mut enc = Encoder::new(&mut buf, ProtocolVersion::CURRENT);
        enc.write_varint(-1).unwrap();
        enc.write_uvarint(7).unwrap();
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn invalid_bool_is_protocol_error() {
        let mut cursor = Cursor::new(vec![7_u8]);
        let mut dec = Decoder::new(&mut cursor, ProtocolVersion::CURRENT);
        assert!(matches!(dec.read_bool(), Err(ClientError::Protocol(_))));
    }

    #[test]
    fn truncated_stream_fails() {
        let mut cursor = Cursor::new(vec![]);
        let mut dec = Decoder::new(&mut cursor, ProtocolVersion::CURRENT);
        assert!(dec.read_string().unwrap_err().is_connection_level());
    }
}
