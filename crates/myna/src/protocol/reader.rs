//! Packet payload reading.
//!
//! `PacketReader` walks a single reassembled payload and decodes the wire
//! primitives: little-endian integers, length-encoded integers and strings,
//! and the OK/ERR/EOF packet bodies. Running out of bytes is a
//! `ProtocolError` — by the time a payload reaches a reader, framing has
//! already promised the bytes are there.

use myna_core::{Error, Result, ServerError};

use crate::protocol::{EofPacket, OkPacket};

/// A cursor over one packet payload.
#[derive(Debug)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    /// Create a new reader over a payload.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Whether the payload is fully consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Peek at the next byte without advancing.
    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn short(&self, what: &str) -> Error {
        Error::protocol(format!(
            "truncated packet: needed {what} at offset {}, {} bytes left",
            self.pos,
            self.remaining()
        ))
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        let byte = *self.data.get(self.pos).ok_or_else(|| self.short("u8"))?;
        self.pos += 1;
        Ok(byte)
    }

    /// Read a little-endian u16.
    pub fn read_u16_le(&mut self) -> Result<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read a little-endian 3-byte integer.
    pub fn read_u24_le(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(3)?;
        Ok(u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16))
    }

    /// Read a little-endian u32.
    pub fn read_u32_le(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a little-endian u64.
    pub fn read_u64_le(&mut self) -> Result<u64> {
        let bytes = self.read_bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    /// Read a length-encoded integer.
    ///
    /// Returns `None` for the NULL marker (0xFB), which appears in place of
    /// a length-encoded value in text-protocol rows.
    pub fn read_lenenc_int(&mut self) -> Result<Option<u64>> {
        let first = self.read_u8()?;
        match first {
            0x00..=0xFA => Ok(Some(u64::from(first))),
            0xFB => Ok(None),
            0xFC => Ok(Some(u64::from(self.read_u16_le()?))),
            0xFD => Ok(Some(u64::from(self.read_u24_le()?))),
            0xFE => Ok(Some(self.read_u64_le()?)),
            0xFF => Err(Error::protocol(
                "0xFF is not a valid length-encoded integer prefix",
            )),
        }
    }

    /// Read a length-encoded byte slice; `None` for the NULL marker.
    pub fn read_lenenc_bytes(&mut self) -> Result<Option<&'a [u8]>> {
        match self.read_lenenc_int()? {
            None => Ok(None),
            #[allow(clippy::cast_possible_truncation)]
            Some(len) => self.read_bytes(len as usize).map(Some),
        }
    }

    /// Read a length-encoded string; `None` for the NULL marker.
    pub fn read_lenenc_string(&mut self) -> Result<Option<String>> {
        Ok(self
            .read_lenenc_bytes()?
            .map(|b| String::from_utf8_lossy(b).into_owned()))
    }

    /// Read a null-terminated string.
    pub fn read_null_string(&mut self) -> Result<String> {
        let start = self.pos;
        while self.pos < self.data.len() && self.data[self.pos] != 0 {
            self.pos += 1;
        }
        let s = String::from_utf8_lossy(&self.data[start..self.pos]).into_owned();
        if self.pos < self.data.len() {
            self.pos += 1; // terminator
        }
        Ok(s)
    }

    /// Read a fixed-length string.
    pub fn read_string(&mut self, len: usize) -> Result<String> {
        let bytes = self.read_bytes(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Read a fixed number of bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(self.short(&format!("{len} bytes")));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Read all remaining bytes.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    /// Read all remaining bytes as a string.
    pub fn read_rest_string(&mut self) -> String {
        String::from_utf8_lossy(self.read_rest()).into_owned()
    }

    /// Skip forward over `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        if self.remaining() < n {
            return Err(self.short(&format!("{n} bytes to skip")));
        }
        self.pos += n;
        Ok(())
    }

    /// Parse an OK packet body.
    ///
    /// Layout (protocol 4.1+): 0x00 marker, affected rows (lenenc),
    /// last insert id (lenenc), status flags (2), warnings (2), info.
    pub fn parse_ok_packet(&mut self) -> Result<OkPacket> {
        if self.peek() == Some(0x00) || self.peek() == Some(0xFE) {
            self.skip(1)?;
        }
        let affected_rows = self
            .read_lenenc_int()?
            .ok_or_else(|| Error::protocol("NULL marker in OK packet"))?;
        let last_insert_id = self
            .read_lenenc_int()?
            .ok_or_else(|| Error::protocol("NULL marker in OK packet"))?;
        let status_flags = self.read_u16_le()?;
        let warnings = self.read_u16_le()?;
        let info = if self.is_empty() {
            String::new()
        } else {
            self.read_rest_string()
        };
        Ok(OkPacket {
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
            info,
        })
    }

    /// Parse an ERR packet body into a `ServerError`.
    ///
    /// Layout: 0xFF marker, error code (2 bytes LE), then optionally a `#`
    /// and a 5-character SQLSTATE, then the message text.
    pub fn parse_err_packet(&mut self) -> Result<ServerError> {
        if self.peek() == Some(0xFF) {
            self.skip(1)?;
        }
        let code = self.read_u16_le()?;
        let sql_state = if self.peek() == Some(b'#') {
            self.skip(1)?;
            self.read_string(5)?
        } else {
            String::new()
        };
        let message = self.read_rest_string();
        Ok(ServerError {
            code,
            sql_state,
            message,
        })
    }

    /// Parse an EOF packet body.
    pub fn parse_eof_packet(&mut self) -> Result<EofPacket> {
        if self.peek() == Some(0xFE) {
            self.skip(1)?;
        }
        let warnings = self.read_u16_le()?;
        let status_flags = self.read_u16_le()?;
        Ok(EofPacket {
            warnings,
            status_flags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_width_integers() {
        let mut r = PacketReader::new(&[0x42, 0x34, 0x12, 0x56, 0x34, 0x12]);
        assert_eq!(r.read_u8().unwrap(), 0x42);
        assert_eq!(r.read_u16_le().unwrap(), 0x1234);
        assert_eq!(r.read_u24_le().unwrap(), 0x0012_3456);
        assert!(r.read_u8().is_err());
    }

    #[test]
    fn lenenc_integers() {
        let mut r = PacketReader::new(&[0x42]);
        assert_eq!(r.read_lenenc_int().unwrap(), Some(0x42));

        let mut r = PacketReader::new(&[0xFC, 0x34, 0x12]);
        assert_eq!(r.read_lenenc_int().unwrap(), Some(0x1234));

        let mut r = PacketReader::new(&[0xFD, 0x56, 0x34, 0x12]);
        assert_eq!(r.read_lenenc_int().unwrap(), Some(0x0012_3456));

        let mut r = PacketReader::new(&[0xFE, 1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(r.read_lenenc_int().unwrap(), Some(0x0807_0605_0403_0201));
    }

    #[test]
    fn lenenc_null_marker() {
        let mut r = PacketReader::new(&[0xFB]);
        assert_eq!(r.read_lenenc_int().unwrap(), None);

        let mut r = PacketReader::new(&[0xFB]);
        assert_eq!(r.read_lenenc_bytes().unwrap(), None);
    }

    #[test]
    fn strings() {
        let mut r = PacketReader::new(b"hello\0world\0");
        assert_eq!(r.read_null_string().unwrap(), "hello");
        assert_eq!(r.read_null_string().unwrap(), "world");

        let mut r = PacketReader::new(&[0x05, b'h', b'e', b'l', b'l', b'o']);
        assert_eq!(r.read_lenenc_string().unwrap(), Some("hello".to_string()));
    }

    #[test]
    fn ok_packet() {
        let data = [0x00, 0x01, 0x2A, 0x02, 0x00, 0x00, 0x00];
        let ok = PacketReader::new(&data).parse_ok_packet().unwrap();
        assert_eq!(ok.affected_rows, 1);
        assert_eq!(ok.last_insert_id, 42);
        assert_eq!(ok.status_flags, 2);
        assert_eq!(ok.warnings, 0);
    }

    #[test]
    fn err_packet_with_state() {
        let mut data = vec![0xFF, 0x15, 0x04, b'#'];
        data.extend_from_slice(b"28000");
        data.extend_from_slice(b"Access denied");
        let err = PacketReader::new(&data).parse_err_packet().unwrap();
        assert_eq!(err.code, 1045);
        assert_eq!(err.sql_state, "28000");
        assert_eq!(err.message, "Access denied");
    }

    #[test]
    fn err_packet_without_state() {
        let mut data = vec![0xFF, 0x15, 0x04];
        data.extend_from_slice(b"Access denied");
        let err = PacketReader::new(&data).parse_err_packet().unwrap();
        assert_eq!(err.code, 1045);
        assert_eq!(err.sql_state, "");
    }

    #[test]
    fn eof_packet() {
        let data = [0xFE, 0x00, 0x00, 0x02, 0x00];
        let eof = PacketReader::new(&data).parse_eof_packet().unwrap();
        assert_eq!(eof.warnings, 0);
        assert_eq!(eof.status_flags, 2);
    }

    #[test]
    fn truncated_payload_is_protocol_error() {
        let mut r = PacketReader::new(&[0xFC, 0x01]);
        assert!(matches!(
            r.read_lenenc_int().unwrap_err(),
            Error::Protocol(_)
        ));
    }
}
