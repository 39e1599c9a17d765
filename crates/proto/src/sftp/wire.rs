//! Length-strict wire primitives.
//!
//! All SFTP integers are big-endian; strings and byte buffers are
//! 32-bit-length-prefixed with no terminator. [`WireReader`] fails with
//! [`Error::BadMessage`] on any overrun of the frame, and [`WireReader::finish`]
//! rejects trailing bytes so decoders consume bodies exactly.

use super::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Cursor over a single packet body.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Creates a reader over a packet body.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::BadMessage(format!(
                "truncated {}: need {} bytes, have {}",
                what,
                n,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Reads one byte.
    pub fn read_u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    /// Reads a big-endian u32.
    pub fn read_u32(&mut self, what: &str) -> Result<u32> {
        let b = self.take(4, what)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a big-endian u64.
    pub fn read_u64(&mut self, what: &str) -> Result<u64> {
        let b = self.take(8, what)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Reads a length-prefixed byte buffer.
    pub fn read_bytes(&mut self, what: &str) -> Result<Bytes> {
        let len = self.read_u32(what)? as usize;
        Ok(Bytes::copy_from_slice(self.take(len, what)?))
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_string(&mut self, what: &str) -> Result<String> {
        let len = self.read_u32(what)? as usize;
        let raw = self.take(len, what)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| Error::BadMessage(format!("{} is not valid UTF-8", what)))
    }

    /// Consumes and returns everything left in the body.
    ///
    /// EXTENDED payloads are request-defined trailing bytes, not
    /// length-prefixed buffers.
    pub fn rest(&mut self) -> Bytes {
        let out = Bytes::copy_from_slice(&self.buf[self.pos..]);
        self.pos = self.buf.len();
        out
    }

    /// Asserts the body was consumed exactly.
    pub fn finish(self, what: &str) -> Result<()> {
        if self.remaining() != 0 {
            return Err(Error::BadMessage(format!(
                "{} has {} trailing bytes",
                what,
                self.remaining()
            )));
        }
        Ok(())
    }
}

/// Builder for a packet body.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(64),
        }
    }

    /// Creates a writer with a capacity hint for large payloads.
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(cap),
        }
    }

    /// Appends one byte.
    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.buf.put_u8(v);
        self
    }

    /// Appends a big-endian u32.
    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.buf.put_u32(v);
        self
    }

    /// Appends a big-endian u64.
    pub fn put_u64(&mut self, v: u64) -> &mut Self {
        self.buf.put_u64(v);
        self
    }

    /// Appends a length-prefixed byte buffer.
    pub fn put_bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.put_u32(v.len() as u32);
        self.buf.put_slice(v);
        self
    }

    /// Appends a length-prefixed string.
    pub fn put_string(&mut self, v: &str) -> &mut Self {
        self.put_bytes(v.as_bytes())
    }

    /// Appends raw bytes with no length prefix.
    pub fn put_raw(&mut self, v: &[u8]) -> &mut Self {
        self.buf.put_slice(v);
        self
    }

    /// Current body length.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns the body without framing.
    pub fn into_body(self) -> Bytes {
        self.buf.freeze()
    }

    /// Frames the body as a complete packet: u32 length, type byte, body.
    ///
    /// The length is computed up front and the frame is assembled in a
    /// single buffer, so a caller can hand it to the stream in one write.
    pub fn into_frame(self, packet_type: u8) -> Bytes {
        let body = self.buf;
        let mut frame = BytesMut::with_capacity(5 + body.len());
        frame.put_u32(body.len() as u32 + 1);
        frame.put_u8(packet_type);
        frame.put_slice(&body);
        frame.freeze()
    }
}
