//! Append/consume binary stream.
//!
//! The stream is the wire and disk representation for metadata and
//! datasets: the metadata disk cache, dataset container files, and
//! communicator broadcasts all move through it. Values are written with
//! typed `pack_*` calls and read back in the same order with the matching
//! `unpack_*` calls; everything is little-endian and length-prefixed.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};

/// A growable byte buffer with a read cursor.
///
/// Writes append at the tail; reads consume from the head. A stream that
/// has been fully unpacked is empty.
#[derive(Debug, Default, Clone)]
pub struct BinaryStream {
    buf: BytesMut,
}

impl BinaryStream {
    /// Create an empty stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a stream that consumes the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            buf: BytesMut::from(data),
        }
    }

    /// Number of unconsumed bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check whether all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Unconsumed bytes as a slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Take the unconsumed bytes out of the stream.
    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }

    fn need(&self, n: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(Error::format(format!(
                "stream truncated: need {n} bytes for {what}, have {}",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    /// Append a u8.
    pub fn pack_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    /// Consume a u8.
    pub fn unpack_u8(&mut self) -> Result<u8> {
        self.need(1, "u8")?;
        Ok(self.buf.get_u8())
    }

    /// Append a u32.
    pub fn pack_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    /// Consume a u32.
    pub fn unpack_u32(&mut self) -> Result<u32> {
        self.need(4, "u32")?;
        Ok(self.buf.get_u32_le())
    }

    /// Append a u64.
    pub fn pack_u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    /// Consume a u64.
    pub fn unpack_u64(&mut self) -> Result<u64> {
        self.need(8, "u64")?;
        Ok(self.buf.get_u64_le())
    }

    /// Append an i64.
    pub fn pack_i64(&mut self, v: i64) {
        self.buf.put_i64_le(v);
    }

    /// Consume an i64.
    pub fn unpack_i64(&mut self) -> Result<i64> {
        self.need(8, "i64")?;
        Ok(self.buf.get_i64_le())
    }

    /// Append an f64.
    pub fn pack_f64(&mut self, v: f64) {
        self.buf.put_f64_le(v);
    }

    /// Consume an f64.
    pub fn unpack_f64(&mut self) -> Result<f64> {
        self.need(8, "f64")?;
        Ok(self.buf.get_f64_le())
    }

    /// Append an f32.
    pub fn pack_f32(&mut self, v: f32) {
        self.buf.put_f32_le(v);
    }

    /// Consume an f32.
    pub fn unpack_f32(&mut self) -> Result<f32> {
        self.need(4, "f32")?;
        Ok(self.buf.get_f32_le())
    }

    /// Append raw bytes with a length prefix.
    pub fn pack_bytes(&mut self, data: &[u8]) {
        self.pack_u64(data.len() as u64);
        self.buf.put_slice(data);
    }

    /// Consume length-prefixed raw bytes.
    pub fn unpack_bytes(&mut self) -> Result<Vec<u8>> {
        let n = self.unpack_u64()? as usize;
        self.need(n, "bytes payload")?;
        let mut out = vec![0u8; n];
        self.buf.copy_to_slice(&mut out);
        Ok(out)
    }

    /// Append a UTF-8 string with a length prefix.
    pub fn pack_str(&mut self, s: &str) {
        self.pack_bytes(s.as_bytes());
    }

    /// Consume a length-prefixed UTF-8 string.
    pub fn unpack_str(&mut self) -> Result<String> {
        let raw = self.unpack_bytes()?;
        String::from_utf8(raw).map_err(|e| Error::format(format!("invalid utf-8 string: {e}")))
    }

    /// Append a list of strings.
    pub fn pack_str_vec(&mut self, v: &[String]) {
        self.pack_u64(v.len() as u64);
        for s in v {
            self.pack_str(s);
        }
    }

    /// Consume a list of strings.
    pub fn unpack_str_vec(&mut self) -> Result<Vec<String>> {
        let n = self.unpack_u64()? as usize;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.unpack_str()?);
        }
        Ok(out)
    }

    /// Append a list of f64 values.
    pub fn pack_f64_vec(&mut self, v: &[f64]) {
        self.pack_u64(v.len() as u64);
        for x in v {
            self.pack_f64(*x);
        }
    }

    /// Consume a list of f64 values.
    pub fn unpack_f64_vec(&mut self) -> Result<Vec<f64>> {
        let n = self.unpack_u64()? as usize;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.unpack_f64()?);
        }
        Ok(out)
    }

    /// Append a list of u64 values.
    pub fn pack_u64_vec(&mut self, v: &[u64]) {
        self.pack_u64(v.len() as u64);
        for x in v {
            self.pack_u64(*x);
        }
    }

    /// Consume a list of u64 values.
    pub fn unpack_u64_vec(&mut self) -> Result<Vec<u64>> {
        let n = self.unpack_u64()? as usize;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.unpack_u64()?);
        }
        Ok(out)
    }

    /// Write a magic tag and format revision header.
    pub fn pack_header(&mut self, magic: &str, revision: u32) {
        self.pack_str(magic);
        self.pack_u32(revision);
    }

    /// Consume and verify a magic tag; returns the stored revision.
    ///
    /// The revision must be at most `max_revision`; older revisions are
    /// accepted so readers can decode streams written by earlier releases.
    pub fn unpack_header(&mut self, magic: &str, max_revision: u32) -> Result<u32> {
        let tag = self.unpack_str()?;
        if tag != magic {
            return Err(Error::format(format!(
                "bad magic: expected \"{magic}\", found \"{tag}\""
            )));
        }
        let rev = self.unpack_u32()?;
        if rev > max_revision {
            return Err(Error::format(format!(
                "\"{magic}\" revision {rev} is newer than supported revision {max_revision}"
            )));
        }
        Ok(rev)
    }
}

/// Objects that can be written to and recovered from a [`BinaryStream`].
pub trait Streamable: Sized {
    /// Append this object to the stream.
    fn to_stream(&self, stream: &mut BinaryStream);

    /// Consume this object from the stream.
    fn from_stream(stream: &mut BinaryStream) -> Result<Self>;
}
