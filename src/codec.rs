//! Little-endian binary codec for the MV2S format.
//!
//! Fixed-width integers, canonicalised `f64`, and length-prefixed blobs and
//! strings. The reader enforces the format's decode bounds and tracks the
//! number of bytes consumed; callers finish with [`ByteReader::finish`],
//! which rejects trailing bytes.

use crate::error::{Result, WaxError};

// ── Decode bounds ──────────────────────────────────────────────────

pub mod limits {
    /// Max length-prefixed UTF-8 string (16 MiB).
    pub const MAX_STRING_BYTES: u64 = 16 * 1024 * 1024;
    /// Max length-prefixed blob (256 MiB).
    pub const MAX_BLOB_BYTES: u64 = 256 * 1024 * 1024;
    /// Max element count for any encoded array (10 M).
    pub const MAX_ARRAY_LEN: u64 = 10_000_000;
    /// Max embedding dimension (1 M).
    pub const MAX_EMBEDDING_DIM: u32 = 1_000_000;
    /// Max TOC size (64 MiB).
    pub const MAX_TOC_BYTES: u64 = 64 * 1024 * 1024;
    /// Max backward footer-scan distance (32 MiB).
    pub const MAX_FOOTER_SCAN_BYTES: u64 = 32 * 1024 * 1024;
    /// Max WAL record body (16 MiB).
    pub const MAX_WAL_BODY_BYTES: u32 = 16 * 1024 * 1024;
}

// ── Writer ─────────────────────────────────────────────────────────

/// Append-only encoder over a growable buffer.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Canonicalised `f64`: `-0.0` is written as `0.0`; non-finite values
    /// are rejected.
    pub fn put_f64(&mut self, v: f64) -> Result<()> {
        if !v.is_finite() {
            return Err(WaxError::Encoding(format!(
                "non-finite f64 rejected: {v}"
            )));
        }
        let canonical = if v == 0.0 { 0.0 } else { v };
        self.buf.extend_from_slice(&canonical.to_le_bytes());
        Ok(())
    }

    /// Length-prefixed byte slice (u64 length, then bytes).
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_u64(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    /// Length-prefixed UTF-8 string.
    pub fn put_str(&mut self, s: &str) {
        self.put_bytes(s.as_bytes());
    }

    /// Raw bytes, no prefix. For fixed-width fields such as digests.
    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

// ── Reader ─────────────────────────────────────────────────────────

/// Bounds-checked decoder over a byte slice.
#[derive(Debug)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn consumed(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(WaxError::Encoding(format!(
                "truncated input at offset {}: need {} bytes, have {}",
                self.pos,
                n,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    /// Canonicalised `f64`: rejects NaN and ±∞, maps `-0.0` to `0.0`.
    pub fn read_f64(&mut self) -> Result<f64> {
        let at = self.pos;
        let v = f64::from_le_bytes(self.take(8)?.try_into().unwrap());
        if !v.is_finite() {
            return Err(WaxError::Encoding(format!(
                "non-finite f64 at offset {at}"
            )));
        }
        Ok(if v == 0.0 { 0.0 } else { v })
    }

    fn read_prefixed(&mut self, cap: u64, what: &str) -> Result<&'a [u8]> {
        let at = self.pos;
        let len = self.read_u64()?;
        if len > cap {
            return Err(WaxError::Encoding(format!(
                "{what} length {len} exceeds cap {cap} at offset {at}"
            )));
        }
        self.take(len as usize)
    }

    /// Length-prefixed byte slice, bounded by [`limits::MAX_BLOB_BYTES`].
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        Ok(self.read_prefixed(limits::MAX_BLOB_BYTES, "blob")?.to_vec())
    }

    /// Length-prefixed UTF-8 string, bounded by
    /// [`limits::MAX_STRING_BYTES`].
    pub fn read_str(&mut self) -> Result<String> {
        let at = self.pos;
        let raw = self.read_prefixed(limits::MAX_STRING_BYTES, "string")?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| WaxError::Encoding(format!("invalid utf-8 at offset {at}: {e}")))
    }

    /// Raw bytes, no prefix.
    pub fn read_raw(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// A u64 element count bounded by [`limits::MAX_ARRAY_LEN`].
    pub fn read_array_len(&mut self) -> Result<u64> {
        let at = self.pos;
        let n = self.read_u64()?;
        if n > limits::MAX_ARRAY_LEN {
            return Err(WaxError::Encoding(format!(
                "array count {n} exceeds cap {} at offset {at}",
                limits::MAX_ARRAY_LEN
            )));
        }
        Ok(n)
    }

    /// Errors unless every input byte was consumed.
    pub fn finish(self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(WaxError::Encoding(format!(
                "{} trailing bytes after offset {}",
                self.remaining(),
                self.pos
            )));
        }
        Ok(())
    }
}
