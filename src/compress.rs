//! Frame payload compression.
//!
//! Closed set of algorithms selected per frame. Encoders are deterministic:
//! single-buffer, no tuning knobs exposed. Decoding requires the caller to
//! supply the expected uncompressed length and fails on any size mismatch.

use std::io::{Read, Write};

use crate::error::{Result, WaxError};

/// Compression algorithm, stored as a single byte in frame records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Compression {
    None = 0,
    Lzfse = 1,
    Lz4 = 2,
    Deflate = 3,
}

impl Compression {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::Lzfse),
            2 => Some(Self::Lz4),
            3 => Some(Self::Deflate),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lzfse => "lzfse",
            Self::Lz4 => "lz4",
            Self::Deflate => "deflate",
        }
    }
}

/// Output cap for an encode of `input_len` bytes:
/// `max(input + 128, input * 4)`, saturating.
pub fn output_cap(input_len: usize) -> usize {
    let padded = input_len.saturating_add(128);
    let scaled = input_len.saturating_mul(4);
    padded.max(scaled)
}

/// Compress `input` with `algo`. The result must fit within
/// [`output_cap`]; otherwise the encode fails.
pub fn compress(input: &[u8], algo: Compression) -> Result<Vec<u8>> {
    let cap = output_cap(input.len());
    let out = match algo {
        Compression::None => input.to_vec(),
        Compression::Lzfse => {
            let mut dst = Vec::with_capacity(input.len() / 2 + 64);
            lzfse_rust::LzfseEncoder::default()
                .encode_bytes(input, &mut dst)
                .map_err(|e| WaxError::io(format!("compression failed: lzfse: {e}")))?;
            dst
        }
        Compression::Lz4 => lz4_flex::block::compress(input),
        Compression::Deflate => {
            let mut encoder =
                flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(input)
                .and_then(|_| encoder.finish())
                .map_err(|e| WaxError::io(format!("compression failed: deflate: {e}")))?
        }
    };
    if out.len() > cap {
        return Err(WaxError::io(format!(
            "compression failed: output did not fit within cap {cap} bytes"
        )));
    }
    Ok(out)
}

/// Decompress `input` with `algo`. `uncompressed_len` is the expected size;
/// any mismatch is an error.
pub fn decompress(input: &[u8], algo: Compression, uncompressed_len: u64) -> Result<Vec<u8>> {
    let expected = usize::try_from(uncompressed_len)
        .map_err(|_| WaxError::Encoding("uncompressed length exceeds platform size".into()))?;
    let out = match algo {
        Compression::None => input.to_vec(),
        Compression::Lzfse => {
            let mut dst = Vec::with_capacity(expected);
            lzfse_rust::LzfseDecoder::default()
                .decode_bytes(input, &mut dst)
                .map_err(|e| WaxError::io(format!("decompression failed: lzfse: {e}")))?;
            dst
        }
        Compression::Lz4 => lz4_flex::block::decompress(input, expected)
            .map_err(|e| WaxError::io(format!("decompression failed: lz4: {e}")))?,
        Compression::Deflate => {
            let mut decoder = flate2::read::ZlibDecoder::new(input);
            let mut dst = Vec::with_capacity(expected);
            decoder
                .read_to_end(&mut dst)
                .map_err(|e| WaxError::io(format!("decompression failed: deflate: {e}")))?;
            dst
        }
    };
    if out.len() != expected {
        return Err(WaxError::io(format!(
            "decompression failed: expected {expected} bytes, produced {}",
            out.len()
        )));
    }
    Ok(out)
}
