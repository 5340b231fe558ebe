//! MV2S v1 on-disk format: constants, segment framing, header pages,
//! footers, and the TOC.
//!
//! File layout (little-endian throughout):
//!
//! ```text
//! 0x0000  page A   4096 B   magic "MV2S" + body + self-SHA256
//! 0x1000  page B   4096 B   independent checksum
//! 0x2000  WAL region        wal_size bytes
//! wal_end segments          frame pages, text/vector/structured segments
//! ...     TOC body + 32-byte trailing SHA-256
//! ...     footer   64 B     magic "MV2SFOOT" + fields
//! (repeat [segments | toc | footer] per commit)
//! ```

pub mod footer;
pub mod header;
pub mod toc;

use crate::checksum::{sha256, Digest32, DIGEST_SIZE};
use crate::codec::{ByteReader, ByteWriter};
use crate::error::{Result, WaxError};

// ── Magic constants ────────────────────────────────────────────────

pub const MAGIC_HEADER: [u8; 4] = *b"MV2S";
pub const MAGIC_FOOTER: [u8; 8] = *b"MV2SFOOT";
pub const MAGIC_WAL_RECORD: [u8; 8] = *b"MV2SWALR";
pub const MAGIC_FRAME_SEGMENT: [u8; 4] = *b"MV2F";
pub const MAGIC_TEXT_SEGMENT: [u8; 4] = *b"MV2T";
pub const MAGIC_VEC_SEGMENT: [u8; 4] = *b"MV2V";
pub const MAGIC_STRUCTURED_SEGMENT: [u8; 4] = *b"MV2X";

/// `(major << 8) | minor` — 1.0.
pub const SPEC_VERSION: u16 = 0x0100;

// ── Fixed layout ───────────────────────────────────────────────────

pub const HEADER_PAGE_SIZE: usize = 4096;
pub const HEADER_PAGE_A_OFFSET: u64 = 0;
pub const HEADER_PAGE_B_OFFSET: u64 = 4096;
pub const WAL_REGION_OFFSET: u64 = 0x2000;
pub const DEFAULT_WAL_SIZE: u64 = 256 * 1024 * 1024;
pub const FOOTER_SIZE: usize = 64;
pub const WAL_RECORD_HEADER_SIZE: usize = 64;
/// Generic segment header: magic(4) + version(2) + reserved(2) + body_len(8).
pub const SEGMENT_HEADER_SIZE: usize = 16;
pub const SEGMENT_VERSION: u16 = 1;

// ── Segment kinds ──────────────────────────────────────────────────

/// Kind of a TOC-addressed segment (stored as u8 in TOC entries).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SegmentKind {
    FramePage = 0,
    TextIndex = 1,
    VecIndex = 2,
    StructuredSnapshot = 3,
}

impl SegmentKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::FramePage),
            1 => Some(Self::TextIndex),
            2 => Some(Self::VecIndex),
            3 => Some(Self::StructuredSnapshot),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::FramePage => "frame_page",
            Self::TextIndex => "text_index_v1",
            Self::VecIndex => "vec_index_v1",
            Self::StructuredSnapshot => "structured_snapshot_v1",
        }
    }

    /// Magic for segments using the generic 16-byte framing. Vector
    /// segments carry their own 36-byte header (see `index::vector`).
    pub fn magic(self) -> [u8; 4] {
        match self {
            Self::FramePage => MAGIC_FRAME_SEGMENT,
            Self::TextIndex => MAGIC_TEXT_SEGMENT,
            Self::VecIndex => MAGIC_VEC_SEGMENT,
            Self::StructuredSnapshot => MAGIC_STRUCTURED_SEGMENT,
        }
    }
}

// ── Generic slab framing ───────────────────────────────────────────

/// Frame a segment body into a self-described slab:
/// `[magic 4][version 2][reserved 2][body_len 8][body][sha256 32]`.
///
/// The trailing digest covers header and body; the same digest is stored
/// in the TOC entry.
pub fn frame_slab(kind: SegmentKind, body: &[u8]) -> (Vec<u8>, Digest32) {
    let mut w = ByteWriter::with_capacity(SEGMENT_HEADER_SIZE + body.len() + DIGEST_SIZE);
    w.put_raw(&kind.magic());
    w.put_u16(SEGMENT_VERSION);
    w.put_u16(0);
    w.put_u64(body.len() as u64);
    w.put_raw(body);
    let digest = sha256(w.as_slice());
    w.put_raw(digest.as_bytes());
    (w.into_bytes(), digest)
}

/// Verify a generic slab and return its body bytes.
///
/// `slab` must be the full TOC-addressed byte range (header + body +
/// trailing digest).
pub fn read_slab(kind: SegmentKind, slab: &[u8]) -> Result<Vec<u8>> {
    let invalid = |reason: String| WaxError::InvalidSegment {
        kind: kind.name(),
        reason,
    };

    if slab.len() < SEGMENT_HEADER_SIZE + DIGEST_SIZE {
        return Err(invalid(format!("slab too small: {} bytes", slab.len())));
    }
    let hashed_end = slab.len() - DIGEST_SIZE;
    let stored = Digest32::from_slice(&slab[hashed_end..]).unwrap();
    let actual = sha256(&slab[..hashed_end]);
    if stored != actual {
        return Err(invalid(format!(
            "body checksum mismatch: stored {stored}, actual {actual}"
        )));
    }

    let mut r = ByteReader::new(&slab[..hashed_end]);
    let magic = r.read_raw(4)?;
    if magic != kind.magic() {
        return Err(invalid(format!("bad magic {magic:02x?}")));
    }
    let version = r.read_u16()?;
    if version != SEGMENT_VERSION {
        return Err(invalid(format!("unsupported version {version}")));
    }
    let _reserved = r.read_u16()?;
    let body_len = r.read_u64()? as usize;
    if body_len != hashed_end - SEGMENT_HEADER_SIZE {
        return Err(invalid(format!(
            "body length {body_len} disagrees with slab of {} bytes",
            slab.len()
        )));
    }
    Ok(slab[SEGMENT_HEADER_SIZE..hashed_end].to_vec())
}
