//! Table of contents: the catalog of live segments plus global counters.
//!
//! A fresh TOC is written on every commit and fully replaces the old
//! one; the live TOC is the one named by the last valid footer.

use crate::checksum::{Digest32, DIGEST_SIZE};
use crate::codec::{ByteReader, ByteWriter};
use crate::error::{Result, WaxError};

use super::SegmentKind;

const TOC_VERSION: u16 = 1;

/// Global monotonic counters carried by the TOC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counters {
    pub next_frame_id: u64,
    pub next_entity_row: u64,
    pub next_predicate_row: u64,
    pub next_fact_row: u64,
}

/// One segment pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TocEntry {
    pub kind: SegmentKind,
    pub generation: u64,
    pub offset: u64,
    pub len: u64,
    pub body_sha256: Digest32,
}

/// The decoded catalog.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Toc {
    pub counters: Counters,
    pub entries: Vec<TocEntry>,
}

impl Toc {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(64 + self.entries.len() * 57);
        w.put_u16(TOC_VERSION);
        w.put_u16(0);
        w.put_u64(self.counters.next_frame_id);
        w.put_u64(self.counters.next_entity_row);
        w.put_u64(self.counters.next_predicate_row);
        w.put_u64(self.counters.next_fact_row);
        w.put_u64(self.entries.len() as u64);
        for entry in &self.entries {
            w.put_u8(entry.kind as u8);
            w.put_u64(entry.generation);
            w.put_u64(entry.offset);
            w.put_u64(entry.len);
            w.put_raw(entry.body_sha256.as_bytes());
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let invalid = |e: WaxError| WaxError::InvalidToc(e.to_string());

        let mut r = ByteReader::new(bytes);
        let version = r.read_u16().map_err(invalid)?;
        if version != TOC_VERSION {
            return Err(WaxError::InvalidToc(format!(
                "unsupported toc version {version}"
            )));
        }
        let _reserved = r.read_u16().map_err(invalid)?;
        let counters = Counters {
            next_frame_id: r.read_u64().map_err(invalid)?,
            next_entity_row: r.read_u64().map_err(invalid)?,
            next_predicate_row: r.read_u64().map_err(invalid)?,
            next_fact_row: r.read_u64().map_err(invalid)?,
        };
        let count = r.read_array_len().map_err(invalid)?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let kind_byte = r.read_u8().map_err(invalid)?;
            let kind = SegmentKind::from_u8(kind_byte).ok_or_else(|| {
                WaxError::InvalidToc(format!("unknown segment kind {kind_byte}"))
            })?;
            let generation = r.read_u64().map_err(invalid)?;
            let offset = r.read_u64().map_err(invalid)?;
            let len = r.read_u64().map_err(invalid)?;
            let digest = Digest32::from_slice(r.read_raw(DIGEST_SIZE).map_err(invalid)?).unwrap();
            entries.push(TocEntry {
                kind,
                generation,
                offset,
                len,
                body_sha256: digest,
            });
        }
        r.finish().map_err(invalid)?;
        Ok(Self { counters, entries })
    }

    /// Entries of one kind, ordered by generation (oldest first).
    pub fn entries_of(&self, kind: SegmentKind) -> Vec<&TocEntry> {
        let mut out: Vec<&TocEntry> = self.entries.iter().filter(|e| e.kind == kind).collect();
        out.sort_by_key(|e| e.generation);
        out
    }

    /// Highest generation across all entries (0 when empty).
    pub fn max_generation(&self) -> u64 {
        self.entries.iter().map(|e| e.generation).max().unwrap_or(0)
    }

    /// Total bytes addressed by live entries.
    pub fn live_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.len).sum()
    }
}
