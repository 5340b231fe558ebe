//! Embedded write-ahead log.
//!
//! Records live in the fixed region `[wal_offset, wal_offset + wal_size)`
//! and are appended at `wal_write_pos`. Each record is a 64-byte header
//! followed by its body:
//!
//! ```text
//! Offset  Size  Field
//! 0       8     magic: b"MV2SWALR"
//! 8       8     seq: u64 (= prev_seq + 1)
//! 16      8     prev_seq: u64
//! 24      4     record_kind: u32
//! 28      4     body_len: u32 (<= 16 MiB)
//! 32      32    body_sha256
//! ```
//!
//! A 64-byte all-zero header is the end sentinel. Records never straddle
//! the region end: when the tail cannot hold a record, the tail is
//! zeroed and the write head wraps to the region start. Wrapping is only
//! permitted once the checkpoint has advanced past the start, i.e. there
//! are no pending bytes left to overwrite.

use crate::checksum::{sha256, Digest32};
use crate::codec::limits;
use crate::error::{Result, WaxError};
use crate::format::header::HeaderState;
use crate::format::{MAGIC_WAL_RECORD, WAL_RECORD_HEADER_SIZE};
use crate::io::StoreFile;

const ZERO_HEADER: [u8; WAL_RECORD_HEADER_SIZE] = [0u8; WAL_RECORD_HEADER_SIZE];

/// Kind value of the wrap marker: a bodyless pseudo-record telling the
/// scanner to continue at the region start. Never surfaced as a record.
const WRAP_KIND: u32 = u32::MAX;

/// Record kind discriminant, stored as u32 in the record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WalRecordKind {
    FrameWrite = 1,
    FrameTombstone = 2,
    StructuredMutation = 3,
    SecondaryIndexDirty = 4,
    CheckpointMark = 5,
}

impl WalRecordKind {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::FrameWrite),
            2 => Some(Self::FrameTombstone),
            3 => Some(Self::StructuredMutation),
            4 => Some(Self::SecondaryIndexDirty),
            5 => Some(Self::CheckpointMark),
            _ => None,
        }
    }
}

/// One scanned record with its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub seq: u64,
    pub kind: WalRecordKind,
    pub body: Vec<u8>,
}

/// Occupancy counters surfaced through `runtime_stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalStats {
    pub region_size: u64,
    pub pending_bytes: u64,
    pub appends_since_checkpoint: u64,
    pub sequence: u64,
    pub committed_sequence: u64,
}

/// Outcome of a replay scan.
#[derive(Debug)]
pub struct Replay {
    /// Records with `seq > wal_committed_seq`, in seq order. These are
    /// staged and become visible after the next successful commit.
    pub uncommitted: Vec<WalRecord>,
    /// Set when the scan stopped at a torn tail; the value is the seq of
    /// the last intact record. Everything after it was discarded.
    pub torn_after: Option<u64>,
}

#[derive(Debug)]
pub struct Wal {
    region_offset: u64,
    region_size: u64,
    write_pos: u64,
    checkpoint_pos: u64,
    sequence: u64,
    committed_sequence: u64,
    pending_bytes: u64,
    appends_since_checkpoint: u64,
    skip_sync: bool,
    read_only: bool,
}

impl Wal {
    /// Initialise an empty WAL region for a freshly created file.
    pub fn create(file: &StoreFile, region_offset: u64, region_size: u64) -> Result<Self> {
        if region_size < WAL_RECORD_HEADER_SIZE as u64 * 2 {
            return Err(WaxError::io(format!(
                "wal region of {region_size} bytes is too small"
            )));
        }
        file.write_all_at(&ZERO_HEADER, region_offset)?;
        Ok(Self {
            region_offset,
            region_size,
            write_pos: 0,
            checkpoint_pos: 0,
            sequence: 0,
            committed_sequence: 0,
            pending_bytes: 0,
            appends_since_checkpoint: 0,
            skip_sync: false,
            read_only: false,
        })
    }

    /// Recover the WAL from an existing file, scanning forward from the
    /// checkpoint position recorded in the header.
    pub fn recover(file: &StoreFile, header: &HeaderState, read_only: bool) -> Result<(Self, Replay)> {
        let mut wal = Self {
            region_offset: header.wal_offset,
            region_size: header.wal_size,
            write_pos: header.wal_checkpoint_pos % header.wal_size.max(1),
            checkpoint_pos: header.wal_checkpoint_pos % header.wal_size.max(1),
            sequence: header.wal_committed_seq,
            committed_sequence: header.wal_committed_seq,
            pending_bytes: 0,
            appends_since_checkpoint: 0,
            skip_sync: false,
            read_only,
        };
        if header.wal_size == 0 {
            return Err(WaxError::io("wal_size must be non-zero".to_string()));
        }

        let replay = wal.scan(file)?;
        if let Some(seq) = replay.torn_after {
            tracing::warn!(
                wal.torn_after = seq,
                "wal tail torn; later records discarded"
            );
            if !read_only {
                // Re-seal the log so a future scan stops at the same place.
                wal.write_sentinel(file)?;
                file.fsync()?;
            }
        }
        Ok((wal, replay))
    }

    /// Scan forward from the checkpoint, verifying hashes and the seq
    /// chain, and rebuild the in-memory head position.
    fn scan(&mut self, file: &StoreFile) -> Result<Replay> {
        let mut cursor = self.checkpoint_pos;
        let mut scanned: u64 = 0;
        let mut prev = self.committed_sequence;
        let mut uncommitted = Vec::new();
        let mut torn_after = None;

        loop {
            if scanned + WAL_RECORD_HEADER_SIZE as u64 > self.region_size {
                break;
            }
            // Records never straddle the region end.
            if self.region_size - cursor < WAL_RECORD_HEADER_SIZE as u64 {
                scanned += self.region_size - cursor;
                cursor = 0;
                continue;
            }

            let header_bytes =
                match file.read_exactly(WAL_RECORD_HEADER_SIZE, self.region_offset + cursor) {
                    Ok(bytes) => bytes,
                    Err(_) => {
                        // Truncated region (e.g. the file was cut mid-record):
                        // treat as a torn tail, not a hard failure.
                        torn_after = Some(prev);
                        break;
                    }
                };
            if header_bytes == ZERO_HEADER {
                break;
            }
            if header_bytes[0..8] != MAGIC_WAL_RECORD {
                torn_after = Some(prev);
                break;
            }
            let seq = u64::from_le_bytes(header_bytes[8..16].try_into().unwrap());
            let prev_seq = u64::from_le_bytes(header_bytes[16..24].try_into().unwrap());
            let kind_raw = u32::from_le_bytes(header_bytes[24..28].try_into().unwrap());
            let body_len = u32::from_le_bytes(header_bytes[28..32].try_into().unwrap());
            let body_sha = Digest32::from_slice(&header_bytes[32..64]).unwrap();

            if kind_raw == WRAP_KIND {
                scanned += self.region_size - cursor;
                cursor = 0;
                continue;
            }
            let kind = match WalRecordKind::from_u32(kind_raw) {
                Some(k) => k,
                None => {
                    torn_after = Some(prev);
                    break;
                }
            };
            if body_len > limits::MAX_WAL_BODY_BYTES
                || cursor + WAL_RECORD_HEADER_SIZE as u64 + body_len as u64 > self.region_size
            {
                torn_after = Some(prev);
                break;
            }
            if seq != prev + 1 || prev_seq != prev {
                torn_after = Some(prev);
                break;
            }

            let body = match file.read_exactly(
                body_len as usize,
                self.region_offset + cursor + WAL_RECORD_HEADER_SIZE as u64,
            ) {
                Ok(body) => body,
                Err(_) => {
                    torn_after = Some(prev);
                    break;
                }
            };
            if sha256(&body) != body_sha {
                torn_after = Some(prev);
                break;
            }

            let total = WAL_RECORD_HEADER_SIZE as u64 + body_len as u64;
            cursor += total;
            scanned += total;
            prev = seq;
            self.sequence = seq;
            self.write_pos = cursor % self.region_size;

            if seq > self.committed_sequence {
                self.pending_bytes += total;
                uncommitted.push(WalRecord { seq, kind, body });
            }
        }

        tracing::debug!(
            wal.sequence = self.sequence,
            wal.pending = uncommitted.len(),
            wal.torn = torn_after.is_some(),
            "wal scan complete"
        );
        Ok(Replay {
            uncommitted,
            torn_after,
        })
    }

    fn assert_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(WaxError::io(
                "wal is read-only; reopen the store with write access".to_string(),
            ));
        }
        Ok(())
    }

    /// Append one record. Returns the assigned seq. The record and the
    /// trailing sentinel are durable on return unless `skip_sync` is set.
    pub fn append(&mut self, file: &StoreFile, kind: WalRecordKind, body: &[u8]) -> Result<u64> {
        self.assert_writable()?;
        if body.len() as u64 > limits::MAX_WAL_BODY_BYTES as u64 {
            return Err(WaxError::Encoding(format!(
                "wal body of {} bytes exceeds cap {}",
                body.len(),
                limits::MAX_WAL_BODY_BYTES
            )));
        }
        let record_size = WAL_RECORD_HEADER_SIZE as u64 + body.len() as u64;
        // Leave room for the end sentinel so the scan always terminates.
        let budget = record_size + WAL_RECORD_HEADER_SIZE as u64;
        if budget > self.region_size {
            return Err(WaxError::io(format!(
                "wal region of {} bytes too small for record of {record_size} bytes",
                self.region_size
            )));
        }
        if self.pending_bytes + budget > self.region_size {
            return Err(WaxError::io(format!(
                "wal region full: {} pending of {} bytes; flush required",
                self.pending_bytes, self.region_size
            )));
        }

        if self.write_pos + record_size > self.region_size {
            if self.pending_bytes > 0 {
                // Wrapping would overwrite records not yet promoted by a
                // commit.
                return Err(WaxError::io(format!(
                    "wal region full at wrap: {} pending bytes",
                    self.pending_bytes
                )));
            }
            let tail = self.region_size - self.write_pos;
            if tail >= WAL_RECORD_HEADER_SIZE as u64 {
                // A wrap marker routes the scanner back to offset 0; a
                // shorter tail is skipped by the scanner on its own.
                let mut marker = [0u8; WAL_RECORD_HEADER_SIZE];
                marker[0..8].copy_from_slice(&MAGIC_WAL_RECORD);
                marker[24..28].copy_from_slice(&WRAP_KIND.to_le_bytes());
                file.write_all_at(&marker, self.region_offset + self.write_pos)?;
            }
            self.write_pos = 0;
        }

        let seq = self.sequence + 1;
        let mut buf = Vec::with_capacity(record_size as usize);
        buf.extend_from_slice(&MAGIC_WAL_RECORD);
        buf.extend_from_slice(&seq.to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&(kind as u32).to_le_bytes());
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(sha256(body).as_bytes());
        buf.extend_from_slice(body);

        tracing::debug!(
            wal.write_pos = self.write_pos,
            wal.seq = seq,
            wal.body_len = body.len(),
            "wal append"
        );
        file.write_all_at(&buf, self.region_offset + self.write_pos)?;

        self.write_pos += record_size;
        self.sequence = seq;
        self.pending_bytes += record_size;
        self.appends_since_checkpoint += 1;

        self.write_sentinel(file)?;
        if !self.skip_sync {
            file.fsync()?;
        }
        Ok(seq)
    }

    /// Write the end sentinel at the current head.
    fn write_sentinel(&mut self, file: &StoreFile) -> Result<()> {
        let mut pos = self.write_pos % self.region_size;
        if self.region_size - pos < WAL_RECORD_HEADER_SIZE as u64 {
            let tail = (self.region_size - pos) as usize;
            if tail > 0 {
                file.write_all_at(&vec![0u8; tail], self.region_offset + pos)?;
            }
            pos = 0;
        }
        file.write_all_at(&ZERO_HEADER, self.region_offset + pos)?;
        Ok(())
    }

    /// Defer per-append fsync to an explicit [`flush`](Self::flush).
    pub fn set_skip_sync(&mut self, skip: bool) {
        self.skip_sync = skip;
    }

    /// Force durability of everything appended so far.
    pub fn flush(&self, file: &StoreFile) -> Result<()> {
        file.fsync()
    }

    /// Advance the checkpoint to the current head: everything appended
    /// so far is reflected in the live TOC.
    pub fn record_checkpoint(&mut self) {
        self.checkpoint_pos = self.write_pos % self.region_size;
        self.committed_sequence = self.sequence;
        self.pending_bytes = 0;
        self.appends_since_checkpoint = 0;
    }

    /// Fold the WAL position fields into a header about to be staged.
    pub fn fill_header(&self, header: &mut HeaderState) {
        header.wal_offset = self.region_offset;
        header.wal_size = self.region_size;
        header.wal_write_pos = self.write_pos;
        header.wal_checkpoint_pos = self.checkpoint_pos;
        header.wal_committed_seq = self.committed_sequence;
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn committed_sequence(&self) -> u64 {
        self.committed_sequence
    }

    pub fn stats(&self) -> WalStats {
        WalStats {
            region_size: self.region_size,
            pending_bytes: self.pending_bytes,
            appends_since_checkpoint: self.appends_since_checkpoint,
            sequence: self.sequence,
            committed_sequence: self.committed_sequence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Digest32;
    use crate::format::WAL_REGION_OFFSET;
    use crate::io::LockMode;
    use tempfile::TempDir;

    fn header_for(size: u64) -> HeaderState {
        HeaderState {
            file_generation: 1,
            footer_offset: 0,
            wal_offset: WAL_REGION_OFFSET,
            wal_size: size,
            wal_write_pos: 0,
            wal_checkpoint_pos: 0,
            wal_committed_seq: 0,
            toc_checksum: Digest32::ZERO,
        }
    }

    fn prepare(size: u64) -> (TempDir, StoreFile, Wal) {
        let dir = TempDir::new().unwrap();
        let file = StoreFile::open(&dir.path().join("w.mv2s"), LockMode::Exclusive, true).unwrap();
        file.set_len(WAL_REGION_OFFSET + size).unwrap();
        let wal = Wal::create(&file, WAL_REGION_OFFSET, size).unwrap();
        (dir, file, wal)
    }

    #[test]
    fn test_append_and_recover() {
        let (_dir, file, mut wal) = prepare(4096);
        wal.append(&file, WalRecordKind::FrameWrite, b"first").unwrap();
        wal.append(&file, WalRecordKind::FrameWrite, b"second").unwrap();

        let (recovered, replay) = Wal::recover(&file, &header_for(4096), false).unwrap();
        assert_eq!(recovered.sequence(), 2);
        assert!(replay.torn_after.is_none());
        assert_eq!(replay.uncommitted.len(), 2);
        assert_eq!(replay.uncommitted[0].seq, 1);
        assert_eq!(replay.uncommitted[0].body, b"first");
        assert_eq!(replay.uncommitted[1].seq, 2);
        assert_eq!(replay.uncommitted[1].body, b"second");
    }

    #[test]
    fn test_committed_records_skipped_on_replay() {
        let (_dir, file, mut wal) = prepare(4096);
        wal.append(&file, WalRecordKind::FrameWrite, b"committed").unwrap();
        wal.append(&file, WalRecordKind::FrameWrite, b"pending").unwrap();

        // Header says seq 1 is already reflected in the TOC.
        let mut header = header_for(4096);
        header.wal_committed_seq = 1;
        let (recovered, replay) = Wal::recover(&file, &header, false).unwrap();
        assert_eq!(recovered.sequence(), 2);
        assert_eq!(replay.uncommitted.len(), 1);
        assert_eq!(replay.uncommitted[0].seq, 2);
    }

    #[test]
    fn test_torn_body_discards_tail() {
        let (_dir, file, mut wal) = prepare(4096);
        wal.append(&file, WalRecordKind::FrameWrite, b"aaaa").unwrap();
        let pos_before_b = wal.write_pos;
        wal.append(&file, WalRecordKind::FrameWrite, b"bbbbbbbb").unwrap();

        // Corrupt the middle of record 2's body.
        let body_mid = WAL_REGION_OFFSET + pos_before_b + WAL_RECORD_HEADER_SIZE as u64 + 3;
        file.write_all_at(b"\xFF", body_mid).unwrap();

        let (recovered, replay) = Wal::recover(&file, &header_for(4096), false).unwrap();
        assert_eq!(replay.torn_after, Some(1));
        assert_eq!(replay.uncommitted.len(), 1);
        assert_eq!(replay.uncommitted[0].body, b"aaaa");
        assert_eq!(recovered.sequence(), 1);
    }

    #[test]
    fn test_recovery_reseals_torn_tail() {
        let (_dir, file, mut wal) = prepare(4096);
        wal.append(&file, WalRecordKind::FrameWrite, b"keep").unwrap();
        let pos = wal.write_pos;
        wal.append(&file, WalRecordKind::FrameWrite, b"torn").unwrap();
        file.write_all_at(b"\x00", WAL_REGION_OFFSET + pos + 40).unwrap();

        let (_, first) = Wal::recover(&file, &header_for(4096), false).unwrap();
        assert_eq!(first.torn_after, Some(1));

        // After the first recovery the tail is sealed: a second scan is
        // clean and sees the same surviving records.
        let (_, second) = Wal::recover(&file, &header_for(4096), false).unwrap();
        assert!(second.torn_after.is_none());
        assert_eq!(second.uncommitted.len(), 1);
    }

    #[test]
    fn test_checkpoint_clears_pending() {
        let (_dir, file, mut wal) = prepare(4096);
        wal.append(&file, WalRecordKind::FrameWrite, b"x").unwrap();
        assert!(wal.stats().pending_bytes > 0);

        wal.record_checkpoint();
        let stats = wal.stats();
        assert_eq!(stats.pending_bytes, 0);
        assert_eq!(stats.committed_sequence, 1);

        // Replay from the advanced checkpoint sees nothing pending.
        let mut header = header_for(4096);
        wal.fill_header(&mut header);
        let (_, replay) = Wal::recover(&file, &header, false).unwrap();
        assert!(replay.uncommitted.is_empty());
    }

    #[test]
    fn test_wrap_after_checkpoint() {
        let region = (WAL_RECORD_HEADER_SIZE as u64) * 4 + 64;
        let (_dir, file, mut wal) = prepare(region);

        wal.append(&file, WalRecordKind::FrameWrite, &[0xAA; 32]).unwrap();
        wal.append(&file, WalRecordKind::FrameWrite, &[0xBB; 32]).unwrap();
        wal.record_checkpoint();

        // The next record does not fit in the tail; with nothing pending
        // the head wraps to the region start behind a wrap marker.
        wal.append(&file, WalRecordKind::FrameWrite, &[0xCC; 100]).unwrap();
        assert_eq!(wal.sequence(), 3);
        assert!(wal.write_pos < wal.checkpoint_pos, "head must have wrapped");

        let mut header = header_for(region);
        header.wal_committed_seq = 2;
        header.wal_checkpoint_pos = wal.checkpoint_pos;
        let (_, replay) = Wal::recover(&file, &header, false).unwrap();
        assert_eq!(replay.uncommitted.len(), 1);
        assert_eq!(replay.uncommitted[0].body, vec![0xCC; 100]);
    }

    #[test]
    fn test_wrap_with_pending_is_full() {
        let region = (WAL_RECORD_HEADER_SIZE as u64) * 4 + 64;
        let (_dir, file, mut wal) = prepare(region);

        wal.append(&file, WalRecordKind::FrameWrite, &[0xAA; 32]).unwrap();
        wal.append(&file, WalRecordKind::FrameWrite, &[0xBB; 32]).unwrap();
        let err = wal.append(&file, WalRecordKind::FrameWrite, &[0xCC; 32]).unwrap_err();
        assert!(err.to_string().contains("full"));
    }

    #[test]
    fn test_oversized_body_rejected() {
        let (_dir, file, mut wal) = prepare(4096);
        let body = vec![0u8; limits::MAX_WAL_BODY_BYTES as usize + 1];
        let err = wal.append(&file, WalRecordKind::FrameWrite, &body).unwrap_err();
        assert!(matches!(err, WaxError::Encoding(_)));
    }

    #[test]
    fn test_skip_sync_batches() {
        let (_dir, file, mut wal) = prepare(8192);
        wal.set_skip_sync(true);
        for i in 0..10u8 {
            wal.append(&file, WalRecordKind::FrameWrite, &[i]).unwrap();
        }
        wal.flush(&file).unwrap();

        let (_, replay) = Wal::recover(&file, &header_for(8192), false).unwrap();
        assert_eq!(replay.uncommitted.len(), 10);
    }
}
