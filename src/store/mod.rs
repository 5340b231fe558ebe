//! The single-file persistent store: open/recovery, the atomic commit
//! protocol, and the immutable snapshot published to readers.
//!
//! Commit protocol (one fsync for data, one for the header pages):
//! 1. write new segment slabs past the live region;
//! 2. append the new TOC (body + trailing SHA-256);
//! 3. append a footer naming the TOC, carrying the committed WAL seq;
//! 4. fsync;
//! 5. rewrite both header pages with the new footer offset, TOC
//!    checksum, bumped file generation, and the advanced WAL
//!    checkpoint;
//! 6. fsync.

pub mod compact;
pub mod frames;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::checksum::{sha256, Digest32, DIGEST_SIZE};
use crate::compress::{self, Compression};
use crate::error::{Result, WaxError};
use crate::format::footer::{self, Footer};
use crate::format::header::{self, HeaderState};
use crate::format::toc::{Counters, Toc, TocEntry};
use crate::format::{
    frame_slab, read_slab, SegmentKind, FOOTER_SIZE, SEGMENT_HEADER_SIZE, WAL_REGION_OFFSET,
};
use crate::index::text::TextIndex;
use crate::index::vector::VectorIndex;
use crate::io::{LockMode, StoreFile};
use crate::options::StoreOptions;
use crate::structured::store::{FactRemove, FactUpsert, StructuredMutation};
use crate::structured::{StructuredStore, StructuredTables};
use crate::wal::{Wal, WalRecordKind, WalStats};

use frames::{FrameKind, FrameRecord, Metadata};

// ── Snapshot ───────────────────────────────────────────────────────

/// Everything a reader needs to know about one committed frame; the
/// payload stays on disk and is read lazily.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMeta {
    pub frame_id: u64,
    pub kind: FrameKind,
    pub created_at_ms: i64,
    pub compression: Compression,
    pub uncompressed_len: u64,
    pub payload_sha256: Digest32,
    pub tombstone_target: Option<u64>,
    pub metadata: Metadata,
    pub embedding_dim: u32,
    pub payload_offset: u64,
    pub payload_len: u64,
}

/// Immutable view of one committed generation, shared with readers via
/// `Arc` and replaced wholesale by the committing writer.
#[derive(Debug)]
pub struct Snapshot {
    pub file_generation: u64,
    pub committed_seq: u64,
    pub toc: Toc,
    pub frames: BTreeMap<u64, FrameMeta>,
    pub dead: HashSet<u64>,
    pub by_payload_digest: HashMap<[u8; DIGEST_SIZE], u64>,
    pub text: TextIndex,
    pub vectors: VectorIndex,
    pub structured: Arc<StructuredTables>,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            file_generation: 0,
            committed_seq: 0,
            toc: Toc::default(),
            frames: BTreeMap::new(),
            dead: HashSet::new(),
            by_payload_digest: HashMap::new(),
            text: TextIndex::new(),
            vectors: VectorIndex::default(),
            structured: Arc::new(StructuredTables::default()),
        }
    }

    /// Whether a frame is readable: present, content-bearing, and not
    /// tombstoned.
    pub fn is_alive(&self, frame_id: u64) -> bool {
        match self.frames.get(&frame_id) {
            Some(meta) => meta.kind != FrameKind::Tombstone && !self.dead.contains(&frame_id),
            None => false,
        }
    }

    pub fn live_frame_count(&self) -> u64 {
        self.frames
            .values()
            .filter(|m| m.kind != FrameKind::Tombstone && !self.dead.contains(&m.frame_id))
            .count() as u64
    }

    pub fn tombstone_count(&self) -> u64 {
        self.frames
            .values()
            .filter(|m| m.kind == FrameKind::Tombstone)
            .count() as u64
    }
}

// ── Staged state ───────────────────────────────────────────────────

#[derive(Debug)]
struct StagedFrame {
    record: FrameRecord,
    index_text: Option<String>,
}

/// Input to [`Store::append_frame`].
#[derive(Debug, Clone)]
pub struct AppendFrame {
    pub kind: FrameKind,
    pub payload: Vec<u8>,
    pub metadata: Metadata,
    /// Final vector, already normalised if the provider requires it.
    pub embedding: Option<Vec<f32>>,
    pub created_at_ms: i64,
    /// Text to feed the inverted index, when the payload is textual.
    pub index_text: Option<String>,
}

/// Counters surfaced by `runtime_stats`.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub frame_count: u64,
    pub tombstone_count: u64,
    pub file_generation: u64,
    pub wal_committed_seq: u64,
    pub wal_sequence: u64,
    pub wal_pending_bytes: u64,
    pub wal_region_size: u64,
    pub segment_count: usize,
    pub file_len: u64,
    pub live_segment_bytes: u64,
    pub stale_bytes: u64,
    pub fragmentation: f64,
    pub text_doc_count: usize,
    pub vector_count: usize,
    pub entity_count: usize,
    pub fact_count: usize,
    pub staged_frames: usize,
}

// ── Store ──────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Store {
    file: StoreFile,
    path: PathBuf,
    opts: StoreOptions,
    header: HeaderState,
    page_generation: u64,
    wal: Wal,
    snapshot: Arc<Snapshot>,
    staged: Vec<StagedFrame>,
    structured: StructuredStore,
    next_frame_id: u64,
    segments_end: u64,
}

impl Store {
    /// Open a store, creating the file when it does not exist yet (and
    /// the options allow writing).
    pub fn open(path: &Path, opts: StoreOptions) -> Result<Self> {
        let mode = if opts.read_only {
            LockMode::Shared
        } else {
            LockMode::Exclusive
        };
        let create = !opts.read_only;
        let file = StoreFile::open(path, mode, create)?;
        if file.len()? == 0 {
            if opts.read_only {
                return Err(WaxError::io(format!(
                    "cannot open empty file read-only: {}",
                    path.display()
                )));
            }
            return Self::create(file, path, opts);
        }
        Self::recover(file, path, opts)
    }

    fn create(file: StoreFile, path: &Path, opts: StoreOptions) -> Result<Self> {
        let wal_end = WAL_REGION_OFFSET + opts.wal_size;
        file.set_len(wal_end)?;
        let wal = Wal::create(&file, WAL_REGION_OFFSET, opts.wal_size)?;

        let header = HeaderState {
            file_generation: 0,
            footer_offset: 0,
            wal_offset: WAL_REGION_OFFSET,
            wal_size: opts.wal_size,
            wal_write_pos: 0,
            wal_checkpoint_pos: 0,
            wal_committed_seq: 0,
            toc_checksum: Digest32::ZERO,
        };

        let mut store = Self {
            file,
            path: path.to_path_buf(),
            opts,
            header,
            page_generation: 0,
            wal,
            snapshot: Arc::new(Snapshot::empty()),
            staged: Vec::new(),
            structured: StructuredStore::default(),
            next_frame_id: 1,
            segments_end: wal_end,
        };
        // The initial commit gives the file a valid TOC, footer, and
        // header pair at generation 1.
        store.commit_inner(true)?;
        tracing::info!(path = %path.display(), "created new store");
        Ok(store)
    }

    fn recover(file: StoreFile, path: &Path, opts: StoreOptions) -> Result<Self> {
        // Header pages first; the footer scanner is the fallback when
        // both pages are damaged.
        let (mut header, page_generation, toc_body, footer_offset) =
            match header::read_selected(&file) {
                Ok((state, page_gen)) => {
                    let (valid, toc_body) = footer::read_at(&file, state.footer_offset)?;
                    (state, page_gen, toc_body, valid.footer_offset)
                }
                Err(WaxError::CorruptedHeader(which)) => {
                    tracing::warn!(
                        pages = %which,
                        "header pages damaged; falling back to footer scan"
                    );
                    let (valid, toc_body) = footer::scan_back(&file)?;
                    let toc = Toc::decode(&toc_body)?;
                    let wal_end = toc
                        .entries
                        .iter()
                        .map(|e| e.offset)
                        .min()
                        .unwrap_or(valid.toc_offset);
                    let state = HeaderState {
                        file_generation: valid.footer.generation,
                        footer_offset: valid.footer_offset,
                        wal_offset: WAL_REGION_OFFSET,
                        wal_size: wal_end - WAL_REGION_OFFSET,
                        wal_write_pos: 0,
                        wal_checkpoint_pos: 0,
                        wal_committed_seq: valid.footer.wal_committed_seq,
                        toc_checksum: valid.footer.toc_sha256,
                    };
                    (state, 0, toc_body, valid.footer_offset)
                }
                Err(other) => return Err(other),
            };
        let toc = Toc::decode(&toc_body)?;
        header.footer_offset = footer_offset;

        let snapshot = Self::load_snapshot(&file, &header, toc)?;
        let structured = StructuredStore::new((*snapshot.structured).clone());
        let next_frame_id = snapshot.toc.counters.next_frame_id.max(1);

        let (wal, replay) = Wal::recover(&file, &header, opts.read_only)?;
        let segments_end = (WAL_REGION_OFFSET + header.wal_size).max(file.len()?);

        let mut store = Self {
            file,
            path: path.to_path_buf(),
            opts,
            header,
            page_generation,
            wal,
            snapshot,
            staged: Vec::new(),
            structured,
            next_frame_id,
            segments_end,
        };

        // Stage every intact uncommitted record; they become visible at
        // the next successful commit.
        for record in replay.uncommitted {
            store.stage_replayed(record)?;
        }
        tracing::info!(
            path = %path.display(),
            generation = store.header.file_generation,
            staged = store.staged.len(),
            "store opened"
        );
        Ok(store)
    }

    fn load_snapshot(file: &StoreFile, header: &HeaderState, toc: Toc) -> Result<Arc<Snapshot>> {
        let mut frames = BTreeMap::new();
        let mut dead = HashSet::new();
        let mut by_payload_digest = HashMap::new();
        let mut text = TextIndex::new();
        let mut vectors = VectorIndex::default();
        let mut structured = StructuredTables::default();

        for entry in toc.entries_of(SegmentKind::FramePage) {
            let slab = Self::read_entry_slab(file, entry)?;
            let body = read_slab(SegmentKind::FramePage, &slab)?;
            for (record, span) in frames::decode_frame_page(&body)? {
                let payload_offset = entry.offset + SEGMENT_HEADER_SIZE as u64 + span.offset as u64;
                if let Some(target) = record.tombstone_target {
                    dead.insert(target);
                }
                let embedding_dim = record.embedding_dim();
                let meta = FrameMeta {
                    frame_id: record.frame_id,
                    kind: record.kind,
                    created_at_ms: record.created_at_ms,
                    compression: record.compression,
                    uncompressed_len: record.uncompressed_len,
                    payload_sha256: record.payload_sha256,
                    tombstone_target: record.tombstone_target,
                    metadata: record.metadata,
                    embedding_dim,
                    payload_offset,
                    payload_len: span.len as u64,
                };
                if meta.kind != FrameKind::Tombstone {
                    by_payload_digest
                        .insert(*meta.payload_sha256.as_bytes(), meta.frame_id);
                }
                frames.insert(meta.frame_id, meta);
            }
        }

        for entry in toc.entries_of(SegmentKind::TextIndex) {
            let slab = Self::read_entry_slab(file, entry)?;
            let body = read_slab(SegmentKind::TextIndex, &slab)?;
            let delta = TextIndex::decode_body(&body).map_err(|e| WaxError::InvalidSegment {
                kind: SegmentKind::TextIndex.name(),
                reason: e.to_string(),
            })?;
            text.merge(&delta);
        }

        for entry in toc.entries_of(SegmentKind::VecIndex) {
            let slab = Self::read_entry_slab(file, entry)?;
            let delta = VectorIndex::decode_slab(&slab)?;
            vectors.merge(&delta)?;
        }

        if let Some(entry) = toc.entries_of(SegmentKind::StructuredSnapshot).last() {
            let slab = Self::read_entry_slab(file, entry)?;
            let body = read_slab(SegmentKind::StructuredSnapshot, &slab)?;
            structured =
                StructuredTables::decode_body(&body).map_err(|e| WaxError::InvalidSegment {
                    kind: SegmentKind::StructuredSnapshot.name(),
                    reason: e.to_string(),
                })?;
        }

        Ok(Arc::new(Snapshot {
            file_generation: header.file_generation,
            committed_seq: header.wal_committed_seq,
            toc,
            frames,
            dead,
            by_payload_digest,
            text,
            vectors,
            structured: Arc::new(structured),
        }))
    }

    /// Read one TOC-addressed slab and check it against the digest the
    /// TOC recorded for it.
    fn read_entry_slab(file: &StoreFile, entry: &TocEntry) -> Result<Vec<u8>> {
        let slab = file.read_exactly(entry.len as usize, entry.offset)?;
        if slab.len() >= DIGEST_SIZE {
            let trailing = &slab[slab.len() - DIGEST_SIZE..];
            if trailing != entry.body_sha256.as_bytes() {
                return Err(WaxError::InvalidSegment {
                    kind: entry.kind.name(),
                    reason: format!(
                        "segment digest at offset {} disagrees with toc entry",
                        entry.offset
                    ),
                });
            }
        }
        Ok(slab)
    }

    fn stage_replayed(&mut self, record: crate::wal::WalRecord) -> Result<()> {
        match record.kind {
            WalRecordKind::FrameWrite | WalRecordKind::FrameTombstone => {
                let mut r = crate::codec::ByteReader::new(&record.body);
                let (frame, _) = FrameRecord::decode(&mut r)?;
                r.finish()?;
                let index_text = match frame.kind {
                    FrameKind::Text | FrameKind::ImageText => compress::decompress(
                        &frame.payload,
                        frame.compression,
                        frame.uncompressed_len,
                    )
                    .ok()
                    .and_then(|bytes| String::from_utf8(bytes).ok()),
                    _ => None,
                };
                self.next_frame_id = self.next_frame_id.max(frame.frame_id + 1);
                self.staged.push(StagedFrame {
                    record: frame,
                    index_text,
                });
            }
            WalRecordKind::StructuredMutation => {
                let mutation = StructuredMutation::decode(&record.body)?;
                self.structured.stage_replayed(mutation)?;
            }
            // Index-dirty markers are re-derived from the frame writes
            // themselves; checkpoint marks only matter to the scanner.
            WalRecordKind::SecondaryIndexDirty | WalRecordKind::CheckpointMark => {}
        }
        Ok(())
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &StoreOptions {
        &self.opts
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot)
    }

    pub fn structured(&self) -> &StructuredStore {
        &self.structured
    }

    pub fn wal_stats(&self) -> WalStats {
        self.wal.stats()
    }

    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    pub fn has_staged(&self) -> bool {
        !self.staged.is_empty() || self.structured.has_pending()
    }

    fn assert_writable(&self) -> Result<()> {
        if self.opts.read_only {
            return Err(WaxError::io(
                "store is read-only; reopen with write access".to_string(),
            ));
        }
        Ok(())
    }

    // ── Mutations ──────────────────────────────────────────────────

    /// Append one frame: WAL first, then the staging view. The frame id
    /// is assigned here and is dense across commits.
    pub fn append_frame(&mut self, input: AppendFrame) -> Result<u64> {
        self.assert_writable()?;

        let compression = if input.payload.len() >= self.opts.compression_threshold {
            self.opts.compression
        } else {
            Compression::None
        };
        let payload_sha256 = sha256(&input.payload);
        let uncompressed_len = input.payload.len() as u64;
        let compressed = compress::compress(&input.payload, compression)?;

        let frame_id = self.next_frame_id;
        let record = FrameRecord {
            frame_id,
            kind: input.kind,
            created_at_ms: input.created_at_ms,
            compression,
            uncompressed_len,
            payload_sha256,
            tombstone_target: None,
            metadata: input.metadata,
            embedding: input.embedding,
            payload: compressed,
        };

        self.wal
            .append(&self.file, WalRecordKind::FrameWrite, &record.encode()?)?;
        if !self.opts.auto_flush && (input.index_text.is_some() || record.embedding.is_some()) {
            let mut w = crate::codec::ByteWriter::new();
            w.put_u64(frame_id);
            let mut lanes = 0u8;
            if input.index_text.is_some() {
                lanes |= 1;
            }
            if record.embedding.is_some() {
                lanes |= 2;
            }
            w.put_u8(lanes);
            self.wal
                .append(&self.file, WalRecordKind::SecondaryIndexDirty, w.as_slice())?;
        }

        self.next_frame_id += 1;
        self.staged.push(StagedFrame {
            record,
            index_text: input.index_text,
        });
        Ok(frame_id)
    }

    /// Look up a live frame with an identical payload digest.
    pub fn find_by_payload(&self, digest: &Digest32) -> Option<u64> {
        // Staged frames first: a batch may dedup against itself.
        if let Some(staged) = self.staged.iter().find(|s| {
            s.record.kind != FrameKind::Tombstone && s.record.payload_sha256 == *digest
        }) {
            return Some(staged.record.frame_id);
        }
        let id = self.snapshot.by_payload_digest.get(digest.as_bytes())?;
        self.snapshot.is_alive(*id).then_some(*id)
    }

    /// Stage a tombstone for an earlier frame.
    pub fn tombstone(&mut self, target: u64, created_at_ms: i64) -> Result<u64> {
        self.assert_writable()?;
        let staged_alive = self
            .staged
            .iter()
            .any(|s| s.record.frame_id == target && s.record.kind != FrameKind::Tombstone);
        let staged_dead = self
            .staged
            .iter()
            .any(|s| s.record.tombstone_target == Some(target));
        if staged_dead || (!staged_alive && !self.snapshot.is_alive(target)) {
            return Err(WaxError::io(format!(
                "cannot tombstone frame {target}: not found or already dead"
            )));
        }

        let frame_id = self.next_frame_id;
        let record = FrameRecord {
            frame_id,
            kind: FrameKind::Tombstone,
            created_at_ms,
            compression: Compression::None,
            uncompressed_len: 0,
            payload_sha256: sha256(b""),
            tombstone_target: Some(target),
            metadata: Metadata::new(),
            embedding: None,
            payload: Vec::new(),
        };
        self.wal
            .append(&self.file, WalRecordKind::FrameTombstone, &record.encode()?)?;
        self.next_frame_id += 1;
        self.staged.push(StagedFrame {
            record,
            index_text: None,
        });
        Ok(frame_id)
    }

    /// Stage a structured upsert (WAL first). Returns the fact row id.
    pub fn stage_upsert(&mut self, upsert: FactUpsert) -> Result<u64> {
        self.assert_writable()?;
        let body = StructuredMutation::Upsert(upsert.clone()).encode()?;
        self.wal
            .append(&self.file, WalRecordKind::StructuredMutation, &body)?;
        self.structured.stage_upsert(upsert)
    }

    /// Stage a structured removal (WAL first when it closes anything).
    pub fn stage_remove(&mut self, remove: FactRemove) -> Result<bool> {
        self.assert_writable()?;
        // Probe against the staged view before paying for a WAL record.
        let subject_known = self
            .structured
            .staged_view()
            .lookup_entity(&remove.subject)
            .is_some();
        if !subject_known {
            return Ok(false);
        }
        let body = StructuredMutation::Remove(remove.clone()).encode()?;
        self.wal
            .append(&self.file, WalRecordKind::StructuredMutation, &body)?;
        self.structured.stage_remove(remove)
    }

    /// Discard all staged structured mutations.
    pub fn rollback_structured(&mut self) {
        self.structured.rollback_staged();
    }

    pub fn set_skip_sync(&mut self, skip: bool) {
        self.wal.set_skip_sync(skip);
    }

    // ── Commit ─────────────────────────────────────────────────────

    /// Promote everything staged into a new committed generation.
    pub fn commit(&mut self) -> Result<()> {
        self.assert_writable()?;
        self.commit_inner(false)
    }

    fn commit_inner(&mut self, force: bool) -> Result<()> {
        if !force && self.staged.is_empty() && !self.structured.has_pending() {
            return Ok(());
        }
        // A batch appended with skip_sync must be durable before the
        // footer can name its effects.
        self.wal.flush(&self.file)?;

        let generation = self.header.file_generation + 1;
        let mut entries: Vec<TocEntry> = self.snapshot.toc.entries.clone();
        let mut write_at = self.segments_end;
        let mut pending_writes: Vec<(u64, Vec<u8>)> = Vec::new();

        // Frame page segment with payload offsets tracked as we go.
        let mut new_frames: Vec<(FrameMeta, Option<String>, Option<Vec<f32>>)> = Vec::new();
        if !self.staged.is_empty() {
            let mut body = crate::codec::ByteWriter::new();
            body.put_u64(self.staged.len() as u64);
            let mut offsets = Vec::with_capacity(self.staged.len());
            for staged in &self.staged {
                let record_bytes = staged.record.encode()?;
                let payload_offset_in_record = record_bytes.len() - staged.record.payload.len();
                offsets.push(body.len() + payload_offset_in_record);
                body.put_raw(&record_bytes);
            }
            let body = body.into_bytes();
            let (slab, digest) = frame_slab(SegmentKind::FramePage, &body);
            let slab_offset = write_at;
            entries.push(TocEntry {
                kind: SegmentKind::FramePage,
                generation,
                offset: slab_offset,
                len: slab.len() as u64,
                body_sha256: digest,
            });
            for (staged, offset_in_body) in self.staged.iter().zip(offsets) {
                let meta = FrameMeta {
                    frame_id: staged.record.frame_id,
                    kind: staged.record.kind,
                    created_at_ms: staged.record.created_at_ms,
                    compression: staged.record.compression,
                    uncompressed_len: staged.record.uncompressed_len,
                    payload_sha256: staged.record.payload_sha256,
                    tombstone_target: staged.record.tombstone_target,
                    metadata: staged.record.metadata.clone(),
                    embedding_dim: staged.record.embedding_dim(),
                    payload_offset: slab_offset
                        + SEGMENT_HEADER_SIZE as u64
                        + offset_in_body as u64,
                    payload_len: staged.record.payload.len() as u64,
                };
                new_frames.push((
                    meta,
                    staged.index_text.clone(),
                    staged.record.embedding.clone(),
                ));
            }
            write_at += slab.len() as u64;
            pending_writes.push((slab_offset, slab));
        }

        // Text delta segment.
        let mut text_delta = TextIndex::new();
        for (meta, index_text, _) in &new_frames {
            if let Some(text) = index_text {
                text_delta.add_document(meta.frame_id, text);
            }
        }
        if !text_delta.is_empty() {
            let (slab, digest) = frame_slab(SegmentKind::TextIndex, &text_delta.encode_body());
            entries.push(TocEntry {
                kind: SegmentKind::TextIndex,
                generation,
                offset: write_at,
                len: slab.len() as u64,
                body_sha256: digest,
            });
            pending_writes.push((write_at, slab));
            write_at += entries.last().unwrap().len;
        }

        // Vector delta segment.
        let mut vector_delta = VectorIndex::new(0, self.opts.similarity);
        for (meta, _, embedding) in &new_frames {
            if let Some(vector) = embedding {
                vector_delta.add(meta.frame_id, vector, false)?;
            }
        }
        if !vector_delta.is_empty()
            && !self.snapshot.vectors.is_empty()
            && vector_delta.dim() != self.snapshot.vectors.dim()
        {
            return Err(WaxError::Encoding(format!(
                "staged embedding dim {} does not match index dim {}",
                vector_delta.dim(),
                self.snapshot.vectors.dim()
            )));
        }
        if !vector_delta.is_empty() {
            let (slab, digest) = vector_delta.encode_slab();
            entries.push(TocEntry {
                kind: SegmentKind::VecIndex,
                generation,
                offset: write_at,
                len: slab.len() as u64,
                body_sha256: digest,
            });
            pending_writes.push((write_at, slab));
            write_at += entries.last().unwrap().len;
        }

        // Structured snapshot: a full rewrite that replaces any earlier
        // snapshot entry.
        let structured_changed = self.structured.has_shadow() || force;
        let structured_tables = if structured_changed {
            let (tables, _mutations) = self.structured.commit_staged();
            tables
        } else {
            Arc::clone(&self.snapshot.structured)
        };
        if structured_changed && structured_tables.fact_count() > 0 {
            entries.retain(|e| e.kind != SegmentKind::StructuredSnapshot);
            let (slab, digest) = frame_slab(
                SegmentKind::StructuredSnapshot,
                &structured_tables.encode_body()?,
            );
            entries.push(TocEntry {
                kind: SegmentKind::StructuredSnapshot,
                generation,
                offset: write_at,
                len: slab.len() as u64,
                body_sha256: digest,
            });
            pending_writes.push((write_at, slab));
            write_at += entries.last().unwrap().len;
        }

        // A checkpoint mark closes the batch in the log itself; the
        // footer's committed seq covers it. Skipped when the commit had
        // no appends (initial create, forced rewrites).
        if self.wal.stats().appends_since_checkpoint > 0 {
            let mut mark = crate::codec::ByteWriter::new();
            mark.put_u64(self.wal.sequence());
            mark.put_u64(generation);
            match self
                .wal
                .append(&self.file, WalRecordKind::CheckpointMark, mark.as_slice())
            {
                Ok(_) => {}
                // A brim-full region cannot take the mark; the footer
                // alone still carries the committed seq.
                Err(WaxError::IoMsg(reason)) if reason.contains("full") => {
                    tracing::debug!("checkpoint mark skipped: {reason}");
                }
                Err(other) => return Err(other),
            }
        }

        // New TOC with refreshed global counters.
        let toc = Toc {
            counters: Counters {
                next_frame_id: self.next_frame_id,
                next_entity_row: structured_tables.next_entity_row(),
                next_predicate_row: structured_tables.next_predicate_row(),
                next_fact_row: structured_tables.next_fact_row(),
            },
            entries,
        };
        let toc_body = toc.encode();
        let toc_digest = sha256(&toc_body);
        let committed_seq = self.wal.sequence();

        // Steps 1-3: segments, TOC, footer.
        for (offset, bytes) in &pending_writes {
            self.file.write_all_at(bytes, *offset)?;
        }
        let toc_offset = write_at;
        self.file.write_all_at(&toc_body, toc_offset)?;
        self.file
            .write_all_at(toc_digest.as_bytes(), toc_offset + toc_body.len() as u64)?;
        let footer_offset = toc_offset + toc_body.len() as u64 + DIGEST_SIZE as u64;
        let footer = Footer {
            toc_len: toc_body.len() as u64,
            toc_sha256: toc_digest,
            generation,
            wal_committed_seq: committed_seq,
        };
        self.file.write_all_at(&footer.encode(), footer_offset)?;

        // Step 4: one fsync covers segments, TOC, and footer.
        self.file.fsync()?;

        // Steps 5-6: checkpoint the WAL and stage the header pages.
        self.wal.record_checkpoint();
        self.header.file_generation = generation;
        self.header.footer_offset = footer_offset;
        self.header.toc_checksum = toc_digest;
        self.wal.fill_header(&mut self.header);
        self.page_generation += 1;
        header::write_pair(&self.file, &self.header, self.page_generation)?;

        // Publish the new snapshot.
        let mut frames = self.snapshot.frames.clone();
        let mut dead = self.snapshot.dead.clone();
        let mut by_payload_digest = self.snapshot.by_payload_digest.clone();
        let mut text = self.snapshot.text.clone();
        let mut vectors = self.snapshot.vectors.clone();
        for (meta, _, _) in &new_frames {
            if let Some(target) = meta.tombstone_target {
                dead.insert(target);
            }
            if meta.kind != FrameKind::Tombstone {
                by_payload_digest.insert(*meta.payload_sha256.as_bytes(), meta.frame_id);
            }
            frames.insert(meta.frame_id, meta.clone());
        }
        text.merge(&text_delta);
        vectors.merge(&vector_delta)?;

        self.snapshot = Arc::new(Snapshot {
            file_generation: generation,
            committed_seq,
            toc,
            frames,
            dead,
            by_payload_digest,
            text,
            vectors,
            structured: structured_tables,
        });
        self.staged.clear();
        self.segments_end = footer_offset + FOOTER_SIZE as u64;

        tracing::info!(
            generation,
            committed_seq,
            segments = self.snapshot.toc.entries.len(),
            "commit complete"
        );
        Ok(())
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Read one live frame's payload, decompressed and verified.
    pub fn get_frame(&self, frame_id: u64) -> Result<Option<(FrameMeta, Vec<u8>)>> {
        let snapshot = self.snapshot();
        if !snapshot.is_alive(frame_id) {
            return Ok(None);
        }
        let meta = snapshot.frames.get(&frame_id).cloned().expect("alive frame");
        let payload = read_payload(&self.file, &meta)?;
        Ok(Some((meta, payload)))
    }

    /// All live frame metadata matching `predicate`, in frame order.
    pub fn range_scan<F>(&self, predicate: F) -> Vec<FrameMeta>
    where
        F: Fn(&FrameMeta) -> bool,
    {
        let snapshot = self.snapshot();
        snapshot
            .frames
            .values()
            .filter(|m| snapshot.is_alive(m.frame_id))
            .filter(|m| predicate(m))
            .cloned()
            .collect()
    }

    /// Re-hash every live segment against its TOC digest.
    pub fn verify(&self) -> Result<()> {
        let snapshot = self.snapshot();
        for entry in &snapshot.toc.entries {
            let slab = Self::read_entry_slab(&self.file, entry)?;
            let hashed_end = slab.len() - DIGEST_SIZE;
            let actual = sha256(&slab[..hashed_end]);
            if actual != entry.body_sha256 {
                return Err(WaxError::InvalidSegment {
                    kind: entry.kind.name(),
                    reason: format!(
                        "recomputed digest disagrees at offset {} len {}",
                        entry.offset, entry.len
                    ),
                });
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let snapshot = self.snapshot();
        let wal = self.wal.stats();
        let file_len = self.file.len()?;
        let fixed = WAL_REGION_OFFSET + wal.region_size;
        let live_segment_bytes = snapshot.toc.live_bytes();
        let appendix = file_len.saturating_sub(fixed);
        let stale_bytes = appendix.saturating_sub(live_segment_bytes);
        let fragmentation = if appendix == 0 {
            0.0
        } else {
            stale_bytes as f64 / appendix as f64
        };
        Ok(StoreStats {
            frame_count: snapshot.live_frame_count(),
            tombstone_count: snapshot.tombstone_count(),
            file_generation: snapshot.file_generation,
            wal_committed_seq: wal.committed_sequence,
            wal_sequence: wal.sequence,
            wal_pending_bytes: wal.pending_bytes,
            wal_region_size: wal.region_size,
            segment_count: snapshot.toc.entries.len(),
            file_len,
            live_segment_bytes,
            stale_bytes,
            fragmentation,
            text_doc_count: snapshot.text.doc_count(),
            vector_count: snapshot.vectors.len(),
            entity_count: snapshot.structured.entity_count(),
            fact_count: snapshot.structured.fact_count(),
            staged_frames: self.staged.len(),
        })
    }

    /// Whether stale bytes have crossed the compaction threshold.
    pub fn should_compact(&self) -> Result<bool> {
        Ok(self.stats()?.fragmentation >= self.opts.compaction_threshold)
    }

    /// Consume the store, dropping the file handle and its lock.
    pub(crate) fn into_parts(self) -> (PathBuf, StoreOptions) {
        (self.path, self.opts)
    }

    /// Direct staging for compaction: the record keeps its frame id and
    /// bypasses the WAL (the target file is committed before it is ever
    /// opened).
    pub(crate) fn stage_prebuilt(&mut self, record: FrameRecord, index_text: Option<String>) {
        self.next_frame_id = self.next_frame_id.max(record.frame_id + 1);
        self.staged.push(StagedFrame { record, index_text });
    }

    pub(crate) fn stage_structured_tables(&mut self, tables: StructuredTables) {
        self.structured = StructuredStore::default();
        self.structured.stage_snapshot(tables);
    }

    pub(crate) fn force_next_frame_id(&mut self, next: u64) {
        self.next_frame_id = self.next_frame_id.max(next);
    }

    pub(crate) fn commit_forced(&mut self) -> Result<()> {
        self.commit_inner(true)
    }

    pub(crate) fn raw_payload(&self, meta: &FrameMeta) -> Result<Vec<u8>> {
        self.file
            .read_exactly(meta.payload_len as usize, meta.payload_offset)
    }
}

/// Read, decompress, and verify one payload.
fn read_payload(file: &StoreFile, meta: &FrameMeta) -> Result<Vec<u8>> {
    let raw = file.read_exactly(meta.payload_len as usize, meta.payload_offset)?;
    let payload = compress::decompress(&raw, meta.compression, meta.uncompressed_len)?;
    let actual = sha256(&payload);
    if actual != meta.payload_sha256 {
        return Err(WaxError::InvalidSegment {
            kind: SegmentKind::FramePage.name(),
            reason: format!(
                "payload digest mismatch for frame {} at offset {}",
                meta.frame_id, meta.payload_offset
            ),
        });
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::HEADER_PAGE_SIZE;
    use tempfile::TempDir;

    fn small_opts() -> StoreOptions {
        StoreOptions::default().wal_size(64 * 1024)
    }

    fn append_text(store: &mut Store, text: &str, at: i64) -> u64 {
        store
            .append_frame(AppendFrame {
                kind: FrameKind::Text,
                payload: text.as_bytes().to_vec(),
                metadata: Metadata::new(),
                embedding: None,
                created_at_ms: at,
                index_text: Some(text.to_string()),
            })
            .unwrap()
    }

    #[test]
    fn test_create_then_reopen_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.mv2s");
        {
            let store = Store::open(&path, small_opts()).unwrap();
            let stats = store.stats().unwrap();
            assert_eq!(stats.frame_count, 0);
            assert_eq!(stats.wal_committed_seq, 0);
            assert_eq!(stats.file_generation, 1);
        }
        {
            let store = Store::open(&path, small_opts()).unwrap();
            let stats = store.stats().unwrap();
            assert_eq!(stats.frame_count, 0);
            assert_eq!(stats.wal_committed_seq, 0);
            assert_eq!(stats.file_generation, 1);
        }
    }

    #[test]
    fn test_reopen_without_writes_is_bit_identical() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.mv2s");
        Store::open(&path, small_opts()).unwrap();

        let before = std::fs::read(&path).unwrap();
        for _ in 0..3 {
            Store::open(&path, small_opts()).unwrap();
        }
        let after = std::fs::read(&path).unwrap();
        assert_eq!(before[..HEADER_PAGE_SIZE * 2], after[..HEADER_PAGE_SIZE * 2]);
        assert_eq!(before, after);
    }

    #[test]
    fn test_append_commit_get() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.mv2s");
        let mut store = Store::open(&path, small_opts()).unwrap();

        let id = append_text(&mut store, "hello durable world", 1000);
        assert_eq!(id, 1);
        store.commit().unwrap();

        let (meta, payload) = store.get_frame(id).unwrap().expect("frame exists");
        assert_eq!(payload, b"hello durable world");
        assert_eq!(meta.created_at_ms, 1000);
        assert_eq!(meta.kind, FrameKind::Text);

        // Compression policy: small payloads stay uncompressed.
        assert_eq!(meta.compression, Compression::None);

        let big = "x".repeat(4096);
        let id2 = append_text(&mut store, &big, 1001);
        store.commit().unwrap();
        let (meta2, payload2) = store.get_frame(id2).unwrap().unwrap();
        assert_eq!(meta2.compression, Compression::Lzfse);
        assert_eq!(payload2.len(), 4096);
    }

    #[test]
    fn test_frames_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.mv2s");
        {
            let mut store = Store::open(&path, small_opts()).unwrap();
            append_text(&mut store, "first frame", 1);
            append_text(&mut store, "second frame", 2);
            store.commit().unwrap();
        }
        {
            let store = Store::open(&path, small_opts()).unwrap();
            let stats = store.stats().unwrap();
            assert_eq!(stats.frame_count, 2);
            let (_, payload) = store.get_frame(1).unwrap().unwrap();
            assert_eq!(payload, b"first frame");
            let (_, payload) = store.get_frame(2).unwrap().unwrap();
            assert_eq!(payload, b"second frame");
            // Text index was reloaded from its segment.
            assert_eq!(stats.text_doc_count, 2);
        }
    }

    #[test]
    fn test_frame_ids_dense_across_commits() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.mv2s");
        {
            let mut store = Store::open(&path, small_opts()).unwrap();
            assert_eq!(append_text(&mut store, "one", 1), 1);
            store.commit().unwrap();
            assert_eq!(append_text(&mut store, "two", 2), 2);
            store.commit().unwrap();
        }
        {
            let mut store = Store::open(&path, small_opts()).unwrap();
            assert_eq!(append_text(&mut store, "three", 3), 3);
        }
    }

    #[test]
    fn test_tombstone_hides_frame() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.mv2s");
        let mut store = Store::open(&path, small_opts()).unwrap();

        let id = append_text(&mut store, "to be deleted", 1);
        store.commit().unwrap();
        assert!(store.get_frame(id).unwrap().is_some());

        store.tombstone(id, 2).unwrap();
        store.commit().unwrap();
        assert!(store.get_frame(id).unwrap().is_none());

        let stats = store.stats().unwrap();
        assert_eq!(stats.frame_count, 0);
        assert_eq!(stats.tombstone_count, 1);

        // Double tombstone is an error.
        assert!(store.tombstone(id, 3).is_err());
    }

    #[test]
    fn test_uncommitted_wal_records_stage_on_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.mv2s");
        {
            let mut store = Store::open(&path, small_opts()).unwrap();
            append_text(&mut store, "committed", 1);
            store.commit().unwrap();
            // Staged but never committed: lives only in the WAL.
            append_text(&mut store, "wal only", 2);
        }
        {
            let mut store = Store::open(&path, small_opts()).unwrap();
            // Not yet visible: promotion happens at the next commit.
            assert_eq!(store.stats().unwrap().frame_count, 1);
            assert_eq!(store.staged_len(), 1);

            store.commit().unwrap();
            assert_eq!(store.stats().unwrap().frame_count, 2);
            let (_, payload) = store.get_frame(2).unwrap().unwrap();
            assert_eq!(payload, b"wal only");
        }
    }

    #[test]
    fn test_dedup_lookup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.mv2s");
        let mut store = Store::open(&path, small_opts()).unwrap();

        let id = append_text(&mut store, "unique payload", 1);
        store.commit().unwrap();

        let digest = sha256(b"unique payload");
        assert_eq!(store.find_by_payload(&digest), Some(id));
        assert_eq!(store.find_by_payload(&sha256(b"other")), None);

        // Dead frames no longer dedup.
        store.tombstone(id, 2).unwrap();
        store.commit().unwrap();
        assert_eq!(store.find_by_payload(&digest), None);
    }

    #[test]
    fn test_verify_passes_on_healthy_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.mv2s");
        let mut store = Store::open(&path, small_opts()).unwrap();
        append_text(&mut store, "verified content", 1);
        store.commit().unwrap();
        store.verify().unwrap();
    }

    #[test]
    fn test_read_only_rejects_mutation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.mv2s");
        Store::open(&path, small_opts()).unwrap();

        let mut store = Store::open(&path, small_opts().read_only(true)).unwrap();
        let err = store
            .append_frame(AppendFrame {
                kind: FrameKind::Text,
                payload: b"nope".to_vec(),
                metadata: Metadata::new(),
                embedding: None,
                created_at_ms: 0,
                index_text: None,
            })
            .unwrap_err();
        assert!(err.to_string().contains("read-only"));
    }

    #[test]
    fn test_commit_without_changes_is_noop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.mv2s");
        let mut store = Store::open(&path, small_opts()).unwrap();
        let gen_before = store.stats().unwrap().file_generation;
        store.commit().unwrap();
        assert_eq!(store.stats().unwrap().file_generation, gen_before);
    }

    #[test]
    fn test_structured_mutations_commit_and_reload() {
        use crate::structured::{AsOf, EntityKey, FactValue};

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.mv2s");
        {
            let mut store = Store::open(&path, small_opts()).unwrap();
            store
                .stage_upsert(FactUpsert {
                    subject: EntityKey::new("alice", "person"),
                    predicate: "employer".into(),
                    object: FactValue::Str("Acme".into()),
                    valid_from_ms: 100,
                    valid_to_ms: None,
                    asserted_at_ms: 100,
                    evidence: Vec::new(),
                })
                .unwrap();
            store.commit().unwrap();
        }
        {
            let store = Store::open(&path, small_opts()).unwrap();
            let facts = store.snapshot().structured.get_facts(
                Some(&EntityKey::new("alice", "person")),
                None,
                AsOf::LATEST,
            );
            assert_eq!(facts.len(), 1);
        }
    }

    #[test]
    fn test_header_corruption_recovers_via_footer_scan() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.mv2s");
        {
            let mut store = Store::open(&path, small_opts()).unwrap();
            append_text(&mut store, "survives header loss", 1);
            store.commit().unwrap();
        }
        // Smash both header pages.
        {
            use crate::io::{LockMode, StoreFile};
            let file = StoreFile::open(&path, LockMode::Exclusive, false).unwrap();
            file.write_all_at(&[0u8; HEADER_PAGE_SIZE * 2], 0).unwrap();
        }
        {
            let store = Store::open(&path, small_opts()).unwrap();
            let (_, payload) = store.get_frame(1).unwrap().unwrap();
            assert_eq!(payload, b"survives header loss");
        }
    }
}
