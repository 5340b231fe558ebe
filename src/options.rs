//! Builder-style configuration for the store and the public engine
//! operations.

use std::collections::BTreeMap;

use crate::compress::Compression;
use crate::format::DEFAULT_WAL_SIZE;
use crate::index::fusion::FusionConfig;
use crate::index::vector::Similarity;
use crate::store::frames::{FrameKind, Metadata, MetadataValue};

/// Store-wide tunables, fixed at open.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Size of the embedded WAL region in bytes.
    pub wal_size: u64,
    /// Open with a shared lock; every mutation fails.
    pub read_only: bool,
    /// Commit after every remember. Disable for batch ingestion and
    /// call `flush` explicitly.
    pub auto_flush: bool,
    /// When `auto_flush` is off, still commit after this many staged
    /// WAL appends. 0 disables the threshold.
    pub flush_every: u32,
    /// Compression applied to frame payloads at least this large;
    /// smaller payloads are stored uncompressed.
    pub compression: Compression,
    pub compression_threshold: usize,
    /// Vector index configuration.
    pub similarity: Similarity,
    /// Fusion weights for hybrid search.
    pub fusion: FusionConfig,
    /// Stale-byte ratio above which `should_compact` fires.
    pub compaction_threshold: f64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            wal_size: DEFAULT_WAL_SIZE,
            read_only: false,
            auto_flush: true,
            flush_every: 0,
            compression: Compression::Lzfse,
            compression_threshold: 512,
            similarity: Similarity::Cosine,
            fusion: FusionConfig::default(),
            compaction_threshold: 0.5,
        }
    }
}

impl StoreOptions {
    #[must_use]
    pub fn wal_size(mut self, bytes: u64) -> Self {
        self.wal_size = bytes;
        self
    }

    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    #[must_use]
    pub fn auto_flush(mut self, auto_flush: bool) -> Self {
        self.auto_flush = auto_flush;
        self
    }

    #[must_use]
    pub fn flush_every(mut self, appends: u32) -> Self {
        self.flush_every = appends;
        self
    }

    #[must_use]
    pub fn compression(mut self, algo: Compression, threshold: usize) -> Self {
        self.compression = algo;
        self.compression_threshold = threshold;
        self
    }

    #[must_use]
    pub fn similarity(mut self, similarity: Similarity) -> Self {
        self.similarity = similarity;
        self
    }

    #[must_use]
    pub fn fusion(mut self, fusion: FusionConfig) -> Self {
        self.fusion = fusion;
        self
    }
}

/// Per-remember options.
#[derive(Debug, Clone)]
pub struct RememberOptions {
    pub kind: FrameKind,
    pub metadata: Metadata,
    pub embedding: Option<Vec<f32>>,
    /// Override the frame timestamp (defaults to wall clock).
    pub created_at_ms: Option<i64>,
    /// Skip ingestion when a frame with an identical payload digest is
    /// already live, returning the existing frame id.
    pub dedup: bool,
}

impl Default for RememberOptions {
    fn default() -> Self {
        Self {
            kind: FrameKind::Text,
            metadata: Metadata::new(),
            embedding: None,
            created_at_ms: None,
            dedup: false,
        }
    }
}

impl RememberOptions {
    #[must_use]
    pub fn kind(mut self, kind: FrameKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: MetadataValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn metadata(mut self, metadata: BTreeMap<String, MetadataValue>) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn embedding(mut self, vector: Vec<f32>) -> Self {
        self.embedding = Some(vector);
        self
    }

    #[must_use]
    pub fn created_at_ms(mut self, ts: i64) -> Self {
        self.created_at_ms = Some(ts);
        self
    }

    #[must_use]
    pub fn dedup(mut self, dedup: bool) -> Self {
        self.dedup = dedup;
        self
    }
}

/// Batch ingestion options for `remember_many`.
#[derive(Debug, Clone, Copy)]
pub struct RememberBatchOptions {
    /// Defer per-append fsync to the trailing flush. Faster; the batch
    /// is only durable once the final commit lands.
    pub skip_sync: bool,
    /// Commit once at the end of the batch instead of per item.
    pub single_commit: bool,
}

impl Default for RememberBatchOptions {
    fn default() -> Self {
        Self {
            skip_sync: false,
            single_commit: true,
        }
    }
}

/// Search mode: text-only or hybrid with an optional explicit alpha.
/// Without an alpha the query classifier picks one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchMode {
    Text,
    Hybrid(Option<f64>),
}

/// Half-open `[from, to)` filter over `created_at_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub from_ms: i64,
    pub to_ms: i64,
}

impl TimeRange {
    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.from_ms && ts < self.to_ms
    }
}

/// Search request options.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub mode: SearchMode,
    pub top_k: usize,
    pub min_score: f64,
    pub time_range: Option<TimeRange>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            mode: SearchMode::Hybrid(None),
            top_k: 10,
            min_score: 0.0,
            time_range: None,
        }
    }
}

impl SearchOptions {
    #[must_use]
    pub fn mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    #[must_use]
    pub fn min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    #[must_use]
    pub fn time_range(mut self, from_ms: i64, to_ms: i64) -> Self {
        self.time_range = Some(TimeRange { from_ms, to_ms });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_defaults() {
        let opts = StoreOptions::default();
        assert_eq!(opts.wal_size, DEFAULT_WAL_SIZE);
        assert!(opts.auto_flush);
        assert_eq!(opts.compression, Compression::Lzfse);
        assert_eq!(opts.compression_threshold, 512);
    }

    #[test]
    fn test_builders_chain() {
        let opts = StoreOptions::default()
            .wal_size(1 << 20)
            .auto_flush(false)
            .flush_every(64)
            .compression(Compression::Lz4, 128);
        assert_eq!(opts.wal_size, 1 << 20);
        assert!(!opts.auto_flush);
        assert_eq!(opts.flush_every, 64);
        assert_eq!(opts.compression, Compression::Lz4);

        let remember = RememberOptions::default()
            .kind(FrameKind::ImageText)
            .meta("source", MetadataValue::Str("scan.pdf".into()))
            .created_at_ms(1234)
            .dedup(true);
        assert_eq!(remember.kind, FrameKind::ImageText);
        assert_eq!(remember.created_at_ms, Some(1234));
        assert!(remember.dedup);
    }

    #[test]
    fn test_time_range_half_open() {
        let range = TimeRange {
            from_ms: 100,
            to_ms: 200,
        };
        assert!(range.contains(100));
        assert!(range.contains(199));
        assert!(!range.contains(200));
        assert!(!range.contains(99));
    }
}
