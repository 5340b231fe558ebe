//! Compaction: rewrite the store into a fresh file layout, dropping
//! stale segments, tombstones, and the frames they deleted.
//!
//! The rewrite targets a sibling temp file; the original is untouched
//! until the atomic rename, so a crash mid-compaction loses nothing.

use std::collections::HashMap;

use crate::compress;
use crate::error::{Result, WaxError};
use crate::store::frames::{FrameKind, FrameRecord};
use crate::store::Store;

impl Store {
    /// Rewrite into a fresh layout and reopen. Consumes the store: the
    /// old file handle (and its lock) must be released before the
    /// rename lands.
    pub fn compact(self) -> Result<Store> {
        if self.has_staged() {
            return Err(WaxError::io(
                "flush staged changes before compacting".to_string(),
            ));
        }
        let snapshot = self.snapshot();
        let tmp = self.path().with_extension("mv2s.compact");
        if tmp.exists() {
            std::fs::remove_file(&tmp)?;
        }

        let vectors_by_frame: HashMap<u64, Vec<f32>> = snapshot
            .vectors
            .entries()
            .map(|(id, v)| (id, v.to_vec()))
            .collect();

        {
            let mut fresh = Store::open(&tmp, self.options().clone())?;
            for meta in snapshot.frames.values() {
                if !snapshot.is_alive(meta.frame_id) {
                    continue;
                }
                let payload = self.raw_payload(meta)?;
                let index_text = match meta.kind {
                    FrameKind::Text | FrameKind::ImageText => compress::decompress(
                        &payload,
                        meta.compression,
                        meta.uncompressed_len,
                    )
                    .ok()
                    .and_then(|bytes| String::from_utf8(bytes).ok()),
                    _ => None,
                };
                let record = FrameRecord {
                    frame_id: meta.frame_id,
                    kind: meta.kind,
                    created_at_ms: meta.created_at_ms,
                    compression: meta.compression,
                    uncompressed_len: meta.uncompressed_len,
                    payload_sha256: meta.payload_sha256,
                    tombstone_target: None,
                    metadata: meta.metadata.clone(),
                    embedding: vectors_by_frame.get(&meta.frame_id).cloned(),
                    payload,
                };
                fresh.stage_prebuilt(record, index_text);
            }
            // Counters survive compaction: frame ids stay monotonic even
            // though deleted frames leave gaps behind.
            fresh.force_next_frame_id(snapshot.toc.counters.next_frame_id);
            fresh.stage_structured_tables((*snapshot.structured).clone());
            fresh.commit_forced()?;
        }

        let (path, opts) = self.into_parts();
        std::fs::rename(&tmp, &path)?;
        tracing::info!(path = %path.display(), "compaction complete");
        Store::open(&path, opts)
    }
}
