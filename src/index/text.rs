//! Inverted text index.
//!
//! The live index is an in-memory postings map merged from all
//! `text_index_v1` segments at open; each commit flushes only the dirty
//! delta as a new segment. Scoring is an IDF-weighted term-frequency
//! sum with stable ordering.

use std::collections::BTreeMap;

use unicode_normalization::UnicodeNormalization;

use crate::codec::{ByteReader, ByteWriter};
use crate::error::Result;

/// Tokenise query or document text: NFC-normalise, case-fold, strip
/// non-letter/non-digit, and drop tokens of length <= 2.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalised: String = text.nfc().collect();
    normalised
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 2)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Postings plus per-frame length table. Also used for the dirty delta
/// flushed at each commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextIndex {
    /// token -> sorted vector of (frame_id, term frequency).
    postings: BTreeMap<String, Vec<(u64, u32)>>,
    /// frame_id -> token count.
    doc_lengths: BTreeMap<u64, u32>,
}

impl TextIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn doc_count(&self) -> usize {
        self.doc_lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lengths.is_empty()
    }

    pub fn token_count(&self) -> usize {
        self.postings.len()
    }

    /// Index one document. Re-adding a frame_id replaces nothing: frames
    /// are immutable, so each id is added at most once.
    pub fn add_document(&mut self, frame_id: u64, text: &str) {
        let tokens = tokenize(text);
        self.doc_lengths.insert(frame_id, tokens.len() as u32);

        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for token in tokens {
            *counts.entry(token).or_insert(0) += 1;
        }
        for (token, tf) in counts {
            let list = self.postings.entry(token).or_default();
            match list.binary_search_by_key(&frame_id, |&(id, _)| id) {
                Ok(pos) => list[pos] = (frame_id, tf),
                Err(pos) => list.insert(pos, (frame_id, tf)),
            }
        }
    }

    /// Merge a delta (e.g. a loaded segment) into this index.
    pub fn merge(&mut self, delta: &TextIndex) {
        for (&frame_id, &len) in &delta.doc_lengths {
            self.doc_lengths.insert(frame_id, len);
        }
        for (token, entries) in &delta.postings {
            let list = self.postings.entry(token.clone()).or_default();
            for &(frame_id, tf) in entries {
                match list.binary_search_by_key(&frame_id, |&(id, _)| id) {
                    Ok(pos) => list[pos] = (frame_id, tf),
                    Err(pos) => list.insert(pos, (frame_id, tf)),
                }
            }
        }
    }

    /// Score `query` against the index. `alive` filters out tombstoned
    /// frames. Ranking is stable: descending score, ties broken by
    /// ascending frame_id.
    pub fn search<F>(&self, query: &str, limit: usize, alive: F) -> Vec<(u64, f64)>
    where
        F: Fn(u64) -> bool,
    {
        let terms = tokenize(query);
        if terms.is_empty() || self.doc_lengths.is_empty() {
            return Vec::new();
        }
        let n = self.doc_lengths.len() as f64;

        let mut scores: BTreeMap<u64, f64> = BTreeMap::new();
        for term in &terms {
            let Some(entries) = self.postings.get(term) else {
                continue;
            };
            let df = entries.len() as f64;
            let idf = ((n + 1.0) / (df + 1.0)).ln() + 1.0;
            for &(frame_id, tf) in entries {
                if !alive(frame_id) {
                    continue;
                }
                *scores.entry(frame_id).or_insert(0.0) += f64::from(tf) * idf;
            }
        }

        let mut ranked: Vec<(u64, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(limit);
        ranked
    }

    // ── Segment body codec ─────────────────────────────────────────

    pub fn encode_body(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.put_u64(self.doc_lengths.len() as u64);
        for (&frame_id, &len) in &self.doc_lengths {
            w.put_u64(frame_id);
            w.put_u32(len);
        }
        w.put_u64(self.postings.len() as u64);
        for (token, entries) in &self.postings {
            w.put_str(token);
            w.put_u64(entries.len() as u64);
            for &(frame_id, tf) in entries {
                w.put_u64(frame_id);
                w.put_u32(tf);
            }
        }
        w.into_bytes()
    }

    pub fn decode_body(body: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(body);
        let doc_count = r.read_array_len()?;
        let mut doc_lengths = BTreeMap::new();
        for _ in 0..doc_count {
            let frame_id = r.read_u64()?;
            let len = r.read_u32()?;
            doc_lengths.insert(frame_id, len);
        }
        let token_count = r.read_array_len()?;
        let mut postings = BTreeMap::new();
        for _ in 0..token_count {
            let token = r.read_str()?;
            let entry_count = r.read_array_len()?;
            let mut entries = Vec::with_capacity(entry_count as usize);
            for _ in 0..entry_count {
                let frame_id = r.read_u64()?;
                let tf = r.read_u32()?;
                entries.push((frame_id, tf));
            }
            postings.insert(token, entries);
        }
        r.finish()?;
        Ok(Self {
            postings,
            doc_lengths,
        })
    }
}
