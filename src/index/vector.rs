//! Vector index segments.
//!
//! Two encodings, chosen at segment creation: `flat` (raw f32 vectors
//! with a parallel frame_id array) and `ann` (an opaque payload authored
//! by a pluggable ANN backend, HNSW family). Flat is used when the
//! vector count is below the configured threshold or when no backend is
//! registered.
//!
//! Segment header (36 bytes):
//!
//! ```text
//! Offset  Size  Field
//! 0       4     magic: b"MV2V"
//! 4       2     version: u16 = 1
//! 6       1     encoding: u8 (0 = flat, 1 = ann)
//! 7       1     similarity: u8 (0 = cosine, 1 = l2, 2 = inner_product)
//! 8       4     dim: u32
//! 12      8     vector_count: u64
//! 20      8     payload_len: u64
//! 28      8     reserved (must be zero)
//! ```
//!
//! The slab carries a trailing SHA-256 over header and payload, like
//! every other segment.

use rayon::prelude::*;

use crate::checksum::{sha256, Digest32, DIGEST_SIZE};
use crate::codec::limits;
use crate::error::{Result, WaxError};

pub const VEC_HEADER_SIZE: usize = 36;
const VEC_VERSION: u16 = 1;
const SEGMENT_KIND_NAME: &str = "vec_index_v1";

/// Threshold below which sequential scoring beats the rayon fan-out.
const PARALLEL_SCAN_THRESHOLD: usize = 2048;

/// Similarity metric, fixed per index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Similarity {
    Cosine = 0,
    L2 = 1,
    InnerProduct = 2,
}

impl Similarity {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Cosine),
            1 => Some(Self::L2),
            2 => Some(Self::InnerProduct),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::L2 => "l2",
            Self::InnerProduct => "inner_product",
        }
    }
}

impl Default for Similarity {
    fn default() -> Self {
        Similarity::Cosine
    }
}

/// Segment payload encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VecEncoding {
    Flat = 0,
    Ann = 1,
}

impl VecEncoding {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Flat),
            1 => Some(Self::Ann),
            _ => None,
        }
    }
}

/// Pluggable ANN backend. The payload is a black-box blob; the frame_id
/// mapping travels outside it, like the flat encoding's id array.
pub trait AnnBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn build(&self, dim: u32, similarity: Similarity, vectors: &[f32], ids: &[u64])
        -> Result<Vec<u8>>;
    fn search(
        &self,
        payload: &[u8],
        similarity: Similarity,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<(u64, f32)>>;
}

fn invalid(reason: String) -> WaxError {
    WaxError::InvalidSegment {
        kind: SEGMENT_KIND_NAME,
        reason,
    }
}

/// Live flat vector index merged from all committed segments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorIndex {
    dim: u32,
    similarity: Similarity,
    vectors: Vec<f32>,
    ids: Vec<u64>,
}

impl VectorIndex {
    pub fn new(dim: u32, similarity: Similarity) -> Self {
        Self {
            dim,
            similarity,
            vectors: Vec::new(),
            ids: Vec::new(),
        }
    }

    pub fn dim(&self) -> u32 {
        self.dim
    }

    pub fn similarity(&self) -> Similarity {
        self.similarity
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Insert one vector. The caller decides normalisation: vectors are
    /// L2-normalised at insert iff the embedding provider declares
    /// `normalize = true`.
    pub fn add(&mut self, frame_id: u64, vector: &[f32], normalize: bool) -> Result<()> {
        if self.dim == 0 {
            self.dim = vector.len() as u32;
        }
        if vector.len() as u32 != self.dim {
            return Err(WaxError::Encoding(format!(
                "embedding of dim {} does not match index dim {}",
                vector.len(),
                self.dim
            )));
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(WaxError::Encoding(
                "embedding contains non-finite values".into(),
            ));
        }
        if normalize {
            let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm > 0.0 {
                self.vectors.extend(vector.iter().map(|v| v / norm));
            } else {
                self.vectors.extend_from_slice(vector);
            }
        } else {
            self.vectors.extend_from_slice(vector);
        }
        self.ids.push(frame_id);
        Ok(())
    }

    /// Merge a loaded segment into the live index.
    pub fn merge(&mut self, delta: &VectorIndex) -> Result<()> {
        if delta.is_empty() {
            return Ok(());
        }
        if self.dim == 0 {
            self.dim = delta.dim;
            self.similarity = delta.similarity;
        }
        if delta.dim != self.dim {
            return Err(invalid(format!(
                "segment dim {} does not match live index dim {}",
                delta.dim, self.dim
            )));
        }
        self.vectors.extend_from_slice(&delta.vectors);
        self.ids.extend_from_slice(&delta.ids);
        Ok(())
    }

    /// Iterate `(frame_id, vector)` pairs, e.g. for compaction.
    pub fn entries(&self) -> impl Iterator<Item = (u64, &[f32])> + '_ {
        let dim = self.dim as usize;
        self.ids
            .iter()
            .enumerate()
            .map(move |(i, &id)| (id, &self.vectors[i * dim..(i + 1) * dim]))
    }

    fn score(&self, offset: usize, query: &[f32]) -> f32 {
        let stored = &self.vectors[offset * self.dim as usize..(offset + 1) * self.dim as usize];
        match self.similarity {
            Similarity::InnerProduct => dot(stored, query),
            Similarity::Cosine => {
                let denom = norm(stored) * norm(query);
                if denom > 0.0 {
                    dot(stored, query) / denom
                } else {
                    0.0
                }
            }
            // Negated squared distance keeps "higher is better" uniform.
            Similarity::L2 => {
                -stored
                    .iter()
                    .zip(query)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f32>()
            }
        }
    }

    /// Brute-force top-k scan. Ranking is stable: descending score,
    /// ties broken by ascending frame_id.
    pub fn search<F>(&self, query: &[f32], k: usize, alive: F) -> Result<Vec<(u64, f32)>>
    where
        F: Fn(u64) -> bool + Sync,
    {
        if query.len() as u32 != self.dim && !self.is_empty() {
            return Err(WaxError::Encoding(format!(
                "query dim {} does not match index dim {}",
                query.len(),
                self.dim
            )));
        }
        let mut scored: Vec<(u64, f32)> = if self.ids.len() >= PARALLEL_SCAN_THRESHOLD {
            (0..self.ids.len())
                .into_par_iter()
                .filter(|&i| alive(self.ids[i]))
                .map(|i| (self.ids[i], self.score(i, query)))
                .collect()
        } else {
            (0..self.ids.len())
                .filter(|&i| alive(self.ids[i]))
                .map(|i| (self.ids[i], self.score(i, query)))
                .collect()
        };
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }

    // ── Slab codec ─────────────────────────────────────────────────

    /// Encode a flat segment slab: 36-byte header, payload, trailing
    /// digest. Returns the slab and its digest for the TOC entry.
    pub fn encode_slab(&self) -> (Vec<u8>, Digest32) {
        let count = self.ids.len() as u64;
        let payload_len = self.vectors.len() * 4 + 8 + self.ids.len() * 8;
        let mut buf = Vec::with_capacity(VEC_HEADER_SIZE + payload_len + DIGEST_SIZE);

        buf.extend_from_slice(&crate::format::MAGIC_VEC_SEGMENT);
        buf.extend_from_slice(&VEC_VERSION.to_le_bytes());
        buf.push(VecEncoding::Flat as u8);
        buf.push(self.similarity as u8);
        buf.extend_from_slice(&self.dim.to_le_bytes());
        buf.extend_from_slice(&count.to_le_bytes());
        buf.extend_from_slice(&(payload_len as u64).to_le_bytes());
        buf.extend_from_slice(&[0u8; 8]);

        for &v in &self.vectors {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf.extend_from_slice(&count.to_le_bytes());
        for &id in &self.ids {
            buf.extend_from_slice(&id.to_le_bytes());
        }

        let digest = sha256(&buf);
        buf.extend_from_slice(digest.as_bytes());
        (buf, digest)
    }

    /// Decode a vector segment slab. `ann` payloads are rejected unless
    /// a backend could interpret them; the caller holding a backend uses
    /// [`decode_header`] + the raw payload instead.
    pub fn decode_slab(slab: &[u8]) -> Result<Self> {
        let (header, payload) = decode_header(slab)?;
        if header.encoding != VecEncoding::Flat {
            return Err(invalid(
                "ann payload requires a registered ann backend".into(),
            ));
        }

        let dim = header.dim as usize;
        let count = header.vector_count as usize;
        let vector_bytes = dim * count * 4;
        let expected = vector_bytes + 8 + count * 8;
        if payload.len() != expected {
            return Err(invalid(format!(
                "flat payload of {} bytes, expected {expected}",
                payload.len()
            )));
        }

        let mut vectors = Vec::with_capacity(dim * count);
        for chunk in payload[..vector_bytes].chunks_exact(4) {
            let v = f32::from_le_bytes(chunk.try_into().unwrap());
            if !v.is_finite() {
                return Err(invalid("non-finite stored vector component".into()));
            }
            vectors.push(v);
        }
        let id_count = u64::from_le_bytes(
            payload[vector_bytes..vector_bytes + 8].try_into().unwrap(),
        );
        if id_count != header.vector_count {
            return Err(invalid(format!(
                "frame_id array length {id_count} disagrees with vector_count {}",
                header.vector_count
            )));
        }
        let mut ids = Vec::with_capacity(count);
        for chunk in payload[vector_bytes + 8..].chunks_exact(8) {
            ids.push(u64::from_le_bytes(chunk.try_into().unwrap()));
        }

        Ok(Self {
            dim: header.dim,
            similarity: header.similarity,
            vectors,
            ids,
        })
    }
}

/// Decoded 36-byte segment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VecSegmentHeader {
    pub encoding: VecEncoding,
    pub similarity: Similarity,
    pub dim: u32,
    pub vector_count: u64,
    pub payload_len: u64,
}

/// Verify the slab digest and parse the header, returning the payload
/// bytes.
pub fn decode_header(slab: &[u8]) -> Result<(VecSegmentHeader, &[u8])> {
    if slab.len() < VEC_HEADER_SIZE + DIGEST_SIZE {
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

    if slab[0..4] != crate::format::MAGIC_VEC_SEGMENT {
        return Err(invalid(format!("bad magic {:02x?}", &slab[0..4])));
    }
    let version = u16::from_le_bytes(slab[4..6].try_into().unwrap());
    if version != VEC_VERSION {
        return Err(invalid(format!("unsupported version {version}")));
    }
    let encoding = VecEncoding::from_u8(slab[6])
        .ok_or_else(|| invalid(format!("unknown encoding {}", slab[6])))?;
    let similarity = Similarity::from_u8(slab[7])
        .ok_or_else(|| invalid(format!("unknown similarity {}", slab[7])))?;
    let dim = u32::from_le_bytes(slab[8..12].try_into().unwrap());
    if dim > limits::MAX_EMBEDDING_DIM {
        return Err(invalid(format!(
            "dim {dim} exceeds cap {}",
            limits::MAX_EMBEDDING_DIM
        )));
    }
    let vector_count = u64::from_le_bytes(slab[12..20].try_into().unwrap());
    let payload_len = u64::from_le_bytes(slab[20..28].try_into().unwrap());
    if slab[28..36] != [0u8; 8] {
        return Err(invalid("reserved header bytes must be zero".into()));
    }
    if payload_len as usize != hashed_end - VEC_HEADER_SIZE {
        return Err(invalid(format!(
            "payload_len {payload_len} disagrees with slab of {} bytes",
            slab.len()
        )));
    }

    Ok((
        VecSegmentHeader {
            encoding,
            similarity,
            dim,
            vector_count,
            payload_len,
        },
        &slab[VEC_HEADER_SIZE..hashed_end],
    ))
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(vectors: &[(u64, Vec<f32>)], similarity: Similarity) -> VectorIndex {
        let mut index = VectorIndex::new(vectors[0].1.len() as u32, similarity);
        for (id, v) in vectors {
            index.add(*id, v, false).unwrap();
        }
        index
    }

    #[test]
    fn test_add_rejects_dim_mismatch() {
        let mut index = VectorIndex::new(3, Similarity::Cosine);
        assert!(index.add(1, &[1.0, 0.0, 0.0], false).is_ok());
        assert!(index.add(2, &[1.0, 0.0], false).is_err());
    }

    #[test]
    fn test_add_rejects_non_finite() {
        let mut index = VectorIndex::new(2, Similarity::Cosine);
        assert!(index.add(1, &[f32::NAN, 0.0], false).is_err());
        assert!(index.add(1, &[f32::INFINITY, 0.0], false).is_err());
    }

    #[test]
    fn test_normalised_insert_is_unit_length() {
        let mut index = VectorIndex::new(2, Similarity::Cosine);
        index.add(1, &[3.0, 4.0], true).unwrap();
        let stored = &index.vectors[0..2];
        let len = norm(stored);
        assert!((len - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_ranking() {
        let index = index_with(
            &[
                (1, vec![1.0, 0.0]),
                (2, vec![0.0, 1.0]),
                (3, vec![0.7, 0.7]),
            ],
            Similarity::Cosine,
        );
        let ranked = index.search(&[1.0, 0.1], 3, |_| true).unwrap();
        assert_eq!(ranked[0].0, 1);
        assert_eq!(ranked[1].0, 3);
        assert_eq!(ranked[2].0, 2);
    }

    #[test]
    fn test_l2_ranking_prefers_nearest() {
        let index = index_with(
            &[(1, vec![0.0, 0.0]), (2, vec![5.0, 5.0]), (3, vec![1.0, 1.0])],
            Similarity::L2,
        );
        let ranked = index.search(&[0.9, 0.9], 3, |_| true).unwrap();
        assert_eq!(ranked[0].0, 3);
        assert_eq!(ranked[1].0, 1);
        assert_eq!(ranked[2].0, 2);
    }

    #[test]
    fn test_tie_breaks_on_frame_id() {
        let index = index_with(
            &[(9, vec![1.0, 0.0]), (4, vec![1.0, 0.0])],
            Similarity::InnerProduct,
        );
        let ranked = index.search(&[1.0, 0.0], 2, |_| true).unwrap();
        assert_eq!(ranked[0].0, 4);
        assert_eq!(ranked[1].0, 9);
    }

    #[test]
    fn test_alive_filter() {
        let index = index_with(
            &[(1, vec![1.0, 0.0]), (2, vec![1.0, 0.0])],
            Similarity::Cosine,
        );
        let ranked = index.search(&[1.0, 0.0], 2, |id| id != 1).unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].0, 2);
    }

    #[test]
    fn test_slab_roundtrip() {
        let index = index_with(
            &[(7, vec![0.5, -0.25, 0.125]), (8, vec![1.0, 2.0, 3.0])],
            Similarity::Cosine,
        );
        let (slab, digest) = index.encode_slab();
        assert_eq!(digest, sha256(&slab[..slab.len() - DIGEST_SIZE]));

        let decoded = VectorIndex::decode_slab(&slab).unwrap();
        assert_eq!(decoded, index);
    }

    #[test]
    fn test_slab_header_fields() {
        let index = index_with(&[(1, vec![1.0, 2.0])], Similarity::L2);
        let (slab, _) = index.encode_slab();
        assert_eq!(&slab[0..4], b"MV2V");
        let (header, payload) = decode_header(&slab).unwrap();
        assert_eq!(header.encoding, VecEncoding::Flat);
        assert_eq!(header.similarity, Similarity::L2);
        assert_eq!(header.dim, 2);
        assert_eq!(header.vector_count, 1);
        assert_eq!(header.payload_len as usize, payload.len());
    }

    #[test]
    fn test_nonzero_reserved_rejected() {
        let index = index_with(&[(1, vec![1.0, 2.0])], Similarity::Cosine);
        let (mut slab, _) = index.encode_slab();
        slab[30] = 1;
        // Digest covers the header, so fix it up to isolate the
        // reserved-bytes check.
        let hashed_end = slab.len() - DIGEST_SIZE;
        let digest = sha256(&slab[..hashed_end]);
        slab[hashed_end..].copy_from_slice(digest.as_bytes());

        let err = VectorIndex::decode_slab(&slab).unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_corrupt_slab_rejected() {
        let index = index_with(&[(1, vec![1.0, 2.0])], Similarity::Cosine);
        let (mut slab, _) = index.encode_slab();
        let mid = VEC_HEADER_SIZE + 2;
        slab[mid] ^= 0x40;
        let err = VectorIndex::decode_slab(&slab).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn test_merge_segments() {
        let a = index_with(&[(1, vec![1.0, 0.0])], Similarity::Cosine);
        let b = index_with(&[(2, vec![0.0, 1.0])], Similarity::Cosine);
        let mut live = VectorIndex::default();
        live.merge(&a).unwrap();
        live.merge(&b).unwrap();
        assert_eq!(live.len(), 2);

        let c = index_with(&[(3, vec![1.0, 0.0, 0.0])], Similarity::Cosine);
        assert!(live.merge(&c).is_err());
    }
}
