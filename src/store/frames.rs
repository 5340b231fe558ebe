//! Frame records and frame-page segment bodies.
//!
//! A frame is one immutable unit of stored content. The same record
//! encoding is used for WAL `frame_write` bodies and for the records
//! inside a `frame_page` segment, so replay and segment load share one
//! decoder.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::checksum::{Digest32, DIGEST_SIZE};
use crate::codec::{limits, ByteReader, ByteWriter};
use crate::compress::Compression;
use crate::error::{Result, WaxError};

/// Frame kind, stored as a single byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FrameKind {
    Text = 0,
    ImageText = 1,
    StructuredEvidence = 2,
    Tombstone = 3,
}

impl FrameKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Text),
            1 => Some(Self::ImageText),
            2 => Some(Self::StructuredEvidence),
            3 => Some(Self::Tombstone),
            _ => None,
        }
    }
}

/// Scalar metadata value attached to a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Str(String),
    I64(i64),
    F64(f64),
    Bool(bool),
}

impl MetadataValue {
    fn encode(&self, w: &mut ByteWriter) -> Result<()> {
        match self {
            MetadataValue::Str(s) => {
                w.put_u8(0);
                w.put_str(s);
            }
            MetadataValue::I64(v) => {
                w.put_u8(1);
                w.put_i64(*v);
            }
            MetadataValue::F64(v) => {
                w.put_u8(2);
                w.put_f64(*v)?;
            }
            MetadataValue::Bool(v) => {
                w.put_u8(3);
                w.put_u8(u8::from(*v));
            }
        }
        Ok(())
    }

    fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        match r.read_u8()? {
            0 => Ok(MetadataValue::Str(r.read_str()?)),
            1 => Ok(MetadataValue::I64(r.read_i64()?)),
            2 => Ok(MetadataValue::F64(r.read_f64()?)),
            3 => Ok(MetadataValue::Bool(r.read_u8()? != 0)),
            tag => Err(WaxError::Encoding(format!(
                "unknown metadata value tag {tag}"
            ))),
        }
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// One frame record, as written to the WAL and to frame pages.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    pub frame_id: u64,
    pub kind: FrameKind,
    pub created_at_ms: i64,
    pub compression: Compression,
    pub uncompressed_len: u64,
    pub payload_sha256: Digest32,
    /// Referenced frame when `kind` is `Tombstone`.
    pub tombstone_target: Option<u64>,
    pub metadata: Metadata,
    pub embedding: Option<Vec<f32>>,
    /// Compressed payload bytes.
    pub payload: Vec<u8>,
}

/// Location of a record's payload within the byte buffer it was decoded
/// from, used to derive absolute file offsets for lazy payload reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadSpan {
    pub offset: usize,
    pub len: usize,
}

impl FrameRecord {
    pub fn embedding_dim(&self) -> u32 {
        self.embedding.as_ref().map_or(0, |v| v.len() as u32)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = ByteWriter::with_capacity(96 + self.payload.len());
        w.put_u64(self.frame_id);
        w.put_u8(self.kind as u8);
        w.put_i64(self.created_at_ms);
        w.put_u8(self.compression as u8);
        w.put_u64(self.uncompressed_len);
        w.put_raw(self.payload_sha256.as_bytes());
        w.put_u64(self.tombstone_target.unwrap_or(0));

        w.put_u64(self.metadata.len() as u64);
        for (key, value) in &self.metadata {
            w.put_str(key);
            value.encode(&mut w)?;
        }

        let dim = self.embedding_dim();
        if dim > limits::MAX_EMBEDDING_DIM {
            return Err(WaxError::Encoding(format!(
                "embedding dimension {dim} exceeds cap {}",
                limits::MAX_EMBEDDING_DIM
            )));
        }
        w.put_u32(dim);
        if let Some(vector) = &self.embedding {
            let mut raw = Vec::with_capacity(vector.len() * 4);
            for &v in vector {
                raw.extend_from_slice(&v.to_le_bytes());
            }
            w.put_raw(&raw);
        }

        w.put_bytes(&self.payload);
        Ok(w.into_bytes())
    }

    /// Decode one record. The returned span locates the payload bytes
    /// within the buffer the reader was constructed over.
    pub fn decode(r: &mut ByteReader<'_>) -> Result<(Self, PayloadSpan)> {
        let frame_id = r.read_u64()?;
        let kind_byte = r.read_u8()?;
        let kind = FrameKind::from_u8(kind_byte)
            .ok_or_else(|| WaxError::Encoding(format!("unknown frame kind {kind_byte}")))?;
        let created_at_ms = r.read_i64()?;
        let comp_byte = r.read_u8()?;
        let compression = Compression::from_u8(comp_byte)
            .ok_or_else(|| WaxError::Encoding(format!("unknown compression {comp_byte}")))?;
        let uncompressed_len = r.read_u64()?;
        let payload_sha256 = Digest32::from_slice(r.read_raw(DIGEST_SIZE)?).unwrap();
        let target = r.read_u64()?;
        let tombstone_target = if target == 0 { None } else { Some(target) };

        let meta_count = r.read_array_len()?;
        let mut metadata = Metadata::new();
        for _ in 0..meta_count {
            let key = r.read_str()?;
            let value = MetadataValue::decode(r)?;
            metadata.insert(key, value);
        }

        let dim = r.read_u32()?;
        if dim > limits::MAX_EMBEDDING_DIM {
            return Err(WaxError::Encoding(format!(
                "embedding dimension {dim} exceeds cap {}",
                limits::MAX_EMBEDDING_DIM
            )));
        }
        let embedding = if dim == 0 {
            None
        } else {
            let raw = r.read_raw(dim as usize * 4)?;
            let mut vector = Vec::with_capacity(dim as usize);
            for chunk in raw.chunks_exact(4) {
                vector.push(f32::from_le_bytes(chunk.try_into().unwrap()));
            }
            Some(vector)
        };

        // The payload blob: u64 length prefix, then the bytes whose
        // position we report back to the caller.
        let payload_len = r.read_u64()?;
        if payload_len > limits::MAX_BLOB_BYTES {
            return Err(WaxError::Encoding(format!(
                "payload of {payload_len} bytes exceeds cap {}",
                limits::MAX_BLOB_BYTES
            )));
        }
        let offset = r.consumed();
        let payload = r.read_raw(payload_len as usize)?.to_vec();

        Ok((
            Self {
                frame_id,
                kind,
                created_at_ms,
                compression,
                uncompressed_len,
                payload_sha256,
                tombstone_target,
                metadata,
                embedding,
                payload,
            },
            PayloadSpan {
                offset,
                len: payload_len as usize,
            },
        ))
    }
}

/// Encode a frame-page segment body: record count, then records.
pub fn encode_frame_page(records: &[FrameRecord]) -> Result<Vec<u8>> {
    let mut w = ByteWriter::new();
    w.put_u64(records.len() as u64);
    for record in records {
        w.put_raw(&record.encode()?);
    }
    Ok(w.into_bytes())
}

/// Decode a frame-page segment body. Each record comes with the span of
/// its payload inside `body`.
pub fn decode_frame_page(body: &[u8]) -> Result<Vec<(FrameRecord, PayloadSpan)>> {
    let mut r = ByteReader::new(body);
    let count = r.read_array_len()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(FrameRecord::decode(&mut r)?);
    }
    r.finish()?;
    Ok(out)
}
