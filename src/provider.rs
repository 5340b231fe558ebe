//! External collaborator interfaces: embedding providers and chunkers.
//!
//! The engine treats both as opaque trait objects. Provider inference
//! may be arbitrarily slow (GPU queues, network hops); it is always
//! awaited outside any store lock.

use serde::{Deserialize, Serialize};

use crate::codec::limits;
use crate::error::{Result, WaxError};

/// Identity of an embedding provider, persisted with stats so mixed
/// indexes can be detected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIdentity {
    pub provider: String,
    pub model: String,
    pub dimensions: u32,
    pub normalized: bool,
}

/// An embedding provider. Contracts: the returned vector's length
/// equals `dimensions()`, every value is finite, and when
/// `normalize()` is true the vector is L2-unit.
pub trait EmbeddingProvider: Send + Sync {
    fn dimensions(&self) -> u32;
    fn normalize(&self) -> bool;
    fn identity(&self) -> ProviderIdentity;
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Validate a provider-produced (or caller-supplied) vector against
/// the provider contracts.
pub fn validate_embedding(vector: &[f32], dimensions: u32, normalized: bool) -> Result<()> {
    if vector.len() as u32 != dimensions {
        return Err(WaxError::Encoding(format!(
            "embedding length {} does not match provider dimensions {dimensions}",
            vector.len()
        )));
    }
    if dimensions > limits::MAX_EMBEDDING_DIM {
        return Err(WaxError::Encoding(format!(
            "embedding dimension {dimensions} exceeds cap {}",
            limits::MAX_EMBEDDING_DIM
        )));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(WaxError::Encoding(
            "embedding contains non-finite values".into(),
        ));
    }
    if normalized {
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if (norm - 1.0).abs() > 1e-3 {
            return Err(WaxError::Encoding(format!(
                "provider declares normalize=true but vector norm is {norm}"
            )));
        }
    }
    Ok(())
}

/// Chunking strategy: token targets with overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkStrategy {
    Tokens {
        target_tokens: u32,
        overlap_tokens: u32,
    },
}

/// A text chunker. The core treats every produced chunk as an
/// independent remember call; the iterator is not assumed restartable.
pub trait Chunker: Send + Sync {
    fn chunk(&self, text: &str, strategy: ChunkStrategy) -> Result<Vec<String>>;
}
