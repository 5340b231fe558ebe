//! SHA-256 digests for pages, WAL bodies, segments, TOC, and payloads.

use sha2::{Digest, Sha256};

/// Size of every digest in the file format.
pub const DIGEST_SIZE: usize = 32;

/// A 32-byte SHA-256 digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest32(pub [u8; DIGEST_SIZE]);

impl Digest32 {
    pub const ZERO: Digest32 = Digest32([0u8; DIGEST_SIZE]);

    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    /// Strictly lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; DIGEST_SIZE] = bytes.try_into().ok()?;
        Some(Digest32(arr))
    }
}

impl std::fmt::Display for Digest32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Incremental SHA-256 hasher (update / finalize).
#[derive(Debug, Default)]
pub struct Hasher {
    inner: Sha256,
}

impl Hasher {
    pub fn new() -> Self {
        Self {
            inner: Sha256::new(),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    pub fn finalize(self) -> Digest32 {
        Digest32(self.inner.finalize().into())
    }
}

/// One-shot digest of a byte slice.
pub fn sha256(bytes: &[u8]) -> Digest32 {
    Digest32(Sha256::digest(bytes).into())
}
