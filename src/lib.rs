//! Wax — a crash-safe, single-file memory engine for
//! retrieval-augmented generation.
//!
//! Content is stored as immutable frames inside one self-describing
//! MV2S file, protected by twin header pages, an embedded write-ahead
//! log, and a checksummed table of contents. Retrieval runs a hybrid
//! text + vector pipeline fused with weighted reciprocal-rank fusion,
//! next to a bi-temporal structured fact store sharing the same
//! durability contract.
//!
//! ```no_run
//! use wax::{Engine, RememberOptions, SearchOptions, StoreOptions};
//!
//! # async fn demo() -> wax::Result<()> {
//! let engine = Engine::open("notes.mv2s", StoreOptions::default()).await?;
//! engine.remember("the quick brown fox", RememberOptions::default()).await?;
//! let _hits = engine.search("quick fox", SearchOptions::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod codec;
pub mod compress;
pub mod engine;
pub mod error;
pub mod format;
pub mod index;
pub mod io;
pub mod options;
pub mod provider;
pub mod store;
pub mod structured;
pub mod wal;

pub use compress::Compression;
pub use engine::{ContextItem, Engine, Hit};
pub use error::{Result, WaxError};
pub use index::fusion::FusionConfig;
pub use index::vector::{AnnBackend, Similarity};
pub use options::{
    RememberBatchOptions, RememberOptions, SearchMode, SearchOptions, StoreOptions, TimeRange,
};
pub use provider::{Chunker, ChunkStrategy, EmbeddingProvider, ProviderIdentity};
pub use store::frames::{FrameKind, Metadata, MetadataValue};
pub use store::{FrameMeta, Store, StoreStats};
pub use structured::store::{FactRemove, FactUpsert, StructuredMutation};
pub use structured::{
    AsOf, Direction, EdgeQueryResult, EdgeView, EntityKey, Evidence, FactValue, FactView, Span,
};
