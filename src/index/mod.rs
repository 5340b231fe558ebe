//! Secondary indexes layered over the frame store: the inverted text
//! index, the vector index, and their hybrid fusion ranker.

pub mod fusion;
pub mod text;
pub mod vector;

pub use fusion::{fuse, FusionConfig, QueryClass, QueryClassifier};
pub use text::{tokenize, TextIndex};
pub use vector::{AnnBackend, Similarity, VecEncoding, VectorIndex};
