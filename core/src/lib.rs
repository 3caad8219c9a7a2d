//! Hybrid document retrieval: BM25 keyword search, chunked embedding search,
//! and their fusion by weighted score blending or Reciprocal Rank Fusion.

pub mod builder;
pub mod chunker;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod evaluation;
pub mod fusion;
pub mod hybrid;
pub mod index;
pub mod persist;
pub mod rerank;
pub mod semantic;
pub mod store;
pub mod tokenizer;

pub use config::SearchConfig;
pub use document::{Document, ResultMetadata, SearchResult};
pub use error::{Result, SearchError};
pub use hybrid::{HybridSearch, RrfOptions};
pub use index::{DocId, LexicalIndex, TermId};
pub use persist::IndexPaths;
