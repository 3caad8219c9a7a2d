use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while splitting text into chunks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    /// The window would never advance, or has no room for a single unit.
    #[error("invalid chunk config: max={max}, overlap={overlap}")]
    InvalidConfig { max: usize, overlap: usize },
}

/// Errors surfaced by an embedding provider.
#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    #[error("embedding provider failed: {0}")]
    Provider(String),
    #[error("provider returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
    #[error("expected dimension {expected}, got {got}")]
    Dimension { expected: usize, got: usize },
}

/// Errors surfaced by a reranking or query-enhancement collaborator.
#[derive(Debug, Clone, Error)]
pub enum RerankError {
    #[error("reranker failed: {0}")]
    Provider(String),
    #[error("could not parse reranker output: {0}")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error(transparent)]
    InvalidChunkConfig(#[from] ChunkError),
    #[error("no index artifact at {}; build and save first", .0.display())]
    IndexNotFound(PathBuf),
    #[error("semantic index has no embeddings or chunk metadata loaded")]
    IndexNotLoaded,
    #[error("cannot build an index from an empty corpus")]
    EmptyCorpus,
    #[error("embedding dimension mismatch: store has {store}, query has {query}")]
    DimensionMismatch { store: usize, query: usize },
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Rerank(#[from] RerankError),
    #[error("query enhancement failed: {0}")]
    Enhance(String),
    #[error("index build cancelled")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for SearchError {
    fn from(err: bincode::Error) -> Self {
        SearchError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(err: serde_json::Error) -> Self {
        SearchError::Serialization(err.to_string())
    }
}

impl From<tempfile::PersistError> for SearchError {
    fn from(err: tempfile::PersistError) -> Self {
        SearchError::Io(err.error)
    }
}

pub type Result<T, E = SearchError> = std::result::Result<T, E>;
