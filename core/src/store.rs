//! On-disk embedding store: a bincode vector blob plus JSON chunk records.

use crate::error::{Result, SearchError};
use crate::persist::{self, IndexPaths};
use serde::{Deserialize, Serialize};

/// Row-major matrix of equal-length vectors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorBlob {
    dimension: u32,
    data: Vec<f32>,
}

impl VectorBlob {
    pub fn from_rows(dimension: usize, rows: Vec<Vec<f32>>) -> Result<Self> {
        let mut data = Vec::with_capacity(dimension * rows.len());
        for row in rows {
            if row.len() != dimension {
                return Err(SearchError::DimensionMismatch { store: dimension, query: row.len() });
            }
            data.extend(row);
        }
        Ok(Self { dimension: dimension as u32, data })
    }

    pub fn dimension(&self) -> usize { self.dimension as usize }

    pub fn len(&self) -> usize {
        if self.dimension == 0 { 0 } else { self.data.len() / self.dimension as usize }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimension.max(1) as usize)
    }

    fn check_shape(&self) -> Result<()> {
        let d = self.dimension as usize;
        if (d == 0 && !self.data.is_empty()) || (d > 0 && self.data.len() % d != 0) {
            return Err(SearchError::Serialization("vector blob length is not a multiple of its dimension".into()));
        }
        Ok(())
    }
}

/// Back-reference from a stored vector to its source chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub document_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChunkMetadataFile {
    chunks: Vec<ChunkRecord>,
    total_chunks: usize,
    #[serde(default)]
    fingerprint: String,
}

/// Chunk vectors and their records, aligned by position.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingStore {
    vectors: VectorBlob,
    chunks: Vec<ChunkRecord>,
    fingerprint: String,
}

impl EmbeddingStore {
    pub fn new(vectors: VectorBlob, chunks: Vec<ChunkRecord>, fingerprint: String) -> Result<Self> {
        if vectors.len() != chunks.len() {
            return Err(SearchError::Serialization(format!(
                "{} embeddings for {} chunk records",
                vectors.len(),
                chunks.len()
            )));
        }
        Ok(Self { vectors, chunks, fingerprint })
    }

    pub fn dimension(&self) -> usize { self.vectors.dimension() }

    pub fn len(&self) -> usize { self.chunks.len() }

    pub fn is_empty(&self) -> bool { self.chunks.is_empty() }

    pub fn fingerprint(&self) -> &str { &self.fingerprint }

    pub fn chunks(&self) -> &[ChunkRecord] { &self.chunks }

    pub fn iter(&self) -> impl Iterator<Item = (&ChunkRecord, &[f32])> {
        self.chunks.iter().zip(self.vectors.rows())
    }

    /// Vectors go first and metadata last; a store only counts as present once
    /// both files exist.
    pub fn save(&self, paths: &IndexPaths) -> Result<()> {
        persist::save_bincode(&paths.chunk_embeddings(), &self.vectors)?;
        let meta = ChunkMetadataFile {
            chunks: self.chunks.clone(),
            total_chunks: self.chunks.len(),
            fingerprint: self.fingerprint.clone(),
        };
        persist::save_json(&paths.chunk_metadata(), &meta)?;
        tracing::info!(chunks = self.chunks.len(), dimension = self.dimension(), "embedding store saved");
        Ok(())
    }

    pub fn load(paths: &IndexPaths) -> Result<Self> {
        let vectors: VectorBlob = persist::load_bincode(&paths.chunk_embeddings())?;
        vectors.check_shape()?;
        let meta: ChunkMetadataFile = persist::load_json(&paths.chunk_metadata())?;
        if meta.total_chunks != meta.chunks.len() {
            return Err(SearchError::Serialization(format!(
                "chunk metadata lists {} records but total_chunks is {}",
                meta.chunks.len(),
                meta.total_chunks
            )));
        }
        Self::new(vectors, meta.chunks, meta.fingerprint)
    }
}
