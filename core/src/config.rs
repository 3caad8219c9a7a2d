use crate::error::{Result, SearchError};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_ALPHA: f64 = 0.5;
pub const DEFAULT_RRF_K: f64 = 60.0;
pub const DEFAULT_SEARCH_LIMIT: usize = 5;
/// Candidates pulled from each source per requested result before fusion.
pub const SEARCH_MULTIPLIER: usize = 500;
/// Fused candidates handed to a reranker per requested result.
pub const RERANK_MULTIPLIER: usize = 5;
pub const DEFAULT_SEMANTIC_CHUNK_SIZE: usize = 4;
pub const DEFAULT_CHUNK_OVERLAP: usize = 1;
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 32;
pub const SCORE_PRECISION: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_sentences: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_sentences: DEFAULT_SEMANTIC_CHUNK_SIZE, overlap: DEFAULT_CHUNK_OVERLAP }
    }
}

/// What `load_or_create` does with embeddings already on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalenessPolicy {
    /// Presence of the artifacts is enough; corpus drift goes unnoticed.
    #[default]
    TrustDisk,
    /// Rebuild when the stored corpus fingerprint differs from the current corpus.
    VerifyFingerprint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub bm25: Bm25Params,
    pub chunking: ChunkingConfig,
    pub oversample_factor: usize,
    pub rerank_pool_factor: usize,
    pub default_alpha: f64,
    pub default_rrf_k: f64,
    pub default_limit: usize,
    pub embed_batch_size: usize,
    pub snippet_chars: usize,
    pub score_precision: u32,
    pub staleness: StalenessPolicy,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            bm25: Bm25Params::default(),
            chunking: ChunkingConfig::default(),
            oversample_factor: SEARCH_MULTIPLIER,
            rerank_pool_factor: RERANK_MULTIPLIER,
            default_alpha: DEFAULT_ALPHA,
            default_rrf_k: DEFAULT_RRF_K,
            default_limit: DEFAULT_SEARCH_LIMIT,
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            snippet_chars: 100,
            score_precision: SCORE_PRECISION,
            staleness: StalenessPolicy::default(),
        }
    }
}

impl SearchConfig {
    /// Read a JSON config file; missing fields fall back to defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let cfg: SearchConfig = serde_json::from_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.bm25.k1.is_finite() && self.bm25.k1 >= 0.0) {
            return Err(SearchError::Configuration(format!("bm25.k1 must be >= 0, got {}", self.bm25.k1)));
        }
        if !(0.0..=1.0).contains(&self.bm25.b) {
            return Err(SearchError::Configuration(format!("bm25.b must be in [0,1], got {}", self.bm25.b)));
        }
        crate::chunker::validate_window(self.chunking.max_sentences, self.chunking.overlap)?;
        if self.oversample_factor == 0 || self.rerank_pool_factor == 0 {
            return Err(SearchError::Configuration("oversample_factor and rerank_pool_factor must be > 0".into()));
        }
        if self.embed_batch_size == 0 {
            return Err(SearchError::Configuration("embed_batch_size must be > 0".into()));
        }
        validate_alpha(self.default_alpha)?;
        validate_rrf_k(self.default_rrf_k)?;
        validate_limit(self.default_limit)?;
        Ok(())
    }
}

pub fn validate_alpha(alpha: f64) -> Result<()> {
    if alpha.is_finite() && (0.0..=1.0).contains(&alpha) {
        Ok(())
    } else {
        Err(SearchError::Configuration(format!("alpha must be in [0,1], got {alpha}")))
    }
}

pub fn validate_rrf_k(k: f64) -> Result<()> {
    if k.is_finite() && k > 0.0 {
        Ok(())
    } else {
        Err(SearchError::Configuration(format!("k must be > 0, got {k}")))
    }
}

pub fn validate_limit(limit: usize) -> Result<()> {
    if limit > 0 {
        Ok(())
    } else {
        Err(SearchError::Configuration("limit must be > 0".into()))
    }
}
