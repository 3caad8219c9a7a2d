//! Hybrid search facade: lexical BM25 + chunked semantic retrieval, fused by
//! weighted min-max blending or by Reciprocal Rank Fusion.

use crate::config::{validate_alpha, validate_limit, validate_rrf_k, SearchConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::{Result, SearchError};
use crate::fusion::{reciprocal_rank_fusion, weighted_fusion};
use crate::index::LexicalIndex;
use crate::persist::{load_meta, IndexPaths, FORMAT_VERSION};
use crate::rerank::{enhance_query, local_reranker, EnhanceMethod, QueryEnhancer, RerankMethod, Reranker};
use crate::semantic::ChunkedSemanticIndex;
use crate::{Document, ResultMetadata, SearchResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

/// Optional stages around Reciprocal Rank Fusion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RrfOptions {
    pub enhance: Option<EnhanceMethod>,
    pub rerank: Option<RerankMethod>,
}

type Ranked<'a> = Vec<(&'a str, f64)>;

pub struct HybridSearch {
    lexical: LexicalIndex,
    semantic: ChunkedSemanticIndex,
    config: SearchConfig,
    enhancer: Option<Arc<dyn QueryEnhancer>>,
    rerankers: HashMap<RerankMethod, Arc<dyn Reranker>>,
}

impl HybridSearch {
    pub fn new(lexical: LexicalIndex, semantic: ChunkedSemanticIndex, config: SearchConfig) -> Self {
        Self { lexical, semantic, config, enhancer: None, rerankers: HashMap::new() }
    }

    /// Open persisted artifacts. Fails with `IndexNotFound` when the lexical
    /// index or either chunk file is missing, and with `Configuration` when
    /// `meta.json` records another format version.
    pub fn open(paths: &IndexPaths, provider: Arc<dyn EmbeddingProvider>, config: SearchConfig) -> Result<Self> {
        config.validate()?;
        if paths.meta().is_file() {
            let meta = load_meta(paths)?;
            if meta.version != FORMAT_VERSION {
                return Err(SearchError::Configuration(format!(
                    "index format version {} is not supported (expected {FORMAT_VERSION}); rebuild the index",
                    meta.version
                )));
            }
            tracing::info!(num_docs = meta.num_docs, created_at = %meta.created_at, "opening index");
        }
        let lexical = LexicalIndex::load_with(paths, config.bm25)?;
        let mut semantic = ChunkedSemanticIndex::new(provider, config.clone());
        semantic.load(lexical.documents(), paths)?;
        Ok(Self::new(lexical, semantic, config))
    }

    /// Reuse whatever artifacts exist for `documents` and build the rest.
    /// Nothing is written unless the corpus is non-empty and the lexical
    /// index builds.
    pub fn load_or_create(
        documents: &[Document],
        paths: &IndexPaths,
        provider: Arc<dyn EmbeddingProvider>,
        config: SearchConfig,
    ) -> Result<Self> {
        config.validate()?;
        if documents.is_empty() {
            return Err(SearchError::EmptyCorpus);
        }

        let (lexical, built) = if paths.has_lexical() {
            (LexicalIndex::load_with(paths, config.bm25)?, false)
        } else {
            (LexicalIndex::build_with(documents, Default::default(), config.bm25)?, true)
        };

        let mut semantic = ChunkedSemanticIndex::new(provider, config.clone());
        semantic.load_or_create(documents, paths)?;
        if built {
            lexical.save(paths)?;
        }
        Ok(Self::new(lexical, semantic, config))
    }

    pub fn with_enhancer(mut self, enhancer: Arc<dyn QueryEnhancer>) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    /// Register the collaborator used for `method`. Methods without one fall
    /// back to the local term-overlap reranker.
    pub fn with_reranker(mut self, method: RerankMethod, reranker: Arc<dyn Reranker>) -> Self {
        self.rerankers.insert(method, reranker);
        self
    }

    pub fn config(&self) -> &SearchConfig { &self.config }

    pub fn lexical(&self) -> &LexicalIndex { &self.lexical }

    pub fn semantic(&self) -> &ChunkedSemanticIndex { &self.semantic }

    pub fn document(&self, id: &str) -> Option<&Document> {
        self.lexical.document(id).or_else(|| self.semantic.document(id))
    }

    pub fn bm25_search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        validate_limit(limit)?;
        Ok(self.lexical.bm25_search_with(query, limit, &self.config))
    }

    pub fn search_chunks(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        validate_limit(limit)?;
        self.semantic.search_chunks(query, limit)
    }

    /// Oversampled candidates from both sources, fetched concurrently.
    fn candidates(&self, query: &str, limit: usize) -> Result<(Ranked<'_>, Ranked<'_>)> {
        let n = limit.saturating_mul(self.config.oversample_factor);
        let (lexical, semantic) = rayon::join(|| self.lexical.rank(query, n), || self.semantic.rank(query, n));

        let lexical: Ranked<'_> = lexical
            .into_iter()
            .filter_map(|(d, s)| self.lexical.document_by_doc_id(d).map(|doc| (doc.id.as_str(), s)))
            .collect();
        let semantic: Ranked<'_> = semantic?
            .into_iter()
            .filter_map(|h| self.semantic.document_at(h.doc_pos).map(|doc| (doc.id.as_str(), h.score)))
            .collect();
        tracing::debug!(lexical = lexical.len(), semantic = semantic.len(), "fusion candidates");
        Ok((lexical, semantic))
    }

    fn result(&self, id: &str, score: f64, metadata: ResultMetadata) -> Option<SearchResult> {
        self.document(id).map(|doc| {
            SearchResult::from_document(doc, score, self.config.snippet_chars, self.config.score_precision)
                .with_metadata(metadata)
        })
    }

    #[instrument(skip(self))]
    pub fn weighted_search(&self, query: &str, alpha: f64, limit: usize) -> Result<Vec<SearchResult>> {
        validate_alpha(alpha)?;
        validate_limit(limit)?;

        let (lexical, semantic) = self.candidates(query, limit)?;
        let fused = weighted_fusion(&lexical, &semantic, alpha);
        Ok(fused
            .into_iter()
            .filter_map(|h| {
                let meta = ResultMetadata {
                    bm25_score: Some(h.bm25_score),
                    semantic_score: Some(h.semantic_score),
                    ..Default::default()
                };
                self.result(h.key, h.score, meta)
            })
            .take(limit)
            .collect())
    }

    #[instrument(skip(self))]
    pub fn rrf_search(&self, query: &str, k: f64, limit: usize, opts: RrfOptions) -> Result<Vec<SearchResult>> {
        validate_rrf_k(k)?;
        validate_limit(limit)?;
        if opts.enhance.is_some() && self.enhancer.is_none() {
            return Err(SearchError::Configuration("query enhancement requested but no enhancer is configured".into()));
        }

        let query = match (opts.enhance, &self.enhancer) {
            (Some(method), Some(enhancer)) => {
                let enhanced = enhance_query(enhancer.as_ref(), query, method).map_err(|e| SearchError::Enhance(e.to_string()))?;
                tracing::info!(original = query, enhanced = %enhanced, ?method, "query enhanced");
                enhanced
            }
            _ => query.to_string(),
        };

        let (lexical, semantic) = self.candidates(&query, limit)?;
        let fused = reciprocal_rank_fusion(&lexical, &semantic, k);
        let pool = match opts.rerank {
            Some(_) => limit.saturating_mul(self.config.rerank_pool_factor),
            None => limit,
        };
        let results: Vec<SearchResult> = fused
            .into_iter()
            .filter_map(|h| {
                let meta = ResultMetadata { bm25_rank: h.bm25_rank, semantic_rank: h.semantic_rank, ..Default::default() };
                self.result(h.key, h.score, meta)
            })
            .take(pool)
            .collect();

        match opts.rerank {
            Some(method) => {
                let reranker = self.rerankers.get(&method).cloned().unwrap_or_else(|| Arc::from(local_reranker(method)));
                let mut reranked = reranker.rerank(&query, results, limit)?;
                reranked.truncate(limit);
                Ok(reranked)
            }
            None => Ok(results),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;

    fn corpus() -> Vec<Document> {
        vec![
            Document::new("1", "Alien", "A crew in deep space meets a hostile creature."),
            Document::new("2", "Paddington", "A bear travels to London and loves marmalade."),
            Document::new("3", "The Revenant", "A frontiersman is mauled by a grizzly bear in the wilderness."),
            Document::new("4", "Ratatouille", "A rat dreams of becoming a chef in Paris."),
        ]
    }

    fn engine(dir: &std::path::Path) -> HybridSearch {
        let paths = IndexPaths::new(dir);
        HybridSearch::load_or_create(&corpus(), &paths, Arc::new(HashingEmbedder::new(256)), SearchConfig::default()).unwrap()
    }

    #[test]
    fn rejects_bad_parameters_before_searching() {
        let dir = tempfile::tempdir().unwrap();
        let hs = engine(dir.path());
        assert!(matches!(hs.weighted_search("bear", 1.5, 3), Err(SearchError::Configuration(_))));
        assert!(matches!(hs.weighted_search("bear", 0.5, 0), Err(SearchError::Configuration(_))));
        assert!(matches!(hs.rrf_search("bear", 0.0, 3, RrfOptions::default()), Err(SearchError::Configuration(_))));
        let opts = RrfOptions { enhance: Some(EnhanceMethod::Spell), rerank: None };
        assert!(matches!(hs.rrf_search("bear", 60.0, 3, opts), Err(SearchError::Configuration(_))));
    }

    #[test]
    fn results_are_bounded_and_unique() {
        let dir = tempfile::tempdir().unwrap();
        let hs = engine(dir.path());
        for limit in 1..=5 {
            for results in [
                hs.weighted_search("bear london", 0.5, limit).unwrap(),
                hs.rrf_search("bear london", 60.0, limit, RrfOptions::default()).unwrap(),
            ] {
                assert!(results.len() <= limit);
                let mut ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
                ids.sort();
                ids.dedup();
                assert_eq!(ids.len(), results.len());
            }
        }
    }

    #[test]
    fn alpha_one_matches_lexical_order() {
        let dir = tempfile::tempdir().unwrap();
        let hs = engine(dir.path());
        let lexical: Vec<String> = hs.bm25_search("bear", 10).unwrap().into_iter().map(|r| r.id).collect();
        let weighted: Vec<String> = hs
            .weighted_search("bear", 1.0, 10)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .take(lexical.len())
            .collect();
        assert_eq!(weighted, lexical);
    }

    #[test]
    fn alpha_zero_matches_semantic_order() {
        let dir = tempfile::tempdir().unwrap();
        let hs = engine(dir.path());
        let semantic: Vec<String> = hs.search_chunks("bear wilderness", 10).unwrap().into_iter().map(|r| r.id).collect();
        let weighted: Vec<String> = hs
            .weighted_search("bear wilderness", 0.0, 10)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .take(semantic.len())
            .collect();
        assert_eq!(weighted, semantic);
    }

    #[test]
    fn rerank_draws_from_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let hs = engine(dir.path());
        let opts = RrfOptions { enhance: None, rerank: Some(RerankMethod::Batch) };
        let reranked = hs.rrf_search("grizzly bear", 60.0, 2, opts).unwrap();
        assert!(reranked.len() <= 2);
        assert_eq!(reranked[0].id, "3");
    }

    #[test]
    fn empty_corpus_leaves_no_artifacts_behind() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let res = HybridSearch::load_or_create(&[], &paths, Arc::new(HashingEmbedder::new(256)), SearchConfig::default());
        assert!(matches!(res, Err(SearchError::EmptyCorpus)));
        assert!(!paths.has_chunk_store());
        assert!(!paths.has_lexical());

        let hs = engine(dir.path());
        assert!(hs.semantic().store().is_some_and(|s| !s.is_empty()));
        assert!(!hs.search_chunks("grizzly bear", 4).unwrap().is_empty());
    }

    #[test]
    fn open_requires_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let res = HybridSearch::open(&paths, Arc::new(HashingEmbedder::new(256)), SearchConfig::default());
        assert!(matches!(res, Err(SearchError::IndexNotFound(_))));

        engine(dir.path());
        let hs = HybridSearch::open(&paths, Arc::new(HashingEmbedder::new(256)), SearchConfig::default()).unwrap();
        assert_eq!(hs.lexical().len(), 4);
        assert!(hs.semantic().is_loaded());
    }

    #[test]
    fn open_rejects_other_format_versions() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        engine(dir.path());
        crate::persist::save_meta(&paths, &crate::persist::MetaFile::new(&corpus())).unwrap();
        assert!(HybridSearch::open(&paths, Arc::new(HashingEmbedder::new(256)), SearchConfig::default()).is_ok());

        let stale = crate::persist::MetaFile { version: FORMAT_VERSION + 1, ..crate::persist::MetaFile::new(&corpus()) };
        crate::persist::save_meta(&paths, &stale).unwrap();
        let res = HybridSearch::open(&paths, Arc::new(HashingEmbedder::new(256)), SearchConfig::default());
        assert!(matches!(res, Err(SearchError::Configuration(_))));
    }
}
