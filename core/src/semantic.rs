//! Embedding-based retrieval over whole documents and over chunks.
//!
//! Both indexes hold the same `EmbeddingProvider` capability; neither derives
//! from the other.

use crate::chunker::{self, Chunk};
use crate::config::{ChunkingConfig, SearchConfig, StalenessPolicy};
use crate::embedding::{cosine_similarity, embed_in_batches, EmbeddingProvider};
use crate::error::{EmbeddingError, Result, SearchError};
use crate::persist::{self, corpus_fingerprint, IndexPaths};
use crate::store::{ChunkRecord, EmbeddingStore, VectorBlob};
use crate::{Document, ResultMetadata, SearchResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

/// A document's best similarity to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SemanticHit {
    /// Position in the corpus the index was given.
    pub doc_pos: usize,
    pub score: f64,
    pub best_chunk: Option<usize>,
}

/// Embed a single query, checking the reply shape.
pub fn embed_query(provider: &dyn EmbeddingProvider, query: &str) -> Result<Vec<f32>> {
    let mut out = provider.embed(&[query.to_string()])?;
    if out.len() != 1 {
        return Err(EmbeddingError::CountMismatch { expected: 1, got: out.len() }.into());
    }
    let v = out.remove(0);
    if v.len() != provider.dimension() {
        return Err(EmbeddingError::Dimension { expected: provider.dimension(), got: v.len() }.into());
    }
    Ok(v)
}

fn sort_hits(hits: &mut Vec<SemanticHit>, limit: usize) {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.doc_pos.cmp(&b.doc_pos)));
    hits.truncate(limit);
}

#[derive(Debug, Clone, Default)]
struct Corpus {
    documents: Vec<Document>,
    positions: HashMap<String, usize>,
}

impl Corpus {
    fn new(documents: &[Document]) -> Self {
        let positions = documents.iter().enumerate().map(|(i, d)| (d.id.clone(), i)).collect();
        Self { documents: documents.to_vec(), positions }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    fn results(&self, hits: Vec<SemanticHit>, cfg: &SearchConfig) -> Vec<SearchResult> {
        hits.into_iter()
            .map(|h| {
                SearchResult::from_document(&self.documents[h.doc_pos], h.score, cfg.snippet_chars, cfg.score_precision)
                    .with_metadata(ResultMetadata {
                        semantic_score: Some(h.score),
                        best_chunk: h.best_chunk,
                        ..Default::default()
                    })
            })
            .collect()
    }
}

/// Sentence-chunked semantic index: each document is represented by its best
/// matching chunk.
pub struct ChunkedSemanticIndex {
    provider: Arc<dyn EmbeddingProvider>,
    config: SearchConfig,
    corpus: Corpus,
    store: Option<EmbeddingStore>,
}

impl ChunkedSemanticIndex {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: SearchConfig) -> Self {
        Self { provider, config, corpus: Corpus::default(), store: None }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> { &self.provider }

    pub fn chunking(&self) -> ChunkingConfig { self.config.chunking }

    pub fn is_loaded(&self) -> bool { self.store.is_some() }

    pub fn store(&self) -> Option<&EmbeddingStore> { self.store.as_ref() }

    pub fn documents(&self) -> &[Document] { &self.corpus.documents }

    /// Chunk every non-empty body. Empty bodies contribute no chunks.
    pub fn chunk_corpus(&self, documents: &[Document]) -> Result<Vec<Chunk>> {
        let ChunkingConfig { max_sentences, overlap } = self.config.chunking;
        let mut all = Vec::new();
        for doc in documents {
            if doc.body.trim().is_empty() {
                continue;
            }
            all.extend(chunker::chunk_document(&doc.id, &doc.body, max_sentences, overlap)?);
        }
        Ok(all)
    }

    /// Chunk and embed without touching disk or `self`. `on_progress` gets the
    /// number of embedded chunks and the total; returning `false` stops the work
    /// and yields `Ok(None)`.
    pub fn compute_store(
        &self,
        documents: &[Document],
        mut on_progress: impl FnMut(usize, usize) -> bool,
    ) -> Result<Option<EmbeddingStore>> {
        let chunks = self.chunk_corpus(documents)?;
        let total = chunks.len();
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = match embed_in_batches(self.provider.as_ref(), &texts, self.config.embed_batch_size, |done| {
            on_progress(done, total)
        })? {
            Some(v) => v,
            None => return Ok(None),
        };
        let records = chunks
            .into_iter()
            .map(|c| ChunkRecord { document_id: c.document_id, chunk_index: c.chunk_index, total_chunks: c.total_chunks })
            .collect();
        let blob = VectorBlob::from_rows(self.provider.dimension(), vectors)?;
        Ok(Some(EmbeddingStore::new(blob, records, corpus_fingerprint(documents))?))
    }

    /// Adopt a store computed for `documents`.
    pub fn install(&mut self, documents: &[Document], store: EmbeddingStore) {
        self.corpus = Corpus::new(documents);
        self.store = Some(store);
    }

    #[instrument(skip_all, fields(num_docs = documents.len()))]
    pub fn build_chunk_embeddings(&mut self, documents: &[Document], paths: &IndexPaths) -> Result<&EmbeddingStore> {
        let store = self
            .compute_store(documents, |_, _| true)?
            .ok_or(SearchError::Cancelled)?;
        store.save(paths)?;
        tracing::info!(chunks = store.len(), "chunk embeddings built");
        self.install(documents, store);
        Ok(self.store.as_ref().ok_or(SearchError::IndexNotLoaded)?)
    }

    /// Load the persisted store for `documents` without building.
    pub fn load(&mut self, documents: &[Document], paths: &IndexPaths) -> Result<()> {
        let store = EmbeddingStore::load(paths)?;
        if store.dimension() != self.provider.dimension() && !store.is_empty() {
            return Err(SearchError::DimensionMismatch { store: store.dimension(), query: self.provider.dimension() });
        }
        self.install(documents, store);
        Ok(())
    }

    /// Load when both chunk artifacts exist, otherwise build. Under
    /// `TrustDisk` an existing store is used as-is even if the corpus changed.
    /// Under `VerifyFingerprint` a store built for other documents or another
    /// embedding dimension is rebuilt.
    pub fn load_or_create(&mut self, documents: &[Document], paths: &IndexPaths) -> Result<()> {
        if paths.has_chunk_store() {
            if self.config.staleness == StalenessPolicy::TrustDisk {
                return self.load(documents, paths);
            }
            let store = EmbeddingStore::load(paths)?;
            let dimension_ok = store.is_empty() || store.dimension() == self.provider.dimension();
            let fingerprint_ok = store.fingerprint() == corpus_fingerprint(documents);
            if dimension_ok && fingerprint_ok {
                self.install(documents, store);
                return Ok(());
            }
            tracing::warn!(dimension_ok, fingerprint_ok, "chunk embeddings do not match the corpus; rebuilding");
        }
        self.build_chunk_embeddings(documents, paths)?;
        Ok(())
    }

    /// Per-document maximum chunk similarity, best first.
    pub fn rank(&self, query: &str, limit: usize) -> Result<Vec<SemanticHit>> {
        let store = self.store.as_ref().ok_or(SearchError::IndexNotLoaded)?;
        let q = embed_query(self.provider.as_ref(), query)?;
        if !store.is_empty() && q.len() != store.dimension() {
            return Err(SearchError::DimensionMismatch { store: store.dimension(), query: q.len() });
        }

        let mut best: HashMap<usize, SemanticHit> = HashMap::new();
        let mut orphans = 0usize;
        for (record, vector) in store.iter() {
            let Some(doc_pos) = self.corpus.position(&record.document_id) else {
                orphans += 1;
                continue;
            };
            let score = cosine_similarity(&q, vector) as f64;
            let entry = best.entry(doc_pos).or_insert(SemanticHit { doc_pos, score, best_chunk: Some(record.chunk_index) });
            if score > entry.score {
                entry.score = score;
                entry.best_chunk = Some(record.chunk_index);
            }
        }
        if orphans > 0 {
            tracing::warn!(orphans, "chunks reference documents missing from the corpus");
        }

        let mut hits: Vec<SemanticHit> = best.into_values().collect();
        sort_hits(&mut hits, limit);
        tracing::debug!(candidates = hits.len(), "chunk search ranked");
        Ok(hits)
    }

    pub fn search_chunks(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let hits = self.rank(query, limit)?;
        Ok(self.corpus.results(hits, &self.config))
    }

    pub fn document_at(&self, pos: usize) -> Option<&Document> {
        self.corpus.documents.get(pos)
    }

    pub fn document(&self, id: &str) -> Option<&Document> {
        self.corpus.position(id).map(|p| &self.corpus.documents[p])
    }
}

/// One vector per document, keyed by document id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentEmbeddings {
    ids: Vec<String>,
    vectors: VectorBlob,
    fingerprint: String,
}

impl DocumentEmbeddings {
    /// Embed `"{title}: {body}"` for every document. `on_batch` works as in
    /// `embed_in_batches`; a `false` return yields `Ok(None)`.
    pub fn compute(
        provider: &dyn EmbeddingProvider,
        documents: &[Document],
        batch_size: usize,
        on_batch: impl FnMut(usize) -> bool,
    ) -> Result<Option<Self>> {
        if documents.is_empty() {
            return Err(SearchError::EmptyCorpus);
        }
        let texts: Vec<String> = documents.iter().map(|d| format!("{}: {}", d.title, d.body)).collect();
        let Some(vectors) = embed_in_batches(provider, &texts, batch_size, on_batch)? else {
            return Ok(None);
        };
        Ok(Some(Self {
            ids: documents.iter().map(|d| d.id.clone()).collect(),
            vectors: VectorBlob::from_rows(provider.dimension(), vectors)?,
            fingerprint: corpus_fingerprint(documents),
        }))
    }

    pub fn len(&self) -> usize { self.ids.len() }

    pub fn is_empty(&self) -> bool { self.ids.is_empty() }

    pub fn save(&self, paths: &IndexPaths) -> Result<()> {
        persist::save_bincode(&paths.document_embeddings(), self)
    }

    pub fn load(paths: &IndexPaths) -> Result<Self> {
        persist::load_bincode(&paths.document_embeddings())
    }
}

/// One embedding per document over `"{title}: {body}"`.
pub struct DocumentSemanticIndex {
    provider: Arc<dyn EmbeddingProvider>,
    config: SearchConfig,
    corpus: Corpus,
    embeddings: Option<DocumentEmbeddings>,
}

impl DocumentSemanticIndex {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: SearchConfig) -> Self {
        Self { provider, config, corpus: Corpus::default(), embeddings: None }
    }

    pub fn is_loaded(&self) -> bool { self.embeddings.is_some() }

    pub fn install(&mut self, documents: &[Document], embeddings: DocumentEmbeddings) {
        self.corpus = Corpus::new(documents);
        self.embeddings = Some(embeddings);
    }

    #[instrument(skip_all, fields(num_docs = documents.len()))]
    pub fn build_embeddings(&mut self, documents: &[Document], paths: &IndexPaths) -> Result<()> {
        let embeddings = DocumentEmbeddings::compute(self.provider.as_ref(), documents, self.config.embed_batch_size, |_| true)?
            .ok_or(SearchError::Cancelled)?;
        embeddings.save(paths)?;
        tracing::info!(docs = documents.len(), "document embeddings built");
        self.install(documents, embeddings);
        Ok(())
    }

    pub fn load_or_create(&mut self, documents: &[Document], paths: &IndexPaths) -> Result<()> {
        if paths.document_embeddings().is_file() {
            let embeddings = DocumentEmbeddings::load(paths)?;
            let stale = self.config.staleness == StalenessPolicy::VerifyFingerprint
                && (embeddings.fingerprint != corpus_fingerprint(documents)
                    || embeddings.vectors.dimension() != self.provider.dimension());
            let shape_ok = embeddings.ids.len() == embeddings.vectors.len();
            if !stale && shape_ok {
                self.install(documents, embeddings);
                return Ok(());
            }
            tracing::warn!(stale, shape_ok, "document embeddings unusable; rebuilding");
        }
        self.build_embeddings(documents, paths)
    }

    pub fn rank(&self, query: &str, limit: usize) -> Result<Vec<SemanticHit>> {
        let embeddings = self.embeddings.as_ref().ok_or(SearchError::IndexNotLoaded)?;
        let q = embed_query(self.provider.as_ref(), query)?;
        if q.len() != embeddings.vectors.dimension() {
            return Err(SearchError::DimensionMismatch { store: embeddings.vectors.dimension(), query: q.len() });
        }
        let mut hits: Vec<SemanticHit> = embeddings
            .ids
            .iter()
            .zip(embeddings.vectors.rows())
            .filter_map(|(id, v)| {
                self.corpus.position(id).map(|doc_pos| SemanticHit {
                    doc_pos,
                    score: cosine_similarity(&q, v) as f64,
                    best_chunk: None,
                })
            })
            .collect();
        sort_hits(&mut hits, limit);
        Ok(hits)
    }

    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let hits = self.rank(query, limit)?;
        Ok(self.corpus.results(hits, &self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;

    fn docs() -> Vec<Document> {
        vec![
            Document::new("1", "Alien", "A crew in deep space meets a hostile creature. They fight back."),
            Document::new("2", "Empty", "   "),
            Document::new("3", "Paddington", "A bear travels to London. He loves marmalade sandwiches."),
        ]
    }

    fn index() -> ChunkedSemanticIndex {
        ChunkedSemanticIndex::new(Arc::new(HashingEmbedder::new(128)), SearchConfig::default())
    }

    #[test]
    fn search_before_load_fails() {
        assert!(matches!(index().search_chunks("bear", 3), Err(SearchError::IndexNotLoaded)));
    }

    #[test]
    fn empty_bodies_have_no_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let mut idx = index();
        let store = idx.build_chunk_embeddings(&docs(), &paths).unwrap();
        assert!(store.chunks().iter().all(|c| c.document_id != "2"));
        assert_eq!(store.len(), 2);
        assert!(paths.has_chunk_store());
    }

    #[test]
    fn best_chunk_surfaces_document() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let mut idx = index();
        idx.build_chunk_embeddings(&docs(), &paths).unwrap();
        let results = idx.search_chunks("marmalade sandwiches", 3).unwrap();
        assert_eq!(results[0].id, "3");
        assert!(results.len() <= 2);
        assert!(results.iter().all(|r| r.id != "2"));
    }

    #[test]
    fn load_or_create_trusts_disk_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        index().load_or_create(&docs(), &paths).unwrap();

        let mut changed = docs();
        changed[0].body = "Completely different text about cooking.".into();
        let mut idx = index();
        idx.load_or_create(&changed, &paths).unwrap();
        let fp = idx.store().unwrap().fingerprint().to_string();
        assert_eq!(fp, corpus_fingerprint(&docs()));
    }

    #[test]
    fn fingerprint_policy_rebuilds_on_drift() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        index().load_or_create(&docs(), &paths).unwrap();

        let mut changed = docs();
        changed[0].body = "Completely different text about cooking.".into();
        let cfg = SearchConfig { staleness: StalenessPolicy::VerifyFingerprint, ..Default::default() };
        let mut idx = ChunkedSemanticIndex::new(Arc::new(HashingEmbedder::new(128)), cfg);
        idx.load_or_create(&changed, &paths).unwrap();
        assert_eq!(idx.store().unwrap().fingerprint(), corpus_fingerprint(&changed));
    }

    #[test]
    fn document_score_is_best_chunk_not_average() {
        let cfg = SearchConfig { chunking: ChunkingConfig { max_sentences: 1, overlap: 0 }, ..Default::default() };
        let embedder = HashingEmbedder::new(128);
        let mut idx = ChunkedSemanticIndex::new(Arc::new(embedder.clone()), cfg);
        let sentences = ["Rain fell over the harbour.", "Marmalade sandwiches are best at noon.", "Trains ran late again."];
        let corpus = vec![Document::new("m", "Mixed", sentences.join(" "))];
        let dir = tempfile::tempdir().unwrap();
        idx.build_chunk_embeddings(&corpus, &IndexPaths::new(dir.path())).unwrap();
        assert_eq!(idx.store().unwrap().len(), 3);

        let query = "marmalade sandwiches";
        let q = embedder.embed_one(query);
        let per_chunk: Vec<f64> = sentences.iter().map(|s| cosine_similarity(&q, &embedder.embed_one(s)) as f64).collect();
        let hits = idx.rank(query, 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].best_chunk, Some(1));
        assert!((hits[0].score - per_chunk[1]).abs() < 1e-6);
        let mean = per_chunk.iter().sum::<f64>() / per_chunk.len() as f64;
        assert!(hits[0].score > mean + 1e-3);
    }

    #[test]
    fn fingerprint_policy_rebuilds_on_dimension_change() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        index().load_or_create(&docs(), &paths).unwrap();

        let cfg = SearchConfig { staleness: StalenessPolicy::VerifyFingerprint, ..Default::default() };
        let mut idx = ChunkedSemanticIndex::new(Arc::new(HashingEmbedder::new(64)), cfg.clone());
        idx.load_or_create(&docs(), &paths).unwrap();
        assert_eq!(idx.store().unwrap().dimension(), 64);
        assert!(!idx.search_chunks("marmalade", 3).unwrap().is_empty());

        let mut trusting = ChunkedSemanticIndex::new(Arc::new(HashingEmbedder::new(32)), SearchConfig::default());
        assert!(matches!(trusting.load_or_create(&docs(), &paths), Err(SearchError::DimensionMismatch { .. })));

        let mut whole = DocumentSemanticIndex::new(Arc::new(HashingEmbedder::new(128)), SearchConfig::default());
        whole.load_or_create(&docs(), &paths).unwrap();
        let mut whole = DocumentSemanticIndex::new(Arc::new(HashingEmbedder::new(64)), cfg);
        whole.load_or_create(&docs(), &paths).unwrap();
        assert_eq!(whole.search("bear london", 1).unwrap()[0].id, "3");
    }

    #[test]
    fn whole_document_index() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let mut idx = DocumentSemanticIndex::new(Arc::new(HashingEmbedder::new(128)), SearchConfig::default());
        assert!(matches!(idx.search("bear", 1), Err(SearchError::IndexNotLoaded)));
        idx.load_or_create(&docs(), &paths).unwrap();
        let results = idx.search("bear london", 3).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, "3");
    }
}
