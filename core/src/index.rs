//! Inverted lexical index with BM25 ranking.

use crate::config::{Bm25Params, SearchConfig};
use crate::error::{Result, SearchError};
use crate::persist::{self, IndexPaths};
use crate::tokenizer::Analyzer;
use crate::{Document, SearchResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::instrument;

pub type TermId = u32;
/// Position of a document in build order; doubles as the tie-break key.
pub type DocId = u32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Posting {
    pub doc_id: DocId,
    pub tf: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexicalIndex {
    dictionary: HashMap<String, TermId>,
    /// Document frequency, indexed by term id.
    df: Vec<u32>,
    /// Postings per term, sorted by doc_id.
    postings: Vec<Vec<Posting>>,
    doc_lengths: Vec<u32>,
    avg_doc_length: f64,
    docs: Vec<Document>,
    doc_id_map: HashMap<String, DocId>,
    analyzer: Analyzer,
    params: Bm25Params,
}

impl LexicalIndex {
    pub fn build(documents: &[Document]) -> Result<Self> {
        Self::build_with(documents, Analyzer::default(), Bm25Params::default())
    }

    /// Tokenize every document once and derive postings, lengths and the
    /// average length from that single pass.
    #[instrument(skip_all, fields(num_docs = documents.len()))]
    pub fn build_with(documents: &[Document], analyzer: Analyzer, params: Bm25Params) -> Result<Self> {
        if documents.is_empty() {
            return Err(SearchError::EmptyCorpus);
        }

        let mut dictionary: HashMap<String, TermId> = HashMap::new();
        let mut df: Vec<u32> = Vec::new();
        let mut postings: Vec<Vec<Posting>> = Vec::new();
        let mut doc_lengths: Vec<u32> = Vec::with_capacity(documents.len());
        let mut doc_id_map: HashMap<String, DocId> = HashMap::with_capacity(documents.len());

        for (pos, doc) in documents.iter().enumerate() {
            let doc_id = pos as DocId;
            if doc_id_map.insert(doc.id.clone(), doc_id).is_some() {
                return Err(SearchError::Configuration(format!("duplicate document id {:?}", doc.id)));
            }

            let tokens = analyzer.analyze(&doc.searchable_text());
            doc_lengths.push(tokens.len() as u32);

            let mut tf_counts: HashMap<TermId, u32> = HashMap::new();
            for term in tokens {
                let tid = *dictionary.entry(term).or_insert_with(|| {
                    df.push(0);
                    postings.push(Vec::new());
                    (df.len() - 1) as TermId
                });
                *tf_counts.entry(tid).or_insert(0) += 1;
            }
            for (tid, tf) in tf_counts {
                df[tid as usize] += 1;
                postings[tid as usize].push(Posting { doc_id, tf });
            }
        }

        let total: u64 = doc_lengths.iter().map(|&l| l as u64).sum();
        let avg_doc_length = total as f64 / documents.len() as f64;
        tracing::info!(num_terms = dictionary.len(), avg_doc_length, "lexical index built");

        Ok(Self {
            dictionary,
            df,
            postings,
            doc_lengths,
            avg_doc_length,
            docs: documents.to_vec(),
            doc_id_map,
            analyzer,
            params,
        })
    }

    /// Replace this index with one built from `documents`. On error the
    /// current state is left untouched.
    pub fn rebuild(&mut self, documents: &[Document]) -> Result<()> {
        *self = Self::build_with(documents, self.analyzer, self.params)?;
        Ok(())
    }

    pub fn save(&self, paths: &IndexPaths) -> Result<()> {
        persist::save_bincode(&paths.lexical(), self)?;
        tracing::info!(path = %paths.lexical().display(), "lexical index saved");
        Ok(())
    }

    pub fn load(paths: &IndexPaths) -> Result<Self> {
        let idx: LexicalIndex = persist::load_bincode(&paths.lexical())?;
        tracing::info!(num_docs = idx.docs.len(), "lexical index loaded");
        Ok(idx)
    }

    /// Load a saved index and score with `params` instead of the build-time ones.
    pub fn load_with(paths: &IndexPaths, params: Bm25Params) -> Result<Self> {
        let mut idx = Self::load(paths)?;
        idx.set_params(params);
        Ok(idx)
    }

    pub fn params(&self) -> Bm25Params { self.params }

    /// k1/b only affect scoring, so they may change after the build.
    pub fn set_params(&mut self, params: Bm25Params) { self.params = params; }

    pub fn analyzer(&self) -> Analyzer { self.analyzer }

    pub fn len(&self) -> usize { self.docs.len() }

    pub fn is_empty(&self) -> bool { self.docs.is_empty() }

    pub fn documents(&self) -> &[Document] { &self.docs }

    pub fn avg_doc_length(&self) -> f64 { self.avg_doc_length }

    pub fn doc_length(&self, doc_id: DocId) -> Option<u32> {
        self.doc_lengths.get(doc_id as usize).copied()
    }

    pub fn document(&self, id: &str) -> Option<&Document> {
        self.doc_id_map.get(id).map(|&d| &self.docs[d as usize])
    }

    pub fn document_by_doc_id(&self, doc_id: DocId) -> Option<&Document> {
        self.docs.get(doc_id as usize)
    }

    /// Postings for an already analyzed term.
    pub fn postings(&self, term: &str) -> &[Posting] {
        self.dictionary
            .get(term)
            .map(|&tid| self.postings[tid as usize].as_slice())
            .unwrap_or(&[])
    }

    pub fn doc_frequency(&self, term: &str) -> u32 {
        self.dictionary.get(term).map(|&tid| self.df[tid as usize]).unwrap_or(0)
    }

    pub fn term_frequency(&self, doc_id: DocId, term: &str) -> u32 {
        let plist = self.postings(term);
        plist
            .binary_search_by_key(&doc_id, |p| p.doc_id)
            .map(|i| plist[i].tf)
            .unwrap_or(0)
    }

    /// ln((N - df + 0.5) / (df + 0.5) + 1)
    pub fn idf(&self, term: &str) -> f64 {
        let n = self.docs.len() as f64;
        let df = self.doc_frequency(term) as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Saturated, length-normalized term frequency component.
    pub fn bm25_tf(&self, doc_id: DocId, term: &str) -> f64 {
        let tf = self.term_frequency(doc_id, term) as f64;
        self.saturate(tf, doc_id)
    }

    pub fn bm25(&self, doc_id: DocId, term: &str) -> f64 {
        self.bm25_tf(doc_id, term) * self.idf(term)
    }

    fn saturate(&self, tf: f64, doc_id: DocId) -> f64 {
        let Bm25Params { k1, b } = self.params;
        let len = self.doc_lengths[doc_id as usize] as f64;
        let norm = if self.avg_doc_length > 0.0 { len / self.avg_doc_length } else { 0.0 };
        (tf * (k1 + 1.0)) / (tf + k1 * (1.0 - b + b * norm))
    }

    /// Raw BM25 ranking: `(doc_id, score)` for every document sharing a term with
    /// the query, best first, ties in build order.
    pub fn rank(&self, query: &str, limit: usize) -> Vec<(DocId, f64)> {
        let mut scores: HashMap<DocId, f64> = HashMap::new();
        for term in self.analyzer.analyze(query) {
            let Some(&tid) = self.dictionary.get(&term) else { continue };
            let idf = self.idf(&term);
            for p in &self.postings[tid as usize] {
                *scores.entry(p.doc_id).or_insert(0.0) += idf * self.saturate(p.tf as f64, p.doc_id);
            }
        }

        let mut scored: Vec<(DocId, f64)> = scores.into_iter().collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(limit);
        scored
    }

    pub fn bm25_search(&self, query: &str, limit: usize) -> Vec<SearchResult> {
        self.bm25_search_with(query, limit, &SearchConfig::default())
    }

    pub fn bm25_search_with(&self, query: &str, limit: usize, cfg: &SearchConfig) -> Vec<SearchResult> {
        self.rank(query, limit)
            .into_iter()
            .map(|(doc_id, score)| {
                SearchResult::from_document(&self.docs[doc_id as usize], score, cfg.snippet_chars, cfg.score_precision)
            })
            .collect()
    }
}
