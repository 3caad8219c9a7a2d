//! Collaborator contracts for query enhancement and result reranking, plus
//! adapters that turn per-candidate scorers and whole-list rankers into a
//! `Reranker`.

use crate::error::RerankError;
use crate::tokenizer::tokenize;
use crate::SearchResult;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnhanceMethod {
    Spell,
    Rewrite,
    Expand,
}

impl FromStr for EnhanceMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spell" => Ok(Self::Spell),
            "rewrite" => Ok(Self::Rewrite),
            "expand" => Ok(Self::Expand),
            other => Err(format!("unknown enhance method {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankMethod {
    Individual,
    Batch,
    CrossEncoder,
}

impl FromStr for RerankMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "individual" => Ok(Self::Individual),
            "batch" => Ok(Self::Batch),
            "cross_encoder" => Ok(Self::CrossEncoder),
            other => Err(format!("unknown rerank method {other:?}")),
        }
    }
}

/// Rewrites a query before retrieval.
pub trait QueryEnhancer: Send + Sync {
    /// For `Spell` and `Rewrite` the output replaces the query. For `Expand`
    /// the output is extra terms appended to it.
    fn enhance(&self, query: &str, method: EnhanceMethod) -> Result<String, RerankError>;
}

/// Apply an enhancer; blank output leaves the query unchanged.
pub fn enhance_query(enhancer: &dyn QueryEnhancer, query: &str, method: EnhanceMethod) -> Result<String, RerankError> {
    let out = enhancer.enhance(query, method)?;
    let out = out.trim();
    if out.is_empty() {
        return Ok(query.to_string());
    }
    Ok(match method {
        EnhanceMethod::Expand => format!("{query} {out}"),
        EnhanceMethod::Spell | EnhanceMethod::Rewrite => out.to_string(),
    })
}

/// Reorders fused candidates. Must return at most `limit` items, each drawn
/// from `candidates`.
pub trait Reranker: Send + Sync {
    fn rerank(&self, query: &str, candidates: Vec<SearchResult>, limit: usize) -> Result<Vec<SearchResult>, RerankError>;
}

/// Scores one candidate's relevance to the query (higher is better).
pub trait RelevanceScorer: Send + Sync {
    fn score(&self, query: &str, candidate: &SearchResult) -> Result<f64, RerankError>;
}

/// Orders a whole candidate list, returning ids best first.
pub trait ListRanker: Send + Sync {
    fn rank(&self, query: &str, candidates: &[SearchResult]) -> Result<Vec<String>, RerankError>;
}

/// Per-candidate reranking: score each, stable sort descending, truncate.
pub struct ScoringReranker<S> {
    scorer: S,
}

impl<S: RelevanceScorer> ScoringReranker<S> {
    pub fn new(scorer: S) -> Self {
        Self { scorer }
    }
}

impl<S: RelevanceScorer> Reranker for ScoringReranker<S> {
    fn rerank(&self, query: &str, candidates: Vec<SearchResult>, limit: usize) -> Result<Vec<SearchResult>, RerankError> {
        let mut scored = Vec::with_capacity(candidates.len());
        for mut c in candidates {
            let s = self.scorer.score(query, &c)?;
            c.metadata.rerank_score = Some(s);
            scored.push((s, c));
        }
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored.into_iter().take(limit).map(|(_, c)| c).collect())
    }
}

/// Whole-list reranking. Ids the ranker invents or repeats are dropped.
pub struct OrderingReranker<R> {
    ranker: R,
}

impl<R: ListRanker> OrderingReranker<R> {
    pub fn new(ranker: R) -> Self {
        Self { ranker }
    }
}

impl<R: ListRanker> Reranker for OrderingReranker<R> {
    fn rerank(&self, query: &str, candidates: Vec<SearchResult>, limit: usize) -> Result<Vec<SearchResult>, RerankError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let order = self.ranker.rank(query, &candidates)?;
        let mut pool: Vec<Option<SearchResult>> = candidates.into_iter().map(Some).collect();
        let mut out = Vec::with_capacity(limit.min(pool.len()));
        for id in order {
            if out.len() == limit {
                break;
            }
            if let Some(slot) = pool.iter_mut().find(|c| c.as_ref().is_some_and(|c| c.id == id)) {
                out.extend(slot.take());
            }
        }
        Ok(out)
    }
}

/// Local relevance scorer: fraction of distinct query terms present in the
/// candidate's title and snippet.
#[derive(Debug, Clone, Copy, Default)]
pub struct TermOverlapScorer;

impl RelevanceScorer for TermOverlapScorer {
    fn score(&self, query: &str, candidate: &SearchResult) -> Result<f64, RerankError> {
        let q: HashSet<String> = tokenize(query).into_iter().collect();
        if q.is_empty() {
            return Ok(0.0);
        }
        let text: HashSet<String> = tokenize(&format!("{} {}", candidate.title, candidate.document)).into_iter().collect();
        Ok(q.intersection(&text).count() as f64 / q.len() as f64)
    }
}

impl ListRanker for TermOverlapScorer {
    fn rank(&self, query: &str, candidates: &[SearchResult]) -> Result<Vec<String>, RerankError> {
        let mut scored = Vec::with_capacity(candidates.len());
        for c in candidates {
            scored.push((self.score(query, c)?, c.id.clone()));
        }
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored.into_iter().map(|(_, id)| id).collect())
    }
}

/// Local reranker for each method. `individual` and `cross_encoder` score
/// candidates one by one; `batch` orders the list in one call.
pub fn local_reranker(method: RerankMethod) -> Box<dyn Reranker> {
    match method {
        RerankMethod::Individual | RerankMethod::CrossEncoder => Box::new(ScoringReranker::new(TermOverlapScorer)),
        RerankMethod::Batch => Box::new(OrderingReranker::new(TermOverlapScorer)),
    }
}
