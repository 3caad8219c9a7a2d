//! Retrieval quality metrics over labelled queries.

use crate::error::Result;
use crate::SearchResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Relevant hits in the top `k`, divided by `k`.
pub fn precision_at_k(retrieved: &[String], relevant: &HashSet<String>, k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    let hits = retrieved.iter().take(k).filter(|d| relevant.contains(*d)).count();
    hits as f64 / k as f64
}

/// Relevant hits in the top `k`, divided by the number of relevant documents.
pub fn recall_at_k(retrieved: &[String], relevant: &HashSet<String>, k: usize) -> f64 {
    if relevant.is_empty() {
        return 0.0;
    }
    let hits = retrieved.iter().take(k).filter(|d| relevant.contains(*d)).count();
    hits as f64 / relevant.len() as f64
}

pub fn f1_score(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        return 0.0;
    }
    2.0 * precision * recall / (precision + recall)
}

/// One labelled query. `relevant_docs` holds document titles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldenCase {
    pub query: String,
    pub relevant_docs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryEvaluation {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub retrieved: Vec<String>,
    pub relevant: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub test_cases_count: usize,
    pub limit: usize,
    pub mean_precision: f64,
    pub mean_recall: f64,
    pub results: BTreeMap<String, QueryEvaluation>,
}

/// Run every case through `search` and score the returned titles.
pub fn evaluate<F>(cases: &[GoldenCase], limit: usize, mut search: F) -> Result<EvaluationReport>
where
    F: FnMut(&str, usize) -> Result<Vec<SearchResult>>,
{
    let mut results = BTreeMap::new();
    let (mut sum_p, mut sum_r) = (0.0, 0.0);
    for case in cases {
        let retrieved: Vec<String> = search(&case.query, limit)?
            .into_iter()
            .map(|r| r.title)
            .filter(|t| !t.is_empty())
            .take(limit)
            .collect();
        let relevant: HashSet<String> = case.relevant_docs.iter().cloned().collect();
        let precision = precision_at_k(&retrieved, &relevant, limit);
        let recall = recall_at_k(&retrieved, &relevant, limit);
        sum_p += precision;
        sum_r += recall;
        tracing::debug!(query = %case.query, precision, recall, "evaluated");
        results.insert(
            case.query.clone(),
            QueryEvaluation {
                precision,
                recall,
                f1_score: f1_score(precision, recall),
                retrieved,
                relevant: case.relevant_docs.clone(),
            },
        );
    }
    let n = cases.len().max(1) as f64;
    Ok(EvaluationReport {
        test_cases_count: cases.len(),
        limit,
        mean_precision: sum_p / n,
        mean_recall: sum_r / n,
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Document, SearchResult};

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn metrics() {
        let relevant: HashSet<String> = s(&["a", "b", "c"]).into_iter().collect();
        let retrieved = s(&["a", "x", "b", "y", "z"]);
        assert_eq!(precision_at_k(&retrieved, &relevant, 5), 0.4);
        assert!((recall_at_k(&retrieved, &relevant, 5) - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(precision_at_k(&retrieved, &relevant, 1), 1.0);
        assert_eq!(recall_at_k(&retrieved, &HashSet::new(), 5), 0.0);
        assert_eq!(f1_score(0.0, 0.0), 0.0);
        assert!((f1_score(0.5, 1.0) - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn evaluate_scores_titles() {
        let cases = vec![GoldenCase { query: "bear".into(), relevant_docs: s(&["Paddington"]) }];
        let report = evaluate(&cases, 2, |_, _| {
            let doc = Document::new("2", "Paddington", "A bear.");
            Ok(vec![SearchResult::from_document(&doc, 1.0, 10, 3)])
        })
        .unwrap();
        let q = &report.results["bear"];
        assert_eq!(q.precision, 0.5);
        assert_eq!(q.recall, 1.0);
        assert_eq!(report.mean_recall, 1.0);
    }
}
