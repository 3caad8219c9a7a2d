use serde::{Deserialize, Serialize};

/// A corpus entry. `id` must be unique within a corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub body: String,
}

impl Document {
    pub fn new(id: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self { id: id.into(), title: title.into(), body: body.into() }
    }

    /// Text fed to the lexical tokenizer.
    pub fn searchable_text(&self) -> String {
        format!("{} {}", self.title, self.body)
    }

    /// Leading `max_chars` characters of the body, cut on a char boundary.
    pub fn snippet(&self, max_chars: usize) -> String {
        self.body.chars().take(max_chars).collect()
    }
}

/// Per-source scores and ranks carried alongside a fused result.
///
/// Rank fields are 1-based positions in that source's own list and stay `None`
/// when the document was absent from the source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bm25_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_score: Option<f64>,
    pub bm25_rank: Option<usize>,
    pub semantic_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_chunk: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    /// Leading slice of the document body.
    pub document: String,
    pub score: f64,
    pub metadata: ResultMetadata,
}

impl SearchResult {
    pub fn from_document(doc: &Document, score: f64, snippet_chars: usize, precision: u32) -> Self {
        Self {
            id: doc.id.clone(),
            title: doc.title.clone(),
            document: doc.snippet(snippet_chars),
            score: round_score(score, precision),
            metadata: ResultMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: ResultMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Round to `digits` decimal places for stable display.
pub fn round_score(score: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (score * factor).round() / factor
}
