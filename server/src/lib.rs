use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use fuse_core::embedding::EmbeddingProvider;
use fuse_core::rerank::{EnhanceMethod, RerankMethod};
use fuse_core::semantic::DocumentSemanticIndex;
use fuse_core::{HybridSearch, IndexPaths, RrfOptions, SearchConfig, SearchError, SearchResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

const MAX_LIMIT: usize = 100;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    pub limit: Option<usize>,
    pub alpha: Option<f64>,
    pub k: Option<f64>,
    pub enhance: Option<EnhanceMethod>,
    pub rerank: Option<RerankMethod>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<SearchHit>,
}

#[derive(Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub result: SearchResult,
    /// Result snippet with query terms wrapped in `<em>`.
    pub snippet: String,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<HybridSearch>,
    pub documents: Arc<DocumentSemanticIndex>,
    pub config: Arc<SearchConfig>,
}

pub struct ApiError(SearchError);

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SearchError::Configuration(_) | SearchError::InvalidChunkConfig(_) => StatusCode::BAD_REQUEST,
            SearchError::IndexNotFound(_) | SearchError::IndexNotLoaded => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "search failed");
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Load the persisted index under `index_dir` and wire up the routes.
pub fn build_app(index_dir: &str, provider: Arc<dyn EmbeddingProvider>, config: SearchConfig) -> Result<Router> {
    let paths = IndexPaths::new(index_dir);
    let engine = HybridSearch::open(&paths, provider.clone(), config.clone())?;
    let mut documents = DocumentSemanticIndex::new(provider, config.clone());
    documents.load_or_create(engine.lexical().documents(), &paths)?;
    tracing::info!(index_dir, docs = engine.lexical().len(), "index loaded");

    let app_state = AppState { engine: Arc::new(engine), documents: Arc::new(documents), config: Arc::new(config) };

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search/bm25", get(bm25_handler))
        .route("/search/chunks", get(chunks_handler))
        .route("/search/semantic", get(semantic_handler))
        .route("/search/weighted", get(weighted_handler))
        .route("/search/rrf", get(rrf_handler))
        .route("/doc/:id", get(doc_handler))
        .with_state(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());
    Ok(app)
}

#[derive(Clone, Copy)]
enum Mode {
    Bm25,
    Chunks,
    Semantic,
    Weighted,
    Rrf,
}

/// Run a search off the async runtime and shape the response.
async fn run(state: AppState, params: SearchParams, mode: Mode) -> Result<Json<SearchResponse>, ApiError> {
    let start = std::time::Instant::now();
    let query = params.q.clone();
    let results = tokio::task::spawn_blocking(move || search(&state, &params, mode))
        .await
        .map_err(|e| SearchError::Io(std::io::Error::other(e.to_string())))??;

    let raw_terms: Vec<String> = query.split_whitespace().map(|s| s.to_string()).collect();
    let results: Vec<SearchHit> = results
        .into_iter()
        .map(|r| SearchHit { snippet: highlight_terms(&r.document, &raw_terms), result: r })
        .collect();
    let elapsed = start.elapsed();
    tracing::debug!(query = %query, hits = results.len(), took_ms = elapsed.as_millis() as u64, "search served");
    Ok(Json(SearchResponse { query, took_s: elapsed.as_secs_f64(), total_hits: results.len(), results }))
}

fn search(state: &AppState, params: &SearchParams, mode: Mode) -> Result<Vec<SearchResult>, SearchError> {
    let cfg = &state.config;
    let limit = params.limit.unwrap_or(cfg.default_limit).min(MAX_LIMIT);
    let q = params.q.as_str();
    match mode {
        Mode::Bm25 => state.engine.bm25_search(q, limit),
        Mode::Chunks => state.engine.search_chunks(q, limit),
        Mode::Semantic => {
            fuse_core::config::validate_limit(limit)?;
            state.documents.search(q, limit)
        }
        Mode::Weighted => state.engine.weighted_search(q, params.alpha.unwrap_or(cfg.default_alpha), limit),
        Mode::Rrf => {
            let opts = RrfOptions { enhance: params.enhance, rerank: params.rerank };
            state.engine.rrf_search(q, params.k.unwrap_or(cfg.default_rrf_k), limit, opts)
        }
    }
}

pub async fn bm25_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Result<Json<SearchResponse>, ApiError> {
    run(state, params, Mode::Bm25).await
}

pub async fn chunks_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Result<Json<SearchResponse>, ApiError> {
    run(state, params, Mode::Chunks).await
}

pub async fn semantic_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Result<Json<SearchResponse>, ApiError> {
    run(state, params, Mode::Semantic).await
}

pub async fn weighted_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Result<Json<SearchResponse>, ApiError> {
    run(state, params, Mode::Weighted).await
}

pub async fn rrf_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Result<Json<SearchResponse>, ApiError> {
    run(state, params, Mode::Rrf).await
}

pub async fn doc_handler(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    match state.engine.document(&id) {
        Some(doc) => Ok(Json(serde_json::json!({ "id": doc.id, "title": doc.title, "text": doc.body }))),
        None => Err((StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "not found" })))),
    }
}

fn highlight_terms(snippet: &str, terms: &[String]) -> String {
    let mut s = snippet.to_string();
    for t in terms {
        if t.trim().is_empty() { continue; }
        let Ok(pat) = regex::RegexBuilder::new(&regex::escape(t)).case_insensitive(true).build() else { continue };
        s = pat.replace_all(&s, |caps: &regex::Captures| format!("<em>{}</em>", &caps[0])).to_string();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highlights_case_insensitively() {
        let out = highlight_terms("Rust is great. rust again.", &["RUST".to_string()]);
        assert_eq!(out, "<em>Rust</em> is great. <em>rust</em> again.");
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        assert_eq!(highlight_terms("a+b and ab", &["a+b".to_string()]), "<em>a+b</em> and ab");
    }
}
