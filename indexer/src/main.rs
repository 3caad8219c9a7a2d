use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fuse_core::builder::{spawn_build, BuildPhase};
use fuse_core::chunker::{chunk_semantic, chunk_words};
use fuse_core::embedding::{EmbeddingProvider, HashingEmbedder};
use fuse_core::evaluation::{evaluate, GoldenCase};
use fuse_core::fusion::min_max_normalize;
use fuse_core::rerank::{EnhanceMethod, RerankMethod};
use fuse_core::semantic::DocumentSemanticIndex;
use fuse_core::{Document, HybridSearch, IndexPaths, LexicalIndex, RrfOptions, SearchConfig};
use serde::{Deserialize, Deserializer, Serialize};
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct InputDoc {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    title: String,
    #[serde(alias = "description", default)]
    body: String,
}

impl From<InputDoc> for Document {
    fn from(d: InputDoc) -> Self {
        Document::new(d.id, d.title, d.body)
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<String, D::Error> {
    match serde_json::Value::deserialize(de)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("document id must be a string or number, got {other}"))),
    }
}

#[derive(Parser)]
#[command(name = "fuse-indexer")]
#[command(about = "Build and query a hybrid BM25 + embedding index", long_about = None)]
struct Cli {
    /// JSON search config; defaults apply to missing fields
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Dimension of the local hashing embedder
    #[arg(long, global = true, default_value_t = 384)]
    dimension: usize,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every index artifact from input JSON/JSONL files or a directory
    Build {
        /// Input path (file or directory)
        #[arg(long)]
        input: String,
        /// Output index directory
        #[arg(long)]
        output: String,
    },
    /// Keyword search
    Bm25 {
        #[arg(long)]
        index: String,
        query: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Chunked semantic search
    Chunks {
        #[arg(long)]
        index: String,
        query: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Whole-document semantic search
    Semantic {
        #[arg(long)]
        index: String,
        query: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Min-max normalized weighted fusion
    Weighted {
        #[arg(long)]
        index: String,
        query: String,
        #[arg(long)]
        alpha: Option<f64>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Reciprocal Rank Fusion, optionally reranked
    Rrf {
        #[arg(long)]
        index: String,
        query: String,
        #[arg(long)]
        k: Option<f64>,
        #[arg(long)]
        limit: Option<usize>,
        /// spell | rewrite | expand; needs a configured query enhancer
        #[arg(long)]
        enhance: Option<EnhanceMethod>,
        /// individual | batch | cross_encoder
        #[arg(long)]
        rerank_method: Option<RerankMethod>,
    },
    /// Precision/recall of RRF search against a golden query file
    Evaluate {
        #[arg(long)]
        index: String,
        #[arg(long)]
        golden: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Split text into fixed-size word chunks
    Chunk {
        text: String,
        #[arg(long, default_value_t = 200)]
        chunk_size: usize,
        #[arg(long, default_value_t = 0)]
        overlap: usize,
    },
    /// Split text into sentence-window chunks
    SemanticChunk {
        text: String,
        #[arg(long, default_value_t = 4)]
        max_chunk_size: usize,
        #[arg(long, default_value_t = 0)]
        overlap: usize,
    },
    /// Min-max normalize a list of scores
    Normalize {
        #[arg(required = true, allow_negative_numbers = true)]
        scores: Vec<f64>,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).with_writer(std::io::stderr).init();
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SearchConfig::from_file(path).with_context(|| format!("loading config {}", path.display()))?,
        None => SearchConfig::default(),
    };
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashingEmbedder::new(cli.dimension));

    match cli.command {
        Commands::Build { input, output } => build(&input, &output, provider, config),
        Commands::Bm25 { index, query, limit } => {
            let idx = LexicalIndex::load_with(&IndexPaths::new(&index), config.bm25)?;
            print_json(&idx.bm25_search_with(&query, limit.unwrap_or(config.default_limit), &config))
        }
        Commands::Chunks { index, query, limit } => {
            let limit = limit.unwrap_or(config.default_limit);
            let hs = HybridSearch::open(&IndexPaths::new(&index), provider, config)?;
            print_json(&hs.search_chunks(&query, limit)?)
        }
        Commands::Semantic { index, query, limit } => {
            let paths = IndexPaths::new(&index);
            let docs = LexicalIndex::load(&paths)?.documents().to_vec();
            let limit = limit.unwrap_or(config.default_limit);
            let mut sem = DocumentSemanticIndex::new(provider, config);
            sem.load_or_create(&docs, &paths)?;
            print_json(&sem.search(&query, limit)?)
        }
        Commands::Weighted { index, query, alpha, limit } => {
            let (alpha, limit) = (alpha.unwrap_or(config.default_alpha), limit.unwrap_or(config.default_limit));
            let hs = HybridSearch::open(&IndexPaths::new(&index), provider, config)?;
            print_json(&hs.weighted_search(&query, alpha, limit)?)
        }
        Commands::Rrf { index, query, k, limit, enhance, rerank_method } => {
            let (k, limit) = (k.unwrap_or(config.default_rrf_k), limit.unwrap_or(config.default_limit));
            let hs = HybridSearch::open(&IndexPaths::new(&index), provider, config)?;
            let opts = RrfOptions { enhance, rerank: rerank_method };
            print_json(&hs.rrf_search(&query, k, limit, opts)?)
        }
        Commands::Evaluate { index, golden, limit } => {
            let limit = limit.unwrap_or(config.default_limit);
            let k = config.default_rrf_k;
            let cases = load_golden(Path::new(&golden))?;
            let hs = HybridSearch::open(&IndexPaths::new(&index), provider, config)?;
            let report = evaluate(&cases, limit, |q, n| hs.rrf_search(q, k, n, RrfOptions::default()))?;
            tracing::info!(cases = report.test_cases_count, precision = report.mean_precision, recall = report.mean_recall, "evaluation complete");
            print_json(&report)
        }
        Commands::Chunk { text, chunk_size, overlap } => {
            for (i, chunk) in chunk_words(&text, chunk_size, overlap)?.enumerate() {
                println!("{}. {}", i + 1, chunk);
            }
            Ok(())
        }
        Commands::SemanticChunk { text, max_chunk_size, overlap } => {
            for (i, chunk) in chunk_semantic(&text, max_chunk_size, overlap)?.enumerate() {
                println!("{}. {}", i + 1, chunk);
            }
            Ok(())
        }
        Commands::Normalize { scores } => {
            for s in min_max_normalize(&scores) {
                println!("* {s:.4}");
            }
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn build(input: &str, output: &str, provider: Arc<dyn EmbeddingProvider>, config: SearchConfig) -> Result<()> {
    let docs = load_documents(Path::new(input))?;
    if docs.is_empty() {
        bail!("no documents found under {input}");
    }
    tracing::info!(num_docs = docs.len(), "ingested documents");

    let handle = spawn_build(docs, IndexPaths::new(output), provider, config);
    let mut last_phase = BuildPhase::Queued;
    for p in handle.progress().iter() {
        if p.phase != last_phase {
            tracing::info!(phase = ?p.phase, "build phase");
            last_phase = p.phase;
        } else if p.total > 0 && (p.done == p.total || p.done % 1000 == 0) {
            tracing::info!(phase = ?p.phase, done = p.done, total = p.total, "embedding");
        }
    }
    let summary = handle.join()?;
    tracing::info!(output, docs = summary.num_docs, chunks = summary.num_chunks, dimension = summary.dimension, "index build complete");
    Ok(())
}

fn load_documents(input: &Path) -> Result<Vec<Document>> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input.is_dir() {
        for entry in WalkDir::new(input).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() {
                if let Some(ext) = p.extension().and_then(|s| s.to_str()) {
                    if matches!(ext, "json" | "jsonl") {
                        files.push(p.to_path_buf());
                    }
                }
            }
        }
    } else if input.is_file() {
        files.push(input.to_path_buf());
    } else {
        bail!("input path {} does not exist", input.display());
    }

    let mut docs = Vec::new();
    for file in files {
        let before = docs.len();
        if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            read_jsonl(&file, &mut docs)?;
        } else {
            read_json(&file, &mut docs)?;
        }
        tracing::debug!(file = %file.display(), docs = docs.len() - before, "read input file");
    }
    Ok(docs)
}

fn read_jsonl(file: &Path, docs: &mut Vec<Document>) -> Result<()> {
    let reader = BufReader::new(File::open(file)?);
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let doc: InputDoc = serde_json::from_str(&line).with_context(|| format!("{}:{}", file.display(), n + 1))?;
        docs.push(doc.into());
    }
    Ok(())
}

/// Accepts an array of documents, a single document, or an object wrapping
/// the array under `documents` or `movies`.
fn read_json(file: &Path, docs: &mut Vec<Document>) -> Result<()> {
    let json: serde_json::Value = serde_json::from_reader(BufReader::new(File::open(file)?))?;
    let items = match json {
        serde_json::Value::Array(arr) => arr,
        serde_json::Value::Object(mut obj) => match ["documents", "movies"].iter().find_map(|k| obj.remove(*k)) {
            Some(serde_json::Value::Array(arr)) => arr,
            Some(_) => bail!("{}: document list must be an array", file.display()),
            None => vec![serde_json::Value::Object(obj)],
        },
        _ => Vec::new(),
    };
    for v in items {
        let doc: InputDoc = serde_json::from_value(v).with_context(|| file.display().to_string())?;
        docs.push(doc.into());
    }
    Ok(())
}

/// Golden file: an array of cases or `{"test_cases": [...]}`.
fn load_golden(path: &Path) -> Result<Vec<GoldenCase>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Golden {
        Wrapped { test_cases: Vec<GoldenCase> },
        Bare(Vec<GoldenCase>),
    }
    let file = File::open(path).with_context(|| format!("opening golden file {}", path.display()))?;
    Ok(match serde_json::from_reader(BufReader::new(file))? {
        Golden::Wrapped { test_cases } => test_cases,
        Golden::Bare(cases) => cases,
    })
}
