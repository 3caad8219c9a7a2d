//! Index construction off the calling thread, with progress reporting and
//! cooperative cancellation.
//!
//! Every artifact is computed in memory before the first file is written, so a
//! cancelled or failed build leaves the index directory as it was. `meta.json`
//! is written last.

use crate::config::SearchConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{Result, SearchError};
use crate::index::LexicalIndex;
use crate::persist::{save_meta, IndexPaths, MetaFile};
use crate::semantic::{ChunkedSemanticIndex, DocumentEmbeddings};
use crate::tokenizer::Analyzer;
use crate::Document;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Queued,
    Lexical,
    ChunkEmbeddings,
    DocumentEmbeddings,
    Saving,
    Finished,
    Cancelled,
    Failed,
}

impl BuildPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, BuildPhase::Finished | BuildPhase::Cancelled | BuildPhase::Failed)
    }
}

/// Snapshot of a running build. `done`/`total` count embedded texts in the
/// embedding phases and are zero otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildProgress {
    pub phase: BuildPhase,
    pub done: usize,
    pub total: usize,
}

impl BuildProgress {
    fn phase(phase: BuildPhase) -> Self {
        Self { phase, done: 0, total: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSummary {
    pub num_docs: usize,
    pub num_chunks: usize,
    pub dimension: usize,
}

struct Reporter {
    tx: Sender<BuildProgress>,
    latest: Arc<Mutex<BuildProgress>>,
}

impl Reporter {
    fn send(&self, progress: BuildProgress) {
        *self.latest.lock() = progress;
        // Receiver may be gone; the snapshot still updates.
        let _ = self.tx.send(progress);
    }
}

/// Build and persist the lexical index, chunk store, document embeddings and
/// `meta.json` for `documents` on the current thread. `cancel` is polled
/// between phases and after every embedding batch.
pub fn build_index(
    documents: &[Document],
    paths: &IndexPaths,
    provider: Arc<dyn EmbeddingProvider>,
    config: &SearchConfig,
    cancel: &AtomicBool,
    mut on_progress: impl FnMut(BuildProgress),
) -> Result<BuildSummary> {
    config.validate()?;
    let started = Instant::now();
    let cancelled = || cancel.load(Ordering::Relaxed);

    on_progress(BuildProgress::phase(BuildPhase::Lexical));
    let lexical = LexicalIndex::build_with(documents, Analyzer::default(), config.bm25)?;
    if cancelled() {
        return Err(SearchError::Cancelled);
    }

    let semantic = ChunkedSemanticIndex::new(provider.clone(), config.clone());
    on_progress(BuildProgress::phase(BuildPhase::ChunkEmbeddings));
    let store = semantic
        .compute_store(documents, |done, total| {
            on_progress(BuildProgress { phase: BuildPhase::ChunkEmbeddings, done, total });
            !cancelled()
        })?
        .ok_or(SearchError::Cancelled)?;
    if cancelled() {
        return Err(SearchError::Cancelled);
    }

    let total = documents.len();
    on_progress(BuildProgress { phase: BuildPhase::DocumentEmbeddings, done: 0, total });
    let doc_embeddings = DocumentEmbeddings::compute(provider.as_ref(), documents, config.embed_batch_size, |done| {
        on_progress(BuildProgress { phase: BuildPhase::DocumentEmbeddings, done, total });
        !cancelled()
    })?
    .ok_or(SearchError::Cancelled)?;
    if cancelled() {
        return Err(SearchError::Cancelled);
    }

    on_progress(BuildProgress::phase(BuildPhase::Saving));
    std::fs::create_dir_all(&paths.root)?;
    store.save(paths)?;
    doc_embeddings.save(paths)?;
    lexical.save(paths)?;
    save_meta(paths, &MetaFile::new(documents))?;

    tracing::info!(
        docs = documents.len(),
        chunks = store.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "index build complete"
    );
    Ok(BuildSummary { num_docs: documents.len(), num_chunks: store.len(), dimension: provider.dimension() })
}

/// A build running on its own thread.
pub struct BuildHandle {
    progress: Receiver<BuildProgress>,
    latest: Arc<Mutex<BuildProgress>>,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<Result<BuildSummary>>>,
}

impl BuildHandle {
    /// Progress updates in order; the channel closes when the build ends.
    pub fn progress(&self) -> &Receiver<BuildProgress> {
        &self.progress
    }

    pub fn latest(&self) -> BuildProgress {
        *self.latest.lock()
    }

    /// Ask the worker to stop. Takes effect at the next batch boundary.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, |w| w.is_finished())
    }

    pub fn join(mut self) -> Result<BuildSummary> {
        let worker = self
            .worker
            .take()
            .ok_or_else(|| SearchError::Io(std::io::Error::other("index build thread was not started")))?;
        worker
            .join()
            .map_err(|_| SearchError::Io(std::io::Error::other("index build worker panicked")))?
    }
}

/// Start `build_index` on a dedicated thread.
pub fn spawn_build(
    documents: Vec<Document>,
    paths: IndexPaths,
    provider: Arc<dyn EmbeddingProvider>,
    config: SearchConfig,
) -> BuildHandle {
    let (tx, rx) = unbounded();
    let latest = Arc::new(Mutex::new(BuildProgress::phase(BuildPhase::Queued)));
    let cancel = Arc::new(AtomicBool::new(false));

    let reporter = Reporter { tx, latest: latest.clone() };
    let flag = cancel.clone();
    let worker = thread::Builder::new()
        .name("index-build".into())
        .spawn(move || {
            let res = build_index(&documents, &paths, provider, &config, &flag, |p| reporter.send(p));
            let phase = match &res {
                Ok(_) => BuildPhase::Finished,
                Err(SearchError::Cancelled) => {
                    tracing::info!("index build cancelled");
                    BuildPhase::Cancelled
                }
                Err(e) => {
                    tracing::error!(error = %e, "index build failed");
                    BuildPhase::Failed
                }
            };
            let last = *reporter.latest.lock();
            reporter.send(BuildProgress { phase, ..last });
            res
        });

    let worker = match worker {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::error!(error = %e, "could not spawn index build thread");
            *latest.lock() = BuildProgress::phase(BuildPhase::Failed);
            None
        }
    };
    BuildHandle { progress: rx, latest, cancel, worker }
}
