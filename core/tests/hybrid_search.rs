use fuse_core::builder::{spawn_build, BuildPhase};
use fuse_core::embedding::{EmbeddingProvider, HashingEmbedder};
use fuse_core::error::EmbeddingError;
use fuse_core::{Document, HybridSearch, IndexPaths, LexicalIndex, RrfOptions, SearchConfig};
use std::sync::Arc;
use std::time::Duration;

fn open(docs: &[Document], dir: &std::path::Path) -> HybridSearch {
    HybridSearch::load_or_create(docs, &IndexPaths::new(dir), Arc::new(HashingEmbedder::new(128)), SearchConfig::default())
        .unwrap()
}

#[test]
fn rrf_reports_single_source_ranks() {
    // Only doc 3 has a body, so it is the only semantic candidate; only doc 2
    // mentions the query term.
    let docs = vec![
        Document::new("1", "Harbour lights", ""),
        Document::new("2", "Zebra crossing", ""),
        Document::new("3", "Savanna", "Striped animals graze near the river at dusk."),
    ];
    let dir = tempfile::tempdir().unwrap();
    let hs = open(&docs, dir.path());

    let results = hs.rrf_search("zebra", 60.0, 2, RrfOptions::default()).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].id, "2");
    assert_eq!(results[0].metadata.bm25_rank, Some(1));
    assert_eq!(results[0].metadata.semantic_rank, None);
    assert_eq!(results[1].id, "3");
    assert_eq!(results[1].metadata.bm25_rank, None);
    assert_eq!(results[1].metadata.semantic_rank, Some(1));
    assert!((results[0].score - 1.0 / 61.0).abs() < 1e-3);
}

#[test]
fn bm25_single_term_score() {
    let docs: Vec<Document> = ["kiwi kiwi kiwi mango", "apple pear plum fig", "lime lemon date nut", "corn bean pea oat", "rice rye barley malt"]
        .iter()
        .enumerate()
        .map(|(i, b)| Document::new(i.to_string(), "", *b))
        .collect();
    let idx = LexicalIndex::build(&docs).unwrap();
    let idf = ((5.0 - 1.0 + 0.5) / (1.0 + 0.5) + 1.0f64).ln();
    let tf = 3.0 * (1.2 + 1.0) / (3.0 + 1.2);
    let results = idx.bm25_search("kiwi", 5);
    assert_eq!(results.len(), 1);
    assert!((results[0].score - idf * tf).abs() < 1e-3);
}

#[test]
fn reopened_index_answers_identically() {
    let docs = vec![
        Document::new("a", "Alien", "A crew in deep space meets a hostile creature. Few survive."),
        Document::new("b", "Paddington", "A bear travels to London. He loves marmalade."),
        Document::new("c", "The Revenant", "A frontiersman is mauled by a bear. He crawls home."),
    ];
    let dir = tempfile::tempdir().unwrap();
    let first = open(&docs, dir.path());
    let before = first.weighted_search("bear in london", 0.5, 3).unwrap();

    let reopened = HybridSearch::open(&IndexPaths::new(dir.path()), Arc::new(HashingEmbedder::new(128)), SearchConfig::default()).unwrap();
    let after = reopened.weighted_search("bear in london", 0.5, 3).unwrap();
    assert_eq!(before, after);
}

struct SlowEmbedder(HashingEmbedder);

impl EmbeddingProvider for SlowEmbedder {
    fn dimension(&self) -> usize {
        self.0.dimension()
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        std::thread::sleep(Duration::from_millis(20));
        self.0.embed(texts)
    }

    fn max_batch_size(&self) -> usize {
        1
    }
}

#[test]
fn cancelled_worker_leaves_directory_empty() {
    let docs: Vec<Document> =
        (0..100).map(|i| Document::new(i.to_string(), format!("Doc {i}"), "One sentence. Two sentences.")).collect();
    let dir = tempfile::tempdir().unwrap();
    let paths = IndexPaths::new(dir.path());

    let handle = spawn_build(docs, paths.clone(), Arc::new(SlowEmbedder(HashingEmbedder::new(16))), SearchConfig::default());
    handle.cancel();
    let last = handle.progress().iter().last().map(|p| p.phase);
    assert!(handle.join().is_err());
    assert_eq!(last, Some(BuildPhase::Cancelled));
    assert!(!paths.has_lexical());
    assert!(!paths.meta().exists());
}
