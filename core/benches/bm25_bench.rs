use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fuse_core::{Document, LexicalIndex};

const WORDS: &[&str] = &[
    "bear", "space", "crew", "london", "river", "storm", "castle", "robot", "ocean", "forest", "detective", "train",
    "island", "dragon", "winter", "desert", "pirate", "school", "wedding", "heist",
];

fn corpus(n: usize) -> Vec<Document> {
    (0..n)
        .map(|i| {
            let body: Vec<&str> = (0..40).map(|j| WORDS[(i * 7 + j * 13) % WORDS.len()]).collect();
            Document::new(i.to_string(), format!("Movie {i}"), body.join(" "))
        })
        .collect()
}

fn bench_bm25(c: &mut Criterion) {
    let docs = corpus(5_000);
    c.bench_function("bm25_build_5k", |b| b.iter(|| LexicalIndex::build(black_box(&docs))));

    let idx = LexicalIndex::build(&docs).unwrap();
    c.bench_function("bm25_search_5k", |b| b.iter(|| idx.bm25_search(black_box("bear in space with a robot"), 10)));
}

criterion_group!(benches, bench_bm25);
criterion_main!(benches);
