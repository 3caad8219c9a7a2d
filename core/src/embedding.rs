use crate::error::EmbeddingError;
use crate::tokenizer::Analyzer;

/// Dense-vector embedding collaborator.
///
/// `embed` must return one vector per input, in input order, all of length
/// `dimension()`.
pub trait EmbeddingProvider: Send + Sync {
    fn dimension(&self) -> usize;

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Upper bound on texts per `embed` call.
    fn max_batch_size(&self) -> usize {
        32
    }
}

/// Embed `texts` in round-trips of at most `batch_size` (further capped by the
/// provider's own limit), checking count and dimension of every reply.
pub fn embed_in_batches(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
    mut on_batch: impl FnMut(usize) -> bool,
) -> Result<Option<Vec<Vec<f32>>>, EmbeddingError> {
    let batch = batch_size.min(provider.max_batch_size()).max(1);
    let dim = provider.dimension();
    let mut out = Vec::with_capacity(texts.len());
    for group in texts.chunks(batch) {
        let vectors = provider.embed(group)?;
        if vectors.len() != group.len() {
            return Err(EmbeddingError::CountMismatch { expected: group.len(), got: vectors.len() });
        }
        if let Some(v) = vectors.iter().find(|v| v.len() != dim) {
            return Err(EmbeddingError::Dimension { expected: dim, got: v.len() });
        }
        out.extend(vectors);
        if !on_batch(out.len()) {
            return Ok(None);
        }
    }
    Ok(Some(out))
}

/// dot(a, b) / (|a| |b|), or 0.0 when either norm is zero or lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Deterministic local embedder: analyzed tokens hashed into `dimension`
/// signed buckets, then L2 normalized. Texts with no tokens map to the zero vector.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    analyzer: Analyzer,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension: dimension.max(1), analyzer: Analyzer::default() }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dimension];
        for token in self.analyzer.analyze(text) {
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[..8]);
            let h = u64::from_le_bytes(word);
            let bucket = (h % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn max_batch_size(&self) -> usize {
        256
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_similarity_is_one() {
        let v = vec![0.3, -1.2, 4.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_similarity_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn orthogonal_and_opposite() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-2.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn hashing_embedder_is_deterministic_and_normalized() {
        let e = HashingEmbedder::new(64);
        let a = e.embed_one("space adventure with robots");
        assert_eq!(a, e.embed_one("space adventure with robots"));
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(e.embed_one("the of and").iter().all(|&x| x == 0.0));
    }

    struct Short;

    impl EmbeddingProvider for Short {
        fn dimension(&self) -> usize { 2 }
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().skip(1).map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[test]
    fn batches_respect_size_and_validate_count() {
        let e = HashingEmbedder::new(8);
        let texts: Vec<String> = (0..5).map(|i| format!("text {i}")).collect();
        let mut calls = Vec::new();
        let out = embed_in_batches(&e, &texts, 2, |done| {
            calls.push(done);
            true
        })
        .unwrap()
        .unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(calls, vec![2, 4, 5]);

        let err = embed_in_batches(&Short, &texts, 2, |_| true).unwrap_err();
        assert!(matches!(err, EmbeddingError::CountMismatch { expected: 2, got: 1 }));
    }

    #[test]
    fn stopping_early_returns_none() {
        let e = HashingEmbedder::new(8);
        let texts: Vec<String> = (0..5).map(|i| format!("text {i}")).collect();
        assert!(embed_in_batches(&e, &texts, 2, |_| false).unwrap().is_none());
    }
}
