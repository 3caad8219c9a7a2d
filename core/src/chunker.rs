//! Sentence-window and word-window chunking.
//!
//! Both chunkers slide a window of `max` units forward by `max - overlap`
//! units per step. A trailing window made only of units the previous chunk
//! already covered is not emitted.

use crate::error::ChunkError;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    // Terminal punctuation followed by whitespace ends a sentence.
    static ref SENTENCE_END: Regex = Regex::new(r"[.!?]\s+").expect("valid regex");
}

/// One embeddable span of a document, in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub text: String,
}

pub fn validate_window(max: usize, overlap: usize) -> Result<(), ChunkError> {
    if max == 0 || overlap >= max {
        return Err(ChunkError::InvalidConfig { max, overlap });
    }
    Ok(())
}

/// Split on `.`, `!` or `?` followed by whitespace. Punctuation stays with its sentence.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(text) {
        // The punctuation mark is one ASCII byte.
        let end = m.start() + 1;
        let sentence = text[start..end].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        start = m.end();
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Lazily joins consecutive windows of units into chunk texts.
#[derive(Debug, Clone)]
pub struct Windows<'a> {
    units: Vec<&'a str>,
    max: usize,
    overlap: usize,
    next: usize,
    emitted: bool,
}

impl<'a> Windows<'a> {
    fn new(units: Vec<&'a str>, max: usize, overlap: usize) -> Self {
        Self { units, max, overlap, next: 0, emitted: false }
    }
}

impl Iterator for Windows<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.next >= self.units.len() {
            return None;
        }
        let end = (self.next + self.max).min(self.units.len());
        if self.emitted && end - self.next <= self.overlap {
            self.next = self.units.len();
            return None;
        }
        let chunk = self.units[self.next..end].join(" ");
        self.emitted = true;
        self.next += self.max - self.overlap;
        Some(chunk)
    }
}

/// Group sentences into chunks of at most `max_sentences`, sharing `overlap`
/// sentences with the previous chunk.
pub fn chunk_semantic(text: &str, max_sentences: usize, overlap: usize) -> Result<Windows<'_>, ChunkError> {
    validate_window(max_sentences, overlap)?;
    Ok(Windows::new(split_sentences(text), max_sentences, overlap))
}

/// Fixed-size word windows of `chunk_size` words sharing `overlap` words.
pub fn chunk_words(text: &str, chunk_size: usize, overlap: usize) -> Result<Windows<'_>, ChunkError> {
    validate_window(chunk_size, overlap)?;
    Ok(Windows::new(text.split_whitespace().collect(), chunk_size, overlap))
}

/// Chunk a document body and stamp each piece with its position and the total.
pub fn chunk_document(document_id: &str, body: &str, max_sentences: usize, overlap: usize) -> Result<Vec<Chunk>, ChunkError> {
    let texts: Vec<String> = chunk_semantic(body, max_sentences, overlap)?.collect();
    let total_chunks = texts.len();
    Ok(texts
        .into_iter()
        .enumerate()
        .map(|(chunk_index, text)| Chunk { document_id: document_id.to_string(), chunk_index, total_chunks, text })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_terminal_punctuation() {
        let s = split_sentences("One. Two!  Three? Four");
        assert_eq!(s, vec!["One.", "Two!", "Three?", "Four"]);
        assert_eq!(split_sentences("v1.2 is out"), vec!["v1.2 is out"]);
    }

    #[test]
    fn windows_advance_by_max_minus_overlap() {
        let chunks: Vec<String> = chunk_semantic("A. B. C. D. E.", 2, 1).unwrap().collect();
        assert_eq!(chunks, vec!["A. B.", "B. C.", "C. D.", "D. E."]);

        let chunks: Vec<String> = chunk_semantic("A. B. C. D. E.", 4, 1).unwrap().collect();
        assert_eq!(chunks, vec!["A. B. C. D.", "D. E."]);
    }

    #[test]
    fn overlap_only_tail_is_dropped() {
        let chunks: Vec<String> = chunk_semantic("A. B. C. D.", 4, 1).unwrap().collect();
        assert_eq!(chunks, vec!["A. B. C. D."]);
    }

    #[test]
    fn empty_and_single_sentence() {
        assert_eq!(chunk_semantic("   \n\t", 3, 0).unwrap().count(), 0);
        let one: Vec<String> = chunk_semantic("no terminator here", 3, 1).unwrap().collect();
        assert_eq!(one, vec!["no terminator here"]);
    }

    #[test]
    fn invalid_overlap_is_rejected() {
        assert_eq!(
            chunk_semantic("A. B.", 2, 2).unwrap_err(),
            ChunkError::InvalidConfig { max: 2, overlap: 2 }
        );
        assert!(chunk_words("a b", 0, 0).is_err());
    }

    #[test]
    fn word_windows() {
        let chunks: Vec<String> = chunk_words("a b c d e f g", 3, 0).unwrap().collect();
        assert_eq!(chunks, vec!["a b c", "d e f", "g"]);
        let chunks: Vec<String> = chunk_words("a b c d e", 3, 1).unwrap().collect();
        assert_eq!(chunks, vec!["a b c", "c d e"]);
    }

    #[test]
    fn deterministic_and_totals_consistent() {
        let body = "First point. Second point! Third? Fourth. Fifth.";
        let a = chunk_document("doc", body, 2, 0).unwrap();
        let b = chunk_document("doc", body, 2, 0).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
        for (i, c) in a.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
            assert_eq!(c.total_chunks, a.len());
        }
    }
}
