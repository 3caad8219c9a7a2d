use lazy_static::lazy_static;
use rust_stemmers::{Algorithm, Stemmer};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::English);
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","about","above","after","again","against","all","am","an","and","any","are","arent","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","cannot","could","couldnt",
            "did","didnt","do","does","doesnt","doing","dont","down","during",
            "each","few","for","from","further",
            "had","hadnt","has","hasnt","have","havent","having","he","hes","her","here","heres","hers","herself","him","himself","his","how","hows",
            "i","im","ive","if","in","into","is","isnt","it","its","itself",
            "lets","me","more","most","mustnt","my","myself",
            "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
            "same","she","shes","should","shouldnt","so","some","such",
            "than","that","thats","the","their","theirs","them","themselves","then","there","theres","these","they","theyd","theyll","theyre","theyve","this","those","through","to","too",
            "under","until","up","very",
            "was","wasnt","we","were","werent","weve","what","whats","when","whens","where","wheres","which","while","who","whos","whom","why","whys","with","wont","would","wouldnt",
            "you","youd","youll","youre","youve","your","yours","yourself","yourselves"
        ];
        words.iter().copied().collect()
    };
}

/// Term analysis options. Persisted with the lexical index and reused for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analyzer {
    pub remove_stopwords: bool,
    pub stem: bool,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self { remove_stopwords: true, stem: true }
    }
}

impl Analyzer {
    /// Lowercase + punctuation strip + whitespace split, nothing else.
    pub fn plain() -> Self {
        Self { remove_stopwords: false, stem: false }
    }

    /// Turn text into index terms: NFKC, lowercase, drop everything that is not a
    /// letter, digit or whitespace, split on whitespace, then filter and stem.
    pub fn analyze(&self, text: &str) -> Vec<String> {
        let normalized: String = text
            .nfkc()
            .flat_map(char::to_lowercase)
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .collect();
        normalized
            .split_whitespace()
            .filter(|token| !(self.remove_stopwords && is_stopword(token)))
            .map(|token| if self.stem { STEMMER.stem(token).into_owned() } else { token.to_string() })
            .collect()
    }
}

fn is_stopword(token: &str) -> bool { STOPWORDS.contains(token) }

/// Tokenize with the default analyzer.
pub fn tokenize(text: &str) -> Vec<String> {
    Analyzer::default().analyze(text)
}
