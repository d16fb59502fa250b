//! # BM25 lexical ranking
//!
//! Scores a batch of candidate documents against a query with the Okapi BM25
//! formula. The index is built over exactly the input batch on every call, so
//! the ranker holds no corpus state and costs O(batch) per invocation.
//!
//! For each query term `t` present in a document:
//!
//! ```text
//! idf(t)   = ln((N - df + 0.5) / (df + 0.5) + 1)
//! score   += idf(t) * tf * (k1 + 1) / (tf + k1 * (1 - b + b * len / avg_len))
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::Document;

/// Splits text into index terms.
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<String>;
}

/// Lowercases and splits on whitespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_lowercase).collect()
    }
}

/// Per-batch statistics needed to score documents.
struct BatchIndex {
    doc_lengths: Vec<usize>,
    term_freqs: Vec<HashMap<String, usize>>,
    doc_freqs: HashMap<String, usize>,
    avg_doc_length: f64,
}

impl BatchIndex {
    fn build(tokenizer: &dyn Tokenizer, documents: &[Document]) -> Self {
        let mut doc_lengths = Vec::with_capacity(documents.len());
        let mut term_freqs = Vec::with_capacity(documents.len());
        let mut doc_freqs: HashMap<String, usize> = HashMap::new();

        for doc in documents {
            let tokens = tokenizer.tokenize(&doc.content);
            doc_lengths.push(tokens.len());

            let mut tf: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *tf.entry(token).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *doc_freqs.entry(term.clone()).or_insert(0) += 1;
            }
            term_freqs.push(tf);
        }

        let total: usize = doc_lengths.iter().sum();
        let avg_doc_length = total as f64 / documents.len().max(1) as f64;

        Self {
            doc_lengths,
            term_freqs,
            doc_freqs,
            avg_doc_length,
        }
    }

    fn idf(&self, term: &str) -> f64 {
        let Some(&df) = self.doc_freqs.get(term) else {
            return 0.0;
        };
        let n = self.doc_lengths.len() as f64;
        let df = df as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }
}

/// Stateless BM25 scorer.
#[derive(Clone)]
pub struct Bm25Ranker {
    k1: f64,
    b: f64,
    tokenizer: Arc<dyn Tokenizer>,
}

impl std::fmt::Debug for Bm25Ranker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bm25Ranker")
            .field("k1", &self.k1)
            .field("b", &self.b)
            .finish_non_exhaustive()
    }
}

impl Default for Bm25Ranker {
    fn default() -> Self {
        Self::new(1.5, 0.75)
    }
}

impl Bm25Ranker {
    pub fn new(k1: f64, b: f64) -> Self {
        Self {
            k1,
            b,
            tokenizer: Arc::new(WhitespaceTokenizer),
        }
    }

    /// Replace the default whitespace tokenizer.
    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    /// Compute BM25 scores for `documents` in input order without reordering.
    pub fn score_batch(&self, query: &str, documents: &[Document]) -> Vec<f64> {
        if documents.is_empty() {
            return Vec::new();
        }
        let index = BatchIndex::build(self.tokenizer.as_ref(), documents);
        let query_terms = self.tokenizer.tokenize(query);

        (0..documents.len())
            .map(|i| self.score_one(&index, &query_terms, i))
            .collect()
    }

    fn score_one(&self, index: &BatchIndex, query_terms: &[String], doc: usize) -> f64 {
        let tf_map = &index.term_freqs[doc];
        let len = index.doc_lengths[doc] as f64;
        let mut total = 0.0;

        for term in query_terms {
            let Some(&tf) = tf_map.get(term) else {
                continue;
            };
            let tf = tf as f64;
            let norm = 1.0 - self.b + self.b * len / index.avg_doc_length;
            let denominator = (tf + self.k1 * norm).max(1e-9);
            total += index.idf(term) * tf * (self.k1 + 1.0) / denominator;
        }
        total
    }

    /// Write `bm25_score` on each document and return them sorted by it, highest first.
    pub fn rank(&self, query: &str, mut documents: Vec<Document>) -> Vec<Document> {
        let scores = self.score_batch(query, &documents);
        for (doc, score) in documents.iter_mut().zip(scores) {
            doc.bm25_score = score;
        }
        documents.sort_by(|a, b| {
            b.bm25_score
                .partial_cmp(&a.bm25_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        documents
    }
}
