//! Vector store collaborator used by the recall stage.
//!
//! [`InMemoryVectorStore`] is a reference implementation: documents are embedded
//! with hashed term frequencies and searched by cosine similarity.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::VectorStoreError;
use crate::types::{Document, Filters, sort_by_final_score};

/// Similarity search over stored documents.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Return up to `top_k` documents with `vector_score` and `final_score` set,
    /// most similar first.
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filters: Option<&Filters>,
    ) -> Result<Vec<Document>, VectorStoreError>;

    /// Insert or replace documents by id. Returns the number stored.
    async fn add_documents(&self, documents: Vec<Document>) -> Result<usize, VectorStoreError>;

    /// Returns the number of documents actually removed.
    async fn delete_documents(&self, ids: &[String]) -> Result<usize, VectorStoreError>;

    async fn stats(&self) -> HashMap<String, Value>;

    async fn close(&self) -> Result<(), VectorStoreError>;
}

/// A minimal bag-of-words embedder: each term is hashed to a dimension, its
/// term frequency accumulated, and the vector L2-normalized.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let lowered = text.to_lowercase();
        let words = lowered.split(|c: char| !c.is_alphanumeric());
        for word in words.filter(|w| !w.is_empty()) {
            vector[djb2(word) % self.dimensions] += 1.0;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

fn djb2(s: &str) -> usize {
    s.bytes().fold(5381usize, |hash, b| {
        hash.wrapping_mul(33).wrapping_add(usize::from(b))
    })
}

/// Cosine similarity; 0 for empty, mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Metadata equality on every filter key.
fn matches_filters(document: &Document, filters: Option<&Filters>) -> bool {
    filters.is_none_or(|filters| {
        filters
            .iter()
            .all(|(key, value)| document.metadata.get(key) == Some(value))
    })
}

struct StoredDocument {
    document: Document,
    embedding: Vec<f32>,
}

/// Process-local store keyed by document id.
pub struct InMemoryVectorStore {
    embedder: HashingEmbedder,
    documents: RwLock<BTreeMap<String, StoredDocument>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for InMemoryVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorStore")
            .field("embedder", &self.embedder)
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new(HashingEmbedder::default())
    }
}

impl InMemoryVectorStore {
    pub fn new(embedder: HashingEmbedder) -> Self {
        Self {
            embedder,
            documents: RwLock::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), VectorStoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(VectorStoreError::Unavailable {
                message: "vector store is closed".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filters: Option<&Filters>,
    ) -> Result<Vec<Document>, VectorStoreError> {
        self.ensure_open()?;
        let query_vec = self.embedder.embed(query);
        let documents = self.documents.read().await;

        let mut hits: Vec<Document> = documents
            .values()
            .filter(|stored| matches_filters(&stored.document, filters))
            .map(|stored| {
                let score = cosine_similarity(&query_vec, &stored.embedding) as f64;
                stored.document.clone().with_vector_score(score)
            })
            .collect();

        sort_by_final_score(&mut hits);
        hits.truncate(top_k);
        debug!(query, returned = hits.len(), "Vector search completed");
        Ok(hits)
    }

    async fn add_documents(&self, documents: Vec<Document>) -> Result<usize, VectorStoreError> {
        self.ensure_open()?;
        let count = documents.len();
        let embedded: Vec<_> = documents
            .into_iter()
            .map(|document| {
                let embedding = self.embedder.embed(&document.content);
                StoredDocument {
                    document,
                    embedding,
                }
            })
            .collect();

        let mut store = self.documents.write().await;
        for stored in embedded {
            store.insert(stored.document.id.clone(), stored);
        }
        Ok(count)
    }

    async fn delete_documents(&self, ids: &[String]) -> Result<usize, VectorStoreError> {
        self.ensure_open()?;
        let mut store = self.documents.write().await;
        let removed = ids
            .iter()
            .filter(|id| store.remove(id.as_str()).is_some())
            .count();
        Ok(removed)
    }

    async fn stats(&self) -> HashMap<String, Value> {
        let count = self.documents.read().await.len();
        HashMap::from([
            ("backend".to_string(), Value::from("memory")),
            ("documents".to_string(), Value::from(count)),
            ("dimensions".to_string(), Value::from(self.embedder.dimensions())),
            ("closed".to_string(), Value::from(self.closed.load(Ordering::Acquire))),
        ])
    }

    async fn close(&self) -> Result<(), VectorStoreError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
