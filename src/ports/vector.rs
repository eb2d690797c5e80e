//! Vector store port for semantic evidence.
//!
//! Past decisions are indexed by an embedding of their alert summary;
//! semantic recovery searches this index for precedents. The production
//! backend is external; the in-memory implementation here serves tests and
//! offline pipelines with the same surface.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::utils::error::{TriageError, TriageResult};

/// One search result from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
    pub payload: serde_json::Value,
}

/// Vector store port.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn ensure_collection(&self, name: &str, dim: usize) -> TriageResult<()>;

    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        vector: Vec<f32>,
        payload: serde_json::Value,
    ) -> TriageResult<()>;

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
        score_threshold: f64,
    ) -> TriageResult<Vec<SearchHit>>;
}

/// Dimension of the feature-hashing embedding below.
pub const EMBEDDING_DIM: usize = 64;

/// Deterministic bag-of-tokens embedding by feature hashing.
///
/// Not a learned embedding; it exists so semantic search is exercisable
/// end-to-end without an external model. Production deployments replace the
/// vectors, not the port.
#[must_use]
pub fn embed_text(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBEDDING_DIM];
    for token in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
        if token.is_empty() {
            continue;
        }
        let mut hash: u64 = 1469598103934665603;
        for byte in token.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(1099511628211);
        }
        vector[(hash % EMBEDDING_DIM as u64) as usize] += 1.0;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        f64::from(dot / (norm_a * norm_b))
    }
}

type StoredPoint = (Vec<f32>, serde_json::Value);

/// In-memory cosine-similarity store.
#[derive(Default)]
pub struct MemoryVectorStore {
    collections: DashMap<String, DashMap<String, StoredPoint>>,
    dims: DashMap<String, usize>,
}

impl MemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn ensure_collection(&self, name: &str, dim: usize) -> TriageResult<()> {
        self.collections.entry(name.to_string()).or_default();
        self.dims.insert(name.to_string(), dim);
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        vector: Vec<f32>,
        payload: serde_json::Value,
    ) -> TriageResult<()> {
        if let Some(dim) = self.dims.get(collection) {
            if vector.len() != *dim {
                return Err(TriageError::Validation {
                    reason: format!(
                        "vector dimension {} does not match collection {} ({})",
                        vector.len(),
                        collection,
                        *dim
                    ),
                });
            }
        }
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), (vector, payload));
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
        score_threshold: f64,
    ) -> TriageResult<Vec<SearchHit>> {
        let Some(points) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<SearchHit> = points
            .iter()
            .filter_map(|entry| {
                let (vector, payload) = entry.value();
                let score = cosine(query, vector);
                (score >= score_threshold).then(|| SearchHit {
                    id: entry.key().clone(),
                    score,
                    payload: payload.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(top_k);

        debug!(collection, hits = hits.len(), "vector search");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn search_ranks_by_similarity() {
        let store = MemoryVectorStore::new();
        store.ensure_collection("decisions", EMBEDDING_DIM).await.unwrap();

        let close = embed_text("postgres cpu saturation closed after auto-scale");
        let unrelated = embed_text("dns lookup failures in edge proxy");
        store
            .upsert("decisions", "d1", close.clone(), serde_json::json!({"summary": "closed"}))
            .await
            .unwrap();
        store
            .upsert("decisions", "d2", unrelated, serde_json::json!({"summary": "other"}))
            .await
            .unwrap();

        let query = embed_text("postgres cpu saturation closed after auto-scale");
        let hits = store.search("decisions", &query, 2, 0.0).await.unwrap();
        assert_eq!(hits[0].id, "d1");
        assert!(hits[0].score > hits[1].score);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let store = MemoryVectorStore::new();
        store.ensure_collection("decisions", EMBEDDING_DIM).await.unwrap();
        let result = store
            .upsert("decisions", "bad", vec![1.0, 2.0], serde_json::json!({}))
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn embedding_is_deterministic_and_normalized() {
        let a = embed_text("disk latency spike");
        let b = embed_text("disk latency spike");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
