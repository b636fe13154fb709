//! Vector index capability.
//!
//! Points are keyed by a stable UUID derived from the evidence id, so
//! re-indexing the same record overwrites its point instead of duplicating
//! it. A point or query whose dimension does not match the collection is
//! dropped rather than mis-searched.

use async_trait::async_trait;
use dashmap::DashMap;
use loreline_core::Scope;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

use crate::error::VectorError;

/// Stable point id for an evidence record.
pub fn point_id(evidence_id: &str) -> String {
    let digest = Sha256::digest(evidence_id.as_bytes());
    Uuid::from_slice(&digest[..16])
        .expect("16 bytes")
        .to_string()
}

/// Payload stored beside each vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPayload {
    pub evidence_id: String,
    pub tenant_id: String,
    pub site_id: String,
    pub source_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
    pub title: String,
    pub excerpt: String,
    pub confidence: f64,
    pub verified: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub domains: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub payload: VectorPayload,
    pub score: f64,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn dimension(&self) -> usize;

    /// Insert or overwrite one point. A dimension mismatch drops the point.
    async fn upsert(&self, vector: Vec<f32>, payload: VectorPayload) -> Result<(), VectorError>;

    /// Top-k cosine search filtered by scope and optional domains.
    /// A query-dimension mismatch returns an empty hit list, not an error.
    async fn search(
        &self,
        vector: &[f32],
        scope: &Scope,
        domains: Option<&[String]>,
        limit: usize,
        min_score: f64,
    ) -> Result<Vec<VectorHit>, VectorError>;

    async fn delete(&self, evidence_id: &str) -> Result<(), VectorError>;

    async fn health_check(&self) -> bool;
}

// --- in-memory implementation ---------------------------------------------

struct StoredPoint {
    vector: Vec<f32>,
    payload: VectorPayload,
}

/// Process-local index used by tests and the sandbox deployment.
pub struct InMemoryVectorIndex {
    dimension: usize,
    points: DashMap<String, StoredPoint>,
}

impl InMemoryVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            points: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na * nb)) as f64
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&self, vector: Vec<f32>, payload: VectorPayload) -> Result<(), VectorError> {
        if vector.len() != self.dimension {
            warn!(
                evidence_id = %payload.evidence_id,
                expected = self.dimension,
                got = vector.len(),
                "dropping point with mismatched dimension"
            );
            return Err(VectorError::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }
        self.points
            .insert(point_id(&payload.evidence_id), StoredPoint { vector, payload });
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        scope: &Scope,
        domains: Option<&[String]>,
        limit: usize,
        min_score: f64,
    ) -> Result<Vec<VectorHit>, VectorError> {
        if vector.len() != self.dimension {
            warn!(
                expected = self.dimension,
                got = vector.len(),
                "query dimension mismatch; returning empty result"
            );
            return Ok(Vec::new());
        }

        let mut hits: Vec<VectorHit> = self
            .points
            .iter()
            .filter(|p| {
                p.payload.tenant_id == scope.tenant_id && p.payload.site_id == scope.site_id
            })
            .filter(|p| match domains {
                Some(filter) if !filter.is_empty() => p
                    .payload
                    .domains
                    .iter()
                    .chain(p.payload.tags.iter())
                    .any(|d| filter.contains(d)),
                _ => true,
            })
            .map(|p| VectorHit {
                score: cosine(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .filter(|h| h.score >= min_score)
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete(&self, evidence_id: &str) -> Result<(), VectorError> {
        self.points.remove(&point_id(evidence_id));
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

// --- HTTP implementation ---------------------------------------------------

/// Remote vector index speaking a qdrant-style REST API.
pub struct HttpVectorIndex {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    dimension: usize,
}

impl HttpVectorIndex {
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            collection: collection.into(),
            dimension,
        }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<SearchPoint>,
}

#[derive(Deserialize)]
struct SearchPoint {
    score: f64,
    payload: VectorPayload,
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&self, vector: Vec<f32>, payload: VectorPayload) -> Result<(), VectorError> {
        if vector.len() != self.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }
        let url = format!("{}/collections/{}/points", self.base_url, self.collection);
        let body = json!({
            "points": [{
                "id": point_id(&payload.evidence_id),
                "vector": vector,
                "payload": payload,
            }]
        });
        let resp = self
            .client
            .put(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| VectorError::Unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(VectorError::Request(format!(
                "upsert returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        scope: &Scope,
        domains: Option<&[String]>,
        limit: usize,
        min_score: f64,
    ) -> Result<Vec<VectorHit>, VectorError> {
        if vector.len() != self.dimension {
            return Ok(Vec::new());
        }
        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, self.collection
        );
        let mut must = vec![
            json!({"key": "tenant_id", "match": {"value": scope.tenant_id}}),
            json!({"key": "site_id", "match": {"value": scope.site_id}}),
        ];
        if let Some(filter) = domains {
            if !filter.is_empty() {
                must.push(json!({"key": "domains", "match": {"any": filter}}));
            }
        }
        let body = json!({
            "vector": vector,
            "filter": {"must": must},
            "limit": limit,
            "score_threshold": min_score,
            "with_payload": true,
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| VectorError::Unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(VectorError::Request(format!(
                "search returned {}",
                resp.status()
            )));
        }
        let parsed: SearchResponse = resp
            .json()
            .await
            .map_err(|e| VectorError::Request(e.to_string()))?;
        Ok(parsed
            .result
            .into_iter()
            .map(|p| VectorHit {
                score: p.score,
                payload: p.payload,
            })
            .collect())
    }

    async fn delete(&self, evidence_id: &str) -> Result<(), VectorError> {
        let url = format!(
            "{}/collections/{}/points/delete",
            self.base_url, self.collection
        );
        let body = json!({"points": [point_id(evidence_id)]});
        self.client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| VectorError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/collections/{}", self.base_url, self.collection);
        matches!(self.client.get(&url).send().await, Ok(r) if r.status().is_success())
    }
}

/// An index that always fails. Used to exercise degradation paths in tests
/// and as the placeholder when no vector backend is configured.
pub struct UnavailableVectorIndex {
    dimension: usize,
}

impl UnavailableVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl VectorIndex for UnavailableVectorIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&self, _vector: Vec<f32>, _payload: VectorPayload) -> Result<(), VectorError> {
        Err(VectorError::Unavailable("no vector backend configured".into()))
    }

    async fn search(
        &self,
        _vector: &[f32],
        _scope: &Scope,
        _domains: Option<&[String]>,
        _limit: usize,
        _min_score: f64,
    ) -> Result<Vec<VectorHit>, VectorError> {
        Err(VectorError::Unavailable("no vector backend configured".into()))
    }

    async fn delete(&self, _evidence_id: &str) -> Result<(), VectorError> {
        Err(VectorError::Unavailable("no vector backend configured".into()))
    }

    async fn health_check(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(id: &str, scope: &Scope) -> VectorPayload {
        VectorPayload {
            evidence_id: id.to_string(),
            tenant_id: scope.tenant_id.clone(),
            site_id: scope.site_id.clone(),
            source_type: "archive".to_string(),
            source_ref: None,
            title: id.to_string(),
            excerpt: String::new(),
            confidence: 0.9,
            verified: true,
            tags: vec![],
            domains: vec![],
        }
    }

    #[tokio::test]
    async fn upsert_is_keyed_by_evidence_id() {
        let idx = InMemoryVectorIndex::new(2);
        let scope = Scope::new("t1", "s1");
        idx.upsert(vec![1.0, 0.0], payload("e1", &scope)).await.unwrap();
        idx.upsert(vec![0.0, 1.0], payload("e1", &scope)).await.unwrap();
        assert_eq!(idx.len(), 1);
    }

    #[tokio::test]
    async fn dimension_mismatch_query_returns_empty() {
        let idx = InMemoryVectorIndex::new(2);
        let scope = Scope::new("t1", "s1");
        idx.upsert(vec![1.0, 0.0], payload("e1", &scope)).await.unwrap();
        let hits = idx.search(&[1.0, 0.0, 0.0], &scope, None, 5, 0.0).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn search_filters_by_scope() {
        let idx = InMemoryVectorIndex::new(2);
        let s1 = Scope::new("t1", "s1");
        let s2 = Scope::new("t1", "s2");
        idx.upsert(vec![1.0, 0.0], payload("e1", &s1)).await.unwrap();
        idx.upsert(vec![1.0, 0.0], payload("e2", &s2)).await.unwrap();
        let hits = idx.search(&[1.0, 0.0], &s1, None, 5, 0.0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload.evidence_id, "e1");
    }
}
