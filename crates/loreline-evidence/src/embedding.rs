//! Embedding capability.
//!
//! The retriever never depends on a concrete embedding vendor: it holds an
//! `Arc<dyn EmbeddingProvider>` and treats a `None` embedding as "vector
//! search unavailable".

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::warn;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;
    fn dimension(&self) -> usize;
    /// Embed `text`, or `None` when the provider is unreachable or refuses.
    async fn embed(&self, text: &str) -> Option<Vec<f32>>;
}

/// HTTP embedding provider (`POST {base}/embeddings`).
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        dimension: usize,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            dimension,
        }
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn name(&self) -> &str {
        "http"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let mut req = self.client.post(&url).json(&serde_json::json!({
            "model": self.model,
            "input": text,
        }));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "embedding request failed");
                return None;
            }
        };
        if !resp.status().is_success() {
            warn!(status = resp.status().as_u16(), "embedding API error");
            return None;
        }
        let body: EmbeddingResponse = match resp.json().await {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "embedding response parse failed");
                return None;
            }
        };
        body.data.into_iter().next().map(|d| d.embedding)
    }
}

/// Deterministic sandbox embedding: hashed bag-of-trigrams, L2-normalised.
///
/// Texts sharing character trigrams land near each other, which is enough
/// for offline tests and the sandbox mode. No network, no model.
pub struct SandboxEmbeddingProvider {
    dimension: usize,
}

impl SandboxEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for SandboxEmbeddingProvider {
    fn name(&self) -> &str {
        "sandbox"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let mut vector = vec![0f32; self.dimension];
        let chars: Vec<char> = format!("  {} ", text.to_lowercase()).chars().collect();
        for window in chars.windows(3) {
            let trigram: String = window.iter().collect();
            let digest = Sha256::digest(trigram.as_bytes());
            let bucket =
                u64::from_be_bytes(digest[..8].try_into().expect("8 bytes")) as usize % self.dimension;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 {
            return None;
        }
        for v in &mut vector {
            *v /= norm;
        }
        Some(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn sandbox_embedding_is_deterministic() {
        let p = SandboxEmbeddingProvider::new(64);
        let a = p.embed("严氏家训").await.unwrap();
        let b = p.embed("严氏家训").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn similar_texts_are_closer_than_unrelated() {
        let p = SandboxEmbeddingProvider::new(256);
        let base = p.embed("严氏家训有哪些").await.unwrap();
        let close = p.embed("严氏家训").await.unwrap();
        let far = p.embed("completely different words").await.unwrap();
        assert!(cosine(&base, &close) > cosine(&base, &far));
    }
}
