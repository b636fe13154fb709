//! The retrieval front door.
//!
//! `retrieve` never fails: every internal error is converted into an empty
//! (or trigram-only) result with `strategy_used` and `fallback_reason`
//! reflecting the path actually taken.
//!
//! Fallback ordering:
//! 1. vector index unreachable / embedding unavailable → `qdrant`/`hybrid`
//!    degrade to trigram with `strategy_used = "trgm_fallback"`;
//! 2. trigram itself failing → empty result with reason `trgm_error`.

use std::collections::HashMap;
use std::sync::Arc;

use loreline_core::Scope;
use tracing::{info, warn};

use crate::embedding::EmbeddingProvider;
use crate::store::EvidenceStore;
use crate::trgm;
use crate::types::{
    EvidenceRecord, RetrievalDefaults, RetrievalHit, RetrievalOutput, RetrievalStrategy,
    ScoreDistribution,
};
use crate::vector::VectorIndex;

const EXCERPT_CLIP: usize = 300;

/// Per-request retrieval knobs; unset fields fall back to the defaults.
#[derive(Debug, Clone, Default)]
pub struct RetrievalRequest {
    pub query: String,
    pub strategy: Option<RetrievalStrategy>,
    pub limit: Option<usize>,
    pub min_score: Option<f64>,
    pub domains: Option<Vec<String>>,
    /// Legacy escape hatch: `false` downgrades the trigram strategy to the
    /// plain substring search.
    pub use_trgm: bool,
}

impl RetrievalRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            use_trgm: true,
            ..Default::default()
        }
    }
}

pub struct Retriever {
    store: Arc<EvidenceStore>,
    vector: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    defaults: RetrievalDefaults,
}

impl Retriever {
    pub fn new(
        store: Arc<EvidenceStore>,
        vector: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        defaults: RetrievalDefaults,
    ) -> Self {
        Self {
            store,
            vector,
            embedder,
            defaults,
        }
    }

    pub fn defaults(&self) -> &RetrievalDefaults {
        &self.defaults
    }

    pub fn store(&self) -> &Arc<EvidenceStore> {
        &self.store
    }

    /// Retrieve evidence for `query`. Infallible by contract.
    pub async fn retrieve(&self, scope: &Scope, request: &RetrievalRequest) -> RetrievalOutput {
        let strategy = request.strategy.unwrap_or(self.defaults.strategy);
        let limit = request.limit.unwrap_or(self.defaults.limit);
        let min_score = request.min_score.unwrap_or(self.defaults.min_score);
        let domains = request.domains.as_deref();

        // Legacy LIKE path, reachable only through the explicit escape hatch.
        if !request.use_trgm && strategy == RetrievalStrategy::Trgm {
            return match self.search_like(scope, &request.query, domains, limit) {
                Ok(out) => out,
                Err(e) => {
                    warn!(error = %e, "like search failed");
                    RetrievalOutput::empty(&request.query, "like", Some(format!("like_error: {}", e)))
                }
            };
        }

        match strategy {
            RetrievalStrategy::Trgm | RetrievalStrategy::Like => {
                match self.search_trgm(scope, &request.query, domains, limit, min_score) {
                    Ok(out) => out,
                    Err(e) => {
                        warn!(error = %e, "trgm search failed");
                        RetrievalOutput::empty(
                            &request.query,
                            "trgm",
                            Some(format!("trgm_error: {}", e)),
                        )
                    }
                }
            }
            RetrievalStrategy::Qdrant => {
                match self
                    .search_vector(scope, &request.query, domains, limit, min_score)
                    .await
                {
                    Ok(out) => out,
                    Err(reason) => self.trgm_fallback(scope, request, limit, min_score, reason),
                }
            }
            RetrievalStrategy::Hybrid => {
                match self
                    .search_hybrid(scope, &request.query, domains, limit, min_score)
                    .await
                {
                    Ok(out) => out,
                    Err(reason) => self.trgm_fallback(scope, request, limit, min_score, reason),
                }
            }
        }
    }

    fn trgm_fallback(
        &self,
        scope: &Scope,
        request: &RetrievalRequest,
        limit: usize,
        min_score: f64,
        reason: String,
    ) -> RetrievalOutput {
        warn!(fallback_reason = %reason, "degrading retrieval to trigram");
        match self.search_trgm(scope, &request.query, request.domains.as_deref(), limit, min_score)
        {
            Ok(mut out) => {
                out.strategy_used = "trgm_fallback".to_string();
                out.fallback_reason = Some(reason);
                out
            }
            Err(e) => RetrievalOutput::empty(
                &request.query,
                "trgm_fallback",
                Some(format!("{}; trgm_error: {}", reason, e)),
            ),
        }
    }

    fn search_trgm(
        &self,
        scope: &Scope,
        query: &str,
        domains: Option<&[String]>,
        limit: usize,
        min_score: f64,
    ) -> crate::error::Result<RetrievalOutput> {
        let candidates = self.store.list_for_scope(scope, domains)?;
        let mut hits: Vec<RetrievalHit> = candidates
            .iter()
            .filter_map(|record| {
                let score = trgm::score(query, &record.title, &record.excerpt);
                if score >= min_score {
                    Some(record_to_hit(record, Some(score), Some(score), None))
                } else {
                    None
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            let sa = a.retrieval_score.unwrap_or(0.0);
            let sb = b.retrieval_score.unwrap_or(0.0);
            sb.partial_cmp(&sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });
        hits.truncate(limit);

        let scores: Vec<f64> = hits.iter().filter_map(|h| h.retrieval_score).collect();
        info!(hit_count = hits.len(), strategy = "trgm", "retrieval complete");
        Ok(RetrievalOutput {
            total: hits.len(),
            score_distribution: ScoreDistribution::from_scores(&scores),
            items: hits,
            query: query.to_string(),
            strategy_used: "trgm".to_string(),
            fallback_reason: None,
        })
    }

    fn search_like(
        &self,
        scope: &Scope,
        query: &str,
        domains: Option<&[String]>,
        limit: usize,
    ) -> crate::error::Result<RetrievalOutput> {
        let rows = self.store.search_like(scope, query, domains, limit)?;
        let items: Vec<RetrievalHit> = rows
            .iter()
            .map(|r| record_to_hit(r, None, None, None))
            .collect();
        Ok(RetrievalOutput {
            total: items.len(),
            items,
            query: query.to_string(),
            strategy_used: "like".to_string(),
            fallback_reason: None,
            score_distribution: None,
        })
    }

    /// Vector-only search. The `Err` carries the fallback reason.
    async fn search_vector(
        &self,
        scope: &Scope,
        query: &str,
        domains: Option<&[String]>,
        limit: usize,
        min_score: f64,
    ) -> std::result::Result<RetrievalOutput, String> {
        let hits = self
            .vector_hits(scope, query, domains, limit, min_score)
            .await?;

        let items: Vec<RetrievalHit> = hits
            .iter()
            .map(|(record, score)| record_to_hit(record, Some(*score), None, Some(*score)))
            .collect();
        let scores: Vec<f64> = items.iter().filter_map(|h| h.retrieval_score).collect();
        info!(hit_count = items.len(), strategy = "qdrant", "retrieval complete");
        Ok(RetrievalOutput {
            total: items.len(),
            score_distribution: ScoreDistribution::from_scores(&scores),
            items,
            query: query.to_string(),
            strategy_used: "qdrant".to_string(),
            fallback_reason: None,
        })
    }

    /// Hybrid search: the trigram and vector legs are issued concurrently
    /// and gathered before merging. Scores fuse as
    /// `trgm_weight * trgm + qdrant_weight * qdrant`; a hit present on only
    /// one side keeps its score scaled by that side's weight.
    async fn search_hybrid(
        &self,
        scope: &Scope,
        query: &str,
        domains: Option<&[String]>,
        limit: usize,
        min_score: f64,
    ) -> std::result::Result<RetrievalOutput, String> {
        // Over-fetch both legs so the merged ranking has room to reorder.
        let leg_limit = limit * 2;
        let trgm_fut = async { self.search_trgm(scope, query, domains, leg_limit, min_score) };
        let vector_fut = self.vector_hits(scope, query, domains, leg_limit, min_score);
        let (trgm_result, vector_result) = tokio::join!(trgm_fut, vector_fut);

        // The vector leg is the one that can be down; hybrid degrades as a
        // whole when it is.
        let vector_hits = vector_result.map_err(|reason| format!("hybrid_error: {}", reason))?;
        let trgm_hits = match trgm_result {
            Ok(out) => out.items,
            Err(e) => {
                warn!(error = %e, "trgm leg of hybrid failed");
                Vec::new()
            }
        };

        let w_t = self.defaults.trgm_weight;
        let w_q = self.defaults.qdrant_weight;

        let mut merged: HashMap<String, RetrievalHit> = HashMap::new();
        for hit in trgm_hits {
            let trgm_score = hit.trgm_score.unwrap_or(0.0);
            merged.insert(
                hit.id.clone(),
                RetrievalHit {
                    retrieval_score: Some(trgm_score * w_t),
                    qdrant_score: None,
                    ..hit
                },
            );
        }
        for (record, score) in &vector_hits {
            match merged.get_mut(&record.id) {
                Some(existing) => {
                    existing.qdrant_score = Some(*score);
                    let trgm_score = existing.trgm_score.unwrap_or(0.0);
                    existing.retrieval_score = Some(trgm_score * w_t + score * w_q);
                }
                None => {
                    let mut hit = record_to_hit(record, Some(score * w_q), None, Some(*score));
                    hit.trgm_score = None;
                    merged.insert(record.id.clone(), hit);
                }
            }
        }

        let mut items: Vec<RetrievalHit> = merged.into_values().collect();
        items.sort_by(|a, b| {
            b.retrieval_score
                .unwrap_or(0.0)
                .partial_cmp(&a.retrieval_score.unwrap_or(0.0))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        items.truncate(limit);

        let scores: Vec<f64> = items.iter().filter_map(|h| h.retrieval_score).collect();
        let mut distribution = ScoreDistribution::from_scores(&scores);
        if let Some(d) = distribution.as_mut() {
            d.trgm_hits = Some(items.iter().filter(|h| h.trgm_score.is_some()).count());
            d.qdrant_hits = Some(items.iter().filter(|h| h.qdrant_score.is_some()).count());
        }

        info!(hit_count = items.len(), strategy = "hybrid", "retrieval complete");
        Ok(RetrievalOutput {
            total: items.len(),
            score_distribution: distribution,
            items,
            query: query.to_string(),
            strategy_used: "hybrid".to_string(),
            fallback_reason: None,
        })
    }

    /// Shared vector leg: embed, search, resolve payloads back to records.
    async fn vector_hits(
        &self,
        scope: &Scope,
        query: &str,
        domains: Option<&[String]>,
        limit: usize,
        min_score: f64,
    ) -> std::result::Result<Vec<(EvidenceRecord, f64)>, String> {
        let Some(vector) = self.embedder.embed(query).await else {
            return Err("qdrant_unavailable: embedding failed".to_string());
        };
        let hits = self
            .vector
            .search(&vector, scope, domains, limit, min_score)
            .await
            .map_err(|e| format!("qdrant_unavailable: {}", e))?;

        Ok(hits
            .into_iter()
            .map(|h| {
                let p = h.payload;
                (
                    EvidenceRecord {
                        id: p.evidence_id,
                        tenant_id: p.tenant_id,
                        site_id: p.site_id,
                        source_type: p.source_type,
                        source_ref: p.source_ref,
                        title: p.title,
                        excerpt: p.excerpt,
                        confidence: p.confidence,
                        verified: p.verified,
                        tags: p.tags,
                        domains: p.domains,
                        supersedes: None,
                        created_at: String::new(),
                    },
                    h.score,
                )
            })
            .collect())
    }
}

fn record_to_hit(
    record: &EvidenceRecord,
    retrieval_score: Option<f64>,
    trgm_score: Option<f64>,
    qdrant_score: Option<f64>,
) -> RetrievalHit {
    RetrievalHit {
        id: record.id.clone(),
        source_type: record.source_type.clone(),
        source_ref: record.source_ref.clone(),
        title: record.title.clone(),
        excerpt: clip_chars(&record.excerpt, EXCERPT_CLIP),
        confidence: record.confidence,
        verified: record.verified,
        tags: record.tags.clone(),
        retrieval_score,
        trgm_score,
        qdrant_score,
    }
}

fn clip_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::SandboxEmbeddingProvider;
    use crate::store::NewEvidence;
    use crate::vector::{InMemoryVectorIndex, UnavailableVectorIndex, VectorPayload};
    use rusqlite::Connection;

    const DIM: usize = 128;

    fn sample(title: &str, excerpt: &str) -> NewEvidence {
        NewEvidence {
            source_type: "archive".to_string(),
            source_ref: Some("book:1".to_string()),
            title: title.to_string(),
            excerpt: excerpt.to_string(),
            confidence: 0.9,
            verified: true,
            tags: vec![],
            domains: vec!["heritage".to_string()],
        }
    }

    async fn indexed_retriever(records: &[(&str, &str)]) -> (Retriever, Scope) {
        let scope = Scope::new("t1", "s1");
        let store = Arc::new(EvidenceStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let embedder = Arc::new(SandboxEmbeddingProvider::new(DIM));
        let index = Arc::new(InMemoryVectorIndex::new(DIM));

        for (title, excerpt) in records {
            let rec = store.insert(&scope, sample(title, excerpt)).unwrap();
            let vector = embedder.embed(&format!("{} {}", title, excerpt)).await.unwrap();
            index
                .upsert(
                    vector,
                    VectorPayload {
                        evidence_id: rec.id.clone(),
                        tenant_id: rec.tenant_id.clone(),
                        site_id: rec.site_id.clone(),
                        source_type: rec.source_type.clone(),
                        source_ref: rec.source_ref.clone(),
                        title: rec.title.clone(),
                        excerpt: rec.excerpt.clone(),
                        confidence: rec.confidence,
                        verified: rec.verified,
                        tags: rec.tags.clone(),
                        domains: rec.domains.clone(),
                    },
                )
                .await
                .unwrap();
        }

        let retriever = Retriever::new(
            store,
            index,
            embedder,
            RetrievalDefaults {
                min_score: 0.05,
                ..RetrievalDefaults::default()
            },
        );
        (retriever, scope)
    }

    #[tokio::test]
    async fn trgm_finds_similar_title() {
        let (retriever, scope) = indexed_retriever(&[("严氏家训", "一曰孝悌为本")]).await;
        let mut req = RetrievalRequest::new("严氏家训有哪些");
        req.strategy = Some(RetrievalStrategy::Trgm);
        let out = retriever.retrieve(&scope, &req).await;
        assert_eq!(out.strategy_used, "trgm");
        assert_eq!(out.items.len(), 1);
        assert!(out.score_distribution.is_some());
    }

    #[tokio::test]
    async fn hybrid_fuses_scores_with_weights() {
        let (retriever, scope) = indexed_retriever(&[("严氏家训", "一曰孝悌为本")]).await;
        let mut req = RetrievalRequest::new("严氏家训");
        req.strategy = Some(RetrievalStrategy::Hybrid);
        let out = retriever.retrieve(&scope, &req).await;
        assert_eq!(out.strategy_used, "hybrid");
        assert_eq!(out.items.len(), 1);

        let hit = &out.items[0];
        let expected = hit.trgm_score.unwrap_or(0.0) * 0.4 + hit.qdrant_score.unwrap_or(0.0) * 0.6;
        assert!((hit.retrieval_score.unwrap() - expected).abs() < 1e-9);

        let dist = out.score_distribution.unwrap();
        assert_eq!(dist.trgm_hits, Some(1));
        assert_eq!(dist.qdrant_hits, Some(1));
    }

    #[tokio::test]
    async fn hybrid_degrades_to_trgm_when_vector_down() {
        let scope = Scope::new("t1", "s1");
        let store = Arc::new(EvidenceStore::new(Connection::open_in_memory().unwrap()).unwrap());
        store.insert(&scope, sample("严氏家训", "一曰孝悌为本")).unwrap();

        let retriever = Retriever::new(
            store,
            Arc::new(UnavailableVectorIndex::new(DIM)),
            Arc::new(SandboxEmbeddingProvider::new(DIM)),
            RetrievalDefaults {
                min_score: 0.05,
                ..RetrievalDefaults::default()
            },
        );

        let mut req = RetrievalRequest::new("严氏家训");
        req.strategy = Some(RetrievalStrategy::Hybrid);
        let out = retriever.retrieve(&scope, &req).await;
        assert_eq!(out.strategy_used, "trgm_fallback");
        let reason = out.fallback_reason.unwrap();
        assert!(
            reason.starts_with("hybrid_error") || reason.starts_with("qdrant_unavailable"),
            "unexpected reason: {reason}"
        );
        assert_eq!(out.items.len(), 1);
    }

    #[tokio::test]
    async fn vector_strategy_falls_back_when_unavailable() {
        let scope = Scope::new("t1", "s1");
        let store = Arc::new(EvidenceStore::new(Connection::open_in_memory().unwrap()).unwrap());
        store.insert(&scope, sample("严氏家训", "一曰孝悌为本")).unwrap();
        let retriever = Retriever::new(
            store,
            Arc::new(UnavailableVectorIndex::new(DIM)),
            Arc::new(SandboxEmbeddingProvider::new(DIM)),
            RetrievalDefaults {
                min_score: 0.05,
                ..RetrievalDefaults::default()
            },
        );

        let mut req = RetrievalRequest::new("严氏家训");
        req.strategy = Some(RetrievalStrategy::Qdrant);
        let out = retriever.retrieve(&scope, &req).await;
        assert_eq!(out.strategy_used, "trgm_fallback");
        assert!(out.fallback_reason.unwrap().starts_with("qdrant_unavailable"));
    }

    #[tokio::test]
    async fn empty_corpus_is_a_well_formed_empty_result() {
        let (retriever, scope) = indexed_retriever(&[]).await;
        let req = RetrievalRequest::new("任何问题");
        let out = retriever.retrieve(&scope, &req).await;
        assert!(out.items.is_empty());
        assert_eq!(out.total, 0);
    }
}
