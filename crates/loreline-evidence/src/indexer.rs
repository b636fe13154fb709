//! Vector index backfill worker.
//!
//! Periodically re-projects evidence rows into the vector index. Upserts are
//! keyed by a stable point id, so re-indexing is idempotent. The worker is
//! tenant-fair (round-robin over scopes) and bounds the batch per tick so it
//! never starves the request path.

use std::sync::Arc;

use loreline_core::Scope;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::embedding::EmbeddingProvider;
use crate::store::EvidenceStore;
use crate::types::EvidenceRecord;
use crate::vector::{VectorIndex, VectorPayload};

pub struct Indexer {
    store: Arc<EvidenceStore>,
    vector: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl Indexer {
    pub fn new(
        store: Arc<EvidenceStore>,
        vector: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            vector,
            embedder,
            batch_size,
        }
    }

    /// Embed and upsert one record. Returns `false` when the embedding was
    /// unavailable or the point was rejected.
    pub async fn index_record(&self, record: &EvidenceRecord) -> bool {
        let text = format!("{} {}", record.title, record.excerpt);
        let Some(vector) = self.embedder.embed(&text).await else {
            debug!(evidence_id = %record.id, "embedding unavailable, skipping");
            return false;
        };
        let payload = VectorPayload {
            evidence_id: record.id.clone(),
            tenant_id: record.tenant_id.clone(),
            site_id: record.site_id.clone(),
            source_type: record.source_type.clone(),
            source_ref: record.source_ref.clone(),
            title: record.title.clone(),
            excerpt: record.excerpt.clone(),
            confidence: record.confidence,
            verified: record.verified,
            tags: record.tags.clone(),
            domains: record.domains.clone(),
        };
        match self.vector.upsert(vector, payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!(evidence_id = %record.id, error = %e, "vector upsert failed");
                false
            }
        }
    }

    /// One round-robin pass over all scopes, indexing up to `batch_size`
    /// records in total.
    pub async fn backfill_tick(&self) -> usize {
        let scopes = match self.store.list_scopes() {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "listing scopes for backfill failed");
                return 0;
            }
        };
        if scopes.is_empty() {
            return 0;
        }

        let per_scope = (self.batch_size / scopes.len()).max(1);
        let mut indexed = 0usize;
        for scope in &scopes {
            if indexed >= self.batch_size {
                break;
            }
            indexed += self.backfill_scope(scope, per_scope).await;
        }
        indexed
    }

    async fn backfill_scope(&self, scope: &Scope, budget: usize) -> usize {
        let records = match self.store.list_for_scope(scope, None) {
            Ok(r) => r,
            Err(e) => {
                error!(scope = %scope, error = %e, "listing evidence for backfill failed");
                return 0;
            }
        };
        let mut indexed = 0usize;
        for record in records.iter().rev().take(budget) {
            if self.index_record(record).await {
                indexed += 1;
            }
        }
        indexed
    }

    /// Worker loop: ticks until `shutdown` broadcasts `true`.
    pub async fn run(self: Arc<Self>, interval_secs: u64, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs, "index backfill worker started");
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let n = self.backfill_tick().await;
                    if n > 0 {
                        debug!(indexed = n, "backfill tick complete");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("index backfill worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}
