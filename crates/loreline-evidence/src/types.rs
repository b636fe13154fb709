use serde::{Deserialize, Serialize};
use std::fmt;

/// A citable evidence record. Immutable after creation: corrections create a
/// new record carrying `supersedes`, deletions only set the soft-delete mark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub id: String,
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
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
    pub created_at: String,
}

/// Retrieval strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalStrategy {
    Trgm,
    Qdrant,
    Hybrid,
    Like,
}

impl RetrievalStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalStrategy::Trgm => "trgm",
            RetrievalStrategy::Qdrant => "qdrant",
            RetrievalStrategy::Hybrid => "hybrid",
            RetrievalStrategy::Like => "like",
        }
    }
}

impl fmt::Display for RetrievalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RetrievalStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "trgm" => Ok(RetrievalStrategy::Trgm),
            "qdrant" => Ok(RetrievalStrategy::Qdrant),
            "hybrid" => Ok(RetrievalStrategy::Hybrid),
            "like" => Ok(RetrievalStrategy::Like),
            other => Err(format!("unknown retrieval strategy: {}", other)),
        }
    }
}

/// One retrieval hit. `score` is the strategy score (fused for hybrid);
/// the per-strategy components are kept for the score distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub id: String,
    pub source_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
    pub title: String,
    pub excerpt: String,
    pub confidence: f64,
    pub verified: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trgm_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qdrant_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreDistribution {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trgm_hits: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qdrant_hits: Option<usize>,
}

impl ScoreDistribution {
    pub fn from_scores(scores: &[f64]) -> Option<Self> {
        if scores.is_empty() {
            return None;
        }
        let min = scores.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let avg = scores.iter().sum::<f64>() / scores.len() as f64;
        Some(Self {
            min,
            max,
            avg,
            count: scores.len(),
            trgm_hits: None,
            qdrant_hits: None,
        })
    }
}

/// Retrieval output. Well-formed on every path: failures yield an empty
/// `items` with `fallback_reason` set, never an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalOutput {
    pub items: Vec<RetrievalHit>,
    pub total: usize,
    pub query: String,
    pub strategy_used: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_distribution: Option<ScoreDistribution>,
}

impl RetrievalOutput {
    pub fn empty(query: &str, strategy_used: &str, fallback_reason: Option<String>) -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            query: query.to_string(),
            strategy_used: strategy_used.to_string(),
            fallback_reason,
            score_distribution: None,
        }
    }
}

/// Defaults applied when a request leaves retrieval knobs unset. A release
/// payload's `retrieval_defaults` map may override these per site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalDefaults {
    pub strategy: RetrievalStrategy,
    pub trgm_weight: f64,
    pub qdrant_weight: f64,
    pub min_score: f64,
    pub limit: usize,
}

impl Default for RetrievalDefaults {
    fn default() -> Self {
        Self {
            strategy: RetrievalStrategy::Hybrid,
            trgm_weight: 0.4,
            qdrant_weight: 0.6,
            min_score: 0.3,
            limit: 5,
        }
    }
}
