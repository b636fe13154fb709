use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18620;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Whole-turn deadline. Every suspension point in the dialog pipeline runs
/// under this budget.
pub const DEFAULT_TURN_DEADLINE_SECS: u64 = 30;

/// Top-level config (loreline.toml + LORELINE_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LorelineConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for LorelineConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            database: DatabaseConfig::default(),
            llm: LlmConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            vector: VectorConfig::default(),
            memory: MemoryConfig::default(),
            gate: GateConfig::default(),
            runtime: RuntimeConfig::default(),
            alerts: AlertsConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Shared secret checked on the /tools surface (X-Internal-API-Key).
    pub internal_api_key: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            internal_api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// LLM provider selection. `sandbox = true` short-circuits to the canned
/// deterministic provider regardless of the HTTP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub sandbox: bool,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub base_retry_delay_ms: u64,
    #[serde(default = "bool_true")]
    pub fallback_enabled: bool,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            sandbox: true,
            base_url: None,
            api_key: None,
            model: default_model(),
            timeout_seconds: default_llm_timeout(),
            max_retries: default_llm_retries(),
            base_retry_delay_ms: default_retry_delay(),
            fallback_enabled: true,
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_trgm_weight")]
    pub trgm_weight: f64,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            trgm_weight: default_trgm_weight(),
            vector_weight: default_vector_weight(),
            min_score: default_min_score(),
            limit: default_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmbeddingConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VectorConfig {
    pub base_url: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_memory_ttl")]
    pub ttl_seconds: i64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_messages: default_max_messages(),
            max_chars: default_max_chars(),
            ttl_seconds: default_memory_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_min_citations")]
    pub min_citations_for_fact: usize,
    #[serde(default)]
    pub use_llm_classifier: bool,
    #[serde(default = "default_classifier_cache_ttl")]
    pub classifier_cache_ttl: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_citations_for_fact: default_min_citations(),
            use_llm_classifier: false,
            classifier_cache_ttl: default_classifier_cache_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_turn_deadline")]
    pub turn_deadline_seconds: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            turn_deadline_seconds: default_turn_deadline(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    pub webhook_url: Option<String>,
    #[serde(default = "default_alert_window")]
    pub window: String,
    #[serde(default = "default_alert_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_alert_batch")]
    pub max_tenants_per_tick: usize,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            window: default_alert_window(),
            interval_seconds: default_alert_interval(),
            max_tenants_per_tick: default_alert_batch(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_prefix")]
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: default_cache_prefix(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.loreline/loreline.db", home)
}
fn default_model() -> String {
    "loreline-chat-1".to_string()
}
fn default_llm_timeout() -> u64 {
    60
}
fn default_llm_retries() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    1000
}
fn default_temperature() -> f64 {
    0.7
}
fn default_strategy() -> String {
    "hybrid".to_string()
}
fn default_trgm_weight() -> f64 {
    0.4
}
fn default_vector_weight() -> f64 {
    0.6
}
fn default_min_score() -> f64 {
    0.3
}
fn default_limit() -> usize {
    5
}
fn default_embedding_model() -> String {
    "loreline-embed-1".to_string()
}
fn default_dimension() -> usize {
    768
}
fn default_collection() -> String {
    "loreline_evidence".to_string()
}
fn default_max_messages() -> usize {
    10
}
fn default_max_chars() -> usize {
    4000
}
fn default_memory_ttl() -> i64 {
    86_400
}
fn default_min_citations() -> usize {
    1
}
fn default_classifier_cache_ttl() -> u64 {
    600
}
fn default_turn_deadline() -> u64 {
    DEFAULT_TURN_DEADLINE_SECS
}
fn default_alert_window() -> String {
    "15m".to_string()
}
fn default_alert_interval() -> u64 {
    60
}
fn default_alert_batch() -> usize {
    8
}
fn default_cache_prefix() -> String {
    "loreline".to_string()
}

impl LorelineConfig {
    /// Load config from a TOML file with LORELINE_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: LorelineConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("LORELINE_").split("_"))
            .extract()
            .map_err(|e| crate::error::LorelineError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.loreline/loreline.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let cfg = LorelineConfig::default();
        assert_eq!(cfg.retrieval.trgm_weight, 0.4);
        assert_eq!(cfg.retrieval.vector_weight, 0.6);
        assert_eq!(cfg.memory.max_messages, 10);
        assert_eq!(cfg.memory.ttl_seconds, 86_400);
        assert_eq!(cfg.gate.min_citations_for_fact, 1);
        assert_eq!(cfg.runtime.turn_deadline_seconds, 30);
    }
}
