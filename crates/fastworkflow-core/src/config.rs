use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Bound on parallel classifier predictions for majority voting.
pub const MAX_VOTE_WORKERS: usize = 10;
/// Queue depth for user-message and command-output queues.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
/// Drain window for graceful shutdown.
pub const SHUTDOWN_GRACE_SECS: u64 = 30;

/// Top-level config (fastworkflow.toml + FASTWORKFLOW_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FastworkflowConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub nlu: NluConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// When false, JWTs are decoded without signature verification
    /// (trusted-network mode); expiration is still enforced.
    #[serde(default = "bool_true")]
    pub expect_signed_jwt: bool,
    /// Directory holding the RSA keypair PEM files.
    #[serde(default = "default_keys_dir")]
    pub jwt_keys_dir: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            expect_signed_jwt: true,
            jwt_keys_dir: default_keys_dir(),
        }
    }
}

/// Thresholds and message templates for the NLU pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NluConfig {
    /// Minimum cosine similarity for an utterance-cache hit.
    #[serde(default = "default_cache_similarity")]
    pub cache_similarity_threshold: f64,
    /// Minimum normalized Levenshtein similarity for a fuzzy command match.
    #[serde(default = "default_fuzzy_similarity")]
    pub fuzzy_match_threshold: f64,
    /// Small-model confidence below which the large model is consulted.
    #[serde(default = "default_confidence")]
    pub confidence_threshold: f64,
    /// Candidates whose score gap is strictly below this are ambiguous.
    #[serde(default = "default_ambiguous_gap")]
    pub ambiguous_confidence_threshold: f64,
    /// Parallel predictions for majority voting; 1 disables voting.
    #[serde(default = "default_vote_count")]
    pub majority_vote_count: usize,
    /// Few-shot example cap for LLM parameter extraction.
    #[serde(default = "default_fewshot_k")]
    pub fewshot_k: usize,
    #[serde(default = "default_missing_errmsg")]
    pub missing_information_errmsg: String,
    #[serde(default = "default_invalid_errmsg")]
    pub invalid_information_errmsg: String,
}

impl Default for NluConfig {
    fn default() -> Self {
        Self {
            cache_similarity_threshold: default_cache_similarity(),
            fuzzy_match_threshold: default_fuzzy_similarity(),
            confidence_threshold: default_confidence(),
            ambiguous_confidence_threshold: default_ambiguous_gap(),
            majority_vote_count: default_vote_count(),
            fewshot_k: default_fewshot_k(),
            missing_information_errmsg: default_missing_errmsg(),
            invalid_information_errmsg: default_invalid_errmsg(),
        }
    }
}

/// Endpoint + model per LLM role. Roles degrade independently.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    pub param_extraction: Option<LlmEndpoint>,
    pub conversation_store: Option<LlmEndpoint>,
    pub agent: Option<LlmEndpoint>,
    /// Intent classifier inference server (small + large tiers).
    pub intent: Option<IntentEndpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmEndpoint {
    /// OpenAI-compatible base URL, without trailing slash.
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentEndpoint {
    pub base_url: String,
    pub small_model: String,
    pub large_model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding per-user conversation databases.
    #[serde(default = "default_conversations_dir")]
    pub conversations_dir: String,
    /// SQLite file for workflow instance rows.
    #[serde(default = "default_workflow_db")]
    pub workflow_db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            conversations_dir: default_conversations_dir(),
            workflow_db_path: default_workflow_db(),
        }
    }
}

impl FastworkflowConfig {
    /// Load config from a TOML file with FASTWORKFLOW_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        } else {
            figment = figment.merge(Toml::file("fastworkflow.toml"));
        }
        figment
            .merge(Env::prefixed("FASTWORKFLOW_").split("__"))
            .extract()
            .map_err(|e| crate::error::FastworkflowError::Config(e.to_string()))
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_keys_dir() -> String {
    "./jwt_keys".to_string()
}

fn default_cache_similarity() -> f64 {
    0.85
}

fn default_fuzzy_similarity() -> f64 {
    0.7
}

fn default_confidence() -> f64 {
    0.75
}

fn default_ambiguous_gap() -> f64 {
    0.1
}

fn default_vote_count() -> usize {
    1
}

fn default_fewshot_k() -> usize {
    8
}

fn default_missing_errmsg() -> String {
    "Missing required information: ".to_string()
}

fn default_invalid_errmsg() -> String {
    "Invalid information: ".to_string()
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_conversations_dir() -> String {
    "./user_conversations".to_string()
}

fn default_workflow_db() -> String {
    "./fastworkflow_sessions.db".to_string()
}

fn bool_true() -> bool {
    true
}
