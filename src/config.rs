//! Configuration parsing and validation.
//!
//! RANI is configured via a TOML file (default: `config/rani.toml`).
//! Every section except `[product]` is optional and falls back to the
//! defaults below; product fields left unset come from the product preset.
//!
//! ```toml
//! [product]
//! name = "pro"
//! # base_url = "https://docs.resolve.io/pro/"
//! # supported_versions = ["8-0", "7-9"]
//!
//! [llm]
//! model = "gemini-2.0-flash"
//!
//! [embedding]
//! provider = "local"
//! cache_dir = "./models"
//!
//! [storage]
//! backend = "s3"
//! bucket = "rani-index"
//! prefix = "pro"
//!
//! [retrieval]
//! similarity_threshold = 0.25
//!
//! [server]
//! bind = "0.0.0.0:8080"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use rani_core::product::{Product, ProductProfile};
use rani_core::version::VersionCatalog;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub product: ProductConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProductConfig {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub supported_versions: Option<Vec<String>>,
    #[serde(default)]
    pub default_version: Option<String>,
    #[serde(default)]
    pub latest_version: Option<String>,
}

impl ProductConfig {
    /// Merge the configured overrides onto the product preset.
    pub fn profile(&self) -> Result<ProductProfile> {
        let product: Product = self.name.parse()?;
        let preset = product.preset();

        let versions: Vec<String> = match &self.supported_versions {
            Some(v) => v.clone(),
            None => preset.versions.iter().map(|v| v.to_string()).collect(),
        };
        let first = versions.first().cloned().unwrap_or_default();
        let fallback = |preset_value: &str| {
            if self.supported_versions.is_some() {
                first.clone()
            } else {
                preset_value.to_string()
            }
        };
        let default = self
            .default_version
            .clone()
            .unwrap_or_else(|| fallback(preset.default_version));
        let latest = self
            .latest_version
            .clone()
            .unwrap_or_else(|| fallback(preset.latest_version));

        let catalog = VersionCatalog::new(&versions, &default, &latest)
            .context("invalid [product] version settings")?;
        let profile = ProductProfile::new(
            product,
            self.display_name
                .clone()
                .unwrap_or_else(|| preset.display_name.to_string()),
            self.base_url.as_deref().unwrap_or(preset.base_url),
            catalog,
        )
        .context("invalid [product] base_url")?;
        Ok(profile)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_true")]
    pub query_expansion: bool,
    #[serde(default = "default_expansion_timeout_secs")]
    pub expansion_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            base_url: default_llm_base_url(),
            timeout_secs: default_llm_timeout_secs(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            max_output_tokens: default_max_output_tokens(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            query_expansion: true,
            expansion_timeout_secs: default_expansion_timeout_secs(),
        }
    }
}

fn default_llm_provider() -> String {
    "gemini".to_string()
}
fn default_llm_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_llm_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_temperature() -> f32 {
    0.4
}
fn default_top_p() -> f32 {
    0.85
}
fn default_top_k() -> u32 {
    40
}
fn default_max_output_tokens() -> u32 {
    2048
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_true() -> bool {
    true
}
fn default_expansion_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub offline: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: None,
            cache_dir: None,
            offline: true,
            batch_size: default_batch_size(),
        }
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_embedding_model() -> String {
    "all-minilm-l6-v2".to_string()
}
fn default_batch_size() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    #[serde(default = "default_storage_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            bucket: None,
            region: default_region(),
            endpoint_url: None,
            prefix: String::new(),
            root: default_storage_root(),
            timeout_secs: default_storage_timeout_secs(),
        }
    }
}

fn default_storage_backend() -> String {
    "filesystem".to_string()
}
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_storage_root() -> PathBuf {
    PathBuf::from("./data")
}
fn default_storage_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_context_chunks")]
    pub max_context_chunks: usize,
    /// Per-chunk content budget in the prompt, in characters.
    #[serde(default = "default_max_tokens_per_chunk")]
    pub max_tokens_per_chunk: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_max_results")]
    pub default_max_results: usize,
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_context_chunks: default_max_context_chunks(),
            max_tokens_per_chunk: default_max_tokens_per_chunk(),
            similarity_threshold: default_similarity_threshold(),
            default_max_results: default_max_results(),
            history_turns: default_history_turns(),
        }
    }
}

fn default_max_context_chunks() -> usize {
    5
}
fn default_max_tokens_per_chunk() -> usize {
    800
}
fn default_similarity_threshold() -> f32 {
    0.25
}
fn default_max_results() -> usize {
    5
}
fn default_history_turns() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

/// Maximum accepted `max_results` on a query.
pub const MAX_RESULTS_LIMIT: usize = 20;

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Product and version catalog
    config.product.profile()?;

    // Retrieval
    let r = &config.retrieval;
    if !(0.0..=1.0).contains(&r.similarity_threshold) {
        bail!("retrieval.similarity_threshold must be in [0.0, 1.0]");
    }
    if r.max_context_chunks == 0 {
        bail!("retrieval.max_context_chunks must be >= 1");
    }
    if r.max_tokens_per_chunk == 0 {
        bail!("retrieval.max_tokens_per_chunk must be > 0");
    }
    if r.default_max_results == 0 || r.default_max_results > MAX_RESULTS_LIMIT {
        bail!(
            "retrieval.default_max_results must be in [1, {}]",
            MAX_RESULTS_LIMIT
        );
    }

    // LLM
    match config.llm.provider.as_str() {
        "gemini" => {}
        other => bail!("Unknown llm provider: '{}'. Must be gemini.", other),
    }
    if config.llm.max_attempts == 0 {
        bail!("llm.max_attempts must be >= 1");
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        bail!("llm.temperature must be in [0.0, 2.0]");
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled or local.",
            other
        ),
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    // Storage
    match config.storage.backend.as_str() {
        "filesystem" => {}
        "s3" => {
            if config.storage.bucket.as_deref().map_or(true, str::is_empty) {
                bail!("storage.bucket must be set when backend is 's3'");
            }
        }
        other => bail!(
            "Unknown storage backend: '{}'. Must be s3 or filesystem.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_preset() {
        let cfg = parse_config("[product]\nname = \"express\"\n").unwrap();
        let profile = cfg.product.profile().unwrap();
        assert_eq!(profile.catalog.default_version(), "on-premise-2-5");
        assert_eq!(profile.base_url(), "https://docs.resolve.io/express/");
        assert_eq!(cfg.retrieval.max_context_chunks, 5);
        assert_eq!(cfg.llm.api_key_env, "GEMINI_API_KEY");
        assert_eq!(cfg.storage.backend, "filesystem");
    }

    #[test]
    fn test_version_overrides_are_normalized() {
        let cfg = parse_config(
            r#"
            [product]
            name = "pro"
            base_url = "https://docs.resolve.io/pro"
            supported_versions = ["8.0", "7.9"]
            default_version = "7.9"
            "#,
        )
        .unwrap();
        let profile = cfg.product.profile().unwrap();
        assert_eq!(profile.catalog.supported(), &["8-0".to_string(), "7-9".to_string()]);
        assert_eq!(profile.catalog.default_version(), "7-9");
        assert_eq!(profile.catalog.latest_version(), "8-0");
        assert_eq!(profile.base_url(), "https://docs.resolve.io/pro/");
    }

    #[test]
    fn test_default_outside_supported_rejected() {
        let err = parse_config(
            r#"
            [product]
            name = "pro"
            default_version = "9-9"
            "#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("9-9"));
    }

    #[test]
    fn test_unknown_product_rejected() {
        assert!(parse_config("[product]\nname = \"enterprise\"\n").is_err());
    }

    #[test]
    fn test_threshold_range_checked() {
        let err = parse_config(
            "[product]\nname = \"pro\"\n[retrieval]\nsimilarity_threshold = 1.5\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("similarity_threshold"));
    }

    #[test]
    fn test_s3_requires_bucket() {
        let err = parse_config("[product]\nname = \"pro\"\n[storage]\nbackend = \"s3\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("bucket"));
    }
}
