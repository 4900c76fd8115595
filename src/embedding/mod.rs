//! Encoder construction.
//!
//! Implements the [`EmbeddingProvider`] trait from `rani-core`:
//! - **[`DisabledEncoder`]**: fails every call; used when `embedding.provider = "disabled"`.
//! - **[`LocalEncoder`]**: runs the model in-process via fastembed. With
//!   `offline = true` (the default) weights must already be staged in
//!   `cache_dir`; no network calls are made.
//!
//! The encoder is created once per process by [`create_encoder`] and shared
//! behind an `Arc`. [`prewarm`] runs a handful of representative queries so
//! lazy ONNX initialization does not land on the first user request.

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Instant;

use rani_core::embedding::EmbeddingProvider;
use rani_core::RagError;

use crate::config::EmbeddingConfig;

/// Queries encoded once at startup.
pub const PREWARM_QUERIES: [&str; 6] = [
    "What is a workflow?",
    "How do I configure a connector?",
    "Troubleshooting failed tasks",
    "dashboard monitoring",
    "user permissions and roles",
    "integration with ServiceNow",
];

// ============ Disabled Encoder ============

/// An encoder that always fails.
///
/// Queries against it take the zero-context path; ingests are rejected
/// with an encoder error and leave the index unchanged.
pub struct DisabledEncoder {
    dims: usize,
}

impl DisabledEncoder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

impl EmbeddingProvider for DisabledEncoder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn encode(&self, _texts: &[String]) -> rani_core::Result<Vec<Vec<f32>>> {
        Err(RagError::Encoder(
            "embedding provider is disabled".to_string(),
        ))
    }
}

// ============ Local Encoder (fastembed) ============

/// In-process sentence encoder backed by fastembed.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEncoder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: std::sync::Mutex<fastembed::TextEmbedding>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEncoder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model_name, dims) = resolve_local_model(config);
        let fastembed_model = config_to_fastembed_model(&model_name)?;

        let mut options = fastembed::InitOptions::new(fastembed_model)
            .with_show_download_progress(!config.offline);
        if let Some(dir) = &config.cache_dir {
            options = options.with_cache_dir(dir.clone());
        }

        let started = Instant::now();
        let model = fastembed::TextEmbedding::try_new(options).map_err(|e| {
            anyhow::anyhow!(
                "Failed to load local embedding model '{}'{}: {}",
                model_name,
                if config.offline {
                    " (offline mode: are the weights staged in embedding.cache_dir?)"
                } else {
                    ""
                },
                e
            )
        })?;
        tracing::info!(
            model = %model_name,
            dims,
            offline = config.offline,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "embedding model loaded"
        );

        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: std::sync::Mutex::new(model),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
impl EmbeddingProvider for LocalEncoder {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn encode(&self, texts: &[String]) -> rani_core::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut model = self
            .model
            .lock()
            .map_err(|_| RagError::Encoder("encoder lock poisoned".to_string()))?;
        model
            .embed(texts.to_vec(), Some(self.batch_size))
            .map_err(|e| RagError::Encoder(e.to_string()))
    }
}

/// Model name and dimension, falling back to the known width of the model.
fn resolve_local_model(config: &EmbeddingConfig) -> (String, usize) {
    let model_name = config.model.clone();
    let dims = config.dims.unwrap_or(match model_name.as_str() {
        "all-minilm-l6-v2" => 384,
        "bge-small-en-v1.5" => 384,
        "bge-base-en-v1.5" => 768,
        "bge-large-en-v1.5" => 1024,
        "nomic-embed-text-v1.5" => 768,
        _ => 384,
    });
    (model_name, dims)
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, \
             bge-large-en-v1.5, nomic-embed-text-v1.5",
            other
        ),
    }
}

/// Create the process-wide encoder.
///
/// | Config Value | Encoder |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEncoder`] |
/// | `"local"` | `LocalEncoder` (requires the `local-embeddings-fastembed` feature) |
pub fn create_encoder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => {
            let (_, dims) = resolve_local_model(config);
            Ok(Arc::new(DisabledEncoder::new(dims)))
        }
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEncoder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!(
            "Local embedding provider requires --features local-embeddings-fastembed"
        ),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Environment variable that keeps hf-hub from reaching the network.
///
/// Only the local provider in offline mode needs it. The binary applies it
/// before starting the async runtime.
pub fn offline_hub_env(config: &EmbeddingConfig) -> Option<(&'static str, &'static str)> {
    if config.provider == "local" && config.offline {
        Some(("HF_HUB_OFFLINE", "1"))
    } else {
        None
    }
}

/// Encode [`PREWARM_QUERIES`] once. Failures are logged, not fatal.
pub fn prewarm(encoder: &dyn EmbeddingProvider) {
    let started = Instant::now();
    let queries: Vec<String> = PREWARM_QUERIES.iter().map(|q| q.to_string()).collect();
    match encoder.encode(&queries) {
        Ok(vectors) => tracing::info!(
            queries = vectors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "encoder pre-warmed"
        ),
        Err(e) => tracing::warn!(error = %e, "encoder pre-warm failed"),
    }
}
