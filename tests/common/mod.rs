#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rani::app::App;
use rani::blob_store::{BlobStore, FsBlobStore};
use rani::config::{parse_config, Config};
use rani::llm::{GenerationParams, LlmClient};
use rani_core::embedding::EmbeddingProvider;
use rani_core::RagError;

/// Terms the keyword encoder counts, one dimension each.
pub const VOCAB: [&str; 6] = ["filter", "workflow", "dashboard", "connector", "permission", "task"];

/// Deterministic bag-of-keywords encoder. Can be switched to fail.
#[derive(Default)]
pub struct KeywordEncoder {
    failing: AtomicBool,
}

impl KeywordEncoder {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl EmbeddingProvider for KeywordEncoder {
    fn model_name(&self) -> &str {
        "keyword"
    }

    fn dims(&self) -> usize {
        VOCAB.len()
    }

    fn encode(&self, texts: &[String]) -> rani_core::Result<Vec<Vec<f32>>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RagError::Encoder("keyword encoder switched off".to_string()));
        }
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                VOCAB
                    .iter()
                    .map(|term| lower.matches(term).count() as f32)
                    .collect()
            })
            .collect())
    }
}

/// Records every prompt and answers with a fixed reply.
///
/// Expansion prompts get `expansion` (or an error when unset).
pub struct RecordingLlm {
    pub reply: Option<String>,
    pub expansion: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl RecordingLlm {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            expansion: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            expansion: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_expansion(mut self, expansion: &str) -> Self {
        self.expansion = Some(expansion.to_string());
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    /// The last prompt that was not an expansion request.
    pub fn answer_prompt(&self) -> String {
        self.prompts()
            .into_iter()
            .filter(|p| !is_expansion(p))
            .last()
            .expect("no answer prompt recorded")
    }
}

fn is_expansion(prompt: &str) -> bool {
    prompt.starts_with("You expand search queries")
}

#[async_trait]
impl LlmClient for RecordingLlm {
    fn model_name(&self) -> &str {
        "recording-llm"
    }

    async fn generate(&self, prompt: &str, _params: &GenerationParams) -> anyhow::Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let reply = if is_expansion(prompt) {
            &self.expansion
        } else {
            &self.reply
        };
        reply
            .clone()
            .ok_or_else(|| anyhow::anyhow!("LLM unavailable"))
    }
}

/// Resolve Pro config with fast retries. Expansion is off unless `expansion`.
pub fn test_config(root: &Path, expansion: bool) -> Config {
    parse_config(&format!(
        r#"
        [product]
        name = "pro"

        [llm]
        query_expansion = {}
        max_attempts = 2
        retry_backoff_ms = 0
        timeout_secs = 5

        [embedding]
        provider = "disabled"

        [storage]
        backend = "filesystem"
        root = "{}"
        prefix = "pro"
        "#,
        expansion,
        root.display()
    ))
    .unwrap()
}

/// An app over the keyword encoder and a filesystem store rooted at `root`.
pub fn test_app(root: &Path, encoder: Arc<KeywordEncoder>, expansion: bool) -> App {
    let config = test_config(root, expansion);
    let profile = config.product.profile().unwrap();
    App::from_parts(config, profile, encoder, Arc::new(FsBlobStore::new(root)))
}

/// Like [`test_app`] but over `blobs`, with expansion off.
pub fn test_app_with_store(
    root: &Path,
    encoder: Arc<KeywordEncoder>,
    blobs: Arc<dyn BlobStore>,
) -> App {
    let config = test_config(root, false);
    let profile = config.product.profile().unwrap();
    App::from_parts(config, profile, encoder, blobs)
}

/// Empty store that rejects every write.
pub struct ReadOnlyStore;

#[async_trait]
impl BlobStore for ReadOnlyStore {
    async fn get(&self, _key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn put(&self, key: &str, _bytes: Vec<u8>, _content_type: &str) -> anyhow::Result<()> {
        anyhow::bail!("access denied writing '{}'", key)
    }

    fn describe(&self) -> String {
        "read-only".to_string()
    }
}

/// A bundle with a `_VERSION` preamble.
pub fn bundle(version: &str, chunks: &[(&str, &str)]) -> Vec<u8> {
    bundle_with_urls(
        version,
        &chunks.iter().map(|(id, c)| (*id, *c, "")).collect::<Vec<_>>(),
    )
}

/// A bundle whose chunks carry (possibly relative) source URLs.
pub fn bundle_with_urls(version: &str, chunks: &[(&str, &str, &str)]) -> Vec<u8> {
    let chunks: Vec<_> = chunks
        .iter()
        .map(|(id, content, url)| {
            json!({
                "id": id,
                "content": content,
                "page_title": format!("Page {}", id),
                "source_url": url,
            })
        })
        .collect();
    serde_json::to_vec(&json!({
        "_VERSION": version,
        "_TOTAL_CHUNKS": chunks.len(),
        "_GENERATED": "2025-06-01T12:00:00Z",
        "_PRODUCT": "pro",
        "chunks": chunks,
    }))
    .unwrap()
}
