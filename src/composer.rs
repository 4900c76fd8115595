//! Answer composition.
//!
//! [`ChatService::chat`] runs one question through the whole pipeline:
//!
//! 1. Resolve the requested version against the product catalog.
//! 2. Expand the question into related search terms (best-effort).
//! 3. Retrieve, preferring chunks of the effective version.
//! 4. Build the prompt from at most `max_context_chunks` entries.
//! 5. Generate with retries; on failure answer with a fixed apology.
//! 6. Zero-context answers lose any URLs and gain a disclaimer.
//! 7. Append version advisories.
//!
//! Nothing in this path returns an error to the caller. Request validation
//! happens beforehand in [`ChatRequest::validate`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rani_core::models::HistoryMessage;
use rani_core::product::ProductProfile;
use rani_core::prompt::{
    build_prompt, classify_question, expansion_prompt, parse_expansion, version_advisories,
    zero_context_disclaimer, ContextEntry, PromptInput, QuestionType, APOLOGETIC_FALLBACK,
};
use rani_core::search::{SearchFilters, SearchOptions, SearchOutcome, SearchStats};
use rani_core::version::VersionResolution;
use rani_core::RagError;

use crate::config::{Config, MAX_RESULTS_LIMIT};
use crate::llm::{generate_with_retry, GenerationParams, LlmClient, RetryPolicy};
use crate::search::Retriever;

/// Longest accepted question, in characters.
pub const MAX_QUERY_CHARS: usize = 1000;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub min_similarity: Option<f32>,
    #[serde(default, flatten)]
    pub filters: SearchFilters,
    #[serde(default)]
    pub conversation_history: Vec<HistoryMessage>,
}

impl ChatRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Check the bounds on `query`, `max_results` and `min_similarity`.
    pub fn validate(&self) -> Result<(), RagError> {
        validate_query(&self.query, self.max_results, self.min_similarity)
    }
}

/// Shared by `/chat` and `/search`.
pub fn validate_query(
    query: &str,
    max_results: Option<usize>,
    min_similarity: Option<f32>,
) -> Result<(), RagError> {
    if query.trim().is_empty() {
        return Err(RagError::BadInput("query must not be empty".to_string()));
    }
    let chars = query.chars().count();
    if chars > MAX_QUERY_CHARS {
        return Err(RagError::BadInput(format!(
            "query is {} characters; the limit is {}",
            chars, MAX_QUERY_CHARS
        )));
    }
    if let Some(k) = max_results {
        if !(1..=MAX_RESULTS_LIMIT).contains(&k) {
            return Err(RagError::BadInput(format!(
                "max_results must be between 1 and {}",
                MAX_RESULTS_LIMIT
            )));
        }
    }
    if let Some(t) = min_similarity {
        if !(0.0..=1.0).contains(&t) {
            return Err(RagError::BadInput(
                "min_similarity must be between 0.0 and 1.0".to_string(),
            ));
        }
    }
    Ok(())
}

/// A chunk that was shown to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextUsed {
    pub content: String,
    pub source_url: String,
    pub page_title: Option<String>,
    pub score: f32,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub message: String,
    pub context_used: Vec<ContextUsed>,
    /// Distinct source URLs of `context_used`, in rank order.
    pub sources: Vec<String>,
    pub sources_count: usize,
    pub processing_time_ms: u64,
    pub model_used: String,
    pub version_context: VersionResolution,
    pub question_type: QuestionType,
    pub expanded_query: Option<String>,
    pub search_stats: SearchStats,
}

/// Knobs of the composer, taken from `[llm]` and `[retrieval]`.
#[derive(Debug, Clone)]
pub struct ComposerSettings {
    pub max_context_chunks: usize,
    pub max_chars_per_chunk: usize,
    pub history_turns: usize,
    pub similarity_threshold: f32,
    pub default_max_results: usize,
    pub query_expansion: bool,
    pub expansion_timeout: Duration,
    pub generation: GenerationParams,
    pub retry: RetryPolicy,
}

impl ComposerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_context_chunks: config.retrieval.max_context_chunks,
            max_chars_per_chunk: config.retrieval.max_tokens_per_chunk,
            history_turns: config.retrieval.history_turns,
            similarity_threshold: config.retrieval.similarity_threshold,
            default_max_results: config.retrieval.default_max_results,
            query_expansion: config.llm.query_expansion,
            expansion_timeout: Duration::from_secs(config.llm.expansion_timeout_secs),
            generation: GenerationParams::from_config(&config.llm),
            retry: RetryPolicy::from_config(&config.llm),
        }
    }
}

pub struct ChatService {
    profile: Arc<ProductProfile>,
    retriever: Retriever,
    llm: Arc<dyn LlmClient>,
    settings: ComposerSettings,
    markdown_link: Regex,
    bare_url: Regex,
}

impl ChatService {
    pub fn new(
        profile: Arc<ProductProfile>,
        retriever: Retriever,
        llm: Arc<dyn LlmClient>,
        settings: ComposerSettings,
    ) -> Self {
        Self {
            profile,
            retriever,
            llm,
            settings,
            markdown_link: Regex::new(r"\[([^\]]*)\]\(\s*https?://[^)]*\)").expect("valid pattern"),
            bare_url: Regex::new(r"<?https?://[^\s<>()]+>?").expect("valid pattern"),
        }
    }

    pub fn profile(&self) -> &ProductProfile {
        &self.profile
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    pub async fn chat(&self, request: &ChatRequest) -> ChatResponse {
        let started = Instant::now();
        let question = request.query.trim();
        let resolution = self.profile.catalog.resolve(request.version.as_deref());
        if resolution.is_unsupported() {
            tracing::info!(
                requested = ?resolution.requested,
                effective = %resolution.effective,
                "unsupported version requested; using default"
            );
        }
        let question_type = classify_question(question);

        let expanded_query = if self.settings.query_expansion {
            self.expand(question).await
        } else {
            None
        };

        let opts = SearchOptions {
            k: request
                .max_results
                .unwrap_or(self.settings.default_max_results)
                .clamp(1, MAX_RESULTS_LIMIT),
            min_similarity: request
                .min_similarity
                .unwrap_or(self.settings.similarity_threshold),
            version_preference: Some(resolution.effective.clone()),
            filters: request.filters.clone(),
            strict_version: false,
        };
        let search_text = expanded_query.as_deref().unwrap_or(question);
        let outcome = match self.retriever.try_search(search_text, &opts).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, code = e.code(), "retrieval failed; answering without context");
                SearchOutcome::failed(e.to_string())
            }
        };

        let hits: Vec<_> = outcome
            .results
            .iter()
            .take(self.settings.max_context_chunks)
            .collect();
        let context: Vec<ContextEntry> = hits
            .iter()
            .map(|hit| ContextEntry {
                source_url: self.profile.complete_url(&hit.chunk.source_url),
                page_title: hit.chunk.page_title.clone(),
                header: hit.chunk.header.clone(),
                score: hit.score,
                content: hit.chunk.content.clone(),
            })
            .collect();
        let context_used: Vec<ContextUsed> = hits
            .iter()
            .zip(&context)
            .map(|(hit, entry)| ContextUsed {
                content: hit.chunk.content.clone(),
                source_url: entry.source_url.clone(),
                page_title: hit.chunk.page_title.clone(),
                score: hit.score,
                version: hit.chunk.version.clone(),
            })
            .collect();

        let prompt = build_prompt(&PromptInput {
            profile: &self.profile,
            question,
            question_type,
            effective_version: &resolution.effective,
            context: &context,
            history: &request.conversation_history,
            history_turns: self.settings.history_turns,
            max_chars_per_chunk: self.settings.max_chars_per_chunk,
        });

        let generated = generate_with_retry(
            self.llm.as_ref(),
            &prompt,
            &self.settings.generation,
            &self.settings.retry,
        )
        .await;

        let (message, context_used) = match generated {
            Err(e) => {
                tracing::error!(error = %e, "generation failed; returning fallback");
                (APOLOGETIC_FALLBACK.to_string(), Vec::new())
            }
            Ok(text) => {
                let mut message = if context.is_empty() {
                    tracing::info!(question_type = question_type.as_str(), "zero-context answer");
                    format!(
                        "{}{}",
                        zero_context_disclaimer(&self.profile.display_name),
                        self.strip_urls(&text).trim()
                    )
                } else {
                    text
                };
                let advisories =
                    version_advisories(&resolution, self.profile.catalog.latest_version());
                for advisory in &advisories {
                    message = format!("{}\n\n{}", message.trim_end(), advisory);
                }
                if !advisories.is_empty() {
                    tracing::debug!(count = advisories.len(), "version advisories appended");
                }
                (message, context_used)
            }
        };

        let mut sources: Vec<String> = Vec::new();
        for entry in &context_used {
            if !entry.source_url.is_empty() && !sources.contains(&entry.source_url) {
                sources.push(entry.source_url.clone());
            }
        }

        let processing_time_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            version = %resolution.effective,
            question_type = question_type.as_str(),
            context_chunks = context_used.len(),
            version_matched_chunks = outcome.stats.version_matched_chunks,
            processing_time_ms,
            "chat answered"
        );

        ChatResponse {
            message,
            sources_count: context_used.len(),
            context_used,
            sources,
            processing_time_ms,
            model_used: self.llm.model_name().to_string(),
            version_context: resolution,
            question_type,
            expanded_query,
            search_stats: outcome.stats,
        }
    }

    /// Ask the model for related search terms. `None` on any failure.
    async fn expand(&self, question: &str) -> Option<String> {
        let prompt = expansion_prompt(question, &self.profile.display_name);
        let params = self.settings.generation.for_expansion();
        let call = self.llm.generate(&prompt, &params);
        match tokio::time::timeout(self.settings.expansion_timeout, call).await {
            Ok(Ok(raw)) => {
                let expanded = parse_expansion(&raw);
                if expanded.is_none() {
                    tracing::debug!("empty query expansion; using original question");
                }
                expanded
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "query expansion failed; using original question");
                None
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.settings.expansion_timeout.as_secs(),
                    "query expansion timed out; using original question"
                );
                None
            }
        }
    }

    /// Remove links, keeping markdown link text.
    fn strip_urls(&self, text: &str) -> String {
        let text = self.markdown_link.replace_all(text, "$1");
        self.bare_url.replace_all(&text, "").into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_query_bounds() {
        assert!(validate_query("What is a filter?", Some(5), Some(0.3)).is_ok());
        assert!(validate_query("   ", None, None).is_err());
        assert!(validate_query(&"x".repeat(1001), None, None).is_err());
        assert!(validate_query(&"x".repeat(1000), None, None).is_ok());
        assert!(validate_query("q", Some(0), None).is_err());
        assert!(validate_query("q", Some(21), None).is_err());
        assert!(validate_query("q", Some(20), Some(1.0)).is_ok());
        assert!(validate_query("q", None, Some(-0.1)).is_err());
        assert!(validate_query("q", None, Some(1.5)).is_err());
    }

    #[test]
    fn test_chat_request_deserializes_filters() {
        let req: ChatRequest = serde_json::from_str(
            r#"{
                "query": "How do I build a workflow?",
                "version": "v8.0",
                "content_type": "workflow",
                "has_code": false,
                "conversation_history": [{"role": "model", "content": "Hi"}]
            }"#,
        )
        .unwrap();
        assert_eq!(req.version.as_deref(), Some("v8.0"));
        assert!(req.filters.content_type.is_some());
        assert_eq!(req.filters.has_code, Some(false));
        assert_eq!(req.conversation_history.len(), 1);
        assert!(req.max_results.is_none());
    }
}
