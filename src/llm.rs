//! LLM client.
//!
//! [`LlmClient`] is the seam the composer talks to; [`GeminiClient`] calls
//! the Gemini `generateContent` REST endpoint. [`generate_with_retry`]
//! wraps any client with a per-attempt timeout and linear backoff
//! (`backoff × attempt`: 0.5s, 1.0s, ... with the default config). An empty
//! completion counts as a failure.

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use rani_core::RagError;

use crate::config::LlmConfig;

/// Sampling parameters for one completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl GenerationParams {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
            max_output_tokens: config.max_output_tokens,
        }
    }

    /// Low-temperature, short-output variant used for query expansion.
    pub fn for_expansion(&self) -> Self {
        Self {
            temperature: 0.3,
            max_output_tokens: 150,
            ..*self
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Model identifier reported as `model_used`.
    fn model_name(&self) -> &str;

    /// One completion attempt. No retries.
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> anyhow::Result<String>;
}

/// Attempt budget for [`generate_with_retry`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
            attempt_timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// Generate with retries.
///
/// # Errors
///
/// `Llm` after every attempt failed, timed out, or returned only whitespace.
pub async fn generate_with_retry(
    llm: &dyn LlmClient,
    prompt: &str,
    params: &GenerationParams,
    policy: &RetryPolicy,
) -> Result<String, RagError> {
    let mut last_error = String::from("no attempts made");
    for attempt in 1..=policy.max_attempts {
        let outcome = tokio::time::timeout(policy.attempt_timeout, llm.generate(prompt, params)).await;
        match outcome {
            Ok(Ok(text)) if !text.trim().is_empty() => return Ok(text),
            Ok(Ok(_)) => last_error = "empty completion".to_string(),
            Ok(Err(e)) => last_error = format!("{:#}", e),
            Err(_) => last_error = format!("timed out after {:?}", policy.attempt_timeout),
        }
        tracing::warn!(
            attempt,
            max_attempts = policy.max_attempts,
            error = %last_error,
            "LLM attempt failed"
        );
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.backoff * attempt).await;
        }
    }
    Err(RagError::Llm(last_error))
}

// ============ Gemini ============

pub struct GeminiClient {
    model: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiClient {
    /// Build the client, reading the API key from `llm.api_key_env`.
    ///
    /// # Errors
    ///
    /// Fails if the key is unset or empty; a running server without one
    /// could only ever answer with the fallback.
    pub fn from_config(config: &LlmConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .with_context(|| {
                format!(
                    "{} environment variable not set (required for the LLM client)",
                    config.api_key_env
                )
            })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build LLM HTTP client")?;
        Ok(Self {
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> anyhow::Result<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = build_request_body(prompt, params);

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("Gemini request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("Gemini API error (HTTP {}): {}", status, text);
        }

        let json: Value = resp.json().await.context("Invalid Gemini response body")?;
        parse_response_text(&json)
    }
}

fn build_request_body(prompt: &str, params: &GenerationParams) -> Value {
    json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        "generationConfig": {
            "temperature": params.temperature,
            "topP": params.top_p,
            "topK": params.top_k,
            "maxOutputTokens": params.max_output_tokens,
        }
    })
}

/// Concatenate the text parts of the first candidate.
fn parse_response_text(json: &Value) -> anyhow::Result<String> {
    let parts = json
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array());
    let Some(parts) = parts else {
        let reason = json
            .get("promptFeedback")
            .and_then(|f| f.get("blockReason"))
            .and_then(|r| r.as_str())
            .unwrap_or("no candidates");
        bail!("Gemini returned no content: {}", reason);
    };
    Ok(parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join(""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl LlmClient for Flaky {
        fn model_name(&self) -> &str {
            "flaky"
        }
        async fn generate(&self, _prompt: &str, _params: &GenerationParams) -> anyhow::Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.succeed_on {
                Ok("answer".to_string())
            } else if n % 2 == 0 {
                Ok("   ".to_string())
            } else {
                bail!("boom")
            }
        }
    }

    fn params() -> GenerationParams {
        GenerationParams::from_config(&LlmConfig::default())
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::ZERO,
            attempt_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let llm = Flaky {
            calls: AtomicU32::new(0),
            succeed_on: 3,
        };
        let out = generate_with_retry(&llm, "p", &params(), &policy()).await.unwrap();
        assert_eq!(out, "answer");
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let llm = Flaky {
            calls: AtomicU32::new(0),
            succeed_on: 99,
        };
        let err = generate_with_retry(&llm, "p", &params(), &policy()).await.unwrap_err();
        assert!(matches!(err, RagError::Llm(_)));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_expansion_params() {
        let p = params().for_expansion();
        assert_eq!(p.temperature, 0.3);
        assert_eq!(p.max_output_tokens, 150);
        assert_eq!(p.top_k, 40);
    }

    #[test]
    fn test_request_body_shape() {
        let body = build_request_body("hello", &params());
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(body["generationConfig"]["topK"], 40);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 2048);
    }

    #[test]
    fn test_parse_response_text() {
        let json = json!({
            "candidates": [{ "content": { "parts": [{ "text": "Hello " }, { "text": "world" }] } }]
        });
        assert_eq!(parse_response_text(&json).unwrap(), "Hello world");

        let blocked = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        assert!(parse_response_text(&blocked).unwrap_err().to_string().contains("SAFETY"));
    }
}
