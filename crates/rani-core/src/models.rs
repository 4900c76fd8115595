//! Core data types that flow through ingest and retrieval.
//!
//! A [`Chunk`] is the unit of indexed documentation. Chunks are persisted
//! as a JSON array in row order next to their embedding matrix, so the
//! serialized shape here is the on-disk shape of `chunks-<v>.json`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Approximate characters-per-token ratio used when a chunk carries no
/// token estimate of its own.
pub const CHARS_PER_TOKEN: usize = 4;

/// Rough token estimate for `text` (`ceil(chars / 4)`).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Coarse classification of a documentation passage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum ContentType {
    Workflow,
    Configuration,
    Integration,
    Troubleshooting,
    Administration,
    Monitoring,
    Reference,
    #[default]
    General,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Workflow => "workflow",
            ContentType::Configuration => "configuration",
            ContentType::Integration => "integration",
            ContentType::Troubleshooting => "troubleshooting",
            ContentType::Administration => "administration",
            ContentType::Monitoring => "monitoring",
            ContentType::Reference => "reference",
            ContentType::General => "general",
        }
    }
}

impl From<&str> for ContentType {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "workflow" => ContentType::Workflow,
            "configuration" | "config" => ContentType::Configuration,
            "integration" => ContentType::Integration,
            "troubleshooting" => ContentType::Troubleshooting,
            "administration" | "admin" => ContentType::Administration,
            "monitoring" => ContentType::Monitoring,
            "reference" => ContentType::Reference,
            _ => ContentType::General,
        }
    }
}

impl From<String> for ContentType {
    fn from(s: String) -> Self {
        ContentType::from(s.as_str())
    }
}

/// How involved a passage is; used only as a search filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Complexity {
    Simple,
    #[default]
    Moderate,
    Detailed,
    Advanced,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Detailed => "detailed",
            Complexity::Advanced => "advanced",
        }
    }
}

impl From<&str> for Complexity {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "simple" => Complexity::Simple,
            "detailed" => Complexity::Detailed,
            "advanced" => Complexity::Advanced,
            _ => Complexity::Moderate,
        }
    }
}

impl From<String> for Complexity {
    fn from(s: String) -> Self {
        Complexity::from(s.as_str())
    }
}

/// A single indexed documentation passage.
///
/// `version` always holds a normalized version token. Fields the pipeline
/// does not interpret (relationship hints and the like) are preserved in
/// `extra` and written back on persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub complexity: Complexity,
    pub version: String,
    #[serde(default)]
    pub tokens: usize,
    #[serde(default)]
    pub has_code: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

impl Chunk {
    /// Minimal chunk with defaults for every optional attribute.
    pub fn new(id: impl Into<String>, content: impl Into<String>, version: impl Into<String>) -> Self {
        let content = content.into();
        let tokens = estimate_tokens(&content);
        Self {
            id: id.into(),
            content,
            page_title: None,
            header: None,
            source_url: String::new(),
            content_type: ContentType::General,
            complexity: Complexity::Moderate,
            version: version.into(),
            tokens,
            has_code: false,
            tags: Vec::new(),
            content_hash: None,
            extra: Map::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.page_title = Some(title.into());
        self
    }

    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = url.into();
        self
    }
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "model", alias = "bot")]
    Assistant,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// One caller-supplied conversation message. History is never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
}
