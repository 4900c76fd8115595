//! Error kinds shared by the ingest and query pipelines.

/// Named failure modes of the retrieval core.
///
/// | Variant | Ingest policy | Query policy |
/// |---------|---------------|--------------|
/// | `BadInput` | reject, index untouched | request validation only |
/// | `Encoder` | partition unchanged | zero-context answer |
/// | `Persistence` | committed in memory, warning surfaced | version skipped on load |
/// | `Llm` | n/a | apologetic fallback |
/// | `VersionUnsupported` | reject | default version + advisory |
/// | `IndexCorrupt` | reject | version refused, re-ingest required |
/// | `IndexEmpty` | n/a | only when non-empty startup is demanded |
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("bad input: {0}")]
    BadInput(String),

    #[error("encoder failed: {0}")]
    Encoder(String),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("LLM call failed: {0}")]
    Llm(String),

    #[error("version '{requested}' is not supported (default is '{default}')")]
    VersionUnsupported { requested: String, default: String },

    #[error("index corrupt for version '{version}': {reason}")]
    IndexCorrupt { version: String, reason: String },

    #[error("index is empty")]
    IndexEmpty,
}

impl RagError {
    /// Machine-readable code used in HTTP error bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::BadInput(_) => "bad_request",
            RagError::Encoder(_) => "encoder_error",
            RagError::Persistence(_) => "persistence_error",
            RagError::Llm(_) => "llm_error",
            RagError::VersionUnsupported { .. } => "version_unsupported",
            RagError::IndexCorrupt { .. } => "index_corrupt",
            RagError::IndexEmpty => "index_empty",
        }
    }

    pub fn corrupt(version: impl Into<String>, reason: impl Into<String>) -> Self {
        RagError::IndexCorrupt {
            version: version.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
