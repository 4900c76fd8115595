//! Parsing of the per-version "comprehensive JSON" documentation bundle.
//!
//! Two shapes are accepted:
//!
//! - **Versioned**: a metadata preamble of `_`-prefixed keys plus a
//!   `chunks` array. `_VERSION`, `_TOTAL_CHUNKS` and `_GENERATED` are
//!   required; `_TOTAL_CHUNKS` must equal the number of chunks.
//! - **Legacy**: a flat `{ "chunks": [...] }` without any `_` key; it is
//!   ingested into the default version.
//!
//! ```json
//! {
//!   "_VERSION": "8.0",
//!   "_TOTAL_CHUNKS": 1,
//!   "_GENERATED": "2025-06-01T12:00:00Z",
//!   "chunks": [{ "id": "c1", "content": "A filter selects rows." }]
//! }
//! ```
//!
//! Chunk objects need `id` and `content`; every other attribute is best
//! effort and may also appear under a nested `metadata` object.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};

use crate::embedding::content_hash;
use crate::error::{RagError, Result};
use crate::models::{estimate_tokens, Chunk, Complexity, ContentType};
use crate::version::{normalize_version, VersionCatalog};

/// Preamble keys that must be present in a versioned bundle.
pub const REQUIRED_PREAMBLE_KEYS: &[&str] = &["_VERSION", "_TOTAL_CHUNKS", "_GENERATED"];

/// Top-level chunk keys interpreted by [`chunk_from_value`]; everything
/// else is kept in [`Chunk::extra`].
const KNOWN_CHUNK_KEYS: &[&str] = &[
    "id",
    "content",
    "page_title",
    "title",
    "header",
    "section",
    "source_url",
    "url",
    "content_type",
    "complexity",
    "version",
    "tokens",
    "token_count",
    "has_code",
    "tags",
    "content_hash",
];

/// A parsed, validated bundle. Chunk versions are normalized but not yet
/// reconciled with the partition version (see [`derive_partition_version`]).
#[derive(Debug, Clone)]
pub struct Bundle {
    /// `_VERSION` exactly as written, if present.
    pub declared_version: Option<String>,
    pub product: Option<String>,
    pub generated: Option<String>,
    pub checksum: Option<String>,
    /// True for the flat legacy shape without a preamble.
    pub legacy: bool,
    /// Optional preamble entries (`_STATS`, `_PAGE_MAPPINGS`, ...), kept as-is.
    pub preamble: Map<String, Value>,
    pub chunks: Vec<Chunk>,
}

/// Parse raw bundle bytes.
///
/// # Errors
///
/// `BadInput` for invalid JSON, a missing `chunks` array, missing required
/// preamble keys, a `_TOTAL_CHUNKS` mismatch, an unparseable `_GENERATED`
/// timestamp, chunks without `id`/`content`, or duplicate chunk ids.
pub fn parse_bundle(bytes: &[u8]) -> Result<Bundle> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| RagError::BadInput(format!("bundle is not valid JSON: {}", e)))?;
    parse_bundle_value(value)
}

/// Parse an already-decoded bundle document.
pub fn parse_bundle_value(value: Value) -> Result<Bundle> {
    let Value::Object(mut doc) = value else {
        return Err(RagError::BadInput("bundle must be a JSON object".to_string()));
    };

    let chunks_value = doc
        .remove("chunks")
        .ok_or_else(|| RagError::BadInput("bundle has no 'chunks' array".to_string()))?;
    let Value::Array(raw_chunks) = chunks_value else {
        return Err(RagError::BadInput("'chunks' must be an array".to_string()));
    };

    let mut preamble: Map<String, Value> = doc
        .into_iter()
        .filter(|(k, _)| k.starts_with('_'))
        .collect();
    let legacy = preamble.is_empty();

    let mut declared_version = None;
    let mut generated = None;
    if !legacy {
        let missing: Vec<&str> = REQUIRED_PREAMBLE_KEYS
            .iter()
            .copied()
            .filter(|k| !preamble.contains_key(*k))
            .collect();
        if !missing.is_empty() {
            return Err(RagError::BadInput(format!(
                "bundle preamble is missing required keys: {}",
                missing.join(", ")
            )));
        }

        let version = preamble
            .remove("_VERSION")
            .and_then(|v| scalar_string(&v))
            .filter(|v| !normalize_version(v).is_empty())
            .ok_or_else(|| RagError::BadInput("_VERSION must be a non-empty string".to_string()))?;
        declared_version = Some(version);

        let total = preamble
            .remove("_TOTAL_CHUNKS")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| {
                RagError::BadInput("_TOTAL_CHUNKS must be a non-negative integer".to_string())
            })?;
        if total as usize != raw_chunks.len() {
            return Err(RagError::BadInput(format!(
                "_TOTAL_CHUNKS is {} but the bundle contains {} chunks",
                total,
                raw_chunks.len()
            )));
        }

        let stamp = preamble
            .remove("_GENERATED")
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| RagError::BadInput("_GENERATED must be a string".to_string()))?;
        if !is_iso8601(&stamp) {
            return Err(RagError::BadInput(format!(
                "_GENERATED is not an ISO-8601 timestamp: '{}'",
                stamp
            )));
        }
        generated = Some(stamp);
    }

    let product = preamble.remove("_PRODUCT").and_then(|v| scalar_string(&v));
    let checksum = preamble.remove("_CHECKSUM").and_then(|v| scalar_string(&v));

    let mut seen = HashSet::with_capacity(raw_chunks.len());
    let mut chunks = Vec::with_capacity(raw_chunks.len());
    for (i, raw) in raw_chunks.into_iter().enumerate() {
        let chunk = chunk_from_value(i, raw)?;
        if !seen.insert(chunk.id.clone()) {
            return Err(RagError::BadInput(format!(
                "duplicate chunk id '{}' at index {}",
                chunk.id, i
            )));
        }
        chunks.push(chunk);
    }

    Ok(Bundle {
        declared_version,
        product,
        generated,
        checksum,
        legacy,
        preamble,
        chunks,
    })
}

/// Convert one loosely-typed chunk object into a [`Chunk`].
///
/// Attributes are looked up on the object first and then under its
/// `metadata` object, accepting the aliases `title`, `section`, `url` and
/// `token_count`. Missing `tokens` and `content_hash` are computed.
pub fn chunk_from_value(index: usize, value: Value) -> Result<Chunk> {
    let Value::Object(obj) = value else {
        return Err(RagError::BadInput(format!("chunk {} is not an object", index)));
    };
    let meta = obj.get("metadata").and_then(Value::as_object);

    let id = obj
        .get("id")
        .and_then(scalar_string)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| RagError::BadInput(format!("chunk {} has no 'id'", index)))?;
    let content = obj
        .get("content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RagError::BadInput(format!("chunk '{}' has no 'content'", id)))?;

    let lookup = |keys: &[&str]| -> Option<&Value> {
        keys.iter()
            .find_map(|k| obj.get(*k))
            .or_else(|| meta.and_then(|m| keys.iter().find_map(|k| m.get(*k))))
            .filter(|v| !v.is_null())
    };
    let text = |keys: &[&str]| -> Option<String> {
        lookup(keys)
            .and_then(scalar_string)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let tokens = lookup(&["tokens", "token_count"])
        .and_then(Value::as_u64)
        .map(|t| t as usize)
        .unwrap_or_else(|| estimate_tokens(&content));
    let tags = lookup(&["tags"])
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|t| t.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    let hash = text(&["content_hash"]).unwrap_or_else(|| content_hash(&content));

    let mut extra = obj.clone();
    for k in KNOWN_CHUNK_KEYS {
        extra.remove(*k);
    }

    Ok(Chunk {
        id,
        page_title: text(&["page_title", "title"]),
        header: text(&["header", "section"]),
        source_url: text(&["source_url", "url"]).unwrap_or_default(),
        content_type: text(&["content_type"])
            .map(ContentType::from)
            .unwrap_or_default(),
        complexity: text(&["complexity"]).map(Complexity::from).unwrap_or_default(),
        version: text(&["version"])
            .map(|v| normalize_version(&v))
            .unwrap_or_default(),
        tokens,
        has_code: lookup(&["has_code"]).and_then(Value::as_bool).unwrap_or(false),
        tags,
        content_hash: Some(hash),
        extra,
        content,
    })
}

/// Where a partition's version came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSource {
    /// The bundle's `_VERSION`.
    Declared,
    /// The most common version among the chunks.
    Modal,
    /// Nothing derivable; the catalog default.
    Default,
}

/// The version a bundle will be ingested into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionVersion {
    pub version: String,
    pub source: VersionSource,
    /// Number of chunks whose own version differs from `version`.
    pub disagreeing_chunks: usize,
}

/// Decide which supported version a bundle belongs to.
///
/// The declared `_VERSION` wins; otherwise the modal chunk version is used
/// (ties go to the first seen); otherwise the catalog default. Aliases
/// such as `latest` mean the default.
///
/// # Errors
///
/// `BadInput` if the derived version is well-formed but outside the
/// supported set; an ingest never silently lands in the default partition.
pub fn derive_partition_version(
    bundle: &Bundle,
    catalog: &VersionCatalog,
) -> Result<PartitionVersion> {
    let declared = bundle
        .declared_version
        .as_deref()
        .map(normalize_version)
        .filter(|v| !v.is_empty());

    let (candidate, source) = match declared {
        Some(v) => (Some(v), VersionSource::Declared),
        None => match modal_version(&bundle.chunks) {
            Some(v) => (Some(v), VersionSource::Modal),
            None => (None, VersionSource::Default),
        },
    };

    let version = match candidate {
        None => catalog.default_version().to_string(),
        Some(token) => {
            let resolution = catalog.resolve(Some(&token));
            if resolution.is_unsupported() {
                return Err(RagError::BadInput(format!(
                    "bundle version '{}' is not one of the supported versions [{}]",
                    token,
                    catalog.supported().join(", ")
                )));
            }
            resolution.effective
        }
    };

    let disagreeing_chunks = bundle
        .chunks
        .iter()
        .filter(|c| !c.version.is_empty())
        .filter(|c| catalog.lookup(&c.version).unwrap_or(c.version.as_str()) != version.as_str())
        .count();
    if disagreeing_chunks > 0 {
        tracing::warn!(
            version = %version,
            disagreeing_chunks,
            "bundle chunks carry versions that differ from the partition version"
        );
    }

    Ok(PartitionVersion {
        version,
        source,
        disagreeing_chunks,
    })
}

/// Stamp every chunk with the partition version, consuming the bundle.
pub fn into_partition_chunks(bundle: Bundle, version: &str) -> Vec<Chunk> {
    bundle
        .chunks
        .into_iter()
        .map(|mut c| {
            c.version = version.to_string();
            c
        })
        .collect()
}

/// Most frequent non-empty chunk version; ties go to the first seen.
fn modal_version(chunks: &[Chunk]) -> Option<String> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for c in chunks.iter().filter(|c| !c.version.is_empty()) {
        match counts.iter_mut().find(|(v, _)| *v == c.version) {
            Some((_, n)) => *n += 1,
            None => counts.push((&c.version, 1)),
        }
    }
    if counts.len() > 1 {
        tracing::info!(
            distinct_versions = counts.len(),
            "bundle chunks disagree on version; using the modal version"
        );
    }
    let mut best: Option<(&str, usize)> = None;
    for (v, n) in counts {
        if best.map(|(_, b)| n > b).unwrap_or(true) {
            best = Some((v, n));
        }
    }
    best.map(|(v, _)| v.to_string())
}

fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_iso8601(s: &str) -> bool {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").is_ok()
        || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}
