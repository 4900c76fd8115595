//! Version token normalization and the supported-version catalog.
//!
//! Every version string entering the system (bundle `_VERSION`, chunk
//! metadata, the `version` field of a query) goes through
//! [`normalize_version`] before it is used for routing, storage keys, or
//! comparison. [`VersionCatalog::resolve`] then maps the normalized token
//! onto the product's supported set.
//!
//! # Normalization
//!
//! 1. Trim and lower-case.
//! 2. Replace `.`, `_` and whitespace with `-`, collapse runs of `-`.
//! 3. Strip the known prefixes (`production-`, `version-`) and suffix
//!    (`-only`) until none remain, plus a `v` directly before a digit.
//!
//! ```rust
//! use rani_core::version::normalize_version;
//!
//! assert_eq!(normalize_version("8.0"), "8-0");
//! assert_eq!(normalize_version("On-Premise 2.5"), "on-premise-2-5");
//! assert_eq!(normalize_version("production-on-premise-2-5-only"), "on-premise-2-5");
//! ```

use serde::Serialize;

use crate::error::{RagError, Result};

const STRIP_PREFIXES: &[&str] = &["production-", "version-"];
const STRIP_SUFFIXES: &[&str] = &["-only"];

/// Tokens that always mean "the product default".
const DEFAULT_ALIASES: &[&str] = &["latest", "current", "newest", "default"];

/// Map any accepted surface form of a version to its canonical token.
///
/// The function is idempotent: `normalize_version(normalize_version(s)) ==
/// normalize_version(s)` for every input.
pub fn normalize_version(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();

    let mut token = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        let c = if c == '.' || c == '_' || c.is_whitespace() {
            '-'
        } else {
            c
        };
        if c == '-' && token.ends_with('-') {
            continue;
        }
        token.push(c);
    }
    let mut token = token.trim_matches('-').to_string();

    loop {
        let before = token.len();
        for prefix in STRIP_PREFIXES {
            if let Some(rest) = token.strip_prefix(prefix) {
                token = rest.to_string();
            }
        }
        for suffix in STRIP_SUFFIXES {
            if let Some(rest) = token.strip_suffix(suffix) {
                token = rest.to_string();
            }
        }
        if token.starts_with('v') && token[1..].starts_with(|c: char| c.is_ascii_digit()) {
            token.remove(0);
        }
        token = token.trim_matches('-').to_string();
        if token.len() == before {
            break;
        }
    }

    token
}

/// Whether a normalized token looks like a version at all (lower-case
/// alphanumerics and dashes with at least one digit).
pub fn is_version_like(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= 40
        && token.chars().any(|c| c.is_ascii_digit())
        && token
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// How a requested version was mapped onto the supported set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    /// The request named a supported version (possibly by a short form).
    Supported,
    /// No version was given, or an alias such as `latest` was used.
    Defaulted,
    /// A well-formed version outside the supported set; answered with the
    /// default version plus an advisory.
    Unsupported,
    /// Not recognizable as a version; silently mapped to the default.
    Unrecognized,
}

/// Outcome of resolving a caller-supplied version token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionResolution {
    /// The token exactly as supplied by the caller.
    pub requested: Option<String>,
    /// The normalized form of `requested` (empty if none was supplied).
    pub normalized: String,
    /// The version actually used for routing and preference.
    pub effective: String,
    pub status: VersionStatus,
}

impl VersionResolution {
    pub fn is_unsupported(&self) -> bool {
        self.status == VersionStatus::Unsupported
    }
}

/// The supported versions of one product, with its default and latest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionCatalog {
    supported: Vec<String>,
    default: String,
    latest: String,
}

impl VersionCatalog {
    /// Build a catalog; every token is normalized on the way in.
    ///
    /// # Errors
    ///
    /// `BadInput` if the supported set is empty or the default/latest
    /// version is not a member of it.
    pub fn new(supported: &[String], default: &str, latest: &str) -> Result<Self> {
        let mut normalized: Vec<String> = Vec::with_capacity(supported.len());
        for v in supported {
            let n = normalize_version(v);
            if n.is_empty() {
                return Err(RagError::BadInput(format!("invalid supported version '{}'", v)));
            }
            if !normalized.contains(&n) {
                normalized.push(n);
            }
        }
        if normalized.is_empty() {
            return Err(RagError::BadInput("supported version list is empty".to_string()));
        }

        let default = normalize_version(default);
        let latest = normalize_version(latest);
        for (label, v) in [("default", &default), ("latest", &latest)] {
            if !normalized.contains(v) {
                return Err(RagError::BadInput(format!(
                    "{} version '{}' is not in the supported set [{}]",
                    label,
                    v,
                    normalized.join(", ")
                )));
            }
        }

        Ok(Self {
            supported: normalized,
            default,
            latest,
        })
    }

    pub fn supported(&self) -> &[String] {
        &self.supported
    }

    pub fn default_version(&self) -> &str {
        &self.default
    }

    pub fn latest_version(&self) -> &str {
        &self.latest
    }

    pub fn is_supported(&self, token: &str) -> bool {
        self.supported.iter().any(|v| v == token)
    }

    /// Find the supported version a normalized token refers to, allowing a
    /// unique suffix match (`2-5` → `on-premise-2-5`).
    pub fn lookup(&self, normalized: &str) -> Option<&str> {
        if normalized.is_empty() {
            return None;
        }
        if let Some(v) = self.supported.iter().find(|v| *v == normalized) {
            return Some(v);
        }
        let suffix = format!("-{}", normalized);
        let mut matches = self.supported.iter().filter(|v| v.ends_with(&suffix));
        match (matches.next(), matches.next()) {
            (Some(v), None) => Some(v),
            _ => None,
        }
    }

    /// Resolve a caller-supplied token to the version that will be used.
    pub fn resolve(&self, requested: Option<&str>) -> VersionResolution {
        let requested_owned = requested
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let Some(raw) = requested_owned.as_deref() else {
            return VersionResolution {
                requested: None,
                normalized: String::new(),
                effective: self.default.clone(),
                status: VersionStatus::Defaulted,
            };
        };

        let normalized = normalize_version(raw);

        let (effective, status) = if DEFAULT_ALIASES.contains(&normalized.as_str()) {
            (self.default.clone(), VersionStatus::Defaulted)
        } else if let Some(v) = self.lookup(&normalized) {
            (v.to_string(), VersionStatus::Supported)
        } else if is_version_like(&normalized) {
            (self.default.clone(), VersionStatus::Unsupported)
        } else {
            (self.default.clone(), VersionStatus::Unrecognized)
        };

        VersionResolution {
            requested: requested_owned,
            normalized,
            effective,
            status,
        }
    }
}
