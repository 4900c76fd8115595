//! Brute-force cosine search with version-preference re-ranking.
//!
//! 1. Score the query against every row of the combined view.
//! 2. Keep the top `2k` rows by score.
//! 3. Apply metadata filters and the similarity threshold.
//! 4. Sort by `(not version_match, -score)` and truncate to `k`.
//!
//! Version preference is a re-rank, not a filter, unless
//! [`SearchOptions::strict_version`] is set.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::index::IndexSnapshot;
use crate::models::{Chunk, Complexity, ContentType};
use crate::version::normalize_version;

/// Optional metadata filters; `None` means "don't care".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub content_type: Option<ContentType>,
    #[serde(default)]
    pub complexity: Option<Complexity>,
    #[serde(default)]
    pub has_code: Option<bool>,
}

impl SearchFilters {
    pub fn matches(&self, chunk: &Chunk) -> bool {
        self.content_type.map_or(true, |ct| chunk.content_type == ct)
            && self.complexity.map_or(true, |c| chunk.complexity == c)
            && self.has_code.map_or(true, |h| chunk.has_code == h)
    }

    pub fn is_empty(&self) -> bool {
        self.content_type.is_none() && self.complexity.is_none() && self.has_code.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub k: usize,
    pub min_similarity: f32,
    /// Normalized version whose chunks are ranked first.
    pub version_preference: Option<String>,
    pub filters: SearchFilters,
    /// Drop chunks of other versions instead of ranking them lower.
    pub strict_version: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            k: 5,
            min_similarity: 0.25,
            version_preference: None,
            filters: SearchFilters::default(),
            strict_version: false,
        }
    }
}

/// One ranked hit.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
    pub version_match: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SearchStats {
    /// Rows in the combined index at search time.
    pub indexed_chunks: usize,
    /// Rows kept by the top-`2k` pre-selection.
    pub candidates: usize,
    /// Candidates surviving filters and the threshold.
    pub after_filters: usize,
    /// Returned results whose version matches the preference.
    pub version_matched_chunks: usize,
}

/// Search results plus statistics. `error` is set instead of failing when
/// the caller asked for recoverable semantics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchOutcome {
    pub results: Vec<ScoredChunk>,
    pub stats: SearchStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Rank `snapshot` against an already-encoded query vector.
///
/// # Errors
///
/// `IndexCorrupt` if the query dimension differs from the index dimension.
/// An empty index or `k == 0` yields an empty outcome.
pub fn search_snapshot(
    snapshot: &IndexSnapshot,
    query: &[f32],
    opts: &SearchOptions,
) -> Result<SearchOutcome> {
    let combined = snapshot.combined();
    let mut stats = SearchStats {
        indexed_chunks: combined.len(),
        ..SearchStats::default()
    };
    if opts.k == 0 || combined.is_empty() {
        return Ok(SearchOutcome {
            stats,
            ..SearchOutcome::default()
        });
    }
    if query.len() != snapshot.dims() {
        return Err(RagError::corrupt(
            opts.version_preference.as_deref().unwrap_or("*"),
            format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                snapshot.dims()
            ),
        ));
    }

    let scores = combined.embeddings().cosine_scores(query);
    let mut order: Vec<usize> = (0..scores.len()).collect();
    let keep = opts.k.saturating_mul(2).min(order.len());
    let by_score = |a: &usize, b: &usize| {
        scores[*b]
            .partial_cmp(&scores[*a])
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(b))
    };
    if keep < order.len() {
        order.select_nth_unstable_by(keep, by_score);
        order.truncate(keep);
    }
    order.sort_by(by_score);
    stats.candidates = order.len();

    let preference = opts
        .version_preference
        .as_deref()
        .map(normalize_version)
        .filter(|v| !v.is_empty());

    let mut hits: Vec<ScoredChunk> = Vec::with_capacity(order.len());
    for row in order {
        let score = scores[row];
        if score < opts.min_similarity {
            continue;
        }
        let Some(chunk) = combined.chunk(row) else {
            continue;
        };
        if !opts.filters.matches(chunk) {
            continue;
        }
        let version_match = preference
            .as_deref()
            .map_or(false, |p| normalize_version(&chunk.version) == p);
        if opts.strict_version && preference.is_some() && !version_match {
            continue;
        }
        hits.push(ScoredChunk {
            chunk: chunk.clone(),
            score,
            version_match,
        });
    }
    stats.after_filters = hits.len();

    hits.sort_by(|a, b| {
        b.version_match
            .cmp(&a.version_match)
            .then(b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
    });
    hits.truncate(opts.k);
    stats.version_matched_chunks = hits.iter().filter(|h| h.version_match).count();

    Ok(SearchOutcome {
        results: hits,
        stats,
        error: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{Partition, VersionedIndex};
    use crate::matrix::EmbeddingMatrix;
    use proptest::prelude::*;

    fn partition(version: &str, rows: Vec<(&str, Vec<f32>)>) -> Partition {
        let dims = rows.first().map(|r| r.1.len()).unwrap_or(3);
        let chunks = rows
            .iter()
            .map(|(id, _)| Chunk::new(*id, format!("text {}", id), version))
            .collect();
        let vecs = rows.into_iter().map(|r| r.1).collect();
        Partition::new(version, EmbeddingMatrix::from_rows(vecs, dims).unwrap(), chunks).unwrap()
    }

    fn opts(k: usize, min: f32, pref: Option<&str>) -> SearchOptions {
        SearchOptions {
            k,
            min_similarity: min,
            version_preference: pref.map(str::to_string),
            ..SearchOptions::default()
        }
    }

    #[test]
    fn test_empty_index_returns_nothing() {
        let idx = VersionedIndex::new(3);
        let out = search_snapshot(&idx.snapshot(), &[1.0, 0.0, 0.0], &opts(5, 0.0, None)).unwrap();
        assert!(out.is_empty());
        assert!(out.error.is_none());
    }

    #[test]
    fn test_k_zero_returns_nothing() {
        let idx = VersionedIndex::new(3);
        idx.replace_partition(partition("8-0", vec![("a", vec![1.0, 0.0, 0.0])]))
            .unwrap();
        let out = search_snapshot(&idx.snapshot(), &[1.0, 0.0, 0.0], &opts(0, 0.0, None)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_version_preference_outranks_higher_score() {
        let idx = VersionedIndex::new(3);
        idx.replace_partition(partition("8-0", vec![("mild", vec![0.25, 0.968, 0.0])]))
            .unwrap();
        idx.replace_partition(partition("7-9", vec![("strong", vec![0.75, 0.661, 0.0])]))
            .unwrap();

        let out =
            search_snapshot(&idx.snapshot(), &[1.0, 0.0, 0.0], &opts(2, 0.1, Some("8.0"))).unwrap();
        let ids: Vec<&str> = out.results.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["mild", "strong"]);
        assert!(out.results[0].version_match);
        assert!(out.results[0].score < out.results[1].score);
        assert_eq!(out.stats.version_matched_chunks, 1);
    }

    #[test]
    fn test_strict_version_excludes_others() {
        let idx = VersionedIndex::new(3);
        idx.replace_partition(partition("8-0", vec![("a", vec![0.5, 0.5, 0.0])]))
            .unwrap();
        idx.replace_partition(partition("7-9", vec![("b", vec![1.0, 0.0, 0.0])]))
            .unwrap();
        let mut o = opts(5, 0.0, Some("8-0"));
        o.strict_version = true;
        let out = search_snapshot(&idx.snapshot(), &[1.0, 0.0, 0.0], &o).unwrap();
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.results[0].chunk.id, "a");
    }

    #[test]
    fn test_threshold_drops_low_scores() {
        let idx = VersionedIndex::new(3);
        idx.replace_partition(partition(
            "8-0",
            vec![("hit", vec![1.0, 0.0, 0.0]), ("miss", vec![0.0, 1.0, 0.0])],
        ))
        .unwrap();
        let out = search_snapshot(&idx.snapshot(), &[1.0, 0.0, 0.0], &opts(5, 0.5, None)).unwrap();
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.results[0].chunk.id, "hit");
        assert_eq!(out.stats.candidates, 2);
        assert_eq!(out.stats.after_filters, 1);
    }

    #[test]
    fn test_k1_min_one_returns_at_most_one() {
        let idx = VersionedIndex::new(3);
        idx.replace_partition(partition(
            "8-0",
            vec![("a", vec![1.0, 0.0, 0.0]), ("b", vec![0.9, 0.1, 0.0])],
        ))
        .unwrap();
        let out = search_snapshot(&idx.snapshot(), &[0.0, 0.0, 1.0], &opts(1, 1.0, None)).unwrap();
        assert!(out.results.len() <= 1);
    }

    #[test]
    fn test_filters_apply() {
        let idx = VersionedIndex::new(3);
        let mut p = partition(
            "8-0",
            vec![("code", vec![1.0, 0.0, 0.0]), ("prose", vec![0.9, 0.1, 0.0])],
        );
        let chunks: Vec<Chunk> = p
            .chunks()
            .iter()
            .cloned()
            .map(|mut c| {
                c.has_code = c.id == "code";
                c
            })
            .collect();
        p = Partition::new("8-0", p.embeddings().clone(), chunks).unwrap();
        idx.replace_partition(p).unwrap();

        let mut o = opts(5, 0.0, None);
        o.filters.has_code = Some(false);
        let out = search_snapshot(&idx.snapshot(), &[1.0, 0.0, 0.0], &o).unwrap();
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.results[0].chunk.id, "prose");
    }

    #[test]
    fn test_dimension_mismatch_is_corrupt() {
        let idx = VersionedIndex::new(3);
        idx.replace_partition(partition("8-0", vec![("a", vec![1.0, 0.0, 0.0])]))
            .unwrap();
        let err = search_snapshot(&idx.snapshot(), &[1.0, 0.0], &opts(5, 0.0, None)).unwrap_err();
        assert!(matches!(err, RagError::IndexCorrupt { .. }));
    }

    proptest! {
        #[test]
        fn version_match_ranks_first_on_ties(
            scores in prop::collection::vec(0.0f32..1.0, 1..12),
            matches in prop::collection::vec(any::<bool>(), 12),
        ) {
            let idx = VersionedIndex::new(2);
            let mut pref_rows = Vec::new();
            let mut other_rows = Vec::new();
            for (i, s) in scores.iter().enumerate() {
                let s = (*s * 10.0).round() / 10.0;
                let v = vec![s, (1.0 - s * s).max(0.0).sqrt()];
                let id = format!("c{}", i);
                if matches[i] {
                    pref_rows.push((id, v));
                } else {
                    other_rows.push((id, v));
                }
            }
            for (version, rows) in [("8-0", pref_rows), ("7-9", other_rows)] {
                if rows.is_empty() {
                    continue;
                }
                let chunks = rows.iter().map(|(id, _)| Chunk::new(id.clone(), "x", version)).collect();
                let m = EmbeddingMatrix::from_rows(rows.into_iter().map(|r| r.1).collect(), 2).unwrap();
                idx.replace_partition(Partition::new(version, m, chunks).unwrap()).unwrap();
            }

            let out = search_snapshot(&idx.snapshot(), &[1.0, 0.0], &opts(20, 0.0, Some("8-0"))).unwrap();
            for (i, a) in out.results.iter().enumerate() {
                for b in &out.results[i + 1..] {
                    prop_assert!(a.version_match || !b.version_match);
                }
            }
        }
    }
}
