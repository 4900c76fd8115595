//! Query-time retrieval.
//!
//! [`Retriever`] encodes the query with the shared encoder, takes a
//! snapshot of the index and ranks it with
//! [`search_snapshot`](rani_core::search::search_snapshot). The snapshot is
//! taken once per search, so an ingest that commits mid-search is not seen
//! until the next query.
//!
//! [`run_search`] is the `rani search` command.

use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;

use rani_core::embedding::EmbeddingProvider;
use rani_core::index::VersionedIndex;
use rani_core::search::{search_snapshot, SearchFilters, SearchOptions, SearchOutcome};
use rani_core::RagError;

use crate::app::App;

#[derive(Clone)]
pub struct Retriever {
    index: Arc<VersionedIndex>,
    encoder: Arc<dyn EmbeddingProvider>,
}

impl Retriever {
    pub fn new(index: Arc<VersionedIndex>, encoder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { index, encoder }
    }

    /// Encode `query` and rank the current snapshot.
    ///
    /// # Errors
    ///
    /// `Encoder` if the query cannot be encoded, `IndexCorrupt` if the
    /// encoder width does not match the index.
    pub async fn try_search(
        &self,
        query: &str,
        opts: &SearchOptions,
    ) -> rani_core::Result<SearchOutcome> {
        let snapshot = self.index.snapshot();
        if opts.k == 0 || snapshot.total_chunks() == 0 {
            return search_snapshot(&snapshot, &[], opts);
        }

        let started = Instant::now();
        let encoder = self.encoder.clone();
        let text = vec![query.to_string()];
        let mut vectors = tokio::task::spawn_blocking(move || encoder.encode(&text))
            .await
            .map_err(|e| RagError::Encoder(format!("encoder task failed: {}", e)))??;
        let vector = vectors
            .pop()
            .ok_or_else(|| RagError::Encoder("encoder returned no vector".to_string()))?;

        let outcome = search_snapshot(&snapshot, &vector, opts)?;
        tracing::debug!(
            indexed = outcome.stats.indexed_chunks,
            candidates = outcome.stats.candidates,
            after_filters = outcome.stats.after_filters,
            version_matched_chunks = outcome.stats.version_matched_chunks,
            results = outcome.results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search complete"
        );
        Ok(outcome)
    }

    /// Like [`try_search`](Self::try_search), but never fails: errors are
    /// logged and returned in [`SearchOutcome::error`] with no results.
    pub async fn search(&self, query: &str, opts: &SearchOptions) -> SearchOutcome {
        match self.try_search(query, opts).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, code = e.code(), "search failed");
                SearchOutcome::failed(e.to_string())
            }
        }
    }
}

/// `rani search`: retrieval only, printed as a ranked list.
pub async fn run_search(
    app: &App,
    query: &str,
    version: Option<&str>,
    limit: Option<usize>,
    min_similarity: Option<f32>,
    filters: SearchFilters,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let resolution = app.profile.catalog.resolve(version);
    let opts = SearchOptions {
        k: limit.unwrap_or(app.config.retrieval.default_max_results),
        min_similarity: min_similarity.unwrap_or(app.config.retrieval.similarity_threshold),
        version_preference: Some(resolution.effective.clone()),
        filters,
        strict_version: false,
    };

    let outcome = app.retriever().try_search(query, &opts).await?;
    if outcome.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in outcome.results.iter().enumerate() {
        let title = hit.chunk.page_title.as_deref().unwrap_or("(untitled)");
        println!(
            "{}. [{:.3}] {} / {}{}",
            i + 1,
            hit.score,
            hit.chunk.version,
            title,
            if hit.version_match { "" } else { " (other version)" }
        );
        if let Some(header) = &hit.chunk.header {
            println!("    section: {}", header);
        }
        println!("    url: {}", app.profile.complete_url(&hit.chunk.source_url));
        let excerpt = rani_core::prompt::truncate_chars(&hit.chunk.content.replace('\n', " "), 160);
        println!("    excerpt: \"{}\"", excerpt.trim());
        println!("    id: {}", hit.chunk.id);
        println!();
    }
    println!(
        "{} of {} candidates (version {}: {} matched)",
        outcome.results.len(),
        outcome.stats.candidates,
        resolution.effective,
        outcome.stats.version_matched_chunks
    );
    Ok(())
}
