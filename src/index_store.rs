//! Ingest, load and persistence of version partitions.
//!
//! [`IndexStore`] ties the in-memory [`VersionedIndex`] to the encoder and
//! the object store:
//!
//! - [`IndexStore::replace_version`] encodes a version's chunks in one
//!   batch, swaps the partition in memory, then persists it. Encoder
//!   failures leave the index untouched; persistence failures keep the
//!   in-memory partition and are reported as a warning.
//! - [`IndexStore::load_all`] reads every supported version's blobs at
//!   startup, skipping versions that are missing, unreadable, or corrupt.
//!
//! # Persisted layout
//!
//! ```text
//! <prefix>/embeddings/embeddings-<v>.npy   float32 [n_v, d]
//! <prefix>/chunks/chunks-<v>.json          chunk records in row order
//! ```

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rani_core::bundle::{derive_partition_version, into_partition_chunks, parse_bundle, VersionSource};
use rani_core::embedding::{embedding_text, EmbeddingProvider};
use rani_core::index::{Partition, VersionedIndex};
use rani_core::matrix::{EmbeddingMatrix, MATRIX_EXTENSION};
use rani_core::models::Chunk;
use rani_core::version::{normalize_version, VersionCatalog};
use rani_core::{RagError, Result};

use crate::blob_store::{get_with_timeout, put_with_timeout, BlobStore};

/// Object key of a version's embedding matrix.
pub fn embeddings_key(prefix: &str, version: &str) -> String {
    join_key(
        prefix,
        &format!("embeddings/embeddings-{}.{}", version, MATRIX_EXTENSION),
    )
}

/// Object key of a version's chunk records.
pub fn chunks_key(prefix: &str, version: &str) -> String {
    join_key(prefix, &format!("chunks/chunks-{}.json", version))
}

fn join_key(prefix: &str, rest: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        rest.to_string()
    } else {
        format!("{}/{}", prefix, rest)
    }
}

/// Result of one ingest.
#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub version: String,
    pub chunks: usize,
    pub dims: usize,
    /// False when the partition is live in memory but could not be written.
    pub persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub elapsed_ms: u64,
}

/// Per-version outcome of [`IndexStore::load_all`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub loaded: Vec<(String, usize)>,
    pub missing: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub corrupt: Vec<(String, String)>,
}

impl LoadReport {
    pub fn loaded_versions(&self) -> Vec<String> {
        self.loaded.iter().map(|(v, _)| v.clone()).collect()
    }

    pub fn total_chunks(&self) -> usize {
        self.loaded.iter().map(|(_, n)| n).sum()
    }
}

pub struct IndexStore {
    index: Arc<VersionedIndex>,
    encoder: Arc<dyn EmbeddingProvider>,
    blobs: Arc<dyn BlobStore>,
    catalog: VersionCatalog,
    prefix: String,
    timeout: Duration,
    ingest_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl IndexStore {
    pub fn new(
        encoder: Arc<dyn EmbeddingProvider>,
        blobs: Arc<dyn BlobStore>,
        catalog: VersionCatalog,
        prefix: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            index: Arc::new(VersionedIndex::new(encoder.dims())),
            encoder,
            blobs,
            catalog,
            prefix: prefix.into(),
            timeout,
            ingest_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn index(&self) -> &Arc<VersionedIndex> {
        &self.index
    }

    pub fn encoder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.encoder
    }

    pub fn catalog(&self) -> &VersionCatalog {
        &self.catalog
    }

    /// Parse a bundle, derive its version, and replace that partition.
    ///
    /// # Errors
    ///
    /// `BadInput` for malformed bundles or an unsupported version, `Encoder`
    /// if encoding fails. Neither touches the index.
    pub async fn ingest_bundle(&self, bytes: &[u8]) -> Result<IngestSummary> {
        let bundle = parse_bundle(bytes)?;
        let target = derive_partition_version(&bundle, &self.catalog)?;
        match target.source {
            VersionSource::Declared => {}
            VersionSource::Modal => tracing::info!(
                version = %target.version,
                "bundle has no _VERSION; using the modal chunk version"
            ),
            VersionSource::Default => tracing::info!(
                version = %target.version,
                legacy = bundle.legacy,
                "no version derivable from bundle; using the default version"
            ),
        }
        let chunks = into_partition_chunks(bundle, &target.version);
        self.replace_version(&target.version, chunks).await
    }

    /// Encode `chunks` and make them the complete partition for `version`.
    ///
    /// Ingests of the same version are serialized; different versions
    /// proceed independently. Searches started after this returns see the
    /// new partition.
    pub async fn replace_version(&self, version: &str, chunks: Vec<Chunk>) -> Result<IngestSummary> {
        let started = Instant::now();
        let version = self
            .catalog
            .lookup(&normalize_version(version))
            .map(str::to_string)
            .ok_or_else(|| {
                RagError::BadInput(format!(
                    "version '{}' is not one of the supported versions [{}]",
                    version,
                    self.catalog.supported().join(", ")
                ))
            })?;

        let lock = self.version_lock(&version);
        let _guard = lock.lock().await;

        let chunks: Vec<Chunk> = chunks
            .into_iter()
            .map(|mut c| {
                c.version = version.clone();
                c
            })
            .collect();
        let embeddings = self.encode_chunks(&chunks).await?;
        let partition = Partition::new(version.clone(), embeddings, chunks)?;

        let npy = partition.embeddings().to_npy();
        let json = serde_json::to_vec(partition.chunks())
            .map_err(|e| RagError::Persistence(format!("failed to serialize chunks: {}", e)))?;
        let count = partition.len();
        self.index.replace_partition(partition)?;

        let warning = match self.persist(&version, npy, json).await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(version = %version, error = %e, "partition committed in memory but not persisted");
                Some(e.to_string())
            }
        };

        let summary = IngestSummary {
            version: version.clone(),
            chunks: count,
            dims: self.index.dims(),
            persisted: warning.is_none(),
            warning,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            version = %summary.version,
            chunks = summary.chunks,
            dims = summary.dims,
            persisted = summary.persisted,
            elapsed_ms = summary.elapsed_ms,
            "ingest complete"
        );
        Ok(summary)
    }

    /// Load every supported version from the object store.
    ///
    /// # Errors
    ///
    /// `IndexEmpty` only when `require_non_empty` is set and nothing was
    /// loaded. Per-version failures are logged and reported, not returned.
    pub async fn load_all(&self, require_non_empty: bool) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        let mut partitions = Vec::new();

        for version in self.catalog.supported() {
            match self.load_version(version).await {
                Ok(Some(p)) => {
                    tracing::info!(version = %version, chunks = p.len(), "partition loaded");
                    report.loaded.push((version.clone(), p.len()));
                    partitions.push(p);
                }
                Ok(None) => {
                    tracing::debug!(version = %version, "no persisted partition");
                    report.missing.push(version.clone());
                }
                Err(e @ RagError::IndexCorrupt { .. }) => {
                    tracing::error!(version = %version, error = %e, "refusing corrupt partition; re-ingest required");
                    report.corrupt.push((version.clone(), e.to_string()));
                }
                Err(e) => {
                    tracing::warn!(version = %version, error = %e, "failed to load partition");
                    report.failed.push((version.clone(), e.to_string()));
                }
            }
        }

        self.index.install_many(partitions)?;
        tracing::info!(
            store = %self.blobs.describe(),
            loaded = report.loaded.len(),
            chunks = report.total_chunks(),
            "index loaded"
        );

        if require_non_empty && report.total_chunks() == 0 {
            return Err(RagError::IndexEmpty);
        }
        Ok(report)
    }

    async fn load_version(&self, version: &str) -> Result<Option<Partition>> {
        let emb_key = embeddings_key(&self.prefix, version);
        let chunk_key = chunks_key(&self.prefix, version);

        let npy = get_with_timeout(self.blobs.as_ref(), &emb_key, self.timeout)
            .await
            .map_err(|e| RagError::Persistence(format!("{:#}", e)))?;
        let json = get_with_timeout(self.blobs.as_ref(), &chunk_key, self.timeout)
            .await
            .map_err(|e| RagError::Persistence(format!("{:#}", e)))?;

        let (npy, json) = match (npy, json) {
            (None, None) => return Ok(None),
            (Some(n), Some(j)) => (n, j),
            (Some(_), None) => {
                return Err(RagError::Persistence(format!("'{}' is missing", chunk_key)))
            }
            (None, Some(_)) => {
                return Err(RagError::Persistence(format!("'{}' is missing", emb_key)))
            }
        };

        let matrix = EmbeddingMatrix::from_npy(version, &npy)?;
        if !matrix.is_empty() && matrix.dims() != self.index.dims() {
            return Err(RagError::corrupt(
                version,
                format!(
                    "embedding dimension {} does not match encoder dimension {}",
                    matrix.dims(),
                    self.index.dims()
                ),
            ));
        }
        let matrix = if matrix.is_empty() {
            EmbeddingMatrix::empty(self.index.dims())
        } else {
            matrix
        };

        let chunks: Vec<Chunk> = serde_json::from_slice(&json)
            .map_err(|e| RagError::corrupt(version, format!("invalid chunk records: {}", e)))?;
        let chunks = chunks
            .into_iter()
            .map(|mut c| {
                c.version = version.to_string();
                c
            })
            .collect();

        Partition::new(version, matrix, chunks).map(Some)
    }

    async fn encode_chunks(&self, chunks: &[Chunk]) -> Result<EmbeddingMatrix> {
        let dims = self.index.dims();
        if chunks.is_empty() {
            return Ok(EmbeddingMatrix::empty(dims));
        }
        let texts: Vec<String> = chunks.iter().map(embedding_text).collect();
        let expected = texts.len();
        let encoder = Arc::clone(&self.encoder);

        let started = Instant::now();
        let vectors = tokio::task::spawn_blocking(move || encoder.encode(&texts))
            .await
            .map_err(|e| RagError::Encoder(format!("encoder task failed: {}", e)))??;
        if vectors.len() != expected {
            return Err(RagError::Encoder(format!(
                "encoder returned {} vectors for {} texts",
                vectors.len(),
                expected
            )));
        }
        tracing::debug!(
            texts = expected,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch encoded"
        );
        EmbeddingMatrix::from_rows(vectors, dims)
    }

    async fn persist(&self, version: &str, npy: Vec<u8>, json: Vec<u8>) -> Result<()> {
        put_with_timeout(
            self.blobs.as_ref(),
            &embeddings_key(&self.prefix, version),
            npy,
            "application/octet-stream",
            self.timeout,
        )
        .await
        .map_err(|e| RagError::Persistence(format!("{:#}", e)))?;
        put_with_timeout(
            self.blobs.as_ref(),
            &chunks_key(&self.prefix, version),
            json,
            "application/json",
            self.timeout,
        )
        .await
        .map_err(|e| RagError::Persistence(format!("{:#}", e)))
    }

    fn version_lock(&self, version: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.ingest_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(version.to_string()).or_default())
    }
}
