//! In-memory versioned index.
//!
//! The index holds one [`Partition`] per version plus a combined view over
//! all of them. Readers grab an [`IndexSnapshot`] (an `Arc` clone under a
//! short read lock) and search it without holding any lock; writers build
//! a complete new snapshot and swap it in. A partition is therefore never
//! observed half-written: `rows(E_v) == len(C_v)` holds for every
//! snapshot that was ever published.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::error::{RagError, Result};
use crate::matrix::EmbeddingMatrix;
use crate::models::Chunk;

/// The embeddings and chunks of one version, row-aligned.
#[derive(Debug, Clone)]
pub struct Partition {
    version: String,
    embeddings: EmbeddingMatrix,
    chunks: Vec<Chunk>,
}

impl Partition {
    /// # Errors
    ///
    /// `IndexCorrupt` if the matrix row count differs from the chunk count.
    pub fn new(
        version: impl Into<String>,
        embeddings: EmbeddingMatrix,
        chunks: Vec<Chunk>,
    ) -> Result<Self> {
        let version = version.into();
        if embeddings.rows() != chunks.len() {
            return Err(RagError::corrupt(
                &version,
                format!(
                    "{} embedding rows but {} chunks",
                    embeddings.rows(),
                    chunks.len()
                ),
            ));
        }
        Ok(Self {
            version,
            embeddings,
            chunks,
        })
    }

    /// An empty partition; writing one is how a version is dropped.
    pub fn empty(version: impl Into<String>, dims: usize) -> Self {
        Self {
            version: version.into(),
            embeddings: EmbeddingMatrix::empty(dims),
            chunks: Vec::new(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn embeddings(&self) -> &EmbeddingMatrix {
        &self.embeddings
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Row-wise concatenation of every loaded partition.
///
/// Chunks are not copied; row `i` is resolved back to its partition
/// through `offsets`.
#[derive(Debug, Clone)]
pub struct CombinedView {
    embeddings: EmbeddingMatrix,
    parts: Vec<Arc<Partition>>,
    offsets: Vec<usize>,
}

impl CombinedView {
    fn build(dims: usize, partitions: &BTreeMap<String, Arc<Partition>>) -> Self {
        let parts: Vec<Arc<Partition>> = partitions
            .values()
            .filter(|p| !p.is_empty())
            .cloned()
            .collect();
        let mut offsets = Vec::with_capacity(parts.len());
        let mut start = 0;
        for p in &parts {
            offsets.push(start);
            start += p.len();
        }
        let embeddings = EmbeddingMatrix::concat(dims, parts.iter().map(|p| &p.embeddings));
        Self {
            embeddings,
            parts,
            offsets,
        }
    }

    pub fn embeddings(&self) -> &EmbeddingMatrix {
        &self.embeddings
    }

    pub fn len(&self) -> usize {
        self.embeddings.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    /// The chunk at combined row `row`.
    pub fn chunk(&self, row: usize) -> Option<&Chunk> {
        if row >= self.len() {
            return None;
        }
        let part = match self.offsets.binary_search(&row) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        self.parts[part].chunks.get(row - self.offsets[part])
    }

    /// All chunks in combined row order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.parts.iter().flat_map(|p| p.chunks.iter())
    }
}

/// An immutable, consistent view of the whole index.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    dims: usize,
    partitions: BTreeMap<String, Arc<Partition>>,
    combined: Arc<CombinedView>,
}

impl IndexSnapshot {
    fn new(dims: usize, partitions: BTreeMap<String, Arc<Partition>>) -> Self {
        let combined = Arc::new(CombinedView::build(dims, &partitions));
        Self {
            dims,
            partitions,
            combined,
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn partition(&self, version: &str) -> Option<Arc<Partition>> {
        self.partitions.get(version).cloned()
    }

    pub fn combined(&self) -> &CombinedView {
        &self.combined
    }

    pub fn has_version(&self, version: &str) -> bool {
        self.partitions.contains_key(version)
    }

    /// Loaded versions in sorted order.
    pub fn versions(&self) -> Vec<String> {
        self.partitions.keys().cloned().collect()
    }

    /// Chunk count per loaded version.
    pub fn counts(&self) -> Vec<(String, usize)> {
        self.partitions
            .iter()
            .map(|(v, p)| (v.clone(), p.len()))
            .collect()
    }

    pub fn total_chunks(&self) -> usize {
        self.combined.len()
    }
}

/// The process-wide index: a swappable [`IndexSnapshot`].
#[derive(Debug)]
pub struct VersionedIndex {
    dims: usize,
    current: RwLock<Arc<IndexSnapshot>>,
}

impl VersionedIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            current: RwLock::new(Arc::new(IndexSnapshot::new(dims, BTreeMap::new()))),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// The current snapshot. Cheap; hold it for the duration of one search.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Replace one version's partition. Other versions are untouched.
    /// Searches that start after this returns see the new partition.
    ///
    /// # Errors
    ///
    /// `IndexCorrupt` if the partition's dimension differs from the index.
    pub fn replace_partition(&self, partition: Partition) -> Result<()> {
        self.install_many(vec![partition])
    }

    /// Install several partitions in one swap (used at load time).
    ///
    /// # Errors
    ///
    /// `IndexCorrupt` if any partition's dimension differs from the index;
    /// in that case nothing is installed.
    pub fn install_many(&self, partitions: Vec<Partition>) -> Result<()> {
        for p in &partitions {
            self.check_dims(p)?;
        }
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let mut map = guard.partitions.clone();
        for p in partitions {
            map.insert(p.version.clone(), Arc::new(p));
        }
        *guard = Arc::new(IndexSnapshot::new(self.dims, map));
        Ok(())
    }

    pub fn partition(&self, version: &str) -> Option<Arc<Partition>> {
        self.snapshot().partition(version)
    }

    pub fn has_version(&self, version: &str) -> bool {
        self.snapshot().has_version(version)
    }

    pub fn versions(&self) -> Vec<String> {
        self.snapshot().versions()
    }

    fn check_dims(&self, p: &Partition) -> Result<()> {
        if p.embeddings.dims() != self.dims && !(p.is_empty() && p.embeddings.dims() == 0) {
            return Err(RagError::corrupt(
                &p.version,
                format!(
                    "embedding dimension {} does not match index dimension {}",
                    p.embeddings.dims(),
                    self.dims
                ),
            ));
        }
        Ok(())
    }
}
