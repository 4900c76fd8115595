//! Encoder trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that every encoder backend
//! implements, plus the pure helpers used around it: the composite
//! embedding text of a chunk, the content hash, little-endian `f32`
//! serialization, and the vector norm.
//!
//! Concrete encoders (fastembed) live in the `rani` app crate.

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::models::Chunk;

/// A deterministic text encoder producing fixed-dimension dense vectors.
///
/// Implementations must be safe to call from several threads at once and
/// are shared process-wide behind an `Arc`. `encode` is always called with
/// a full batch; inputs longer than the model capacity are truncated by
/// the encoder itself.
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Encode a batch of texts, returning one vector per input, in order.
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Separator between the parts of a chunk's embedding text.
pub const EMBEDDING_TEXT_SEPARATOR: &str = " | ";

/// Build the composite text a chunk is embedded as:
/// `page_title | header | content`, skipping empty parts and dropping the
/// header when it repeats the title.
///
/// ```rust
/// use rani_core::embedding::embedding_text;
/// use rani_core::models::Chunk;
///
/// let c = Chunk::new("c1", "Select rows.", "8-0").with_title("Filters").with_header("Filters");
/// assert_eq!(embedding_text(&c), "Filters | Select rows.");
/// ```
pub fn embedding_text(chunk: &Chunk) -> String {
    let title = chunk.page_title.as_deref().map(str::trim).unwrap_or("");
    let header = chunk.header.as_deref().map(str::trim).unwrap_or("");
    let content = chunk.content.trim();

    let mut parts: Vec<&str> = Vec::with_capacity(3);
    if !title.is_empty() {
        parts.push(title);
    }
    if !header.is_empty() && header != title {
        parts.push(header);
    }
    if !content.is_empty() {
        parts.push(content);
    }
    parts.join(EMBEDDING_TEXT_SEPARATOR)
}

/// SHA-256 of the chunk content, hex-encoded. Only used by external
/// change-detection tooling.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Encode a float vector as little-endian `f32` bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian `f32` bytes. Trailing bytes that do not form a
/// whole value are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Euclidean norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_text_all_parts() {
        let c = Chunk::new("c1", "Body text.", "8-0")
            .with_title("Page")
            .with_header("Section");
        assert_eq!(embedding_text(&c), "Page | Section | Body text.");
    }

    #[test]
    fn test_embedding_text_skips_empty_parts() {
        let c = Chunk::new("c1", "Body text.", "8-0").with_header("  ");
        assert_eq!(embedding_text(&c), "Body text.");

        let c = Chunk::new("c1", "", "8-0").with_title("Only title");
        assert_eq!(embedding_text(&c), "Only title");
    }

    #[test]
    fn test_content_hash_is_sha256() {
        assert_eq!(
            content_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }
}
