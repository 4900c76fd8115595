//! Dense row-major `f32` matrix and its `.npy` persistence format.
//!
//! A version partition's embeddings are stored as a NumPy v1.0 `.npy`
//! file: a 10-byte preamble, an ASCII header dictionary padded to a
//! 64-byte boundary, then `rows × dims` little-endian `f32` values. Only
//! `'<f4'` with `fortran_order: False` and a 2-D shape is accepted; there
//! are no object arrays and no pickles.

use crate::embedding::{blob_to_vec, l2_norm, vec_to_blob};
use crate::error::{RagError, Result};

const NPY_MAGIC: &[u8] = b"\x93NUMPY";
const NPY_ALIGN: usize = 64;

/// File extension of persisted embedding matrices.
pub const MATRIX_EXTENSION: &str = "npy";

/// Row-major embedding matrix with cached row norms.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    rows: usize,
    dims: usize,
    data: Vec<f32>,
    norms: Vec<f32>,
}

impl EmbeddingMatrix {
    /// An empty matrix of the given width.
    pub fn empty(dims: usize) -> Self {
        Self {
            rows: 0,
            dims,
            data: Vec::new(),
            norms: Vec::new(),
        }
    }

    /// Build a matrix from encoder output.
    ///
    /// # Errors
    ///
    /// `Encoder` if any row's length differs from `dims`.
    pub fn from_rows(rows: Vec<Vec<f32>>, dims: usize) -> Result<Self> {
        let mut data = Vec::with_capacity(rows.len() * dims);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != dims {
                return Err(RagError::Encoder(format!(
                    "row {} has dimension {}, expected {}",
                    i,
                    row.len(),
                    dims
                )));
            }
            data.extend_from_slice(row);
        }
        Ok(Self::from_flat(rows.len(), dims, data))
    }

    fn from_flat(rows: usize, dims: usize, data: Vec<f32>) -> Self {
        let norms = if dims == 0 {
            vec![0.0; rows]
        } else {
            data.chunks_exact(dims).map(l2_norm).collect()
        };
        Self {
            rows,
            dims,
            data,
            norms,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dims..(i + 1) * self.dims]
    }

    pub fn row_norm(&self, i: usize) -> f32 {
        self.norms[i]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Row-wise concatenation. All parts must share `dims`.
    pub fn concat<'a>(dims: usize, parts: impl IntoIterator<Item = &'a EmbeddingMatrix>) -> Self {
        let mut rows = 0;
        let mut data = Vec::new();
        let mut norms = Vec::new();
        for part in parts {
            debug_assert_eq!(part.dims, dims);
            rows += part.rows;
            data.extend_from_slice(&part.data);
            norms.extend_from_slice(&part.norms);
        }
        Self {
            rows,
            dims,
            data,
            norms,
        }
    }

    /// Cosine similarity of `query` against every row.
    ///
    /// `query` must have length `dims`; rows or queries with zero norm
    /// score `0.0`.
    pub fn cosine_scores(&self, query: &[f32]) -> Vec<f32> {
        let q_norm = l2_norm(query);
        (0..self.rows)
            .map(|i| {
                let denom = q_norm * self.norms[i];
                if denom < f32::EPSILON {
                    return 0.0;
                }
                let dot: f32 = self.row(i).iter().zip(query).map(|(a, b)| a * b).sum();
                dot / denom
            })
            .collect()
    }

    /// Serialize as a NumPy v1.0 `.npy` file.
    pub fn to_npy(&self) -> Vec<u8> {
        let dict = format!(
            "{{'descr': '<f4', 'fortran_order': False, 'shape': ({}, {}), }}",
            self.rows, self.dims
        );
        let unpadded = NPY_MAGIC.len() + 2 + 2 + dict.len() + 1;
        let padding = (NPY_ALIGN - unpadded % NPY_ALIGN) % NPY_ALIGN;
        let header_len = dict.len() + padding + 1;

        let mut out = Vec::with_capacity(unpadded + padding + self.data.len() * 4);
        out.extend_from_slice(NPY_MAGIC);
        out.push(1);
        out.push(0);
        out.extend_from_slice(&(header_len as u16).to_le_bytes());
        out.extend_from_slice(dict.as_bytes());
        out.extend(std::iter::repeat(b' ').take(padding));
        out.push(b'\n');
        out.extend_from_slice(&vec_to_blob(&self.data));
        out
    }

    /// Parse a `.npy` file written by [`to_npy`](Self::to_npy) or NumPy.
    ///
    /// # Errors
    ///
    /// `IndexCorrupt` (tagged with `version`) on a bad magic, an
    /// unsupported dtype or layout, or a payload whose size does not match
    /// the declared shape.
    pub fn from_npy(version: &str, bytes: &[u8]) -> Result<Self> {
        let corrupt = |reason: String| RagError::corrupt(version, reason);

        if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
            return Err(corrupt("not a .npy file".to_string()));
        }
        let major = bytes[6];
        let (header_len, header_start) = match major {
            1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
            2 | 3 => {
                if bytes.len() < 12 {
                    return Err(corrupt("truncated .npy header".to_string()));
                }
                (
                    u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
                    12,
                )
            }
            other => return Err(corrupt(format!("unsupported .npy version {}", other))),
        };
        let data_start = header_start + header_len;
        if bytes.len() < data_start {
            return Err(corrupt("truncated .npy header".to_string()));
        }
        let header = std::str::from_utf8(&bytes[header_start..data_start])
            .map_err(|_| corrupt("non-UTF-8 .npy header".to_string()))?;

        let descr = header_field(header, "descr")
            .map(|v| v.trim_matches(|c| c == '\'' || c == '"'))
            .ok_or_else(|| corrupt("missing descr".to_string()))?;
        if descr != "<f4" {
            return Err(corrupt(format!("unsupported dtype '{}', expected '<f4'", descr)));
        }
        let fortran = header_field(header, "fortran_order")
            .ok_or_else(|| corrupt("missing fortran_order".to_string()))?;
        if fortran != "False" {
            return Err(corrupt("fortran-ordered arrays are not supported".to_string()));
        }
        let shape = parse_shape(header).ok_or_else(|| corrupt("missing shape".to_string()))?;
        let (rows, dims) = match shape.as_slice() {
            [rows, dims] => (*rows, *dims),
            [0] => (0, 0),
            other => {
                return Err(corrupt(format!(
                    "expected a 2-D matrix, got shape {:?}",
                    other
                )))
            }
        };

        let payload = &bytes[data_start..];
        let expected = rows
            .checked_mul(dims)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| corrupt(format!("shape ({}, {}) is too large", rows, dims)))?;
        if payload.len() != expected {
            return Err(corrupt(format!(
                "payload is {} bytes, shape ({}, {}) needs {}",
                payload.len(),
                rows,
                dims,
                expected
            )));
        }

        Ok(Self::from_flat(rows, dims, blob_to_vec(payload)))
    }
}

/// Scalar value of a key in the `.npy` header dictionary.
fn header_field<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let pos = header
        .find(&format!("'{}'", key))
        .or_else(|| header.find(&format!("\"{}\"", key)))?;
    let rest = &header[pos + key.len() + 2..];
    let rest = rest.trim_start().strip_prefix(':')?.trim_start();
    let end = rest.find([',', '}']).unwrap_or(rest.len());
    Some(rest[..end].trim())
}

fn parse_shape(header: &str) -> Option<Vec<usize>> {
    let pos = header.find("'shape'").or_else(|| header.find("\"shape\""))?;
    let rest = &header[pos..];
    let open = rest.find('(')?;
    let close = rest[open..].find(')')? + open;
    rest[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.trim_end_matches('L').parse::<usize>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EmbeddingMatrix {
        EmbeddingMatrix::from_rows(vec![vec![1.0, 0.0, 0.5], vec![-0.25, 2.0, 0.0]], 3).unwrap()
    }

    #[test]
    fn test_npy_header_is_aligned() {
        let bytes = sample().to_npy();
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % NPY_ALIGN, 0);
        assert_eq!(bytes[10 + header_len - 1], b'\n');
        assert_eq!(bytes.len(), 10 + header_len + 6 * 4);
    }

    #[test]
    fn test_npy_roundtrip_is_byte_identical() {
        let m = sample();
        let bytes = m.to_npy();
        let back = EmbeddingMatrix::from_npy("8-0", &bytes).unwrap();
        assert_eq!(back, m);
        assert_eq!(back.to_npy(), bytes);
    }

    #[test]
    fn test_npy_empty_matrix() {
        let m = EmbeddingMatrix::empty(384);
        let back = EmbeddingMatrix::from_npy("8-0", &m.to_npy()).unwrap();
        assert_eq!(back.rows(), 0);
        assert_eq!(back.dims(), 384);
    }

    /// A v1.0 file with a hand-written header dictionary.
    fn npy_with_header(dict: &str, payload: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(NPY_MAGIC);
        bytes.extend_from_slice(&[1, 0]);
        let unpadded = 10 + dict.len() + 1;
        let pad = (64 - unpadded % 64) % 64;
        bytes.extend_from_slice(&((dict.len() + pad + 1) as u16).to_le_bytes());
        bytes.extend_from_slice(dict.as_bytes());
        bytes.extend(std::iter::repeat(b' ').take(pad));
        bytes.push(b'\n');
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn test_npy_reads_numpy_written_header() {
        // Header as written by numpy.save for a (1, 2) float32 array.
        let dict = "{'descr': '<f4', 'fortran_order': False, 'shape': (1, 2), }";
        let bytes = npy_with_header(dict, &vec_to_blob(&[0.5, 0.25]));

        let m = EmbeddingMatrix::from_npy("7-9", &bytes).unwrap();
        assert_eq!(m.rows(), 1);
        assert_eq!(m.row(0), &[0.5, 0.25]);
    }

    #[test]
    fn test_npy_rejects_other_dtypes() {
        let mut bytes = sample().to_npy();
        let pos = bytes.windows(3).position(|w| w == b"<f4").unwrap();
        bytes[pos + 2] = b'8';
        let err = EmbeddingMatrix::from_npy("8-0", &bytes).unwrap_err();
        assert!(matches!(err, RagError::IndexCorrupt { .. }));
    }

    #[test]
    fn test_npy_rejects_truncated_payload() {
        let mut bytes = sample().to_npy();
        bytes.truncate(bytes.len() - 4);
        let err = EmbeddingMatrix::from_npy("8-0", &bytes).unwrap_err();
        assert!(matches!(err, RagError::IndexCorrupt { ref version, .. } if version == "8-0"));
    }

    #[test]
    fn test_npy_rejects_shape_overflowing_payload_size() {
        let dict = format!(
            "{{'descr': '<f4', 'fortran_order': False, 'shape': ({}, 2), }}",
            usize::MAX / 2 + 1
        );
        let bytes = npy_with_header(&dict, &[]);
        let err = EmbeddingMatrix::from_npy("8-0", &bytes).unwrap_err();
        assert!(matches!(err, RagError::IndexCorrupt { ref version, .. } if version == "8-0"));
    }

    #[test]
    fn test_from_rows_rejects_ragged_rows() {
        let err = EmbeddingMatrix::from_rows(vec![vec![1.0, 2.0], vec![1.0]], 2).unwrap_err();
        assert!(matches!(err, RagError::Encoder(_)));
    }

    #[test]
    fn test_cosine_scores() {
        let m = EmbeddingMatrix::from_rows(vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.0, 0.0]], 2)
            .unwrap();
        let scores = m.cosine_scores(&[1.0, 0.0]);
        assert!((scores[0] - 1.0).abs() < 1e-6);
        assert!(scores[1].abs() < 1e-6);
        assert_eq!(scores[2], 0.0);
    }

    #[test]
    fn test_concat_preserves_row_order() {
        let a = EmbeddingMatrix::from_rows(vec![vec![1.0, 0.0]], 2).unwrap();
        let b = EmbeddingMatrix::from_rows(vec![vec![0.0, 1.0], vec![1.0, 1.0]], 2).unwrap();
        let c = EmbeddingMatrix::concat(2, [&a, &b]);
        assert_eq!(c.rows(), 3);
        assert_eq!(c.row(0), &[1.0, 0.0]);
        assert_eq!(c.row(2), &[1.0, 1.0]);
    }
}
