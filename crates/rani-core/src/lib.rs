//! # RANI Core
//!
//! Shared, I/O-free logic for the RANI documentation assistant: the chunk
//! data model, version normalization, product presets, the versioned
//! embedding index, similarity search, and prompt construction.
//!
//! This crate contains no tokio, HTTP, or filesystem dependencies. Encoding
//! is reached through the [`embedding::EmbeddingProvider`] trait and object
//! storage is left to the application crate.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`error`] | Named error kinds ([`RagError`]) |
//! | [`models`] | `Chunk`, content/complexity enums, conversation messages |
//! | [`version`] | Version token normalization and the supported-version catalog |
//! | [`product`] | Product presets and citation URL completion |
//! | [`embedding`] | Encoder trait, embedding text, blob helpers |
//! | [`matrix`] | Dense `f32` matrix and `.npy` codec |
//! | [`bundle`] | Parsing of the versioned "comprehensive JSON" bundle |
//! | [`index`] | Per-version partitions and the combined view |
//! | [`search`] | Thresholded top-k search with version preference re-rank |
//! | [`prompt`] | Question-type classifier, context block, prompt assembly |

pub mod bundle;
pub mod embedding;
pub mod error;
pub mod index;
pub mod matrix;
pub mod models;
pub mod product;
pub mod prompt;
pub mod search;
pub mod version;

pub use error::{RagError, Result};
