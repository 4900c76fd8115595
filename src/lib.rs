//! # RANI
//!
//! A retrieval-augmented documentation assistant for Resolve Actions, Pro
//! and Express.
//!
//! Documentation bundles are embedded into per-version partitions, kept in
//! memory and persisted to an object store. Questions are answered by
//! retrieving the closest chunks (preferring the requested product version)
//! and handing them to an LLM with a bounded, citation-carrying prompt.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────────┐
//! │  Bundle  │──▶│ Encode+Swap  │──▶│ Object store   │
//! │  (JSON)  │   │ per version  │   │ .npy + .json   │
//! └──────────┘   └──────┬───────┘   └────────────────┘
//!                       │
//!                       ▼
//!               ┌───────────────┐   ┌──────────┐
//!  question ──▶ │ Retrieve +    │──▶│   LLM    │──▶ answer + sources
//!               │ version rerank│   │ (Gemini) │
//!               └───────────────┘   └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`app`] | Process-wide services built from config |
//! | [`embedding`] | Encoder construction (fastembed) and pre-warm |
//! | [`blob_store`] | Object store trait and filesystem backend |
//! | [`s3`] | S3 backend with SigV4 signing |
//! | [`index_store`] | Ingest, load and persistence of version partitions |
//! | [`search`] | Query encoding and ranking |
//! | [`llm`] | LLM client trait, Gemini client, retries |
//! | [`composer`] | The chat pipeline |
//! | [`ingest`] | `rani ingest` command |
//! | [`server`] | HTTP server |
//!
//! I/O-free logic (versions, bundle parsing, the index, prompt building)
//! lives in the `rani-core` crate.

pub mod app;
pub mod blob_store;
pub mod composer;
pub mod config;
pub mod embedding;
pub mod index_store;
pub mod ingest;
pub mod llm;
pub mod s3;
pub mod search;
pub mod server;
