//! Process-wide services, built once from the configuration and shared by
//! the CLI commands and the HTTP server.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use rani_core::embedding::EmbeddingProvider;
use rani_core::product::ProductProfile;

use crate::blob_store::{create_blob_store, BlobStore};
use crate::config::Config;
use crate::embedding::{create_encoder, prewarm};
use crate::index_store::{IndexStore, LoadReport};
use crate::search::Retriever;

pub struct App {
    pub config: Config,
    pub profile: Arc<ProductProfile>,
    pub store: Arc<IndexStore>,
}

impl App {
    /// Build the encoder and blob store from `config`. Nothing is loaded yet.
    pub fn build(config: Config) -> Result<Self> {
        let profile = config.product.profile()?;
        let encoder = create_encoder(&config.embedding).context("Failed to build encoder")?;
        let blobs = create_blob_store(&config.storage).context("Failed to build blob store")?;
        Ok(Self::from_parts(config, profile, encoder, blobs))
    }

    /// Assemble from already-built parts.
    pub fn from_parts(
        config: Config,
        profile: ProductProfile,
        encoder: Arc<dyn EmbeddingProvider>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let store = IndexStore::new(
            encoder,
            blobs,
            profile.catalog.clone(),
            config.storage.prefix.clone(),
            Duration::from_secs(config.storage.timeout_secs),
        );
        Self {
            config,
            profile: Arc::new(profile),
            store: Arc::new(store),
        }
    }

    /// Pre-warm the encoder and load every persisted partition.
    pub async fn start(&self) -> Result<LoadReport> {
        let encoder = self.store.encoder().clone();
        tokio::task::spawn_blocking(move || prewarm(encoder.as_ref()))
            .await
            .context("encoder pre-warm task failed")?;
        let report = self.store.load_all(false).await?;
        Ok(report)
    }

    pub fn retriever(&self) -> Retriever {
        Retriever::new(self.store.index().clone(), self.store.encoder().clone())
    }
}
