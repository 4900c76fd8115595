//! `rani ingest`: load a bundle file into the index and persist it.
//!
//! The persisted partitions are loaded first so the process holds the same
//! view a server would; only the bundle's version is replaced.

use anyhow::{Context, Result};
use std::path::Path;

use crate::app::App;

pub async fn run_ingest(app: &App, bundle_path: &Path) -> Result<()> {
    let bytes = tokio::fs::read(bundle_path)
        .await
        .with_context(|| format!("Failed to read bundle {}", bundle_path.display()))?;

    app.store.load_all(false).await?;
    let summary = app
        .store
        .ingest_bundle(&bytes)
        .await
        .with_context(|| format!("Failed to ingest {}", bundle_path.display()))?;

    println!("ingest {}", bundle_path.display());
    println!("  version: {}", summary.version);
    println!("  chunks: {}", summary.chunks);
    println!("  dims: {}", summary.dims);
    println!("  persisted: {}", summary.persisted);
    if let Some(warning) = &summary.warning {
        println!("  warning: {}", warning);
    }
    println!("  elapsed: {} ms", summary.elapsed_ms);
    println!("ok");
    Ok(())
}
