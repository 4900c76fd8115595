//! # RANI CLI (`rani`)
//!
//! ## Usage
//!
//! ```bash
//! rani --config ./config/rani.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rani serve` | Load all partitions and start the HTTP server |
//! | `rani ingest <bundle.json>` | Replace one version's partition from a bundle |
//! | `rani ask "<question>"` | Answer one question through the full pipeline |
//! | `rani search "<query>"` | Retrieval only; print ranked chunks |
//! | `rani versions` | List supported versions and which are loaded |
//!
//! ## Examples
//!
//! ```bash
//! rani ingest ./bundles/pro-8-0.json
//! rani ask "How do I create a filter?" --version 8.0
//! rani search "dashboard widgets" --limit 10 --min-similarity 0.2
//! GEMINI_API_KEY=... rani serve
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rani::app::App;
use rani::composer::{ChatRequest, ChatService, ComposerSettings};
use rani::config;
use rani::llm::{GeminiClient, LlmClient};
use rani_core::models::{Complexity, ContentType};
use rani_core::search::SearchFilters;

/// RANI: answers questions about Resolve product documentation.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rani.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rani",
    about = "RANI: a retrieval-augmented documentation assistant for Resolve products",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rani.toml")]
    config: PathBuf,

    /// Log at debug level (`RUST_LOG` overrides).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    ///
    /// Loads and pre-warms the encoder, loads every persisted version
    /// partition, then serves `/chat`, `/ingest`, `/search`, `/versions`
    /// and `/health` on `[server].bind`. Requires the LLM API key.
    Serve,

    /// Ingest a documentation bundle.
    ///
    /// The bundle's version partition is replaced entirely and persisted
    /// to the configured store. Other versions are untouched.
    Ingest {
        /// Path to the bundle JSON file.
        bundle: PathBuf,
    },

    /// Answer one question and print the answer with its sources.
    Ask {
        question: String,

        /// Product version (any accepted form: `8.0`, `v8-0`, `latest`).
        #[arg(long)]
        version: Option<String>,

        /// Number of chunks to retrieve (1-20).
        #[arg(long)]
        max_results: Option<usize>,
    },

    /// Retrieve and print ranked chunks without calling the LLM.
    Search {
        query: String,

        /// Version to prefer in ranking.
        #[arg(long)]
        version: Option<String>,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        /// Minimum cosine similarity (0.0-1.0).
        #[arg(long)]
        min_similarity: Option<f32>,

        /// Only chunks of this content type.
        #[arg(long)]
        content_type: Option<String>,

        /// Only chunks of this complexity.
        #[arg(long)]
        complexity: Option<String>,

        /// Only chunks with (true) or without (false) code.
        #[arg(long)]
        has_code: Option<bool>,
    },

    /// List supported versions and which partitions are loaded.
    Versions,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    // Environment is only touched here, before any worker thread exists.
    if let Some((key, value)) = rani::embedding::offline_hub_env(&cfg.embedding) {
        std::env::set_var(key, value);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli.command, cfg))
}

async fn run(command: Commands, cfg: config::Config) -> Result<()> {
    match command {
        Commands::Serve => {
            let llm: Arc<dyn LlmClient> = Arc::new(GeminiClient::from_config(&cfg.llm)?);
            let app = App::build(cfg)?;
            app.start().await?;
            rani::server::run_server(&app, llm).await?;
        }
        Commands::Ingest { bundle } => {
            let app = App::build(cfg)?;
            rani::ingest::run_ingest(&app, &bundle).await?;
        }
        Commands::Ask {
            question,
            version,
            max_results,
        } => {
            let llm: Arc<dyn LlmClient> = Arc::new(GeminiClient::from_config(&cfg.llm)?);
            let app = App::build(cfg)?;
            app.start().await?;

            let request = ChatRequest {
                version,
                max_results,
                ..ChatRequest::new(question)
            };
            request.validate()?;
            let service = ChatService::new(
                app.profile.clone(),
                app.retriever(),
                llm,
                ComposerSettings::from_config(&app.config),
            );
            let response = service.chat(&request).await;

            println!("{}", response.message);
            if !response.sources.is_empty() {
                println!();
                println!("sources:");
                for url in &response.sources {
                    println!("  {}", url);
                }
            }
            eprintln!(
                "[{} | version {} | {} chunks | {} ms]",
                response.model_used,
                response.version_context.effective,
                response.sources_count,
                response.processing_time_ms
            );
        }
        Commands::Search {
            query,
            version,
            limit,
            min_similarity,
            content_type,
            complexity,
            has_code,
        } => {
            let app = App::build(cfg)?;
            app.store.load_all(false).await?;
            let filters = SearchFilters {
                content_type: content_type.map(ContentType::from),
                complexity: complexity.map(Complexity::from),
                has_code,
            };
            rani::search::run_search(
                &app,
                &query,
                version.as_deref(),
                limit,
                min_similarity,
                filters,
            )
            .await?;
        }
        Commands::Versions => {
            let app = App::build(cfg)?;
            let report = app.store.load_all(false).await?;
            let catalog = &app.profile.catalog;
            println!("{} ({})", app.profile.display_name, app.profile.base_url());
            for v in catalog.supported() {
                let mut tags = Vec::new();
                if v == catalog.default_version() {
                    tags.push("default".to_string());
                }
                if v == catalog.latest_version() {
                    tags.push("latest".to_string());
                }
                let state = if let Some((_, n)) = report.loaded.iter().find(|(lv, _)| lv == v) {
                    format!("{} chunks", n)
                } else if report.corrupt.iter().any(|(cv, _)| cv == v) {
                    "corrupt (re-ingest required)".to_string()
                } else if report.failed.iter().any(|(fv, _)| fv == v) {
                    "unreadable".to_string()
                } else {
                    "not loaded".to_string()
                };
                let tags = if tags.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", tags.join(", "))
                };
                println!("  {}{}: {}", v, tags, state);
            }
        }
    }

    Ok(())
}
