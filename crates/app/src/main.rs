use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use datasheet_search_core::{
    discover_datasheets, load_datasheet, CharacterNgramEmbedder, ComponentMetadata,
    EmbeddingHandle, EmbeddingProvider, EngineConfig, IngestRequest, IngestStatus,
    MetadataFilter, RemoteEmbeddingConfig, SearchEngine, SearchOutcome,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "datasheet-search", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Optional TOML configuration file.
    #[arg(long, env = "DATASHEET_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding collection snapshots.
    #[arg(long, env = "DATASHEET_DATA_DIR", default_value = ".datasheet-index")]
    data_dir: PathBuf,

    /// Collection to operate on. Defaults to the configured collection.
    #[arg(long)]
    collection: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a datasheet file, or every PDF/text file under a folder.
    Ingest {
        #[arg(long)]
        path: PathBuf,
        /// Component category, e.g. "microcontroller".
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        manufacturer: Option<String>,
        /// Manufacturer part number.
        #[arg(long)]
        mpn: Option<String>,
    },
    /// Semantic search, optionally scoped by metadata.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "5")]
        top_k: usize,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        manufacturer: Option<String>,
        #[arg(long)]
        mpn: Option<String>,
    },
    /// Remove every chunk of a document by content digest.
    Delete {
        #[arg(long)]
        digest: String,
    },
    /// Print collection statistics.
    Stats,
    /// List collections.
    Collections,
    /// Remove the whole collection.
    DropCollection,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let collection = cli
        .collection
        .clone()
        .unwrap_or_else(|| config.default_collection.clone());

    let provider = build_provider(&config)?;
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        model = provider.model_version(),
        dimensions = provider.dimensions(),
        "datasheet-search boot"
    );

    let engine = SearchEngine::new(provider, config)?;
    let loaded = engine
        .load_snapshots(&cli.data_dir)
        .await
        .with_context(|| format!("loading snapshots from {}", cli.data_dir.display()))?;
    debug!(loaded, data_dir = %cli.data_dir.display(), "snapshots loaded");

    match cli.command {
        Command::Ingest {
            path,
            category,
            manufacturer,
            mpn,
        } => {
            engine.create_collection(&collection)?;
            let metadata = ComponentMetadata {
                mpn,
                manufacturer,
                category,
            };
            ingest_path(&engine, &collection, &path, metadata).await?;
            engine.save_snapshots(&cli.data_dir).await?;
        }
        Command::Search {
            query,
            top_k,
            category,
            manufacturer,
            mpn,
        } => {
            let filter = MetadataFilter {
                category,
                manufacturer,
                mpn,
                source_document: None,
            };
            let outcome = engine
                .search_with_filter(&collection, &query, top_k, filter)
                .await?;

            println!("query: {query}");
            match outcome {
                SearchOutcome::Empty => println!("no matching passages"),
                SearchOutcome::Found(results) => {
                    for result in results {
                        println!(
                            "[{}] score={:.4} chunk={} document={} page={}",
                            result.rank,
                            result.score,
                            result.chunk_id,
                            result.provenance.document_id,
                            result.provenance.page_number
                        );
                        if let Some(category) = &result.metadata.category {
                            println!("  category={category}");
                        }
                        println!("  text:\n{}", result.text);
                    }
                }
            }

            let latency = engine.latency();
            debug!(
                p95_ms = latency.p95.map(|value| value.as_secs_f64() * 1_000.0),
                over_budget = latency.over_budget,
                "search latency"
            );
        }
        Command::Delete { digest } => {
            let report = engine.delete_document(&collection, &digest).await?;
            println!(
                "removed {} chunks for digest {}",
                report.removed_chunk_count, report.digest
            );
            engine.save_snapshots(&cli.data_dir).await?;
        }
        Command::Stats => {
            let stats = engine.stats(&collection).await?;
            println!("collection: {}", stats.name);
            println!("documents: {}", stats.document_count);
            println!("chunks: {}", stats.chunk_count);
            println!("dimension: {}", stats.dimension);
            println!("embedding_model: {}", stats.embedding_model_version);
            if stats.model_version_mismatch {
                println!(
                    "warning: current provider is {}, re-ingest to refresh vectors",
                    stats.provider_model_version
                );
            }
        }
        Command::Collections => {
            for name in engine.collections() {
                println!("{name}");
            }
        }
        Command::DropCollection => {
            if engine.drop_collection(&collection) {
                let snapshot = cli.data_dir.join(format!("{collection}.json"));
                if tokio::fs::try_exists(&snapshot).await? {
                    tokio::fs::remove_file(&snapshot)
                        .await
                        .with_context(|| format!("removing {}", snapshot.display()))?;
                }
                println!("dropped {collection}");
            } else {
                println!("no collection named {collection}");
            }
        }
    }

    Ok(())
}

fn build_provider(config: &EngineConfig) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    match RemoteEmbeddingConfig::from_env() {
        Some(remote) => {
            let remote = remote?;
            info!(endpoint = %remote.endpoint, model = %remote.model, "using remote embeddings");
            Ok(Arc::new(EmbeddingHandle::new(remote, config.max_input_chars)))
        }
        None => Ok(Arc::new(EmbeddingHandle::new(
            CharacterNgramEmbedder::default(),
            config.max_input_chars,
        ))),
    }
}

async fn ingest_path(
    engine: &SearchEngine,
    collection: &str,
    path: &Path,
    metadata: ComponentMetadata,
) -> anyhow::Result<()> {
    let files = if path.is_dir() {
        discover_datasheets(path)
    } else {
        vec![path.to_path_buf()]
    };
    if files.is_empty() {
        println!("0 datasheets found under {}", path.display());
        return Ok(());
    }

    let mut indexed = 0;
    let mut skipped = 0;
    for file in files {
        let extracted = match load_datasheet(&file) {
            Ok(extracted) => extracted,
            Err(error) => {
                warn!(path = %file.display(), reason = %error, "skipped datasheet");
                skipped += 1;
                continue;
            }
        };

        let document_id = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string());
        let request = IngestRequest::new(document_id, extracted.text)
            .with_page_map(extracted.page_map)
            .with_metadata(metadata.clone());

        let report = engine.ingest(collection, request).await?;
        match &report.status {
            IngestStatus::Complete => {
                indexed += 1;
                println!(
                    "{} indexed: {} chunks, digest {}",
                    report.document_id,
                    report.chunk_ids.len(),
                    report.digest
                );
            }
            IngestStatus::AlreadyIndexed => {
                println!("{} already indexed, digest {}", report.document_id, report.digest);
            }
            IngestStatus::Failed { stage, reason } => {
                skipped += 1;
                println!("{} failed during {stage:?}: {reason}", report.document_id);
            }
        }
    }

    info!(collection, indexed, skipped, "ingestion finished");
    Ok(())
}
