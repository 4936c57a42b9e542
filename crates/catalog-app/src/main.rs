//! Catalog retriever binary - composition root.
//!
//! Ties the catalog crates together into a single executable:
//! 1. Initialize tracing
//! 2. Load configuration (base file plus optional override)
//! 3. Build embedding clients and vector collections
//! 4. Populate empty collections from the catalog CSV
//! 5. Start the axum query API

mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter};

use catalog_api::{start_server, AppState};
use catalog_core::config::RetrieverConfig;
use catalog_core::error::{CatalogError, Result};
use catalog_retriever::MultiQueryRetriever;
use catalog_vector::{
    CatalogImporter, CollectionIndex, HttpImageEmbedding, HttpTextEmbedding, ImageEmbeddingBatcher,
    ImageEmbeddingClient, ImageNormalizer, MemoryCollection, MilvusCollection, MockImageEmbedding,
    MockTextEmbedding, TextEmbeddingBatcher, TextEmbeddingClient,
};

use cli::CliArgs;

/// Load the base config and apply CONFIG_OVERRIDE when set.
///
/// A missing base file means defaults; a present but broken one is fatal.
fn load_config(args: &CliArgs) -> Result<RetrieverConfig> {
    let base = args.resolve_config_path();
    if !base.exists() {
        tracing::warn!(path = %base.display(), "Config file not found, using defaults");
        return Ok(RetrieverConfig::default());
    }
    let override_path = args.resolve_override_path(&base);
    let config = RetrieverConfig::load_with_override(&base, override_path.as_deref())?;
    tracing::info!(path = %base.display(), "Configuration loaded");
    Ok(config)
}

/// Fold CLI overrides into the loaded config.
fn apply_cli(config: &mut RetrieverConfig, args: &CliArgs) {
    if let Some(port) = args.port {
        config.general.port = port;
    }
    if let Some(ref level) = args.log_level {
        config.general.log_level = level.clone();
    }
    if let Some(ref source) = args.data_source {
        config.general.data_source = source.to_string_lossy().to_string();
    }
}

fn text_client(config: &RetrieverConfig) -> Result<Arc<dyn TextEmbeddingClient>> {
    match config.embedding.backend.as_str() {
        "http" => Ok(Arc::new(HttpTextEmbedding::new(&config.embedding)?)),
        "mock" => Ok(Arc::new(MockTextEmbedding::new())),
        other => Err(CatalogError::Config(format!("unknown embedding backend '{}'", other))),
    }
}

fn image_client(config: &RetrieverConfig) -> Result<Arc<dyn ImageEmbeddingClient>> {
    match config.embedding.backend.as_str() {
        "http" => Ok(Arc::new(HttpImageEmbedding::new(&config.embedding)?)),
        "mock" => Ok(Arc::new(MockImageEmbedding::new())),
        other => Err(CatalogError::Config(format!("unknown embedding backend '{}'", other))),
    }
}

fn collection(config: &RetrieverConfig, name: &str) -> Result<Arc<dyn CollectionIndex>> {
    match config.index.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryCollection::new(name))),
        "milvus" => Ok(Arc::new(MilvusCollection::new(&config.index, name)?)),
        other => Err(CatalogError::Config(format!("unknown index backend '{}'", other))),
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Tracing. The filter is swapped for the configured level once the
    // config is read, unless RUST_LOG or --log-level already decided it.
    let initial = args
        .log_level
        .clone()
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok());
    let pinned = initial.is_some();
    let (filter, filter_handle) = reload::Layer::new(initial.unwrap_or_else(|| EnvFilter::new("info")));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting catalog retriever v{}", env!("CARGO_PKG_VERSION"));

    // Config.
    let mut config = load_config(&args)?;
    apply_cli(&mut config, &args);
    config.validate()?;
    if !pinned {
        if let Err(e) = filter_handle.reload(EnvFilter::new(&config.general.log_level)) {
            tracing::warn!(error = %e, "Failed to apply configured log level");
        }
    }

    // Embedding clients.
    let text_batcher = Arc::new(TextEmbeddingBatcher::from_config(
        text_client(&config)?,
        &config.embedding,
        &config.chunking,
    )?);
    let image_batcher = Arc::new(ImageEmbeddingBatcher::new(
        image_client(&config)?,
        ImageNormalizer::new(&config.image)?,
        config.embedding.batch_size,
        config.embedding.max_concurrent_batches,
    ));
    tracing::info!(backend = %config.embedding.backend, "Embedding clients ready");

    // Collections.
    let text_collection = collection(&config, &config.index.text_collection)?;
    let image_collection = collection(&config, &config.index.image_collection)?;
    tracing::info!(
        backend = %config.index.backend,
        text = %config.index.text_collection,
        image = %config.index.image_collection,
        "Collections ready"
    );

    // Import.
    if args.skip_import {
        tracing::info!("Catalog import skipped");
    } else {
        let importer = CatalogImporter::new(
            Arc::clone(&text_batcher),
            Arc::clone(&image_batcher),
            Arc::clone(&text_collection),
            Arc::clone(&image_collection),
        );
        let source = PathBuf::from(&config.general.data_source);
        let report = importer.populate_if_absent(&source).await?;
        tracing::info!(
            outcome = ?report.outcome,
            rows = report.rows,
            invalid_rows = report.invalid_rows,
            text_indexed = report.text_indexed,
            images_indexed = report.images_indexed,
            "Catalog import finished"
        );
    }

    // Retriever + API server.
    let retriever = Arc::new(MultiQueryRetriever::new(
        text_batcher,
        image_batcher,
        text_collection,
        image_collection,
        &config.retrieval,
    ));
    let state = AppState::new(config.clone(), retriever);

    if let Err(e) = start_server(&config, state).await {
        tracing::error!(port = config.general.port, error = %e, "API server stopped");
        return Err(e.into());
    }

    Ok(())
}
