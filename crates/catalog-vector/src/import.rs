//! One-shot catalog import from CSV into the text and image collections.
//!
//! Import only runs against an empty store. Each row is embedded twice (its
//! combined text and its image); rows whose embedding is absent are left out
//! of that collection only.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use catalog_core::error::{CatalogError, Result};
use catalog_core::types::{CatalogRecord, EmbedMode, MaybeEmbedding};

use crate::batch::{ImageEmbeddingBatcher, TextEmbeddingBatcher};
use crate::index::{CollectionIndex, IndexEntry};

/// Entries per `add` call.
const INSERT_BATCH: usize = 256;

/// One CSV row. Only `name` is required.
#[derive(Debug, Deserialize)]
struct CatalogRow {
    #[serde(default)]
    pk: Option<String>,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    subcategory: Option<String>,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    image: Option<String>,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl From<CatalogRow> for CatalogRecord {
    fn from(row: CatalogRow) -> Self {
        Self {
            pk: present(row.pk).unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: row.name,
            description: row.description.unwrap_or_default(),
            category: present(row.category),
            subcategory: present(row.subcategory),
            price: present(row.price),
            image: present(row.image),
        }
    }
}

/// Parse a catalog CSV. Unparseable rows are skipped and counted.
pub fn read_catalog_csv(path: &Path) -> Result<(Vec<CatalogRecord>, usize)> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|e| CatalogError::Import(format!("Failed to open {}: {}", path.display(), e)))?;

    let mut records = Vec::new();
    let mut invalid = 0usize;
    for (line, row) in reader.deserialize::<CatalogRow>().enumerate() {
        match row {
            Ok(row) => records.push(CatalogRecord::from(row)),
            Err(e) => {
                invalid += 1;
                warn!(row = line + 1, error = %e, "Skipping malformed catalog row");
            }
        }
    }
    Ok((records, invalid))
}

/// What an import attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportOutcome {
    /// Both collections were empty and have been filled.
    Imported,
    /// Both collections already hold data.
    AlreadyPopulated,
    /// Exactly one collection holds data; nothing was written.
    PartiallyPopulated,
}

/// Totals from an import attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub outcome: ImportOutcome,
    /// Rows read from the source.
    pub rows: usize,
    /// Rows that failed to parse.
    pub invalid_rows: usize,
    pub text_indexed: usize,
    pub text_failed: usize,
    pub images_indexed: usize,
    pub images_failed: usize,
    /// Rows with no image reference at all.
    pub images_missing: usize,
}

impl ImportReport {
    fn skipped(outcome: ImportOutcome) -> Self {
        Self {
            outcome,
            rows: 0,
            invalid_rows: 0,
            text_indexed: 0,
            text_failed: 0,
            images_indexed: 0,
            images_failed: 0,
            images_missing: 0,
        }
    }
}

/// Fills both collections from a catalog source.
pub struct CatalogImporter {
    text_batcher: Arc<TextEmbeddingBatcher>,
    image_batcher: Arc<ImageEmbeddingBatcher>,
    text_collection: Arc<dyn CollectionIndex>,
    image_collection: Arc<dyn CollectionIndex>,
}

impl CatalogImporter {
    pub fn new(
        text_batcher: Arc<TextEmbeddingBatcher>,
        image_batcher: Arc<ImageEmbeddingBatcher>,
        text_collection: Arc<dyn CollectionIndex>,
        image_collection: Arc<dyn CollectionIndex>,
    ) -> Self {
        Self {
            text_batcher,
            image_batcher,
            text_collection,
            image_collection,
        }
    }

    /// True when both collections hold at least one entry. Count failures
    /// are logged and read as "no embeddings".
    pub async fn embeddings_exist(&self) -> bool {
        match self.counts().await {
            Ok((text, image)) => text > 0 && image > 0,
            Err(e) => {
                warn!(error = %e, "Failed to count collection entries");
                false
            }
        }
    }

    async fn counts(&self) -> Result<(u64, u64)> {
        let (text, image) = tokio::try_join!(self.text_collection.count(), self.image_collection.count())?;
        Ok((text, image))
    }

    /// Import the CSV at `path` unless the store already holds data.
    pub async fn populate_if_absent(&self, path: &Path) -> Result<ImportReport> {
        let (text_count, image_count) = self.counts().await?;
        match (text_count > 0, image_count > 0) {
            (true, true) => {
                info!(
                    text = text_count,
                    image = image_count,
                    "Embeddings already exist, skipping import"
                );
                return Ok(ImportReport::skipped(ImportOutcome::AlreadyPopulated));
            }
            (true, false) | (false, true) => {
                warn!(
                    text_collection = %self.text_collection.name(),
                    text = text_count,
                    image_collection = %self.image_collection.name(),
                    image = image_count,
                    "Only one collection holds data, skipping import to avoid duplicates"
                );
                return Ok(ImportReport::skipped(ImportOutcome::PartiallyPopulated));
            }
            (false, false) => {}
        }

        info!(source = %path.display(), "No embeddings found, importing catalog");
        let owned: PathBuf = path.to_path_buf();
        let (records, invalid_rows) = tokio::task::spawn_blocking(move || read_catalog_csv(&owned))
            .await
            .map_err(|e| CatalogError::Import(format!("CSV reader task failed: {}", e)))??;

        let mut report = self.import_records(records).await?;
        report.invalid_rows = invalid_rows;
        Ok(report)
    }

    /// Embed and index already-parsed records.
    pub async fn import_records(&self, records: Vec<CatalogRecord>) -> Result<ImportReport> {
        let rows = records.len();
        let texts: Vec<String> = records.iter().map(CatalogRecord::page_content).collect();

        let text_embeddings = self.text_batcher.embed_chunked(&texts, EmbedMode::Passage).await;
        let text_entries = entries(&records, &texts, text_embeddings);
        let text_indexed = text_entries.len();
        self.insert(self.text_collection.as_ref(), text_entries).await?;
        info!(rows, indexed = text_indexed, failed = rows - text_indexed, "Text embeddings indexed");

        let with_image: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.image.is_some())
            .map(|(i, _)| i)
            .collect();
        let references: Vec<String> = with_image
            .iter()
            .filter_map(|&i| records[i].image.clone())
            .collect();
        let image_embeddings = self.image_batcher.embed(&references).await;

        let mut slots: Vec<MaybeEmbedding> = vec![None; rows];
        for (&i, embedding) in with_image.iter().zip(image_embeddings) {
            slots[i] = embedding;
        }
        let image_entries = entries(&records, &texts, slots);
        let images_indexed = image_entries.len();
        self.insert(self.image_collection.as_ref(), image_entries).await?;

        let report = ImportReport {
            outcome: ImportOutcome::Imported,
            rows,
            invalid_rows: 0,
            text_indexed,
            text_failed: rows - text_indexed,
            images_indexed,
            images_failed: with_image.len() - images_indexed,
            images_missing: rows - with_image.len(),
        };
        info!(
            total = with_image.len(),
            indexed = report.images_indexed,
            failed = report.images_failed,
            missing = report.images_missing,
            "Image embeddings indexed"
        );
        Ok(report)
    }

    async fn insert(&self, collection: &dyn CollectionIndex, entries: Vec<IndexEntry>) -> Result<()> {
        let mut entries = entries.into_iter().peekable();
        while entries.peek().is_some() {
            let chunk: Vec<IndexEntry> = entries.by_ref().take(INSERT_BATCH).collect();
            collection.add(chunk).await?;
        }
        Ok(())
    }
}

/// Pair records with their present embeddings.
fn entries(records: &[CatalogRecord], texts: &[String], embeddings: Vec<MaybeEmbedding>) -> Vec<IndexEntry> {
    records
        .iter()
        .zip(texts)
        .zip(embeddings)
        .filter_map(|((record, text), embedding)| {
            embedding.map(|vector| IndexEntry {
                record: record.clone(),
                text: text.clone(),
                vector,
            })
        })
        .collect()
}
