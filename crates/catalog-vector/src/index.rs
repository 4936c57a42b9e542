//! Collection abstraction over the external vector index.
//!
//! A collection stores one vector per catalog record together with the
//! record's fields and its indexed text. [`MemoryCollection`] is a
//! brute-force in-process implementation for development and tests; the
//! production backend is [`crate::milvus::MilvusCollection`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use catalog_core::error::{CatalogError, Result};
use catalog_core::types::{CatalogRecord, Embedding};

use crate::embedding::cosine_similarity;

/// One vector plus the record it represents.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub record: CatalogRecord,
    /// Text stored with the vector (the record's page content).
    pub text: String,
    pub vector: Embedding,
}

/// A single hit returned from a similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub record: CatalogRecord,
    pub text: String,
    /// Cosine similarity in [-1, 1].
    pub score: f32,
}

/// A named vector collection.
#[async_trait]
pub trait CollectionIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Top-`k` entries by cosine similarity, highest first.
    async fn similarity_search(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>>;

    /// Insert entries, returning how many were stored.
    async fn add(&self, entries: Vec<IndexEntry>) -> Result<usize>;

    /// Number of stored entries.
    async fn count(&self) -> Result<u64>;
}

#[derive(Debug, Default)]
struct Entries {
    items: Vec<IndexEntry>,
    by_pk: HashMap<String, usize>,
}

/// In-memory collection using brute-force cosine similarity.
///
/// Thread-safe via interior RwLock. Re-adding a pk replaces its entry in
/// place. All vectors must share one dimension.
#[derive(Debug, Clone)]
pub struct MemoryCollection {
    name: String,
    entries: Arc<RwLock<Entries>>,
}

impl MemoryCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Arc::new(RwLock::new(Entries::default())),
        }
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned(e: impl std::fmt::Display) -> CatalogError {
        CatalogError::Index(format!("Lock poisoned: {}", e))
    }
}

#[async_trait]
impl CollectionIndex for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn similarity_search(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let entries = self.entries.read().map_err(Self::poisoned)?;

        let mut scored: Vec<SearchHit> = entries
            .items
            .iter()
            .map(|entry| SearchHit {
                record: entry.record.clone(),
                text: entry.text.clone(),
                score: cosine_similarity(vector, &entry.vector),
            })
            .collect();

        // Stable: equal scores keep insertion order.
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored)
    }

    async fn add(&self, new_entries: Vec<IndexEntry>) -> Result<usize> {
        let mut entries = self.entries.write().map_err(Self::poisoned)?;
        let mut dimension = entries.items.first().map(|e| e.vector.len());

        let mut added = 0;
        for entry in new_entries {
            if entry.vector.is_empty() {
                return Err(CatalogError::Index(format!(
                    "Empty vector for pk {} in collection {}",
                    entry.record.pk, self.name
                )));
            }
            match dimension {
                Some(d) if d != entry.vector.len() => {
                    return Err(CatalogError::Index(format!(
                        "Dimension mismatch in collection {}: expected {}, got {}",
                        self.name,
                        d,
                        entry.vector.len()
                    )));
                }
                Some(_) => {}
                None => dimension = Some(entry.vector.len()),
            }

            match entries.by_pk.get(&entry.record.pk).copied() {
                Some(pos) => entries.items[pos] = entry,
                None => {
                    let pos = entries.items.len();
                    entries.by_pk.insert(entry.record.pk.clone(), pos);
                    entries.items.push(entry);
                }
            }
            added += 1;
        }

        Ok(added)
    }

    async fn count(&self) -> Result<u64> {
        let entries = self.entries.read().map_err(Self::poisoned)?;
        Ok(entries.items.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pk: &str, vector: Vec<f32>) -> IndexEntry {
        let record = CatalogRecord {
            pk: pk.to_string(),
            name: format!("Item {}", pk),
            description: "test item".to_string(),
            ..CatalogRecord::default()
        };
        IndexEntry {
            text: record.page_content(),
            record,
            vector,
        }
    }

    #[tokio::test]
    async fn test_add_and_search() {
        let collection = MemoryCollection::new("catalog_text");
        let added = collection
            .add(vec![entry("a", vec![1.0, 0.0]), entry("b", vec![0.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(collection.count().await.unwrap(), 2);

        let hits = collection.similarity_search(&[1.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.pk, "a");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!(hits[1].score.abs() < 1e-6);
        assert_eq!(hits[0].text, "Item a | test item | ,");
    }

    #[tokio::test]
    async fn test_search_empty_collection() {
        let collection = MemoryCollection::new("empty");
        assert!(collection.similarity_search(&[1.0], 10).await.unwrap().is_empty());
        assert_eq!(collection.count().await.unwrap(), 0);
        assert!(collection.is_empty());
    }

    #[tokio::test]
    async fn test_search_respects_k() {
        let collection = MemoryCollection::new("c");
        let entries = (0..10).map(|i| entry(&i.to_string(), vec![1.0, i as f32])).collect();
        collection.add(entries).await.unwrap();

        assert_eq!(collection.similarity_search(&[1.0, 0.0], 3).await.unwrap().len(), 3);
        assert!(collection.similarity_search(&[1.0, 0.0], 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_ordering_and_ties() {
        let collection = MemoryCollection::new("c");
        collection
            .add(vec![
                entry("far", vec![-1.0, 0.0]),
                entry("tie1", vec![1.0, 0.0]),
                entry("tie2", vec![2.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = collection.similarity_search(&[1.0, 0.0], 10).await.unwrap();
        let pks: Vec<&str> = hits.iter().map(|h| h.record.pk.as_str()).collect();
        assert_eq!(pks, vec!["tie1", "tie2", "far"]);
    }

    #[tokio::test]
    async fn test_add_overwrites_pk() {
        let collection = MemoryCollection::new("c");
        collection.add(vec![entry("a", vec![1.0, 0.0])]).await.unwrap();
        collection.add(vec![entry("a", vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(collection.len(), 1);

        let hits = collection.similarity_search(&[0.0, 1.0], 1).await.unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_add_rejects_dimension_mismatch() {
        let collection = MemoryCollection::new("c");
        collection.add(vec![entry("a", vec![1.0, 0.0])]).await.unwrap();
        let err = collection.add(vec![entry("b", vec![1.0, 0.0, 0.0])]).await.unwrap_err();
        assert!(matches!(err, CatalogError::Index(_)));

        assert!(collection.add(vec![entry("c", vec![])]).await.is_err());
    }

    #[tokio::test]
    async fn test_shared_across_clones() {
        let collection = MemoryCollection::new("c");
        let handle = collection.clone();
        handle.add(vec![entry("a", vec![1.0])]).await.unwrap();
        assert_eq!(collection.count().await.unwrap(), 1);
        assert_eq!(collection.name(), "c");
    }
}
