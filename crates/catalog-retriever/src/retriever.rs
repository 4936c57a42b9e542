//! Multi-query retrieval over the text and image collections.
//!
//! One call resolves its queries, dispatches every similarity search
//! concurrently behind a fail-fast join, fuses the per-query lists, and then
//! runs the dedup, threshold, re-sort and category stages in order.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info};

use catalog_core::config::RetrievalConfig;
use catalog_core::error::{CatalogError, Result};
use catalog_core::types::{Embedding, RetrievalResult, ScoredCandidate};
use catalog_vector::batch::{ImageEmbeddingBatcher, TextEmbeddingBatcher};
use catalog_vector::index::CollectionIndex;

use crate::category;
use crate::fusion::{self, FusionMode};

/// Query used when the caller supplies no text queries.
pub const PLACEHOLDER_QUERY: &str = "Can you find me something like this image?";

/// Retrieves catalog items for one or more text queries and an optional
/// query image.
///
/// Holds only shared read-only handles, so a single instance can serve
/// concurrent requests.
pub struct MultiQueryRetriever {
    text_embedder: Arc<TextEmbeddingBatcher>,
    image_embedder: Arc<ImageEmbeddingBatcher>,
    text_collection: Arc<dyn CollectionIndex>,
    image_collection: Arc<dyn CollectionIndex>,
    sim_threshold: f32,
}

impl MultiQueryRetriever {
    pub fn new(
        text_embedder: Arc<TextEmbeddingBatcher>,
        image_embedder: Arc<ImageEmbeddingBatcher>,
        text_collection: Arc<dyn CollectionIndex>,
        image_collection: Arc<dyn CollectionIndex>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            text_embedder,
            image_embedder,
            text_collection,
            image_collection,
            sim_threshold: config.sim_threshold,
        }
    }

    /// Text-only retrieval. Results are interleaved across queries and then
    /// filtered by `categories`; without any category term the result is
    /// empty.
    pub async fn retrieve_text(
        &self,
        queries: &[String],
        categories: &[String],
        k: usize,
    ) -> Result<Vec<RetrievalResult>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let queries = resolve_queries(queries);
        let fetch = k * queries.len();
        info!(queries = queries.len(), k, fetch, "Text-only retrieval");

        let lists = try_join_all(
            queries
                .iter()
                .enumerate()
                .map(|(source, query)| self.search_text(query, fetch, source)),
        )
        .await?;

        let ranked = self.rank(lists, FusionMode::Interleave, k);

        if !category::has_terms(categories) {
            info!("No categories provided for text search, returning empty");
            return Ok(Vec::new());
        }
        let results: Vec<RetrievalResult> = ranked
            .into_iter()
            .map(RetrievalResult::from)
            .filter(|r| category::matches(categories, &category::parse_categories(&r.text)))
            .collect();

        debug!(kept = results.len(), "Category filtering done");
        Ok(results)
    }

    /// Retrieval with a query image. Text hits and image hits are pooled and
    /// ordered by score; categories are not applied.
    pub async fn retrieve_image(
        &self,
        queries: &[String],
        image_payload: &str,
        categories: &[String],
        k: usize,
    ) -> Result<Vec<RetrievalResult>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let queries = resolve_queries(queries);
        let image_fetch = k * queries.len();
        info!(
            queries = queries.len(),
            k,
            image_fetch,
            ignored_categories = categories.len(),
            "Image retrieval"
        );

        let text_searches = try_join_all(
            queries
                .iter()
                .enumerate()
                .map(|(source, query)| self.search_text(query, k, source)),
        );
        let image_search = self.search_image(image_payload, image_fetch, queries.len());
        let (mut lists, image_hits) = tokio::try_join!(text_searches, image_search)?;
        lists.push(image_hits);

        Ok(self
            .rank(lists, FusionMode::ScoreMerge, k)
            .into_iter()
            .map(RetrievalResult::from)
            .collect())
    }

    /// Fuse, dedup, cut to `k` above the threshold, and re-sort.
    fn rank(&self, lists: Vec<Vec<ScoredCandidate>>, mode: FusionMode, k: usize) -> Vec<ScoredCandidate> {
        debug!(
            similarities = ?lists.iter().flatten().map(|c| c.score).collect::<Vec<_>>(),
            "Pre-fusion candidates"
        );
        let fused = mode.fuse(lists);
        let unique = fusion::dedup_by_id(fused);
        let mut survivors = fusion::truncate_and_threshold(unique, k, self.sim_threshold);
        fusion::sort_descending(&mut survivors);
        debug!(
            names = ?survivors.iter().map(|c| c.record.name.as_str()).collect::<Vec<_>>(),
            "Ranked candidates"
        );
        survivors
    }

    async fn search_text(&self, query: &str, k: usize, source: usize) -> Result<Vec<ScoredCandidate>> {
        let vector = self
            .text_embedder
            .embed_query(query)
            .await
            .map_err(|e| search_error("embed text query", e))?;
        self.search(self.text_collection.as_ref(), &vector, k, source).await
    }

    async fn search_image(&self, payload: &str, k: usize, source: usize) -> Result<Vec<ScoredCandidate>> {
        let vector = self
            .image_embedder
            .embed_query(payload)
            .await
            .map_err(|e| search_error("embed query image", e))?;
        self.search(self.image_collection.as_ref(), &vector, k, source).await
    }

    async fn search(
        &self,
        collection: &dyn CollectionIndex,
        vector: &Embedding,
        k: usize,
        source: usize,
    ) -> Result<Vec<ScoredCandidate>> {
        let hits = collection
            .similarity_search(vector, k)
            .await
            .map_err(|e| search_error(collection.name(), e))?;

        let mut candidates: Vec<ScoredCandidate> = hits
            .into_iter()
            .map(|hit| ScoredCandidate {
                record: hit.record,
                text: hit.text,
                score: hit.score,
                source,
            })
            .collect();
        fusion::sort_descending(&mut candidates);
        Ok(candidates)
    }
}

fn resolve_queries(queries: &[String]) -> Vec<String> {
    if queries.is_empty() {
        vec![PLACEHOLDER_QUERY.to_string()]
    } else {
        queries.to_vec()
    }
}

fn search_error(stage: &str, error: CatalogError) -> CatalogError {
    CatalogError::Search(format!("{}: {}", stage, error))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_empty_queries() {
        assert_eq!(resolve_queries(&[]), vec![PLACEHOLDER_QUERY.to_string()]);
        let given = vec!["red shoes".to_string()];
        assert_eq!(resolve_queries(&given), given);
    }

    #[test]
    fn test_search_error_wraps() {
        let err = search_error("catalog_text", CatalogError::Index("down".to_string()));
        match err {
            CatalogError::Search(msg) => assert_eq!(msg, "catalog_text: Index error: down"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
