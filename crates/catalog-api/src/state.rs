//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use catalog_core::config::RetrieverConfig;
use catalog_retriever::MultiQueryRetriever;

/// Shared application state.
///
/// Everything here is read-only after startup, so cloning per request is
/// just a few `Arc` bumps.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<RetrieverConfig>,
    /// Retrieval engine over the text and image collections.
    pub retriever: Arc<MultiQueryRetriever>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: RetrieverConfig, retriever: Arc<MultiQueryRetriever>) -> Self {
        Self {
            config: Arc::new(config),
            retriever,
            start_time: Instant::now(),
        }
    }
}
