//! Route handler functions for all API endpoints.
//!
//! Retrieval responses are column-oriented: entry `i` of every column
//! describes the same item.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use catalog_core::types::RetrievalResult;

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Request types
// =============================================================================

/// Body of `POST /query/text`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TextQueryRequest {
    #[serde(default)]
    pub text: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    /// Result count; the configured default when omitted.
    #[serde(default)]
    pub k: Option<usize>,
}

/// Body of `POST /query/image`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ImageQueryRequest {
    #[serde(default)]
    pub text: Vec<String>,
    /// Query image as a data URI.
    #[serde(default)]
    pub image_base64: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub k: Option<usize>,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResponse {
    pub texts: Vec<String>,
    pub ids: Vec<String>,
    pub similarities: Vec<f32>,
    pub names: Vec<String>,
    pub images: Vec<String>,
}

impl From<Vec<RetrievalResult>> for RetrievalResponse {
    fn from(results: Vec<RetrievalResult>) -> Self {
        let mut response = RetrievalResponse::default();
        for r in results {
            response.texts.push(r.text);
            response.ids.push(r.id);
            response.similarities.push(r.similarity);
            response.names.push(r.name);
            response.images.push(r.image);
        }
        response
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// Unix time in seconds.
    pub timestamp: f64,
    pub version: String,
    pub uptime_secs: u64,
}

// =============================================================================
// Handler functions
// =============================================================================

/// Resolve and bound the requested result count.
fn resolve_k(state: &AppState, k: Option<usize>) -> Result<usize, ApiError> {
    let k = k.unwrap_or(state.config.retrieval.default_k);
    let max_k = state.config.retrieval.max_k;
    if k == 0 || k > max_k {
        return Err(ApiError::BadRequest(format!("k must be between 1 and {}", max_k)));
    }
    Ok(k)
}

/// POST /query/text - text-only retrieval with category filtering.
pub async fn query_text(
    State(state): State<AppState>,
    Json(req): Json<TextQueryRequest>,
) -> Result<Json<RetrievalResponse>, ApiError> {
    let k = resolve_k(&state, req.k)?;
    info!(queries = ?req.text, categories = ?req.categories, k, "Text query received");

    let results = state
        .retriever
        .retrieve_text(&req.text, &req.categories, k)
        .await?;

    Ok(Json(RetrievalResponse::from(results)))
}

/// POST /query/image - retrieval with a query image plus optional text.
pub async fn query_image(
    State(state): State<AppState>,
    Json(req): Json<ImageQueryRequest>,
) -> Result<Json<RetrievalResponse>, ApiError> {
    let k = resolve_k(&state, req.k)?;
    if req.image_base64.trim().is_empty() {
        return Err(ApiError::BadRequest("image_base64 must not be empty".to_string()));
    }
    info!(
        queries = ?req.text,
        image_len = req.image_base64.len(),
        k,
        "Image query received"
    );

    let results = state
        .retriever
        .retrieve_image(&req.text, &req.image_base64, &req.categories, k)
        .await?;

    Ok(Json(RetrievalResponse::from(results)))
}

/// GET /health - liveness probe.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_columns_line_up() {
        let results = vec![
            RetrievalResult {
                text: "a | b | c,d\nPRICE: 1".to_string(),
                id: "1".to_string(),
                similarity: 0.9,
                name: "A".to_string(),
                image: "/a.jpg".to_string(),
            },
            RetrievalResult {
                text: "e | f | g,h\nPRICE: N/A".to_string(),
                id: "2".to_string(),
                similarity: 0.8,
                name: "E".to_string(),
                image: String::new(),
            },
        ];
        let response = RetrievalResponse::from(results);
        assert_eq!(response.ids, vec!["1", "2"]);
        assert_eq!(response.names, vec!["A", "E"]);
        assert_eq!(response.similarities, vec![0.9, 0.8]);
        assert_eq!(response.images, vec!["/a.jpg", ""]);
        assert_eq!(response.texts.len(), 2);
    }

    #[test]
    fn test_request_defaults() {
        let req: TextQueryRequest = serde_json::from_str("{}").unwrap();
        assert!(req.text.is_empty());
        assert!(req.categories.is_empty());
        assert_eq!(req.k, None);

        let req: ImageQueryRequest = serde_json::from_str(r#"{"image_base64":"data:x"}"#).unwrap();
        assert_eq!(req.image_base64, "data:x");
    }
}
