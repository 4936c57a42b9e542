//! Embedding endpoint clients.
//!
//! - `HttpTextEmbedding` / `HttpImageEmbedding` talk to OpenAI-compatible
//!   `/embeddings` endpoints. One call embeds one batch; a failed call fails
//!   the whole batch.
//! - `MockTextEmbedding` / `MockImageEmbedding` provide deterministic
//!   hash-based vectors for tests and offline runs.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use catalog_core::config::EmbeddingConfig;
use catalog_core::error::{CatalogError, Result};
use catalog_core::types::{EmbedMode, Embedding};

/// Remote text-embedding endpoint. One call per batch.
#[async_trait]
pub trait TextEmbeddingClient: Send + Sync {
    /// Embed every input, returning one vector per input in input order.
    async fn embed_batch(&self, inputs: &[String], mode: EmbedMode) -> Result<Vec<Embedding>>;

    /// Model name, for logging.
    fn model(&self) -> &str;
}

/// Remote image-embedding endpoint. Inputs are normalized data-URI payloads.
#[async_trait]
pub trait ImageEmbeddingClient: Send + Sync {
    async fn embed_batch(&self, payloads: &[String]) -> Result<Vec<Embedding>>;

    fn model(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Vector helpers
// ---------------------------------------------------------------------------

/// Scale `vector` to unit length. Zero vectors are returned unchanged.
pub fn l2_normalize(mut vector: Embedding) -> Embedding {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in &mut vector {
            *val /= norm;
        }
    }
    vector
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 if the lengths differ or either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    (dot / (mag_a * mag_b)) as f32
}

// ---------------------------------------------------------------------------
// OpenAI-compatible HTTP endpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
    encoding_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    truncate: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Embedding,
    #[serde(default)]
    index: Option<usize>,
}

/// Failure of one endpoint call, before it is mapped to a `CatalogError`.
#[derive(Debug)]
enum EndpointFailure {
    Transport(String),
    Status { status: u16, body: String },
    Decode(String),
}

impl EndpointFailure {
    fn message(&self) -> String {
        match self {
            EndpointFailure::Transport(msg) => format!("transport: {}", msg),
            EndpointFailure::Status { status, body } => format!("HTTP {}: {}", status, body),
            EndpointFailure::Decode(msg) => format!("invalid response: {}", msg),
        }
    }
}

/// Connection to a single `/embeddings` URL.
#[derive(Debug, Clone)]
struct EmbeddingEndpoint {
    http: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl EmbeddingEndpoint {
    fn new(base_url: &str, model: &str, config: &EmbeddingConfig) -> Result<Self> {
        if base_url.trim().is_empty() {
            return Err(CatalogError::Config("embedding endpoint must not be empty".into()));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CatalogError::Config(format!("HTTP client: {}", e)))?;

        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            debug!(env = %config.api_key_env, "No embedding API key set, sending unauthenticated requests");
        }

        Ok(Self {
            http,
            url: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key,
        })
    }

    async fn post(
        &self,
        body: &EmbeddingRequest<'_>,
    ) -> std::result::Result<Vec<Embedding>, EndpointFailure> {
        let mut request = self.http.post(&self.url).json(body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EndpointFailure::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EndpointFailure::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EndpointFailure::Decode(e.to_string()))?;

        let mut data = parsed.data;
        if data.iter().all(|d| d.index.is_some()) {
            data.sort_by_key(|d| d.index);
        }
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Text embedding over an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct HttpTextEmbedding {
    endpoint: EmbeddingEndpoint,
}

impl HttpTextEmbedding {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let endpoint = EmbeddingEndpoint::new(&config.text_endpoint, &config.text_model, config)?;
        info!(url = %endpoint.url, model = %endpoint.model, "Text embedding client ready");
        Ok(Self { endpoint })
    }
}

#[async_trait]
impl TextEmbeddingClient for HttpTextEmbedding {
    async fn embed_batch(&self, inputs: &[String], mode: EmbedMode) -> Result<Vec<Embedding>> {
        let body = EmbeddingRequest {
            input: inputs,
            model: &self.endpoint.model,
            encoding_format: "float",
            input_type: Some(mode.as_str()),
            truncate: Some("NONE"),
        };
        self.endpoint
            .post(&body)
            .await
            .map_err(|f| CatalogError::Embedding(f.message()))
    }

    fn model(&self) -> &str {
        &self.endpoint.model
    }
}

/// Image embedding over an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct HttpImageEmbedding {
    endpoint: EmbeddingEndpoint,
}

impl HttpImageEmbedding {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let endpoint =
            EmbeddingEndpoint::new(&config.image_endpoint, &config.image_model, config)?;
        info!(url = %endpoint.url, model = %endpoint.model, "Image embedding client ready");
        Ok(Self { endpoint })
    }
}

#[async_trait]
impl ImageEmbeddingClient for HttpImageEmbedding {
    async fn embed_batch(&self, payloads: &[String]) -> Result<Vec<Embedding>> {
        let body = EmbeddingRequest {
            input: payloads,
            model: &self.endpoint.model,
            encoding_format: "float",
            input_type: None,
            truncate: None,
        };
        self.endpoint
            .post(&body)
            .await
            .map_err(|f| classify_image_failure(&f.message()))
    }

    fn model(&self) -> &str {
        &self.endpoint.model
    }
}

/// Separate codec rejections from other image endpoint failures.
pub fn classify_image_failure(message: &str) -> CatalogError {
    let lower = message.to_lowercase();
    if lower.contains("webp") || lower.contains("format") || lower.contains("expected") {
        CatalogError::UnsupportedImageFormat(message.to_string())
    } else {
        CatalogError::Embedding(message.to_string())
    }
}

// ---------------------------------------------------------------------------
// Mock clients - deterministic hash-based vectors for testing
// ---------------------------------------------------------------------------

fn hash_to_vector(input: &str, dimensions: usize) -> Embedding {
    let mut result = Vec::with_capacity(dimensions);
    for i in 0..dimensions {
        let mut hasher = DefaultHasher::new();
        input.hash(&mut hasher);
        i.hash(&mut hasher);
        let h = hasher.finish();
        let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
        result.push(val as f32);
    }
    l2_normalize(result)
}

/// Mock text embedding. Identical inputs map to identical unit vectors
/// regardless of mode, so a query equal to a stored passage scores 1.0.
///
/// A batch containing an empty string fails as a whole, which is how tests
/// inject batch failures.
#[derive(Debug, Clone)]
pub struct MockTextEmbedding {
    dimensions: usize,
}

impl MockTextEmbedding {
    pub fn new() -> Self {
        Self { dimensions: 384 }
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self { dimensions }
    }

    pub fn vector_for(&self, text: &str) -> Embedding {
        hash_to_vector(text, self.dimensions)
    }
}

impl Default for MockTextEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextEmbeddingClient for MockTextEmbedding {
    async fn embed_batch(&self, inputs: &[String], _mode: EmbedMode) -> Result<Vec<Embedding>> {
        if inputs.iter().any(|t| t.is_empty()) {
            return Err(CatalogError::Embedding("Cannot embed empty text".to_string()));
        }
        Ok(inputs.iter().map(|t| self.vector_for(t)).collect())
    }

    fn model(&self) -> &str {
        "mock-text"
    }
}

/// Mock image embedding keyed on the normalized payload string.
#[derive(Debug, Clone)]
pub struct MockImageEmbedding {
    dimensions: usize,
}

impl MockImageEmbedding {
    pub fn new() -> Self {
        Self { dimensions: 512 }
    }

    pub fn vector_for(&self, payload: &str) -> Embedding {
        hash_to_vector(payload, self.dimensions)
    }
}

impl Default for MockImageEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageEmbeddingClient for MockImageEmbedding {
    async fn embed_batch(&self, payloads: &[String]) -> Result<Vec<Embedding>> {
        if let Some(bad) = payloads.iter().find(|p| p.starts_with("data:image/webp")) {
            return Err(classify_image_failure(&format!(
                "expected JPEG or PNG, got {}",
                bad.chars().take(20).collect::<String>()
            )));
        }
        Ok(payloads.iter().map(|p| self.vector_for(p)).collect())
    }

    fn model(&self) -> &str {
        "mock-image"
    }
}
