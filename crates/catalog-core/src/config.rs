use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CatalogError, Result};

/// Process-wide configuration for the catalog retriever.
///
/// Loaded once at startup (TOML) and shared read-only behind an `Arc`.
/// Each section corresponds to one collaborator or pipeline stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrieverConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub image: ImageConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

impl RetrieverConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RetrieverConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Load a base file and deep-merge an optional override file over it.
    ///
    /// Tables merge key by key; any other value in the override replaces the
    /// base value. A missing override file is logged and ignored.
    pub fn load_with_override(base: &Path, override_path: Option<&Path>) -> Result<Self> {
        let content = std::fs::read_to_string(base)?;
        let mut merged: toml::Value = toml::from_str(&content)?;

        match override_path {
            Some(path) if path.exists() => {
                let overlay: toml::Value = toml::from_str(&std::fs::read_to_string(path)?)?;
                merge_toml(&mut merged, overlay);
                info!("Config override applied from {}", path.display());
            }
            Some(path) => {
                warn!("Override config file not found at {}", path.display());
            }
            None => {
                info!("No config override specified, using base config only");
            }
        }

        let config: RetrieverConfig = merged.try_into()?;
        config.validate()?;
        Ok(config)
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values that would make a pipeline stage ill-defined.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(CatalogError::Config("chunking.chunk_size must be > 0".into()));
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            return Err(CatalogError::Config(format!(
                "chunking.overlap ({}) must be smaller than chunk_size ({})",
                self.chunking.overlap, self.chunking.chunk_size
            )));
        }
        if self.embedding.batch_size == 0 {
            return Err(CatalogError::Config("embedding.batch_size must be > 0".into()));
        }
        if self.embedding.max_concurrent_batches == 0 {
            return Err(CatalogError::Config(
                "embedding.max_concurrent_batches must be > 0".into(),
            ));
        }
        if !(1..=100).contains(&self.image.quality) || !(1..=100).contains(&self.image.retry_quality)
        {
            return Err(CatalogError::Config("image quality must be within 1..=100".into()));
        }
        if self.image.max_width == 0 || self.image.max_height == 0 {
            return Err(CatalogError::Config("image bounding box must be non-empty".into()));
        }
        if !(-1.0..=1.0).contains(&self.retrieval.sim_threshold) {
            return Err(CatalogError::Config(format!(
                "retrieval.sim_threshold {} is outside [-1, 1]",
                self.retrieval.sim_threshold
            )));
        }
        if self.retrieval.max_k == 0 {
            return Err(CatalogError::Config("retrieval.max_k must be > 0".into()));
        }
        if self.index.text_collection == self.index.image_collection {
            return Err(CatalogError::Config(
                "text and image collections must have different names".into(),
            ));
        }
        Ok(())
    }
}

/// Recursively merge `overlay` into `base`.
fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// General service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// HTTP port for the query API.
    pub port: u16,
    /// CSV used to populate empty collections at startup.
    pub data_source: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            port: 8010,
            data_source: "data/products.csv".to_string(),
        }
    }
}

/// Embedding endpoints and batching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "http" for OpenAI-compatible endpoints, "mock" for offline hashing.
    pub backend: String,
    pub text_endpoint: String,
    pub image_endpoint: String,
    pub text_model: String,
    pub image_model: String,
    /// Name of the environment variable holding the bearer key.
    pub api_key_env: String,
    /// Inputs per remote call.
    pub batch_size: usize,
    /// Batches in flight at once.
    pub max_concurrent_batches: usize,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: "http".to_string(),
            text_endpoint: "http://localhost:8001/v1".to_string(),
            image_endpoint: "http://localhost:8002/v1".to_string(),
            text_model: "nvidia/nv-embedqa-e5-v5".to_string(),
            image_model: "nvidia/nvclip".to_string(),
            api_key_env: "EMBED_API_KEY".to_string(),
            batch_size: 32,
            max_concurrent_batches: 4,
            timeout_secs: 60,
        }
    }
}

/// Text chunking before embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 200,
        }
    }
}

/// Image normalization limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub max_width: u32,
    pub max_height: u32,
    /// JPEG quality (1-100) for the first encode.
    pub quality: u8,
    /// JPEG quality (1-100) for the single resize-and-recompress retry.
    pub retry_quality: u8,
    /// Ceiling on the data-URI length; the storage field-size limit.
    pub max_payload_len: usize,
    /// Timeout for fetching remote images.
    pub fetch_timeout_secs: u64,
    /// Directory that absolute image paths are resolved under, if set.
    pub asset_root: Option<String>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_width: 256,
            max_height: 256,
            quality: 85,
            retry_quality: 60,
            max_payload_len: 65_535,
            fetch_timeout_secs: 120,
            asset_root: None,
        }
    }
}

/// Vector collection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// "milvus" for the REST-backed store, "memory" for in-process collections.
    pub backend: String,
    pub uri: String,
    pub db_name: String,
    pub text_collection: String,
    pub image_collection: String,
    /// Name of the environment variable holding the index token, if any.
    pub token_env: String,
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            uri: "http://localhost:19530".to_string(),
            db_name: "default".to_string(),
            text_collection: "catalog_text".to_string(),
            image_collection: "catalog_image".to_string(),
            token_env: "MILVUS_TOKEN".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Ranking policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Candidates must score strictly above this cosine similarity.
    pub sim_threshold: f32,
    /// Result count when a request does not specify one.
    pub default_k: usize,
    /// Largest result count a request may ask for.
    pub max_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            sim_threshold: 0.5,
            default_k: 4,
            max_k: 100,
        }
    }
}
