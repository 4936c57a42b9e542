use thiserror::Error;

/// Message shown to end users when a retrieval invocation fails.
pub const SEARCH_UNAVAILABLE_MESSAGE: &str = "Temporarily unable to search the catalog.";

/// Top-level error type for the catalog retrieval system.
///
/// Locally recoverable failures (a bad image reference, a failed embedding
/// batch) never surface as this type; they become absence markers in the
/// output sequence. Only failures that abort an operation are represented.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Unsupported image format: {0}")]
    UnsupportedImageFormat(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Import error: {0}")]
    Import(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CatalogError {
    /// Text safe to show to an end user.
    ///
    /// Search and index failures collapse to a fixed message; the detailed
    /// error is meant for logs only.
    pub fn user_message(&self) -> &'static str {
        match self {
            CatalogError::Config(_) => "The catalog service is misconfigured.",
            _ => SEARCH_UNAVAILABLE_MESSAGE,
        }
    }
}

impl From<toml::de::Error> for CatalogError {
    fn from(err: toml::de::Error) -> Self {
        CatalogError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for CatalogError {
    fn from(err: toml::ser::Error) -> Self {
        CatalogError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;
