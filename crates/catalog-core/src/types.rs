use serde::{Deserialize, Serialize};

// =============================================================================
// Aliases
// =============================================================================

/// A dense embedding vector.
pub type Embedding = Vec<f32>;

/// One slot of a positional embedding output. `None` is the absence marker.
pub type MaybeEmbedding = Option<Embedding>;

// =============================================================================
// Enums
// =============================================================================

/// Which side of an asymmetric text-embedding model an input belongs to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedMode {
    /// Short search query.
    #[default]
    Query,
    /// Catalog passage being indexed.
    Passage,
}

impl EmbedMode {
    /// Wire tag understood by the embedding endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbedMode::Query => "query",
            EmbedMode::Passage => "passage",
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// A catalog item as stored alongside its vectors in a collection.
///
/// Optional fields are explicit: a record without a price or category is a
/// valid record, it simply renders those parts as empty or `N/A`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    /// Unique id, shared by the record's text and image entries.
    pub pk: String,
    /// Display name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    /// Image reference (URL, path, or inline payload).
    #[serde(default)]
    pub image: Option<String>,
}

impl CatalogRecord {
    /// Text indexed for this record: `name | description | category,subcategory`.
    pub fn page_content(&self) -> String {
        format!(
            "{} | {} | {},{}",
            self.name,
            self.description,
            self.category.as_deref().unwrap_or(""),
            self.subcategory.as_deref().unwrap_or(""),
        )
    }

    /// Price label used in retrieval payloads.
    pub fn price_label(&self) -> &str {
        self.price.as_deref().unwrap_or("N/A")
    }
}

/// A candidate produced by one similarity search, consumed by fusion.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredCandidate {
    pub record: CatalogRecord,
    /// Stored text of the matching entry.
    pub text: String,
    /// Cosine similarity in [-1, 1].
    pub score: f32,
    /// Index of the query list this candidate came from.
    pub source: usize,
}

impl ScoredCandidate {
    pub fn id(&self) -> &str {
        &self.record.pk
    }

    /// Text payload handed back to callers: stored text plus price line.
    pub fn payload(&self) -> String {
        format!("{}\nPRICE: {}", self.text, self.record.price_label())
    }
}

/// One ranked item returned to the orchestration layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Description payload including the price line.
    pub text: String,
    pub id: String,
    pub similarity: f32,
    pub name: String,
    /// Image reference, empty when the record has none.
    pub image: String,
}

impl From<ScoredCandidate> for RetrievalResult {
    fn from(candidate: ScoredCandidate) -> Self {
        let text = candidate.payload();
        Self {
            text,
            id: candidate.record.pk,
            similarity: candidate.score,
            name: candidate.record.name,
            image: candidate.record.image.unwrap_or_default(),
        }
    }
}
