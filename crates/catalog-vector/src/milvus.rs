//! Milvus-backed collection over the v2 REST API.
//!
//! Every call is a JSON `POST` under `{uri}/v2/vectordb/`. Milvus reports
//! failures in-band with a non-zero `code`, which maps to
//! [`CatalogError::Index`]. The collection is created lazily on the first
//! insert, once the vector dimension is known.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use catalog_core::config::IndexConfig;
use catalog_core::error::{CatalogError, Result};
use catalog_core::types::CatalogRecord;

use crate::index::{CollectionIndex, IndexEntry, SearchHit};

const VECTOR_FIELD: &str = "vector";
const OUTPUT_FIELDS: [&str; 8] = [
    "pk",
    "text",
    "name",
    "description",
    "category",
    "subcategory",
    "price",
    "image",
];

/// Envelope wrapping every Milvus REST response.
#[derive(Debug, Deserialize)]
struct MilvusResponse<T> {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct HasData {
    has: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsData {
    row_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertData {
    insert_count: usize,
}

/// One row as written to Milvus. Scalar fields live in the dynamic field.
#[derive(Debug, Serialize)]
struct MilvusRow<'a> {
    pk: &'a str,
    vector: &'a [f32],
    text: &'a str,
    name: &'a str,
    description: &'a str,
    category: &'a str,
    subcategory: &'a str,
    price: &'a str,
    image: &'a str,
}

impl<'a> From<&'a IndexEntry> for MilvusRow<'a> {
    fn from(entry: &'a IndexEntry) -> Self {
        let r = &entry.record;
        Self {
            pk: &r.pk,
            vector: &entry.vector,
            text: &entry.text,
            name: &r.name,
            description: &r.description,
            category: r.category.as_deref().unwrap_or(""),
            subcategory: r.subcategory.as_deref().unwrap_or(""),
            price: r.price.as_deref().unwrap_or(""),
            image: r.image.as_deref().unwrap_or(""),
        }
    }
}

/// One search hit. Milvus reports the COSINE score as `distance`.
#[derive(Debug, Deserialize)]
struct MilvusHit {
    distance: f32,
    pk: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    subcategory: String,
    #[serde(default)]
    price: String,
    #[serde(default)]
    image: String,
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

impl From<MilvusHit> for SearchHit {
    fn from(hit: MilvusHit) -> Self {
        Self {
            record: CatalogRecord {
                pk: hit.pk,
                name: hit.name,
                description: hit.description,
                category: non_empty(hit.category),
                subcategory: non_empty(hit.subcategory),
                price: non_empty(hit.price),
                image: non_empty(hit.image),
            },
            text: hit.text,
            score: hit.distance,
        }
    }
}

/// A single Milvus collection.
pub struct MilvusCollection {
    http: Client,
    base_url: String,
    db_name: String,
    collection: String,
    token: Option<String>,
    exists: AtomicBool,
}

impl MilvusCollection {
    pub fn new(config: &IndexConfig, collection: &str) -> Result<Self> {
        if collection.is_empty() {
            return Err(CatalogError::Config("collection name cannot be empty".to_string()));
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CatalogError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: format!("{}/v2/vectordb", config.uri.trim_end_matches('/')),
            db_name: config.db_name.clone(),
            collection: collection.to_string(),
            token: std::env::var(&config.token_env).ok().filter(|t| !t.is_empty()),
            exists: AtomicBool::new(false),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn call<T: DeserializeOwned>(&self, path: &str, body: serde_json::Value) -> Result<Option<T>> {
        let mut request = self.http.post(self.endpoint(path)).json(&body);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CatalogError::Index(format!("{} request failed: {}", path, e)))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CatalogError::Index(format!("{} read failed: {}", path, e)))?;
        if !status.is_success() {
            return Err(CatalogError::Index(format!("{} returned {}: {}", path, status, text)));
        }

        parse_response(path, &text)
    }

    async fn has_collection(&self) -> Result<bool> {
        if self.exists.load(Ordering::Acquire) {
            return Ok(true);
        }
        let data: Option<HasData> = self
            .call(
                "collections/has",
                json!({ "dbName": self.db_name, "collectionName": self.collection }),
            )
            .await?;
        let has = data.map(|d| d.has).unwrap_or(false);
        if has {
            self.exists.store(true, Ordering::Release);
        }
        Ok(has)
    }

    async fn create_collection(&self, dimension: usize) -> Result<()> {
        let body = json!({
            "dbName": self.db_name,
            "collectionName": self.collection,
            "schema": {
                "autoId": false,
                "enableDynamicField": true,
                "fields": [
                    {
                        "fieldName": "pk",
                        "dataType": "VarChar",
                        "isPrimary": true,
                        "elementTypeParams": { "max_length": "512" }
                    },
                    {
                        "fieldName": VECTOR_FIELD,
                        "dataType": "FloatVector",
                        "elementTypeParams": { "dim": dimension.to_string() }
                    }
                ]
            },
            "indexParams": [
                {
                    "fieldName": VECTOR_FIELD,
                    "indexName": VECTOR_FIELD,
                    "metricType": "COSINE",
                    "indexType": "AUTOINDEX"
                }
            ]
        });
        let _: Option<serde_json::Value> = self.call("collections/create", body).await?;
        self.exists.store(true, Ordering::Release);
        info!(collection = %self.collection, dimension, "Created Milvus collection");
        Ok(())
    }
}

/// Decode a response envelope, turning a non-zero `code` into an error.
fn parse_response<T: DeserializeOwned>(path: &str, body: &str) -> Result<Option<T>> {
    let envelope: MilvusResponse<T> = serde_json::from_str(body)
        .map_err(|e| CatalogError::Index(format!("{} returned malformed body: {}", path, e)))?;
    if envelope.code != 0 {
        return Err(CatalogError::Index(format!(
            "{} failed with code {}: {}",
            path,
            envelope.code,
            envelope.message.unwrap_or_default()
        )));
    }
    Ok(envelope.data)
}

#[async_trait]
impl CollectionIndex for MilvusCollection {
    fn name(&self) -> &str {
        &self.collection
    }

    async fn similarity_search(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 || !self.has_collection().await? {
            return Ok(Vec::new());
        }

        let hits: Option<Vec<MilvusHit>> = self
            .call(
                "entities/search",
                json!({
                    "dbName": self.db_name,
                    "collectionName": self.collection,
                    "data": [vector],
                    "annsField": VECTOR_FIELD,
                    "limit": k,
                    "outputFields": OUTPUT_FIELDS,
                }),
            )
            .await?;

        let mut hits: Vec<SearchHit> = hits.unwrap_or_default().into_iter().map(SearchHit::from).collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        debug!(collection = %self.collection, k, hits = hits.len(), "Milvus search");
        Ok(hits)
    }

    async fn add(&self, entries: Vec<IndexEntry>) -> Result<usize> {
        let Some(first) = entries.first() else {
            return Ok(0);
        };
        if !self.has_collection().await? {
            self.create_collection(first.vector.len()).await?;
        }

        let rows: Vec<MilvusRow<'_>> = entries.iter().map(MilvusRow::from).collect();
        let data: Option<InsertData> = self
            .call(
                "entities/insert",
                json!({
                    "dbName": self.db_name,
                    "collectionName": self.collection,
                    "data": rows,
                }),
            )
            .await?;

        Ok(data.map(|d| d.insert_count).unwrap_or(0))
    }

    async fn count(&self) -> Result<u64> {
        if !self.has_collection().await? {
            return Ok(0);
        }
        // rowCount only covers sealed segments until a flush.
        let _: Option<serde_json::Value> = self
            .call(
                "collections/flush",
                json!({ "dbName": self.db_name, "collectionName": self.collection }),
            )
            .await?;
        let stats: Option<StatsData> = self
            .call(
                "collections/get_stats",
                json!({ "dbName": self.db_name, "collectionName": self.collection }),
            )
            .await?;
        Ok(stats.map(|s| s.row_count).unwrap_or(0))
    }
}
