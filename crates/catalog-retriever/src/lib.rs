//! Catalog Retriever crate - multi-query retrieval, result fusion, and
//! category filtering on top of `catalog-vector`.

pub mod category;
pub mod fusion;
pub mod retriever;

pub use fusion::FusionMode;
pub use retriever::{MultiQueryRetriever, PLACEHOLDER_QUERY};
