//! Catalog Vector crate - chunking, embedding clients, batching, image
//! normalization, collection indexes, and bulk import.
//!
//! Everything that talks to an embedding endpoint or a vector store lives
//! here. Retrieval and fusion sit one layer up in `catalog-retriever`.

pub mod batch;
pub mod chunk;
pub mod embedding;
pub mod image;
pub mod import;
pub mod index;
pub mod milvus;

pub use batch::{reconstruct, ImageEmbeddingBatcher, TextEmbeddingBatcher};
pub use chunk::{ChunkSplitter, Chunks};
pub use embedding::{
    cosine_similarity, l2_normalize, HttpImageEmbedding, HttpTextEmbedding, ImageEmbeddingClient,
    MockImageEmbedding, MockTextEmbedding, TextEmbeddingClient,
};
pub use image::{ImageNormalizer, ImageRef};
pub use import::{read_catalog_csv, CatalogImporter, ImportOutcome, ImportReport};
pub use index::{CollectionIndex, IndexEntry, MemoryCollection, SearchHit};
pub use milvus::MilvusCollection;
