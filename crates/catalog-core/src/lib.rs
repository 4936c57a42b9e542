pub mod config;
pub mod error;
pub mod types;

pub use config::RetrieverConfig;
pub use error::{CatalogError, Result};
pub use types::*;
