//! Catalog API crate - axum HTTP server and route handlers.
//!
//! Exposes text and image retrieval plus a health probe for the
//! orchestration layer.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
