//! BioSearch Common Library
//!
//! Shared code for the BioSearch services including:
//! - Database models and repository patterns
//! - Embedding client abstraction
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability
//! - The retrieval-augmented answer pipeline

pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod metrics;
pub mod rag;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{PaperResult, PaperStore, Repository};
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use rag::{RagEngine, RagQuery, RagResponse};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;
