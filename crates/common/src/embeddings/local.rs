//! In-process sentence-transformer embeddings via fastembed.
//!
//! The model is loaded once when the embedder is built and shared for the lifetime of the
//! process. Inference is CPU-bound and runs on the blocking pool.

use super::Embedder;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub struct LocalEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    dimension: usize,
    encode_batch_size: usize,
}

impl LocalEmbedder {
    /// Load the named model, downloading it into `cache_dir` on first use.
    pub fn new(model_name: &str, cache_dir: Option<&str>, encode_batch_size: usize) -> Result<Self> {
        let (model, dimension) = resolve_model(model_name)?;

        let mut options = InitOptions::new(model);
        if let Some(dir) = cache_dir {
            options = options.with_cache_dir(PathBuf::from(dir));
        }

        let embedding = TextEmbedding::try_new(options).map_err(|e| AppError::Configuration {
            message: format!("Failed to load embedding model {}: {}", model_name, e),
        })?;

        tracing::info!(model = model_name, dimension, "Local embedding model loaded");

        Ok(Self {
            model: Arc::new(Mutex::new(embedding)),
            model_name: model_name.to_string(),
            dimension,
            encode_batch_size: encode_batch_size.max(1),
        })
    }

    async fn encode(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        let batch_size = self.encode_batch_size;

        tokio::task::spawn_blocking(move || {
            let mut model = model.lock().map_err(|_| AppError::EmbeddingError {
                message: "Embedding model lock poisoned".to_string(),
            })?;

            model
                .embed(texts, Some(batch_size))
                .map_err(|e| AppError::EmbeddingError {
                    message: format!("Local embedding failed: {}", e),
                })
        })
        .await
        .map_err(|e| AppError::Internal {
            message: format!("Embedding task failed: {}", e),
        })?
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.encode(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::EmbeddingError {
                message: "No embedding generated".to_string(),
            })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.encode(texts.to_vec()).await
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Map a configured model name to a fastembed model and its output dimension.
///
/// Hugging Face style names (`sentence-transformers/all-MiniLM-L6-v2`) and bare names are
/// both accepted, case-insensitively.
fn resolve_model(name: &str) -> Result<(EmbeddingModel, usize)> {
    let lowered = name.trim().to_lowercase();
    let bare = lowered.rsplit('/').next().unwrap_or(&lowered);

    match bare {
        "all-minilm-l6-v2" => Ok((EmbeddingModel::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((EmbeddingModel::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((EmbeddingModel::BGEBaseENV15, 768)),
        "bge-large-en-v1.5" => Ok((EmbeddingModel::BGELargeENV15, 1024)),
        "nomic-embed-text-v1.5" => Ok((EmbeddingModel::NomicEmbedTextV15, 768)),
        "paraphrase-multilingual-minilm-l12-v2" => Ok((EmbeddingModel::ParaphraseMLMiniLML12V2, 384)),
        _ => Err(AppError::Configuration {
            message: format!("Unsupported local embedding model: {}", name),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_default_model() {
        let (model, dimension) = resolve_model(crate::DEFAULT_EMBEDDING_MODEL).unwrap();
        assert!(matches!(model, EmbeddingModel::AllMiniLML6V2));
        assert_eq!(dimension, 384);
    }

    #[test]
    fn test_resolve_bare_name() {
        let (_, dimension) = resolve_model("BAAI/bge-base-en-v1.5").unwrap();
        assert_eq!(dimension, 768);
    }

    #[test]
    fn test_resolve_unknown_model() {
        assert!(resolve_model("word2vec").is_err());
    }
}
