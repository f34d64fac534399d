//! Embedding worker processor
//!
//! Walks every stored paper in id order, builds its composite text, embeds the texts in
//! fixed-size batches, and overwrites each paper's stored vector and model name.

use biosearch_common::db::models::{FieldValues, Paper};
use biosearch_common::db::PaperStore;
use biosearch_common::embeddings::Embedder;
use biosearch_common::errors::AppError;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Separator between the parts of a composite text
const PART_SEPARATOR: &str = ". ";

/// Separator between list-valued categories
const CATEGORY_SEPARATOR: &str = "; ";

/// Build the text embedded for a paper: title, abstract, categories and article type,
/// skipping absent or empty parts. Returns `None` when nothing is left.
pub fn build_text(paper: &Paper) -> Option<String> {
    let categories = FieldValues::from_json(paper.categories.as_ref())
        .map(|c| c.joined(CATEGORY_SEPARATOR));

    let parts: Vec<&str> = [
        paper.title.as_deref(),
        paper.abstract_text.as_deref(),
        categories.as_deref(),
        paper.article_type.as_deref(),
    ]
    .into_iter()
    .flatten()
    .filter(|part| !part.is_empty())
    .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(PART_SEPARATOR))
    }
}

/// Counts reported at the end of a run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub scanned: usize,
    pub embedded: usize,
    pub skipped: usize,
    pub batches: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} papers embedded, {} skipped, {} batches",
            self.embedded, self.scanned, self.skipped, self.batches
        )
    }
}

/// Embedding worker processor
pub struct EmbeddingProcessor {
    store: Arc<dyn PaperStore>,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
}

impl EmbeddingProcessor {
    pub fn new(store: Arc<dyn PaperStore>, embedder: Arc<dyn Embedder>, batch_size: usize) -> Self {
        Self {
            store,
            embedder,
            batch_size: batch_size.max(1),
        }
    }

    /// Embed every paper with a non-empty composite text.
    ///
    /// Existing embeddings are always overwritten. The first failing batch aborts the run;
    /// batches written before it stay written.
    #[instrument(skip(self), fields(model = %self.embedder.model_name(), batch_size = self.batch_size))]
    pub async fn run(&self) -> Result<RunSummary, EmbeddingError> {
        let mut summary = RunSummary::default();
        let mut pending: Vec<(Uuid, String)> = Vec::with_capacity(self.batch_size);
        let mut cursor = None;

        loop {
            let page = self.store.papers_after(cursor, self.batch_size as u64).await?;

            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(last.id);

            for paper in &page {
                summary.scanned += 1;

                match build_text(paper) {
                    Some(text) => pending.push((paper.id, text)),
                    None => {
                        debug!(paper_id = %paper.id, "No embeddable text, skipping");
                        summary.skipped += 1;
                    }
                }

                if pending.len() >= self.batch_size {
                    self.flush(&mut pending, &mut summary).await?;
                }
            }
        }

        if !pending.is_empty() {
            self.flush(&mut pending, &mut summary).await?;
        }

        info!(
            scanned = summary.scanned,
            embedded = summary.embedded,
            skipped = summary.skipped,
            batches = summary.batches,
            "Embedding run completed"
        );

        Ok(summary)
    }

    async fn flush(
        &self,
        pending: &mut Vec<(Uuid, String)>,
        summary: &mut RunSummary,
    ) -> Result<(), EmbeddingError> {
        let (ids, texts): (Vec<Uuid>, Vec<String>) = pending.drain(..).unzip();
        let model = self.embedder.model_name();

        let vectors = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        if vectors.len() != ids.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: ids.len(),
                actual: vectors.len(),
            });
        }

        for (id, vector) in ids.iter().zip(&vectors) {
            self.store.set_embedding(*id, vector, model).await?;
        }

        summary.embedded += ids.len();
        summary.batches += 1;

        debug!(batch = summary.batches, size = ids.len(), total = summary.embedded, "Batch written");

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Embedder returned {actual} vectors for {expected} texts")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<AppError> for EmbeddingError {
    fn from(e: AppError) -> Self {
        EmbeddingError::DatabaseError(e.to_string())
    }
}
