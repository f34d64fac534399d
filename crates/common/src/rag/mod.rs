//! Retrieval-augmented answer pipeline
//!
//! A single query runs sequentially through:
//! - Query embedding
//! - Vector search with candidate oversampling
//! - Post-filtering on structured constraints
//! - Context window assembly
//! - Optional answer generation
//! - Response shaping

pub mod answer;
pub mod citation;
pub mod composer;
pub mod filter;
pub mod sanitize;

pub use answer::{create_generator, AnswerGenerator, ContextEcho, OpenAIGenerator};
pub use composer::compose_context;
pub use filter::{build_filter, Condition, FilterField, Predicate};

use crate::db::models::FieldValues;
use crate::db::{PaperResult, PaperStore, VectorQuery};
use crate::embeddings::Embedder;
use crate::errors::Result;
use crate::metrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};
use validator::Validate;

/// Abstract characters in each result snippet
pub const SNIPPET_CHARS: usize = 400;

/// Context characters echoed back in the response
pub const CONTEXT_PREVIEW_CHARS: usize = 1000;

/// Documents returned by the inspection dump
pub const SAMPLE_SIZE: u64 = 5;

/// Floor on the number of candidates examined by the vector index
pub const MIN_CANDIDATES: usize = 50;

/// Candidates examined per requested result
pub const CANDIDATES_PER_RESULT: usize = 8;

fn default_k() -> usize { 6 }
fn default_max_context_chars() -> usize { 3000 }

/// A search request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RagQuery {
    #[validate(length(min = 1, max = 2000))]
    pub query: String,

    /// Results ranked by the vector index
    #[serde(default = "default_k")]
    #[validate(range(min = 1, max = 100))]
    pub k: usize,

    pub year_from: Option<i32>,

    pub year_to: Option<i32>,

    #[serde(alias = "autores")]
    pub authors: Option<Vec<String>>,

    #[serde(alias = "categorias")]
    pub categories: Option<Vec<String>>,

    #[serde(alias = "tipo_articulo")]
    pub article_type: Option<String>,

    /// Produce an answer from the context
    #[serde(default)]
    pub generate: bool,

    /// Character budget for the context window
    #[serde(default = "default_max_context_chars")]
    #[validate(range(min = 1))]
    pub max_context_chars: usize,
}

impl RagQuery {
    /// A query with every option at its default
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            k: default_k(),
            year_from: None,
            year_to: None,
            authors: None,
            categories: None,
            article_type: None,
            generate: false,
            max_context_chars: default_max_context_chars(),
        }
    }
}

/// One result as returned to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapedResult {
    pub id: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub doi: Option<String>,
    pub year: Option<serde_json::Value>,
    #[serde(rename = "autores")]
    pub authors: Option<FieldValues>,
    #[serde(rename = "categorias")]
    pub categories: Option<FieldValues>,
    #[serde(rename = "tipo_articulo")]
    pub article_type: Option<String>,
    pub score: f64,
    pub snippet: String,
}

impl From<&PaperResult> for ShapedResult {
    fn from(record: &PaperResult) -> Self {
        Self {
            id: record.id.to_string(),
            title: record.title.clone(),
            url: record.url.clone(),
            doi: record.doi.clone(),
            year: record.publication_date.as_ref().map(citation::normalize_year),
            authors: record.authors.clone(),
            categories: record.categories.clone(),
            article_type: record.article_type.clone(),
            score: record.score,
            snippet: truncate_chars(record.abstract_text.as_deref().unwrap_or_default(), SNIPPET_CHARS)
                .to_string(),
        }
    }
}

/// Response to a search request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagResponse {
    pub query: String,
    pub count: usize,
    pub results: Vec<ShapedResult>,
    pub context_preview: String,
    pub answer: Option<String>,
}

/// Candidates the index should examine to return `k` results
pub fn candidate_count(k: usize) -> usize {
    k.saturating_mul(CANDIDATES_PER_RESULT).max(MIN_CANDIDATES)
}

/// Longest prefix of `s` with at most `max` characters
pub(crate) fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Runs the query pipeline against injected collaborators.
///
/// Built once at startup and shared by every request.
pub struct RagEngine {
    store: Arc<dyn PaperStore>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn AnswerGenerator>,
    vector_index: String,
}

impl RagEngine {
    pub fn new(
        store: Arc<dyn PaperStore>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn AnswerGenerator>,
        vector_index: impl Into<String>,
    ) -> Self {
        Self {
            store,
            embedder,
            generator,
            vector_index: vector_index.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn PaperStore> {
        &self.store
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    /// Answer a query. Any collaborator failure aborts the request.
    #[instrument(skip(self, query), fields(k = query.k, generate = query.generate))]
    pub async fn answer(&self, query: &RagQuery) -> Result<RagResponse> {
        let start = Instant::now();

        let embedding = self.embed_query(&query.query).await?;

        let vector_query = VectorQuery {
            index: self.vector_index.clone(),
            embedding,
            num_candidates: candidate_count(query.k),
            limit: query.k,
        };
        let filter = build_filter(query);

        let results = self.store.vector_search(&vector_query, &filter).await?;

        let context = compose_context(&results, query.max_context_chars);

        let answer = answer::generate_answer(
            self.generator.as_ref(),
            &query.query,
            &context,
            query.generate,
        )
        .await?;

        let elapsed = start.elapsed();
        metrics::record_rag(elapsed.as_secs_f64(), results.len(), query.generate);

        info!(
            query = %query.query,
            results = results.len(),
            filters = filter.len(),
            context_chars = context.chars().count(),
            answered = answer.is_some(),
            latency_ms = elapsed.as_millis() as u64,
            "RAG query completed"
        );

        Ok(RagResponse {
            query: query.query.clone(),
            count: results.len(),
            results: results.iter().map(ShapedResult::from).collect(),
            context_preview: truncate_chars(&context, CONTEXT_PREVIEW_CHARS).to_string(),
            answer,
        })
    }

    /// A few raw stored documents with identifiers stringified
    pub async fn sample_documents(&self) -> Result<Vec<serde_json::Value>> {
        let docs = self.store.sample_documents(SAMPLE_SIZE).await?;
        Ok(docs.into_iter().map(sanitize::stringify_identifiers).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let start = Instant::now();
        let result = self.embedder.embed(text).await;

        metrics::record_embedding(
            start.elapsed().as_secs_f64(),
            self.embedder.model_name(),
            1,
            result.is_ok(),
        );

        result
    }
}
