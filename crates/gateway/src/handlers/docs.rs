//! Raw document inspection

use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::Value;

use crate::AppState;
use biosearch_common::errors::Result;

#[derive(Serialize)]
pub struct DocsResponse {
    pub docs: Vec<Value>,
}

/// Return a handful of stored documents as-is, identifiers stringified
pub async fn sample_documents(State(state): State<AppState>) -> Result<Json<DocsResponse>> {
    let docs = state.engine.sample_documents().await?;

    tracing::debug!(count = docs.len(), "Sample documents served");

    Ok(Json(DocsResponse { docs }))
}
