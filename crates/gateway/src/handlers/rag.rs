//! RAG query handler

use axum::{extract::State, Json};
use validator::Validate;

use crate::AppState;
use biosearch_common::{
    errors::Result,
    rag::{RagQuery, RagResponse},
};

/// Answer a question from the paper corpus
pub async fn rag(
    State(state): State<AppState>,
    Json(request): Json<RagQuery>,
) -> Result<Json<RagResponse>> {
    request.validate()?;

    let response = state.engine.answer(&request).await?;

    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_validation_bounds() {
        let valid: RagQuery = serde_json::from_value(json!({"query": "bone", "k": 100})).unwrap();
        tokio_test::assert_ok!(valid.validate());

        let too_many: RagQuery = serde_json::from_value(json!({"query": "bone", "k": 101})).unwrap();
        tokio_test::assert_err!(too_many.validate());

        let no_budget: RagQuery =
            serde_json::from_value(json!({"query": "bone", "max_context_chars": 0})).unwrap();
        tokio_test::assert_err!(no_budget.validate());
    }
}
