//! Repository pattern for database operations
//!
//! Provides a clean interface for all data access operations
//! with proper error handling and transaction support.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::Result;
use crate::rag::filter::{Condition, Predicate};
use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait, FromQueryResult,
    QueryFilter, QueryOrder, QuerySelect, Statement, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// pgvector caps `hnsw.ef_search` at this value
const MAX_EF_SEARCH: usize = 1000;

/// A paper returned by vector search, annotated with its relevance score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperResult {
    pub id: Uuid,
    pub title: Option<String>,
    pub abstract_text: Option<String>,
    pub url: Option<String>,
    pub doi: Option<String>,
    pub publication_date: Option<serde_json::Value>,
    pub authors: Option<FieldValues>,
    pub categories: Option<FieldValues>,
    pub article_type: Option<String>,
    pub score: f64,
}

impl PaperResult {
    /// A result carrying only an id and a score
    pub fn bare(id: Uuid, score: f64) -> Self {
        Self {
            id,
            title: None,
            abstract_text: None,
            url: None,
            doi: None,
            publication_date: None,
            authors: None,
            categories: None,
            article_type: None,
            score,
        }
    }
}

/// Nearest-neighbor request against the paper embedding index
#[derive(Debug, Clone)]
pub struct VectorQuery {
    /// Name of the vector index expected to serve the search. pgvector picks the index
    /// itself from the `ORDER BY`, so this is only logged; the gateway checks at startup
    /// that an index with this name exists.
    pub index: String,
    /// Query embedding
    pub embedding: Vec<f32>,
    /// Candidates examined before the top `limit` are chosen
    pub num_candidates: usize,
    /// Results ranked by similarity before post-filtering
    pub limit: usize,
}

/// Storage operations used by the query pipeline and the batch embedding job
#[async_trait]
pub trait PaperStore: Send + Sync {
    /// Rank papers by similarity, then keep those matching `filter`
    async fn vector_search(&self, query: &VectorQuery, filter: &Predicate) -> Result<Vec<PaperResult>>;

    /// Raw stored documents, unfiltered
    async fn sample_documents(&self, limit: u64) -> Result<Vec<serde_json::Value>>;

    /// Papers ordered by id, starting after `after`
    async fn papers_after(&self, after: Option<Uuid>, limit: u64) -> Result<Vec<Paper>>;

    /// Overwrite a paper's embedding and the name of the model that produced it
    async fn set_embedding(&self, id: Uuid, embedding: &[f32], model: &str) -> Result<()>;

    /// Check connectivity
    async fn ping(&self) -> Result<()>;
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

/// Row shape of the vector search query
#[derive(Debug, FromQueryResult)]
struct PaperRow {
    id: Uuid,
    title: Option<String>,
    abstract_text: Option<String>,
    url: Option<String>,
    doi: Option<String>,
    publication_date: Option<serde_json::Value>,
    authors: Option<serde_json::Value>,
    categories: Option<serde_json::Value>,
    article_type: Option<String>,
    score: f64,
}

impl From<PaperRow> for PaperResult {
    fn from(row: PaperRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            abstract_text: row.abstract_text,
            url: row.url,
            doi: row.doi,
            publication_date: row.publication_date.filter(|v| !v.is_null()),
            authors: FieldValues::from_json(row.authors.as_ref()),
            categories: FieldValues::from_json(row.categories.as_ref()),
            article_type: row.article_type,
            score: row.score,
        }
    }
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> &DatabaseConnection {
        self.pool.conn()
    }

    /// Whether an index with the given name exists
    pub async fn vector_index_exists(&self, name: &str) -> Result<bool> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT 1 FROM pg_indexes WHERE indexname = $1",
            vec![name.into()],
        );

        Ok(self.conn().query_one(stmt).await?.is_some())
    }
}

#[async_trait]
impl PaperStore for Repository {
    async fn vector_search(&self, query: &VectorQuery, filter: &Predicate) -> Result<Vec<PaperResult>> {
        // $1 = embedding, $2 = limit, filter parameters follow
        let (filter_sql, filter_values) = predicate_sql(filter, 3);

        let sql = format!(
            r#"
            WITH ranked AS (
                SELECT
                    id, title, abstract AS abstract_text, url, doi, publication_date,
                    year, authors, categories, article_type,
                    1 - (embedding <=> $1::vector) AS score
                FROM papers
                WHERE embedding IS NOT NULL
                ORDER BY embedding <=> $1::vector
                LIMIT $2
            )
            SELECT id, title, abstract_text, url, doi, publication_date,
                   authors, categories, article_type, score
            FROM ranked
            {}
            ORDER BY score DESC
            "#,
            filter_sql
        );

        let mut values: Vec<sea_orm::Value> = vec![
            embedding_literal(&query.embedding).into(),
            (query.limit as i64).into(),
        ];
        values.extend(filter_values);

        let ef_search = query.num_candidates.clamp(1, MAX_EF_SEARCH);

        tracing::debug!(
            index = %query.index,
            ef_search,
            limit = query.limit,
            filtered = !filter.is_empty(),
            "Running vector search"
        );

        // SET LOCAL only lives for the transaction
        let txn = self.conn().begin().await?;
        txn.execute_unprepared(&format!("SET LOCAL hnsw.ef_search = {}", ef_search))
            .await?;

        let rows = PaperRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            &sql,
            values,
        ))
        .all(&txn)
        .await?;

        txn.commit().await?;

        Ok(rows.into_iter().map(PaperResult::from).collect())
    }

    async fn sample_documents(&self, limit: u64) -> Result<Vec<serde_json::Value>> {
        let docs = PaperEntity::find()
            .column_as(Expr::cust("embedding::text"), "embedding")
            .limit(limit)
            .into_json()
            .all(self.conn())
            .await?;

        Ok(docs.into_iter().map(decode_embedding).collect())
    }

    async fn papers_after(&self, after: Option<Uuid>, limit: u64) -> Result<Vec<Paper>> {
        let mut select = PaperEntity::find();

        if let Some(after) = after {
            select = select.filter(PaperColumn::Id.gt(after));
        }

        select
            .order_by_asc(PaperColumn::Id)
            .limit(limit)
            .all(self.conn())
            .await
            .map_err(Into::into)
    }

    async fn set_embedding(&self, id: Uuid, embedding: &[f32], model: &str) -> Result<()> {
        // Use raw SQL for pgvector type
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE papers SET embedding = $1::vector, embedding_model = $2 WHERE id = $3",
            vec![
                embedding_literal(embedding).into(),
                model.into(),
                id.into(),
            ],
        );

        self.conn().execute(stmt).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}

/// Convert a vector to pgvector text format "[1.0,2.0,...]"
fn embedding_literal(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding.iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

/// Render a post-filter predicate as a WHERE clause over the ranked rows.
///
/// Placeholders are numbered from `first_param`. An empty predicate renders as an empty
/// string so the ranked rows pass through untouched.
fn predicate_sql(predicate: &Predicate, first_param: usize) -> (String, Vec<sea_orm::Value>) {
    let mut clauses = Vec::new();
    let mut values: Vec<sea_orm::Value> = Vec::new();
    let mut next = first_param;

    for (field, condition) in predicate.iter() {
        let column = field.column();

        match condition {
            Condition::Range { gte, lte } => {
                if let Some(gte) = gte {
                    clauses.push(format!("{} >= ${}", column, next));
                    values.push((*gte).into());
                    next += 1;
                }
                if let Some(lte) = lte {
                    clauses.push(format!("{} <= ${}", column, next));
                    values.push((*lte).into());
                    next += 1;
                }
            }
            Condition::Equals(value) => {
                clauses.push(format!("{} = ${}", column, next));
                values.push(value.clone().into());
                next += 1;
            }
            Condition::OneOf { values: options } => {
                // Matches a string scalar equal to an option, or a list containing one
                let placeholders = options
                    .iter()
                    .map(|option| {
                        values.push(option.clone().into());
                        let placeholder = format!("${}", next);
                        next += 1;
                        placeholder
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                clauses.push(format!(
                    "jsonb_exists_any({}, ARRAY[{}]::text[])",
                    column, placeholders
                ));
            }
        }
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!("WHERE {}", clauses.join(" AND ")), values)
    }
}

/// Replace the text form of a pgvector column with a JSON array
fn decode_embedding(mut doc: serde_json::Value) -> serde_json::Value {
    let vector = match doc.get("embedding") {
        Some(serde_json::Value::String(text)) => serde_json::from_str::<serde_json::Value>(text)
            .ok()
            .filter(serde_json::Value::is_array),
        _ => None,
    };

    if let Some(vector) = vector {
        doc["embedding"] = vector;
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::filter::{build_filter, FilterField};
    use crate::rag::RagQuery;
    use serde_json::json;

    #[test]
    fn test_embedding_format() {
        assert_eq!(embedding_literal(&[0.1, 0.2, 0.3]), "[0.1,0.2,0.3]");
        assert_eq!(embedding_literal(&[]), "[]");
    }

    #[test]
    fn test_sample_embedding_decoded() {
        let doc = decode_embedding(json!({"title": "T", "embedding": "[0.5,-0.25,0.125]"}));
        assert_eq!(doc["embedding"], json!([0.5, -0.25, 0.125]));
        assert_eq!(doc["title"], "T");

        // Unembedded papers keep a null vector
        let doc = decode_embedding(json!({"embedding": null}));
        assert_eq!(doc["embedding"], serde_json::Value::Null);

        let doc = decode_embedding(json!({"embedding": "not a vector"}));
        assert_eq!(doc["embedding"], "not a vector");
    }

    #[test]
    fn test_empty_predicate_renders_nothing() {
        let (sql, values) = predicate_sql(&Predicate::default(), 3);
        assert!(sql.is_empty());
        assert!(values.is_empty());
    }

    #[test]
    fn test_predicate_placeholders_are_sequential() {
        let query = RagQuery {
            year_from: Some(2020),
            year_to: Some(2022),
            article_type: Some("research-article".into()),
            authors: Some(vec!["Zhang, Ye".into(), "Luna, Carlos".into()]),
            ..RagQuery::new("microgravity")
        };
        let predicate = build_filter(&query);

        let (sql, values) = predicate_sql(&predicate, 3);

        assert_eq!(
            sql,
            "WHERE year >= $3 AND year <= $4 AND article_type = $5 \
             AND jsonb_exists_any(authors, ARRAY[$6, $7]::text[])"
        );
        assert_eq!(values.len(), 5);
    }

    #[test]
    fn test_open_ended_year_range() {
        let mut predicate = Predicate::default();
        predicate.insert(FilterField::Year, Condition::Range { gte: None, lte: Some(2019) });

        let (sql, values) = predicate_sql(&predicate, 1);
        assert_eq!(sql, "WHERE year <= $1");
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_row_conversion_tolerates_malformed_metadata() {
        let row = PaperRow {
            id: Uuid::nil(),
            title: None,
            abstract_text: None,
            url: None,
            doi: None,
            publication_date: Some(serde_json::Value::Null),
            authors: Some(serde_json::json!(7)),
            categories: Some(serde_json::json!(["Article"])),
            article_type: None,
            score: 0.5,
        };

        let result = PaperResult::from(row);
        assert!(result.publication_date.is_none());
        assert!(result.authors.is_none());
        assert_eq!(result.categories, Some(FieldValues::List(vec!["Article".into()])));
    }
}
