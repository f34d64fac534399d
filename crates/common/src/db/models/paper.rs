//! Paper entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A stored paper document.
///
/// Everything except the id is optional because papers arrive from an external ingestion
/// process with uneven metadata. The `embedding` vector column is written with raw SQL and
/// is deliberately not mapped here.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "papers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text", nullable)]
    pub title: Option<String>,

    #[sea_orm(column_name = "abstract", column_type = "Text", nullable)]
    pub abstract_text: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub url: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub doi: Option<String>,

    /// Timestamp string, `{"$date": ...}` object, or whatever the source provided
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub publication_date: Option<Json>,

    pub year: Option<i32>,

    /// A single string or a list of strings
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub authors: Option<Json>,

    /// A single string or a list of strings
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub categories: Option<Json>,

    #[sea_orm(column_type = "Text", nullable)]
    pub article_type: Option<String>,

    /// Name of the model that produced the stored embedding
    #[sea_orm(column_type = "Text", nullable)]
    pub embedding_model: Option<String>,

    /// Extensible metadata as JSONB
    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: Json,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// A metadata field stored either as one string or as a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValues {
    Single(String),
    List(Vec<String>),
}

impl FieldValues {
    /// Read a loosely-typed JSON column. Anything that is not a string or a list of
    /// strings is treated as absent.
    pub fn from_json(value: Option<&Json>) -> Option<Self> {
        value
            .filter(|v| !v.is_null())
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Join the values with `sep`; a single value is returned as-is.
    pub fn joined(&self, sep: &str) -> String {
        match self {
            FieldValues::Single(value) => value.clone(),
            FieldValues::List(values) => values.join(sep),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FieldValues::Single(value) => value.is_empty(),
            FieldValues::List(values) => values.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_values_accept_string_or_list() {
        let single = FieldValues::from_json(Some(&json!("Neelam, Srujana; Zhang, Ye")));
        assert_eq!(single, Some(FieldValues::Single("Neelam, Srujana; Zhang, Ye".into())));

        let list = FieldValues::from_json(Some(&json!(["Article", "Review"])));
        assert_eq!(list.as_ref().map(|v| v.joined("; ")), Some("Article; Review".into()));
    }

    #[test]
    fn test_field_values_ignore_malformed() {
        assert_eq!(FieldValues::from_json(Some(&json!(42))), None);
        assert_eq!(FieldValues::from_json(Some(&json!({"a": 1}))), None);
        assert_eq!(FieldValues::from_json(Some(&Json::Null)), None);
        assert_eq!(FieldValues::from_json(None), None);
    }
}
