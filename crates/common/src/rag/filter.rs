//! Post-filter predicate construction
//!
//! Translates the optional constraints of a query into a sparse predicate over paper
//! fields. The predicate is applied after vector ranking.

use super::RagQuery;
use serde::Serialize;
use std::collections::BTreeMap;

/// Paper fields a query can constrain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterField {
    Year,
    ArticleType,
    Authors,
    Categories,
}

impl FilterField {
    /// Column holding this field in the `papers` table
    pub fn column(&self) -> &'static str {
        match self {
            FilterField::Year => "year",
            FilterField::ArticleType => "article_type",
            FilterField::Authors => "authors",
            FilterField::Categories => "categories",
        }
    }
}

/// Condition on a single field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Condition {
    /// Inclusive range; a missing bound is open
    Range {
        #[serde(skip_serializing_if = "Option::is_none")]
        gte: Option<i32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        lte: Option<i32>,
    },
    /// Exact match
    Equals(String),
    /// Field value (or any element of a list value) is one of `values`
    OneOf {
        #[serde(rename = "in")]
        values: Vec<String>,
    },
}

/// Sparse mapping from field to condition. Empty means "no filtering".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Predicate(BTreeMap<FilterField, Condition>);

impl Predicate {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: FilterField) -> Option<&Condition> {
        self.0.get(&field)
    }

    pub fn insert(&mut self, field: FilterField, condition: Condition) {
        self.0.insert(field, condition);
    }

    /// Conditions in field order
    pub fn iter(&self) -> impl Iterator<Item = (&FilterField, &Condition)> {
        self.0.iter()
    }
}

/// Build the post-filter predicate for a query.
///
/// Empty strings and empty lists count as "not supplied".
pub fn build_filter(query: &RagQuery) -> Predicate {
    let mut predicate = Predicate::default();

    if query.year_from.is_some() || query.year_to.is_some() {
        predicate.insert(
            FilterField::Year,
            Condition::Range {
                gte: query.year_from,
                lte: query.year_to,
            },
        );
    }

    if let Some(article_type) = query.article_type.as_ref().filter(|t| !t.is_empty()) {
        predicate.insert(FilterField::ArticleType, Condition::Equals(article_type.clone()));
    }

    if let Some(authors) = query.authors.as_ref().filter(|a| !a.is_empty()) {
        predicate.insert(FilterField::Authors, Condition::OneOf { values: authors.clone() });
    }

    if let Some(categories) = query.categories.as_ref().filter(|c| !c.is_empty()) {
        predicate.insert(FilterField::Categories, Condition::OneOf { values: categories.clone() });
    }

    predicate
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_no_constraints_yields_empty_predicate() {
        let predicate = build_filter(&RagQuery::new("microgravity bone density"));
        assert!(predicate.is_empty());
        assert_eq!(serde_json::to_value(&predicate).unwrap(), json!({}));
    }

    #[test]
    fn test_year_range_both_bounds() {
        let query = RagQuery {
            year_from: Some(2020),
            year_to: Some(2022),
            ..RagQuery::new("q")
        };
        let predicate = build_filter(&query);

        assert_eq!(predicate.len(), 1);
        assert_eq!(
            predicate.get(FilterField::Year),
            Some(&Condition::Range { gte: Some(2020), lte: Some(2022) })
        );
        assert_eq!(
            serde_json::to_value(&predicate).unwrap(),
            json!({"year": {"gte": 2020, "lte": 2022}})
        );
    }

    #[test]
    fn test_single_year_bound_omits_other() {
        let query = RagQuery {
            year_to: Some(2015),
            ..RagQuery::new("q")
        };
        let predicate = build_filter(&query);
        assert_eq!(
            serde_json::to_value(&predicate).unwrap(),
            json!({"year": {"lte": 2015}})
        );
    }

    #[test]
    fn test_all_constraints() {
        let query = RagQuery {
            year_from: Some(2018),
            article_type: Some("research-article".into()),
            authors: Some(vec!["Zhang, Ye".into()]),
            categories: Some(vec!["Article".into(), "Review".into()]),
            ..RagQuery::new("q")
        };
        let predicate = build_filter(&query);

        assert_eq!(
            serde_json::to_value(&predicate).unwrap(),
            json!({
                "year": {"gte": 2018},
                "article_type": "research-article",
                "authors": {"in": ["Zhang, Ye"]},
                "categories": {"in": ["Article", "Review"]},
            })
        );
    }

    #[test]
    fn test_empty_values_are_not_constraints() {
        let query = RagQuery {
            article_type: Some(String::new()),
            authors: Some(vec![]),
            categories: Some(vec![]),
            ..RagQuery::new("q")
        };
        assert!(build_filter(&query).is_empty());
    }
}
