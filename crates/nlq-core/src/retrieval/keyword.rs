//! Keyword arm of hybrid retrieval: a stopword-aware token-overlap score
//! over each table's name + gloss + column glosses, used on its own when
//! the embedding endpoint is unavailable and fused with dense results
//! otherwise.

use std::collections::HashSet;

use crate::schema::catalog::SchemaCatalog;

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "in", "on", "of", "for", "to", "and", "or",
    "how", "many", "what", "which", "who", "show", "list", "get", "find", "all", "me",
];

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|tok| !tok.is_empty() && !STOPWORDS.contains(tok))
        .map(|tok| tok.to_string())
        .collect()
}

/// Token-overlap score for every table, highest first, zero-score tables
/// excluded.
pub fn score_tables(catalog: &SchemaCatalog, question: &str) -> Vec<(String, f32)> {
    let question_tokens = tokenize(question);
    if question_tokens.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(String, f32)> = catalog
        .tables
        .iter()
        .filter_map(|table| {
            let mut table_text = table.table_name.clone();
            if let Some(gloss) = &table.gloss {
                table_text.push(' ');
                table_text.push_str(gloss);
            }
            for column in &table.columns {
                table_text.push(' ');
                table_text.push_str(&column.name);
            }
            let table_tokens = tokenize(&table_text);
            let overlap = question_tokens.intersection(&table_tokens).count();
            if overlap == 0 {
                None
            } else {
                Some((table.table_name.clone(), overlap as f32 / question_tokens.len() as f32))
            }
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::catalog::{ColumnEntry, TableEntry};

    fn catalog() -> SchemaCatalog {
        SchemaCatalog {
            database_id: "mcptest".into(),
            tables: vec![TableEntry {
                table_name: "companies".into(),
                table_schema: "public".into(),
                module: None,
                gloss: Some("100 companies with founding year and state".into()),
                is_hub: true,
                columns: vec![ColumnEntry {
                    name: "state".into(),
                    data_type: "text".into(),
                    is_primary_key: false,
                    references: None,
                    gloss: None,
                }],
            }],
            fk_edges: vec![],
            embeddings: vec![],
        }
    }

    #[test]
    fn matches_table_mentioned_by_name() {
        let hits = score_tables(&catalog(), "how many companies are there?");
        assert_eq!(hits[0].0, "companies");
    }

    #[test]
    fn matches_via_column_name_even_without_table_mention() {
        let hits = score_tables(&catalog(), "which state is it in?");
        assert_eq!(hits[0].0, "companies");
    }

    #[test]
    fn no_matches_returns_empty() {
        let hits = score_tables(&catalog(), "purple elephants dancing");
        assert!(hits.is_empty());
    }
}
