//! Planner check: runs `EXPLAIN (FORMAT JSON)` in a read-only session with
//! a short statement timeout, captures the SQLSTATE on failure, and for
//! "column does not exist" (`42703`) enriches the error with ranked column
//! candidates drawn only from the packet's tables.
//!
//! SQLSTATE extraction follows `sqlx`'s Postgres error type; candidate
//! ranking follows a hand-written Levenshtein distance rather than pulling
//! in a string-distance crate the rest of the stack doesn't otherwise need.

use sqlx::PgPool;

use crate::embeddings::cosine_similarity;
use crate::error::{PipelineError, Result};
use crate::llm::LlmClient;
use crate::schema::catalog::{EmbeddingEntityType, SchemaCatalog};
use crate::schema::packet::SchemaContextPacket;

const PLANNER_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Clone, PartialEq)]
pub enum MatchType {
    Exact,
    CaseInsensitive,
    PrefixSuffix,
    Fuzzy,
    Embedding,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnCandidate {
    pub table: String,
    pub column: String,
    pub data_type: String,
    pub gloss: Option<String>,
    pub match_type: MatchType,
    pub match_score: f32,
}

pub struct Planner<'a> {
    pool: &'a PgPool,
    llm: &'a LlmClient,
}

impl<'a> Planner<'a> {
    pub fn new(pool: &'a PgPool, llm: &'a LlmClient) -> Self {
        Self { pool, llm }
    }

    /// Run `EXPLAIN (FORMAT JSON) <sql>` in a read-only transaction with a
    /// short statement timeout. On success returns `Ok(())`; on failure
    /// maps the error to `PipelineError::Planner` carrying the SQLSTATE.
    pub async fn check(&self, sql: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        sqlx::query("SET LOCAL transaction_read_only = on")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        sqlx::query(&format!("SET LOCAL statement_timeout = {}", PLANNER_TIMEOUT_MS))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        let explain = format!("EXPLAIN (FORMAT JSON) {}", sql.trim_end_matches(';'));
        let result = sqlx::query(&explain).fetch_all(&mut *tx).await;
        let _ = tx.rollback().await;

        result.map(|_| ()).map_err(map_sqlx_err)
    }

    /// For a `42703` failure, rank plausible column replacements drawn only
    /// from `packet`'s tables: exact match, case-insensitive match,
    /// prefix/suffix match, then fuzzy (edit distance <= 2). When none of
    /// those string-based passes find anything, falls back to embedding
    /// cosine similarity against the packet's column-level embeddings.
    pub async fn suggest_columns(
        &self,
        catalog: &SchemaCatalog,
        packet: &SchemaContextPacket,
        unknown_column: &str,
    ) -> Vec<ColumnCandidate> {
        let mut candidates = Vec::new();
        let table_names = packet.table_names();

        for table_name in &table_names {
            let Some(table) = catalog.table(table_name) else { continue };
            for column in &table.columns {
                let (match_type, score) = score_column_match(unknown_column, &column.name);
                if let Some(match_type) = match_type {
                    candidates.push(ColumnCandidate {
                        table: table.table_name.clone(),
                        column: column.name.clone(),
                        data_type: column.data_type.clone(),
                        gloss: column.gloss.clone(),
                        match_type,
                        match_score: score,
                    });
                }
            }
        }

        if candidates.is_empty() {
            candidates = self.suggest_columns_by_embedding(catalog, &table_names, unknown_column).await;
        }

        candidates.sort_by(|a, b| b.match_score.partial_cmp(&a.match_score).unwrap_or(std::cmp::Ordering::Equal));
        candidates
    }

    async fn suggest_columns_by_embedding(
        &self,
        catalog: &SchemaCatalog,
        table_names: &[&str],
        unknown_column: &str,
    ) -> Vec<ColumnCandidate> {
        let query_vec = match self.llm.embed(unknown_column).await {
            Ok(v) => v,
            Err(_) => return Vec::new(),
        };

        let mut candidates = Vec::new();
        for record in &catalog.embeddings {
            if record.entity_type != EmbeddingEntityType::Column {
                continue;
            }
            if !table_names.contains(&record.table_name.as_str()) {
                continue;
            }
            let Some(column_name) = &record.column_name else { continue };
            let Some(table) = catalog.table(&record.table_name) else { continue };
            let Some(column) = table.columns.iter().find(|c| &c.name == column_name) else { continue };
            let score = cosine_similarity(&query_vec, &record.embedding);
            candidates.push(ColumnCandidate {
                table: table.table_name.clone(),
                column: column.name.clone(),
                data_type: column.data_type.clone(),
                gloss: column.gloss.clone(),
                match_type: MatchType::Embedding,
                match_score: score,
            });
        }
        candidates
    }
}

fn score_column_match(unknown: &str, candidate: &str) -> (Option<MatchType>, f32) {
    if unknown == candidate {
        return (Some(MatchType::Exact), 1.0);
    }
    if unknown.eq_ignore_ascii_case(candidate) {
        return (Some(MatchType::CaseInsensitive), 0.9);
    }
    let unknown_lower = unknown.to_lowercase();
    let candidate_lower = candidate.to_lowercase();
    if candidate_lower.starts_with(&unknown_lower) || candidate_lower.ends_with(&unknown_lower)
        || unknown_lower.starts_with(&candidate_lower) || unknown_lower.ends_with(&candidate_lower)
    {
        return (Some(MatchType::PrefixSuffix), 0.75);
    }
    let distance = levenshtein(&unknown_lower, &candidate_lower);
    if distance <= 2 {
        let score = 0.6 - (distance as f32 * 0.1);
        return (Some(MatchType::Fuzzy), score.max(0.3));
    }
    (None, 0.0)
}

/// Classic dynamic-programming edit distance, O(len_a * len_b).
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();

    for i in 1..=a.len() {
        let mut prev_diag = row[0];
        row[0] = i;
        for j in 1..=b.len() {
            let temp = row[j];
            row[j] = if a[i - 1] == b[j - 1] {
                prev_diag
            } else {
                1 + prev_diag.min(row[j]).min(row[j - 1])
            };
            prev_diag = temp;
        }
    }
    row[b.len()]
}

fn map_sqlx_err(err: sqlx::Error) -> PipelineError {
    if let sqlx::Error::Database(db_err) = &err {
        let sqlstate = db_err.code().map(|c| c.to_string()).unwrap_or_else(|| "00000".to_string());
        if sqlstate == "42501" {
            return PipelineError::PermissionDenied(db_err.message().to_string());
        }
        return PipelineError::Planner { sqlstate, message: db_err.message().to_string() };
    }
    PipelineError::Connection(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levenshtein_matches_known_distances() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("revenue", "revenue_millions"), 9);
        assert_eq!(levenshtein("year", "years"), 1);
    }

    #[test]
    fn exact_match_scores_highest() {
        let (match_type, score) = score_column_match("name", "name");
        assert_eq!(match_type, Some(MatchType::Exact));
        assert_eq!(score, 1.0);
    }

    #[test]
    fn wrong_table_column_is_fuzzy_matched_against_correct_column() {
        let (match_type, _) = score_column_match("revenue", "revenue_millions");
        assert_eq!(match_type, Some(MatchType::PrefixSuffix));
    }

    #[test]
    fn year_typo_is_fuzzy_matched() {
        let (match_type, _) = score_column_match("yeer", "year");
        assert_eq!(match_type, Some(MatchType::Fuzzy));
    }

    #[test]
    fn unrelated_names_do_not_match() {
        let (match_type, _) = score_column_match("company_id", "revenue_millions");
        assert_eq!(match_type, None);
    }
}
