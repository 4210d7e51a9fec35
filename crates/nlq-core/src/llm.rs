//! HTTP client for the external LLM endpoint (Ollama-shaped `/api/generate`
//! and `/api/embeddings`), plus the gibberish-rejection heuristics and
//! confidence-scoring formula applied to every candidate it returns.
//!
//! Translated from a Python sidecar's `HridaClient`: same stop sequences,
//! same gibberish patterns, same confidence arithmetic, so the numeric
//! thresholds downstream code depends on (e.g. "confidence >= 0.9 for a
//! simple single-table query") stay exactly where they were measured.

use lru::LruCache;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{PipelineError, Result};

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
    stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

pub struct LlmClient {
    http: reqwest::Client,
    config: LlmConfig,
    embed_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .expect("reqwest client configuration is valid");
        let cache_size = NonZeroUsize::new(config.embed_cache_size.max(1)).expect("cache size is non-zero");
        let embed_cache = Mutex::new(LruCache::new(cache_size));
        Self { http, config, embed_cache }
    }

    /// Generate SQL from `prompt` at temperature 0.0, returning the SQL
    /// string and its estimated confidence. `seed` lets multi-candidate
    /// generation request `base_seed+i` per candidate for reproducible
    /// diversity against an endpoint that is otherwise fully deterministic;
    /// single-candidate generation passes `None`. Rejects gibberish output
    /// and non-`SELECT` output before returning.
    pub async fn generate_sql(&self, prompt: &str, max_tokens: u32, seed: Option<i64>) -> Result<(String, f32)> {
        let url = format!("{}/api/generate", self.config.base_url.trim_end_matches('/'));
        let body = GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: 0.0,
                num_predict: max_tokens,
                stop: vec![";".to_string(), "\n\n".to_string()],
                num_ctx: (self.config.num_ctx > 0).then_some(self.config.num_ctx),
                seed,
            },
            system: (!self.config.system_prompt.is_empty()).then_some(&self.config.system_prompt),
        };

        let response = self.http.post(&url).json(&body).send().await.map_err(map_reqwest_err)?;
        let parsed: GenerateResponse = response.json().await.map_err(|e| PipelineError::InvalidOutput(e.to_string()))?;
        let mut sql = extract_sql(&parsed.response);

        if is_gibberish(&sql) {
            return Err(PipelineError::InvalidOutput("model generated invalid output (gibberish detected)".into()));
        }
        if !sql.to_uppercase().starts_with("SELECT") {
            return Err(PipelineError::InvalidOutput("model did not generate a SELECT statement".into()));
        }
        if !sql.ends_with(';') {
            sql.push(';');
        }

        let confidence = estimate_confidence(&sql);
        Ok((sql, confidence))
    }

    /// Embed `text`, keyed on the exact string in an in-memory LRU cache --
    /// the same question or unknown-column name recurs often within and
    /// across repair attempts, and embedding calls are the most expensive
    /// part of a retrieval round-trip.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.embed_cache.lock().expect("embed cache mutex is not poisoned").get(text) {
            return Ok(cached.clone());
        }

        let url = format!("{}/api/embeddings", self.config.base_url.trim_end_matches('/'));
        let body = EmbedRequest {
            model: &self.config.embed_model,
            prompt: text,
        };
        let response = self.http.post(&url).json(&body).send().await.map_err(map_reqwest_err)?;
        let parsed: EmbedResponse = response.json().await.map_err(|e| PipelineError::EmbeddingFailed(e.to_string()))?;
        if parsed.embedding.is_empty() {
            return Err(PipelineError::EmbeddingFailed("empty embedding returned".into()));
        }

        self.embed_cache
            .lock()
            .expect("embed cache mutex is not poisoned")
            .put(text.to_string(), parsed.embedding.clone());
        Ok(parsed.embedding)
    }

    pub async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url.trim_end_matches('/'));
        matches!(
            self.http
                .get(&url)
                .timeout(Duration::from_secs(5))
                .send()
                .await,
            Ok(resp) if resp.status().is_success()
        )
    }
}

/// Strip a ` ```sql ... ``` ` (or bare ` ``` ... ``` `) fence if present,
/// then, if the remaining text doesn't start with `SELECT`, extract from
/// the first `SELECT` onward -- the model frequently wraps its answer in
/// prose ("Here's the query: SELECT ...") or a fenced code block.
fn extract_sql(raw: &str) -> String {
    let trimmed = raw.trim();
    let unfenced = match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.trim_start_matches(|c: char| c.is_alphanumeric());
            let rest = rest.strip_prefix('\n').unwrap_or(rest);
            match rest.rfind("```") {
                Some(end) => rest[..end].trim(),
                None => rest.trim(),
            }
        }
        None => trimmed,
    };

    if unfenced.to_uppercase().starts_with("SELECT") {
        return unfenced.to_string();
    }
    match unfenced.to_uppercase().find("SELECT") {
        Some(idx) => unfenced[idx..].trim().to_string(),
        None => unfenced.to_string(),
    }
}

fn map_reqwest_err(err: reqwest::Error) -> PipelineError {
    if err.is_timeout() {
        PipelineError::GenerationTimeout(90)
    } else {
        PipelineError::Unreachable(err.to_string())
    }
}

static GIBBERISH_NUMERIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{2,4}er\d+").unwrap());
static GIBBERISH_QUOTED_LETTERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""[a-zA-Z]"\s+"[a-zA-Z]"\s+"[a-zA-Z]""#).unwrap());
static GIBBERISH_INSERT_TA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)INSERT\(ta\s*\(insert").unwrap());

/// The six gibberish-detection patterns: numeric-run noise, repeated
/// single-letter quoted tokens, a specific malformed-INSERT pattern,
/// excess parens/brackets, suspiciously short non-SELECT output, and the
/// `CANNOT_GENERATE` sentinel the prompt asks the model to emit on failure.
fn is_gibberish(text: &str) -> bool {
    if GIBBERISH_NUMERIC.is_match(text) {
        return true;
    }
    if GIBBERISH_QUOTED_LETTERS.is_match(text) {
        return true;
    }
    if GIBBERISH_INSERT_TA.is_match(text) {
        return true;
    }
    if text.matches('(').count() > 10 || text.matches('[').count() > 5 {
        return true;
    }
    if text.len() < 20 && !text.to_uppercase().starts_with("SELECT") {
        return true;
    }
    if text.to_uppercase().contains("CANNOT_GENERATE") {
        return true;
    }
    false
}

/// Starts at 1.0 and takes penalties for complexity signals that correlate
/// with generation error (many joins, HAVING, window functions, long
/// output, nested subqueries), with a small bonus for trivially simple
/// queries. Clamped to `[0.0, 1.0]`.
fn estimate_confidence(sql: &str) -> f32 {
    let upper = sql.to_uppercase();
    let mut confidence: f32 = 1.0;

    let join_count = upper.matches("JOIN").count();
    if join_count > 2 {
        confidence -= 0.2;
    }
    if upper.contains("HAVING") {
        confidence -= 0.1;
    }
    if upper.contains("WINDOW") || upper.contains("OVER") {
        confidence -= 0.1;
    }
    if sql.len() > 500 {
        confidence -= 0.2;
    }
    let subquery_count = sql.matches("(SELECT").count();
    if subquery_count > 1 {
        confidence -= 0.15;
    }
    if join_count == 0 && sql.len() < 100 {
        confidence += 0.1;
    }

    confidence.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_single_table_query_gets_high_confidence() {
        let sql = "SELECT COUNT(*) FROM companies;";
        assert!(estimate_confidence(sql) >= 0.9);
    }

    #[test]
    fn many_joins_lower_confidence() {
        let sql = "SELECT * FROM a JOIN b ON true JOIN c ON true JOIN d ON true;";
        assert!(estimate_confidence(sql) <= 0.8);
    }

    #[test]
    fn having_and_window_functions_each_cost_confidence() {
        let base = "SELECT a FROM t GROUP BY a HAVING COUNT(*) > 1;";
        assert!((estimate_confidence(base) - 0.9).abs() < 1e-6);
    }

    #[test]
    fn detects_numeric_noise_gibberish() {
        assert!(is_gibberish("00 (02.15er00000ment \"b's \"Gal\""));
    }

    #[test]
    fn detects_triple_quoted_letter_gibberish() {
        assert!(is_gibberish(r#"SELECT "a" "b" "c" FROM x"#));
    }

    #[test]
    fn detects_cannot_generate_sentinel() {
        assert!(is_gibberish("CANNOT_GENERATE"));
    }

    #[test]
    fn rejects_short_non_select_output() {
        assert!(is_gibberish("nope"));
    }

    #[test]
    fn accepts_well_formed_select() {
        assert!(!is_gibberish("SELECT * FROM companies WHERE state = 'CA';"));
    }

    #[test]
    fn extract_sql_strips_markdown_fence() {
        let raw = "```sql\nSELECT * FROM companies;\n```";
        assert_eq!(extract_sql(raw), "SELECT * FROM companies;");
    }

    #[test]
    fn extract_sql_strips_bare_fence() {
        let raw = "```\nSELECT * FROM companies;\n```";
        assert_eq!(extract_sql(raw), "SELECT * FROM companies;");
    }

    #[test]
    fn extract_sql_extracts_from_first_select_in_prose() {
        let raw = "Here's the query: SELECT * FROM companies;";
        assert_eq!(extract_sql(raw), "SELECT * FROM companies;");
    }

    #[test]
    fn extract_sql_passes_through_plain_select() {
        let raw = "SELECT * FROM companies;";
        assert_eq!(extract_sql(raw), "SELECT * FROM companies;");
    }
}
