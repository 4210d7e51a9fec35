//! Generator: turns a composed prompt into one or more SQL candidates via
//! [`crate::llm::LlmClient`], deduplicating near-identical candidates and
//! picking the highest-confidence survivor.

use futures::future::join_all;

use crate::error::Result;
use crate::llm::LlmClient;

#[derive(Debug, Clone)]
pub struct Candidate {
    pub sql: String,
    pub confidence: f32,
}

pub struct Generator<'a> {
    llm: &'a LlmClient,
}

impl<'a> Generator<'a> {
    pub fn new(llm: &'a LlmClient) -> Self {
        Self { llm }
    }

    pub async fn generate_one(&self, prompt: &str) -> Result<Candidate> {
        let (sql, confidence) = self.llm.generate_sql(prompt, 200, None).await?;
        Ok(Candidate { sql, confidence })
    }

    async fn generate_one_seeded(&self, prompt: &str, seed: i64) -> Result<Candidate> {
        let (sql, confidence) = self.llm.generate_sql(prompt, 200, Some(seed)).await?;
        Ok(Candidate { sql, confidence })
    }

    /// Fan out `n` concurrent generation calls against the same prompt, one
    /// per candidate with seed `base_seed+i` so a deterministic (T=0)
    /// endpoint still produces diverse candidates, settle all of them, and
    /// return the deduplicated survivors ranked by confidence. A settle-all
    /// join: one candidate's failure never cancels the others.
    pub async fn generate_candidates(&self, prompt: &str, n: usize, base_seed: i64) -> Vec<Candidate> {
        let n = n.max(1);
        let futures = (0..n).map(|i| self.generate_one_seeded(prompt, base_seed + i as i64));
        let results = join_all(futures).await;
        self.finish_candidates(results)
    }

    /// Same candidate set as [`Self::generate_candidates`] but issued one
    /// request at a time, for endpoints that cannot serve concurrent
    /// requests (e.g. a memory-constrained local Ollama instance).
    pub async fn generate_candidates_sequential(&self, prompt: &str, n: usize, base_seed: i64) -> Vec<Candidate> {
        let n = n.max(1);
        let mut results = Vec::with_capacity(n);
        for i in 0..n {
            results.push(self.generate_one_seeded(prompt, base_seed + i as i64).await);
        }
        self.finish_candidates(results)
    }

    fn finish_candidates(&self, results: Vec<Result<Candidate>>) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = results.into_iter().filter_map(|r| r.ok()).collect();
        dedup_candidates(&mut candidates);
        candidates.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
        candidates
    }

    pub fn best(&self, candidates: &[Candidate]) -> Option<Candidate> {
        candidates
            .iter()
            .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap_or(std::cmp::Ordering::Equal))
            .cloned()
    }
}

fn normalize(sql: &str) -> String {
    sql.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn dedup_candidates(candidates: &mut Vec<Candidate>) {
    let mut seen = std::collections::HashSet::new();
    candidates.retain(|c| seen.insert(normalize(&c.sql)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_collapses_whitespace_and_case_variants() {
        let mut candidates = vec![
            Candidate { sql: "SELECT * FROM companies;".into(), confidence: 0.9 },
            Candidate { sql: "select  *  from   companies;".into(), confidence: 0.8 },
            Candidate { sql: "SELECT state FROM companies;".into(), confidence: 0.7 },
        ];
        dedup_candidates(&mut candidates);
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn best_picks_highest_confidence() {
        let llm = LlmClient::new(crate::config::LlmConfig::default());
        let generator = Generator::new(&llm);
        let candidates = vec![
            Candidate { sql: "a".into(), confidence: 0.4 },
            Candidate { sql: "b".into(), confidence: 0.9 },
        ];
        assert_eq!(generator.best(&candidates).unwrap().sql, "b");
    }
}
