//! Hybrid retriever: dense (embedding cosine similarity) + keyword
//! (tokenized gloss match) fusion over the schema catalog, followed by
//! one-hop FK expansion around high-similarity "hub" tables.

pub mod fusion;
pub mod keyword;

use uuid::Uuid;

use crate::embeddings::cosine_similarity;
use crate::error::{PipelineError, Result};
use crate::llm::LlmClient;
use crate::schema::catalog::{EmbeddingEntityType, SchemaCatalog};
use crate::schema::mschema::render_m_schema;
use crate::schema::packet::{ProvenanceTag, SchemaContextPacket, TableCandidate};

pub use fusion::{linear_combination, reciprocal_rank_fusion, RetrievalConfig};

/// Similarity added (clamped to 1.0) to a table's fused score when a
/// column-level embedding it owns scores above the similarity floor --
/// a column hit is weaker per-se evidence than a table-level hit, since a
/// question naming a column name often names it loosely.
const COLUMN_HIT_BOOST: f32 = 0.1;

/// Bound on join-path DFS depth: the prompt only ever needs short join
/// chains, and unbounded DFS over a densely connected FK graph blows up.
const MAX_JOIN_PATH_HOPS: usize = 3;

pub struct Retriever<'a> {
    catalog: &'a SchemaCatalog,
    llm: &'a LlmClient,
    config: RetrievalConfig,
}

impl<'a> Retriever<'a> {
    pub fn new(catalog: &'a SchemaCatalog, llm: &'a LlmClient) -> Self {
        Self {
            catalog,
            llm,
            config: RetrievalConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RetrievalConfig) -> Self {
        self.config = config;
        self
    }

    /// Retrieve, fuse, and FK-expand a schema-context packet for `question`.
    /// Returns `PipelineError::NoRelevantSchema` when fusion yields nothing
    /// above the similarity floor.
    pub async fn retrieve(&self, query_id: Uuid, database_id: &str, question: &str) -> Result<SchemaContextPacket> {
        let keyword_hits = keyword::score_tables(self.catalog, question);

        let dense_hits = if self.catalog.embeddings.is_empty() {
            Vec::new()
        } else {
            match self.llm.embed(question).await {
                Ok(query_vec) => self.dense_table_hits(&query_vec),
                Err(_) => Vec::new(),
            }
        };

        let fused = reciprocal_rank_fusion(&keyword_hits, &dense_hits, self.config.rrf_k);
        if fused.is_empty() {
            return Err(PipelineError::NoRelevantSchema);
        }

        let top_n: Vec<(String, f32)> = fused.into_iter().take(self.config.top_n).collect();

        let mut tables: Vec<TableCandidate> = Vec::new();
        for (table_name, score) in &top_n {
            if let Some(table) = self.catalog.table(table_name) {
                let provenance = if dense_hits.iter().any(|(n, _)| n == table_name) {
                    ProvenanceTag::Dense
                } else {
                    ProvenanceTag::Keyword
                };
                tables.push(TableCandidate {
                    table_name: table.table_name.clone(),
                    m_schema: render_m_schema(table),
                    similarity: *score,
                    provenance,
                    is_hub: table.is_hub,
                });
            }
        }

        self.expand_fk_neighbors(&mut tables);
        tables.truncate(self.config.max_tables);

        let fk_edges: Vec<_> = tables
            .iter()
            .flat_map(|t| self.catalog.neighbors_of(&t.table_name))
            .cloned()
            .collect();

        let modules: Vec<String> = tables
            .iter()
            .filter_map(|t| self.catalog.table(&t.table_name).and_then(|te| te.module.clone()))
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();

        let join_hints = fk_edges
            .iter()
            .map(|fk| format!("{}.{} -> {}.{}", fk.from_table, fk.from_column, fk.to_table, fk.to_column))
            .collect();

        let join_paths = self.enumerate_join_paths(&tables);

        Ok(SchemaContextPacket {
            query_id,
            database_id: database_id.to_string(),
            question: question.to_string(),
            tables,
            fk_edges,
            modules,
            join_hints,
            join_paths,
        })
    }

    /// Fuse table-level and column-level embedding hits into one ranked list
    /// of table scores: a table-level record contributes its own similarity;
    /// a column-level record contributes its owning table's score, boosted
    /// by [`COLUMN_HIT_BOOST`] and clamped to 1.0; module-level records are
    /// not part of per-query table retrieval.
    fn dense_table_hits(&self, query_vec: &[f32]) -> Vec<(String, f32)> {
        let mut scores: std::collections::HashMap<String, f32> = std::collections::HashMap::new();
        for record in &self.catalog.embeddings {
            let sim = cosine_similarity(query_vec, &record.embedding);
            match record.entity_type {
                EmbeddingEntityType::Table => {
                    if sim >= self.config.min_semantic_similarity {
                        let entry = scores.entry(record.table_name.clone()).or_insert(0.0);
                        *entry = entry.max(sim);
                    }
                }
                EmbeddingEntityType::Column => {
                    if sim >= self.config.min_semantic_similarity {
                        let boosted = (sim + COLUMN_HIT_BOOST).min(1.0);
                        let entry = scores.entry(record.table_name.clone()).or_insert(0.0);
                        *entry = entry.max(boosted);
                    }
                }
                EmbeddingEntityType::Module => {}
            }
        }
        let mut hits: Vec<(String, f32)> = scores.into_iter().collect();
        hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        hits
    }

    /// Bounded DFS over the FK-edge graph restricted to `tables`, returning
    /// every simple path of length 2 or 3 hops between two distinct selected
    /// tables. Paths are deduplicated by their reversed form (a->b->c is the
    /// same join as c->b->a).
    fn enumerate_join_paths(&self, tables: &[TableCandidate]) -> Vec<Vec<String>> {
        let selected: std::collections::HashSet<&str> = tables.iter().map(|t| t.table_name.as_str()).collect();
        let mut adjacency: std::collections::HashMap<&str, Vec<&str>> = std::collections::HashMap::new();
        for fk in &self.catalog.fk_edges {
            if selected.contains(fk.from_table.as_str()) && selected.contains(fk.to_table.as_str()) {
                adjacency.entry(fk.from_table.as_str()).or_default().push(fk.to_table.as_str());
                adjacency.entry(fk.to_table.as_str()).or_default().push(fk.from_table.as_str());
            }
        }

        let mut paths = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let table_names: Vec<&str> = tables.iter().map(|t| t.table_name.as_str()).collect();
        for start in &table_names {
            let mut visited = vec![*start];
            dfs_join_paths(*start, &adjacency, &mut visited, &mut paths, &mut seen);
        }
        paths
    }

    /// Pull in one-FK-hop neighbors of hub/high-similarity tables that fall
    /// within the near-miss band, breaking similarity ties in favor of
    /// same-module neighbors, then hubs, then lexical table name.
    fn expand_fk_neighbors(&self, tables: &mut Vec<TableCandidate>) {
        let selected: std::collections::HashSet<String> =
            tables.iter().map(|t| t.table_name.clone()).collect();

        let mut candidates: Vec<TableCandidate> = Vec::new();
        for anchor in tables.iter().filter(|t| t.is_hub || t.similarity >= 0.7) {
            for fk in self.catalog.neighbors_of(&anchor.table_name) {
                let neighbor_name = if fk.from_table == anchor.table_name {
                    &fk.to_table
                } else {
                    &fk.from_table
                };
                if selected.contains(neighbor_name) {
                    continue;
                }
                if let Some(neighbor) = self.catalog.table(neighbor_name) {
                    let floor = anchor.similarity - self.config.fk_expansion_delta;
                    candidates.push(TableCandidate {
                        table_name: neighbor.table_name.clone(),
                        m_schema: render_m_schema(neighbor),
                        similarity: floor.max(0.0),
                        provenance: ProvenanceTag::FkExpansion,
                        is_hub: neighbor.is_hub,
                    });
                }
            }
        }

        candidates.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| same_module_first(self, a, b))
                .then_with(|| b.is_hub.cmp(&a.is_hub))
                .then_with(|| a.table_name.cmp(&b.table_name))
        });

        let mut seen = selected;
        for candidate in candidates {
            if seen.insert(candidate.table_name.clone()) {
                tables.push(candidate);
            }
        }
    }
}

fn same_module_first(retriever: &Retriever, a: &TableCandidate, b: &TableCandidate) -> std::cmp::Ordering {
    let module_of = |name: &str| retriever.catalog.table(name).and_then(|t| t.module.clone());
    let a_has_module = module_of(&a.table_name).is_some();
    let b_has_module = module_of(&b.table_name).is_some();
    b_has_module.cmp(&a_has_module)
}

/// Depth-first walk that records every simple path of 2-3 hops, deduped by
/// a canonical (lexicographically smaller endpoint first) form so a path and
/// its reverse aren't both recorded.
fn dfs_join_paths<'a>(
    current: &'a str,
    adjacency: &std::collections::HashMap<&'a str, Vec<&'a str>>,
    visited: &mut Vec<&'a str>,
    paths: &mut Vec<Vec<String>>,
    seen: &mut std::collections::HashSet<String>,
) {
    if visited.len() - 1 >= MAX_JOIN_PATH_HOPS {
        return;
    }
    let Some(neighbors) = adjacency.get(current) else { return };
    for neighbor in neighbors {
        if visited.contains(neighbor) {
            continue;
        }
        visited.push(neighbor);
        if visited.len() >= 3 {
            let key = canonical_path_key(visited);
            if seen.insert(key) {
                paths.push(visited.iter().map(|s| s.to_string()).collect());
            }
        }
        dfs_join_paths(neighbor, adjacency, visited, paths, seen);
        visited.pop();
    }
}

fn canonical_path_key(path: &[&str]) -> String {
    let forward = path.join("->");
    let backward = path.iter().rev().copied().collect::<Vec<_>>().join("->");
    forward.min(backward)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::catalog::{ColumnEntry, FkEdge, TableEntry};

    fn test_catalog() -> SchemaCatalog {
        SchemaCatalog {
            database_id: "mcptest".into(),
            tables: vec![
                TableEntry {
                    table_name: "companies".into(),
                    table_schema: "public".into(),
                    module: Some("core".into()),
                    gloss: Some("companies founding year state".into()),
                    is_hub: true,
                    columns: vec![ColumnEntry {
                        name: "company_id".into(),
                        data_type: "integer".into(),
                        is_primary_key: true,
                        references: None,
                        gloss: None,
                    }],
                },
                TableEntry {
                    table_name: "company_revenue_annual".into(),
                    table_schema: "public".into(),
                    module: Some("core".into()),
                    gloss: Some("annual revenue".into()),
                    is_hub: false,
                    columns: vec![ColumnEntry {
                        name: "company_id".into(),
                        data_type: "integer".into(),
                        is_primary_key: true,
                        references: Some(FkEdge {
                            from_table: "company_revenue_annual".into(),
                            from_column: "company_id".into(),
                            to_table: "companies".into(),
                            to_column: "company_id".into(),
                        }),
                        gloss: None,
                    }],
                },
            ],
            fk_edges: vec![FkEdge {
                from_table: "company_revenue_annual".into(),
                from_column: "company_id".into(),
                to_table: "companies".into(),
                to_column: "company_id".into(),
            }],
            embeddings: Vec::new(),
        }
    }

    #[tokio::test]
    async fn retrieval_expands_fk_neighbor_of_a_hub_table() {
        let catalog = test_catalog();
        let llm = LlmClient::new(crate::config::LlmConfig::default());
        let retriever = Retriever::new(&catalog, &llm);
        let packet = retriever
            .retrieve(Uuid::nil(), "mcptest", "how many companies are there?")
            .await
            .unwrap();
        assert!(packet.table_names().contains(&"companies"));
    }

    fn three_table_chain_catalog() -> SchemaCatalog {
        SchemaCatalog {
            database_id: "mcptest".into(),
            tables: vec![
                TableEntry {
                    table_name: "companies".into(),
                    table_schema: "public".into(),
                    module: Some("core".into()),
                    gloss: Some("companies".into()),
                    is_hub: true,
                    columns: vec![],
                },
                TableEntry {
                    table_name: "company_revenue_annual".into(),
                    table_schema: "public".into(),
                    module: Some("core".into()),
                    gloss: Some("revenue".into()),
                    is_hub: false,
                    columns: vec![],
                },
                TableEntry {
                    table_name: "revenue_audits".into(),
                    table_schema: "public".into(),
                    module: Some("core".into()),
                    gloss: Some("audits".into()),
                    is_hub: false,
                    columns: vec![],
                },
            ],
            fk_edges: vec![
                FkEdge {
                    from_table: "company_revenue_annual".into(),
                    from_column: "company_id".into(),
                    to_table: "companies".into(),
                    to_column: "company_id".into(),
                },
                FkEdge {
                    from_table: "revenue_audits".into(),
                    from_column: "revenue_id".into(),
                    to_table: "company_revenue_annual".into(),
                    to_column: "revenue_id".into(),
                },
            ],
            embeddings: Vec::new(),
        }
    }

    #[test]
    fn enumerate_join_paths_finds_two_hop_chain() {
        let catalog = three_table_chain_catalog();
        let llm = LlmClient::new(crate::config::LlmConfig::default());
        let retriever = Retriever::new(&catalog, &llm);
        let tables: Vec<TableCandidate> = catalog
            .tables
            .iter()
            .map(|t| TableCandidate {
                table_name: t.table_name.clone(),
                m_schema: render_m_schema(t),
                similarity: 0.9,
                provenance: ProvenanceTag::Keyword,
                is_hub: t.is_hub,
            })
            .collect();

        let paths = retriever.enumerate_join_paths(&tables);

        assert!(paths.iter().any(|p| {
            p.len() == 3
                && p.contains(&"companies".to_string())
                && p.contains(&"company_revenue_annual".to_string())
                && p.contains(&"revenue_audits".to_string())
        }));
    }

    #[test]
    fn enumerate_join_paths_deduplicates_reversed_paths() {
        let catalog = three_table_chain_catalog();
        let llm = LlmClient::new(crate::config::LlmConfig::default());
        let retriever = Retriever::new(&catalog, &llm);
        let tables: Vec<TableCandidate> = catalog
            .tables
            .iter()
            .map(|t| TableCandidate {
                table_name: t.table_name.clone(),
                m_schema: render_m_schema(t),
                similarity: 0.9,
                provenance: ProvenanceTag::Keyword,
                is_hub: t.is_hub,
            })
            .collect();

        let paths = retriever.enumerate_join_paths(&tables);
        let three_hop_paths: Vec<_> = paths.iter().filter(|p| p.len() == 3).collect();
        assert_eq!(three_hop_paths.len(), 1);
    }

    #[tokio::test]
    async fn retrieval_fails_closed_when_nothing_matches() {
        let catalog = SchemaCatalog {
            database_id: "mcptest".into(),
            tables: vec![],
            fk_edges: vec![],
            embeddings: vec![],
        };
        let llm = LlmClient::new(crate::config::LlmConfig::default());
        let retriever = Retriever::new(&catalog, &llm);
        let err = retriever
            .retrieve(Uuid::nil(), "mcptest", "anything")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoRelevantSchema));
    }
}
