//! The schema-context packet: an immutable, per-request snapshot of the
//! tables, FK edges, and join hints the retriever selected. Once built it
//! is never mutated — repair iterations build new delta blocks around it,
//! never edit it in place.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::catalog::FkEdge;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvenanceTag {
    Dense,
    Keyword,
    FkExpansion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableCandidate {
    pub table_name: String,
    pub m_schema: String,
    pub similarity: f32,
    pub provenance: ProvenanceTag,
    pub is_hub: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaContextPacket {
    pub query_id: Uuid,
    pub database_id: String,
    pub question: String,
    pub tables: Vec<TableCandidate>,
    pub fk_edges: Vec<FkEdge>,
    pub modules: Vec<String>,
    pub join_hints: Vec<String>,
    pub join_paths: Vec<Vec<String>>,
}

impl SchemaContextPacket {
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.table_name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_reflects_insertion_order() {
        let packet = SchemaContextPacket {
            query_id: Uuid::nil(),
            database_id: "mcptest".into(),
            question: "how many companies are in CA?".into(),
            tables: vec![
                TableCandidate {
                    table_name: "companies".into(),
                    m_schema: "companies(company_id integer [PK])".into(),
                    similarity: 0.9,
                    provenance: ProvenanceTag::Dense,
                    is_hub: true,
                },
            ],
            fk_edges: vec![],
            modules: vec!["core".into()],
            join_hints: vec![],
            join_paths: vec![],
        };
        assert_eq!(packet.table_names(), vec!["companies"]);
        assert!(!packet.is_empty());
    }
}
