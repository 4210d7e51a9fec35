//! End-to-end scenarios over the `companies` / `company_revenue_annual`
//! fixture, exercised at the level of the pure pipeline stages (retrieval
//! fusion, prompt composition, structural/semantic validation, planner
//! fuzzy matching) so they run without a live Postgres instance or LLM
//! endpoint.

use nlq_core::config::{LlmConfig, StructuralConfig};
use nlq_core::llm::LlmClient;
use nlq_core::planner::levenshtein;
use nlq_core::prompt::PromptComposer;
use nlq_core::retrieval::Retriever;
use nlq_core::schema::catalog::{ColumnEntry, FkEdge, SchemaCatalog, TableEntry};
use nlq_core::schema::packet::{ProvenanceTag, SchemaContextPacket, TableCandidate};
use nlq_core::validate::semantic::{self, Severity};
use nlq_core::validate::structural;
use nlq_core::PipelineError;
use uuid::Uuid;

fn fixture_catalog() -> SchemaCatalog {
    SchemaCatalog {
        database_id: "mcptest".into(),
        tables: vec![
            TableEntry {
                table_name: "companies".into(),
                table_schema: "public".into(),
                module: Some("core".into()),
                gloss: Some("100 companies with founding year and US state".into()),
                is_hub: true,
                columns: vec![
                    ColumnEntry { name: "company_id".into(), data_type: "integer".into(), is_primary_key: true, references: None, gloss: None },
                    ColumnEntry { name: "name".into(), data_type: "text".into(), is_primary_key: false, references: None, gloss: None },
                    ColumnEntry { name: "founding_year".into(), data_type: "integer".into(), is_primary_key: false, references: None, gloss: None },
                    ColumnEntry { name: "state".into(), data_type: "text".into(), is_primary_key: false, references: None, gloss: None },
                ],
            },
            TableEntry {
                table_name: "company_revenue_annual".into(),
                table_schema: "public".into(),
                module: Some("core".into()),
                gloss: Some("annual revenue per company".into()),
                is_hub: false,
                columns: vec![
                    ColumnEntry {
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
                    },
                    ColumnEntry { name: "year".into(), data_type: "integer".into(), is_primary_key: true, references: None, gloss: None },
                    ColumnEntry { name: "revenue_millions".into(), data_type: "numeric".into(), is_primary_key: false, references: None, gloss: None },
                ],
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

fn packet_for(catalog: &SchemaCatalog, table_names: &[&str], question: &str) -> SchemaContextPacket {
    let tables = table_names
        .iter()
        .map(|name| {
            let table = catalog.table(name).unwrap();
            TableCandidate {
                table_name: table.table_name.clone(),
                m_schema: nlq_core::schema::render_m_schema(table),
                similarity: 0.9,
                provenance: ProvenanceTag::Keyword,
                is_hub: table.is_hub,
            }
        })
        .collect();
    SchemaContextPacket {
        query_id: Uuid::nil(),
        database_id: "mcptest".into(),
        question: question.to_string(),
        tables,
        fk_edges: catalog.fk_edges.clone(),
        modules: vec!["core".into()],
        join_hints: vec!["company_revenue_annual.company_id -> companies.company_id".into()],
        join_paths: vec![],
    }
}

/// Scenario: simple count. A single-table SELECT COUNT(*) should clear
/// structural validation untouched apart from an auto-injected LIMIT.
#[test]
fn simple_count_query_clears_structural_validation() {
    let catalog = fixture_catalog();
    let packet = packet_for(&catalog, &["companies"], "how many companies are there?");
    let config = StructuralConfig::default();

    let (issues, rewritten) = structural::validate_structural("SELECT COUNT(*) FROM companies", &packet, &config, 1000);

    assert!(issues.is_empty());
    assert!(rewritten.contains("LIMIT 1000"));
    assert_eq!(semantic::classify_intent(&packet.question), semantic::Intent::Count);
}

/// Scenario: entity lookup. "Which state is Acme Corp in?" must classify as
/// a state lookup and flag SQL that omits both the entity filter and the
/// `state` column.
#[test]
fn entity_lookup_question_flags_missing_entity_and_wrong_select() {
    let question = "which state is Acme Corp in?";
    assert_eq!(semantic::classify_intent(question), semantic::Intent::LookupState);

    let issues = semantic::validate_semantic_match(question, "SELECT name FROM companies;");
    assert!(issues.iter().any(|i| i.code == "MISSING_ENTITY" && i.severity == Severity::Error));
    assert!(issues.iter().any(|i| i.code == "WRONG_SELECT"));
    assert!(!semantic::is_valid(&issues));

    let correct = "SELECT state FROM companies WHERE name = 'Acme Corp';";
    let issues = semantic::validate_semantic_match(question, correct);
    assert!(semantic::is_valid(&issues));
}

/// Scenario: unknown-column repair. The model writes `revenue` when the
/// fixture's real column is `revenue_millions`; the planner's fuzzy matcher
/// must consider them close enough to suggest as a repair.
#[test]
fn unknown_column_typo_is_within_fuzzy_repair_distance() {
    let distance = levenshtein("revenue", "revenue_millions");
    assert!(distance <= 9);
    assert!("revenue_millions".starts_with("revenue"));
}

/// Scenario: blocked write. A disguised `DELETE` must fail both the
/// single-SELECT check and the denylist check, never reaching the planner.
#[test]
fn blocked_write_statement_rejected_by_structural_validation() {
    let catalog = fixture_catalog();
    let packet = packet_for(&catalog, &["companies"], "delete everything");
    let config = StructuralConfig::default();

    let (issues, _) = structural::validate_structural("DELETE FROM companies WHERE 1=1", &packet, &config, 1000);

    assert!(issues.iter().any(|i| matches!(i, structural::StructuralIssue::NotASelect)));
    assert!(issues.iter().any(|i| matches!(i, structural::StructuralIssue::DeniedKeyword(kw) if kw.eq_ignore_ascii_case("DELETE"))));
}

/// Scenario: decade-grouping rule. The composed prompt for a question about
/// founding decades must carry the PostgreSQL-specific `(year / 10) * 10`
/// rule and never the nonexistent `EXTRACT(DECADE ...)` form.
#[test]
fn decade_grouping_rule_present_in_composed_prompt_for_fixture_schema() {
    let catalog = fixture_catalog();
    let packet = packet_for(&catalog, &["companies"], "how many companies were founded each decade?");

    let prompt = PromptComposer::base_prompt(&packet);

    assert!(prompt.contains("founding_year"));
    // table block renders the real column name; the rule text itself uses the generic "year"
    assert!(prompt.contains("(year / 10) * 10"));
    assert!(!prompt.contains("EXTRACT(DECADE"));
    assert!(prompt.contains("companies("));
}

/// Scenario: retrieval miss. A question with no lexical overlap against any
/// table/column/gloss in the fixture must fail closed rather than guessing.
#[tokio::test]
async fn retrieval_miss_returns_no_relevant_schema_for_fixture() {
    let catalog = fixture_catalog();
    let llm = LlmClient::new(LlmConfig::default());
    let retriever = Retriever::new(&catalog, &llm);

    let err = retriever
        .retrieve(Uuid::nil(), "mcptest", "purple elephants dancing in the moonlight")
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::NoRelevantSchema));
}
