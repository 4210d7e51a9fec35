//! Orchestrates the full request lifecycle: retrieve -> compose -> generate
//! -> validate (structural, semantic) -> plan -> repair-if-needed ->
//! execute. This is the single place that sequences the other modules; it
//! owns no SQL-shaped logic of its own.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::executor::Executor;
use crate::generator::Generator;
use crate::llm::LlmClient;
use crate::planner::Planner;
use crate::prompt::{DeltaBlock, DeltaPriority, PromptComposer};
use crate::repair::{RepairAttempt, RepairController, RepairState};
use crate::retrieval::Retriever;
use crate::schema::catalog::SchemaCatalog;
use crate::schema::packet::SchemaContextPacket;
use crate::validate::semantic::{self, Severity};
use crate::validate::structural;

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateAndRunRequest {
    pub question: String,
    pub database_id: String,
    pub user_id: Option<String>,
    #[serde(default = "default_max_rows")]
    pub max_rows: u64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub explain: bool,
    #[serde(default)]
    pub trace: bool,
    #[serde(default)]
    pub schema_context: Option<SchemaContextPacket>,
}

fn default_max_rows() -> u64 {
    100
}

fn default_timeout_seconds() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceInfo {
    pub query_id: Uuid,
    pub tables_selected: Vec<String>,
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    pub recoverable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateAndRunResponse {
    pub query_id: Uuid,
    pub sql_generated: Option<String>,
    pub confidence_score: f32,
    pub tables_selected: Vec<String>,
    pub intent: Option<String>,
    pub notes: Option<String>,
    pub error: Option<ErrorPayload>,
    pub trace: Option<TraceInfo>,
    pub rows: Option<Vec<Value>>,
}

pub struct Pipeline<'a> {
    pool: &'a PgPool,
    llm: &'a LlmClient,
    config: &'a Config,
}

impl<'a> Pipeline<'a> {
    pub fn new(pool: &'a PgPool, llm: &'a LlmClient, config: &'a Config) -> Self {
        Self { pool, llm, config }
    }

    pub async fn generate_and_run(
        &self,
        catalog: &SchemaCatalog,
        request: GenerateAndRunRequest,
        cancel: CancellationToken,
    ) -> GenerateAndRunResponse {
        let query_id = Uuid::new_v4();
        let max_rows = request.max_rows.min(self.config.executor.max_rows_cap);

        let packet_result = match &request.schema_context {
            Some(packet) => Ok(packet.clone()),
            None => {
                let retriever = Retriever::new(catalog, self.llm)
                    .with_config(crate::retrieval::RetrievalConfig::from(&self.config.retrieval));
                retriever.retrieve(query_id, &request.database_id, &request.question).await
            }
        };

        let packet = match packet_result {
            Ok(p) => p,
            Err(err) => return self.error_response(query_id, err),
        };

        let mut controller = RepairController::with_confidence_floor(
            self.config.repair.max_attempts,
            self.config.repair.confidence_floor,
        );
        let mut deltas: Vec<DeltaBlock> = Vec::new();
        let intent = format!("{:?}", semantic::classify_intent(&request.question));

        loop {
            if cancel.is_cancelled() {
                return self.error_response(query_id, PipelineError::Cancelled);
            }

            let prompt = PromptComposer::compose_with_format(
                &packet,
                deltas.clone(),
                self.config.prompt.join_hint_format,
            );
            let generator = Generator::new(self.llm);

            let base_seed = (query_id.as_u128() as i64).wrapping_add(controller.attempt_count() as i64);
            let generation = if self.config.generation.k_default <= 1 {
                generator.generate_one(&prompt).await
            } else if self.config.generation.sequential_candidates {
                let candidates = generator
                    .generate_candidates_sequential(&prompt, self.config.generation.k_default as usize, base_seed)
                    .await;
                generator.best(&candidates).ok_or(PipelineError::InvalidOutput(
                    "no candidate survived generation".into(),
                ))
            } else {
                let candidates = generator
                    .generate_candidates(&prompt, self.config.generation.k_default as usize, base_seed)
                    .await;
                generator.best(&candidates).ok_or(PipelineError::InvalidOutput(
                    "no candidate survived generation".into(),
                ))
            };

            let candidate = match generation {
                Ok(c) => c,
                Err(err) if err.repairable() && !controller.exhausted() => {
                    controller.record(RepairAttempt {
                        attempt: controller.attempt_count() + 1,
                        sql: String::new(),
                        confidence: controller.failed_repair_confidence(),
                        state: RepairState::Generating,
                        failure_reason: Some(err.to_string()),
                    });
                    deltas = vec![DeltaBlock { priority: DeltaPriority::Semantic, text: format!("Previous attempt failed: {}", err) }];
                    continue;
                }
                Err(err) => return self.error_response(query_id, err),
            };

            let (structural_issues, rewritten_sql) =
                structural::validate_structural(&candidate.sql, &packet, &self.config.structural, max_rows);
            if !structural_issues.is_empty() {
                if controller.exhausted() {
                    return self.error_response(query_id, PipelineError::RepairExhausted(controller.attempt_count()));
                }
                let message = structural_issues.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("; ");
                controller.record(RepairAttempt {
                    attempt: controller.attempt_count() + 1,
                    sql: candidate.sql.clone(),
                    confidence: controller.decayed_confidence(candidate.confidence),
                    state: RepairState::ValidatingStructural,
                    failure_reason: Some(message.clone()),
                });
                deltas = vec![DeltaBlock {
                    priority: DeltaPriority::Structural,
                    text: structural_delta_text(&candidate.sql, &message),
                }];
                continue;
            }

            let semantic_issues = semantic::validate_semantic_match(&request.question, &rewritten_sql);
            if !semantic::is_valid(&semantic_issues) {
                if controller.exhausted() {
                    return self.error_response(query_id, PipelineError::RepairExhausted(controller.attempt_count()));
                }
                let message = semantic_issues
                    .iter()
                    .filter(|i| i.severity == Severity::Error)
                    .map(|i| i.message.clone())
                    .collect::<Vec<_>>()
                    .join("; ");
                controller.record(RepairAttempt {
                    attempt: controller.attempt_count() + 1,
                    sql: rewritten_sql.clone(),
                    confidence: controller.decayed_confidence(candidate.confidence),
                    state: RepairState::ValidatingSemantic,
                    failure_reason: Some(message.clone()),
                });
                deltas = vec![DeltaBlock {
                    priority: DeltaPriority::Semantic,
                    text: semantic_delta_text(&rewritten_sql, &message),
                }];
                continue;
            }

            let planner = Planner::new(self.pool, self.llm);
            if let Err(err) = planner.check(&rewritten_sql).await {
                if err.repairable() && !controller.exhausted() {
                    let mut message = err.to_string();
                    let mut whitelist_note = String::new();
                    if let PipelineError::Planner { sqlstate, .. } = &err {
                        if sqlstate == "42703" {
                            let unknown = extract_unknown_column(&message);
                            let candidates = planner.suggest_columns(catalog, &packet, &unknown).await;
                            if let Some(best) = candidates.first() {
                                message = format!("{}. Did you mean {}.{}?", message, best.table, best.column);
                            }
                            whitelist_note = column_whitelist_note(catalog, &candidates);
                        } else if sqlstate == "42P01" {
                            whitelist_note = format!(
                                "Allowed tables: {}.",
                                packet.table_names().join(", ")
                            );
                        }
                    }
                    controller.record(RepairAttempt {
                        attempt: controller.attempt_count() + 1,
                        sql: rewritten_sql.clone(),
                        confidence: controller.decayed_confidence(candidate.confidence),
                        state: RepairState::Planning,
                        failure_reason: Some(message.clone()),
                    });
                    deltas = vec![DeltaBlock {
                        priority: DeltaPriority::Planner,
                        text: planner_delta_text(&rewritten_sql, &message, &whitelist_note),
                    }];
                    continue;
                }
                return self.error_response(query_id, err);
            }

            if request.explain {
                return GenerateAndRunResponse {
                    query_id,
                    sql_generated: Some(rewritten_sql),
                    confidence_score: confidence_for_attempt(&controller, candidate.confidence),
                    tables_selected: packet.table_names().into_iter().map(String::from).collect(),
                    intent: Some(intent),
                    notes: None,
                    error: None,
                    trace: request.trace.then(|| TraceInfo {
                        query_id,
                        tables_selected: packet.table_names().into_iter().map(String::from).collect(),
                        attempts: controller.attempt_count(),
                    }),
                    rows: None,
                };
            }

            let executor = Executor::new(self.pool);
            return match executor.execute(&rewritten_sql, request.timeout_seconds * 1000, max_rows).await {
                Ok(rows) => GenerateAndRunResponse {
                    query_id,
                    sql_generated: Some(rewritten_sql),
                    confidence_score: confidence_for_attempt(&controller, candidate.confidence),
                    tables_selected: packet.table_names().into_iter().map(String::from).collect(),
                    intent: Some(intent),
                    notes: repair_notes(&controller),
                    error: None,
                    trace: request.trace.then(|| TraceInfo {
                        query_id,
                        tables_selected: packet.table_names().into_iter().map(String::from).collect(),
                        attempts: controller.attempt_count(),
                    }),
                    rows: Some(rows),
                },
                Err(err) => self.error_response(query_id, err),
            };
        }
    }

    fn error_response(&self, query_id: Uuid, err: PipelineError) -> GenerateAndRunResponse {
        GenerateAndRunResponse {
            query_id,
            sql_generated: None,
            confidence_score: 0.0,
            tables_selected: Vec::new(),
            intent: None,
            notes: None,
            error: Some(ErrorPayload {
                error_type: err.error_type().to_string(),
                message: err.to_string(),
                recoverable: err.repairable(),
            }),
            trace: None,
            rows: None,
        }
    }
}

fn confidence_for_attempt(controller: &RepairController, raw: f32) -> f32 {
    if controller.attempt_count() == 0 {
        raw
    } else {
        raw.min(controller.success_ceiling())
    }
}

fn repair_notes(controller: &RepairController) -> Option<String> {
    if controller.attempts().is_empty() {
        return None;
    }
    Some(format!("repaired after {} attempt(s)", controller.attempt_count()))
}

fn extract_unknown_column(message: &str) -> String {
    message
        .split('"')
        .nth(1)
        .unwrap_or_default()
        .to_string()
}

fn structural_delta_text(previous_sql: &str, issues: &str) -> String {
    format!(
        "Previous SQL:\n{}\n\nStructural issues: {}\nRemediation: reference only the tables and columns \
         listed in the schema above, qualify columns by the table/alias that actually declares them, \
         and do not use any denied keyword.",
        previous_sql.trim(),
        issues,
    )
}

fn semantic_delta_text(previous_sql: &str, issues: &str) -> String {
    format!(
        "Previous SQL:\n{}\n\nSemantic issues: {}\nRemediation: make sure the SELECT list and WHERE \
         clause actually address every entity, column, and aggregation the question asks for.",
        previous_sql.trim(),
        issues,
    )
}

fn planner_delta_text(previous_sql: &str, message: &str, whitelist_note: &str) -> String {
    let mut text = format!(
        "Previous SQL:\n{}\n\nPlanner rejected the previous query: {}",
        previous_sql.trim(),
        message,
    );
    if !whitelist_note.is_empty() {
        text.push('\n');
        text.push_str(whitelist_note);
    }
    text
}

/// Minimal column whitelist for a `42703` repair: the resolved table's own
/// columns plus the columns of its first-FK-hop neighbors, drawn from the
/// top-ranked candidate so the model gets a concrete, bounded list rather
/// than the whole packet.
fn column_whitelist_note(catalog: &SchemaCatalog, candidates: &[crate::planner::ColumnCandidate]) -> String {
    let Some(best) = candidates.first() else { return String::new() };
    let Some(table) = catalog.table(&best.table) else { return String::new() };

    let mut allowed: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();
    for fk in catalog.neighbors_of(&table.table_name) {
        let neighbor_name = if fk.from_table == table.table_name { &fk.to_table } else { &fk.from_table };
        if let Some(neighbor) = catalog.table(neighbor_name) {
            for column in &neighbor.columns {
                allowed.push(format!("{}.{}", neighbor.table_name, column.name));
            }
        }
    }
    format!("Allowed columns on {}: {}.", table.table_name, allowed.join(", "))
}
