//! Error taxonomy for the NL->SQL pipeline.
//!
//! One variant per failure mode a caller or the repair controller needs to
//! distinguish. `repairable()` drives the repair controller's decision to
//! retry (structural/semantic/planner failures) versus give up immediately
//! (permission, connection, transport, or empty-retrieval failures).

use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PipelineError {
    #[error("no schema context could be retrieved for this question")]
    NoRelevantSchema,

    #[error("embedding request failed: {0}")]
    EmbeddingFailed(String),

    #[error("LLM generation timed out after {0}s")]
    GenerationTimeout(u64),

    #[error("LLM endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("LLM produced invalid output: {0}")]
    InvalidOutput(String),

    #[error("structural validation failed: {0}")]
    Structural(String),

    #[error("semantic validation failed: {0}")]
    Semantic(String),

    #[error("planner rejected the statement ({sqlstate}): {message}")]
    Planner { sqlstate: String, message: String },

    #[error("database permission denied: {0}")]
    PermissionDenied(String),

    #[error("database connection error: {0}")]
    Connection(String),

    #[error("repair attempts exhausted after {0} tries")]
    RepairExhausted(u32),

    #[error("request cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Whether the repair controller may retry after this failure.
    ///
    /// Matches the repairable SQLSTATE set and the structural/semantic
    /// validation failures; permission, connection, transport, and
    /// empty-retrieval failures are terminal.
    pub fn repairable(&self) -> bool {
        match self {
            PipelineError::Structural(_) | PipelineError::Semantic(_) => true,
            PipelineError::Planner { sqlstate, .. } => is_repairable_sqlstate(sqlstate),
            PipelineError::NoRelevantSchema
            | PipelineError::PermissionDenied(_)
            | PipelineError::Connection(_)
            | PipelineError::Unreachable(_)
            | PipelineError::Cancelled
            | PipelineError::RepairExhausted(_)
            | PipelineError::Internal(_) => false,
            PipelineError::EmbeddingFailed(_)
            | PipelineError::GenerationTimeout(_)
            | PipelineError::InvalidOutput(_) => true,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            PipelineError::NoRelevantSchema => "retrieval",
            PipelineError::EmbeddingFailed(_) => "embedding",
            PipelineError::GenerationTimeout(_) | PipelineError::Unreachable(_) => "generation",
            PipelineError::InvalidOutput(_) => "generation",
            PipelineError::Structural(_) => "structural",
            PipelineError::Semantic(_) => "semantic",
            PipelineError::Planner { .. } => "planner",
            PipelineError::PermissionDenied(_) => "permission",
            PipelineError::Connection(_) => "connection",
            PipelineError::RepairExhausted(_) => "repair_exhausted",
            PipelineError::Cancelled => "cancelled",
            PipelineError::Internal(_) => "internal",
        }
    }
}

/// SQLSTATEs the repair controller is allowed to attempt a fix for.
pub const REPAIRABLE_SQLSTATES: &[&str] =
    &["42P01", "42703", "42601", "42P10", "42804", "42883"];

pub fn is_repairable_sqlstate(sqlstate: &str) -> bool {
    REPAIRABLE_SQLSTATES.contains(&sqlstate)
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repairable_sqlstates_match_spec_set() {
        for code in ["42P01", "42703", "42601", "42P10", "42804", "42883"] {
            assert!(is_repairable_sqlstate(code));
        }
        assert!(!is_repairable_sqlstate("42501"));
        assert!(!is_repairable_sqlstate("08006"));
    }

    #[test]
    fn permission_and_connection_errors_are_not_repairable() {
        assert!(!PipelineError::PermissionDenied("x".into()).repairable());
        assert!(!PipelineError::Connection("x".into()).repairable());
        assert!(!PipelineError::NoRelevantSchema.repairable());
    }

    #[test]
    fn structural_and_semantic_errors_are_repairable() {
        assert!(PipelineError::Structural("x".into()).repairable());
        assert!(PipelineError::Semantic("x".into()).repairable());
    }

    #[test]
    fn planner_error_repairability_follows_sqlstate() {
        assert!(PipelineError::Planner { sqlstate: "42703".into(), message: "x".into() }
            .repairable());
        assert!(!PipelineError::Planner { sqlstate: "42501".into(), message: "x".into() }
            .repairable());
    }
}
