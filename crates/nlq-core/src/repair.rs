//! Repair controller: a bounded state machine around generation,
//! validation, planning, and execution, with monotonically decaying
//! confidence across repair attempts.
//!
//! State machine: `Generating -> ValidatingStructural -> ValidatingSemantic
//! -> Planning -> Executing -> Done | Failed`. A repairable failure at any
//! validation/planning stage loops back to `Generating` with a new delta
//! block, up to `max_attempts`; a non-repairable failure or attempt
//! exhaustion transitions straight to `Failed`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepairState {
    Generating,
    ValidatingStructural,
    ValidatingSemantic,
    Planning,
    Executing,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairAttempt {
    pub attempt: u32,
    pub sql: String,
    pub confidence: f32,
    pub state: RepairState,
    pub failure_reason: Option<String>,
}

pub struct RepairController {
    pub max_attempts: u32,
    confidence_floor: f32,
    attempts: Vec<RepairAttempt>,
}

impl RepairController {
    pub fn new(max_attempts: u32) -> Self {
        Self::with_confidence_floor(max_attempts, 0.5)
    }

    pub fn with_confidence_floor(max_attempts: u32, confidence_floor: f32) -> Self {
        Self { max_attempts, confidence_floor, attempts: Vec::new() }
    }

    pub fn attempts(&self) -> &[RepairAttempt] {
        &self.attempts
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    pub fn exhausted(&self) -> bool {
        self.attempt_count() >= self.max_attempts
    }

    fn previous_confidence(&self) -> f32 {
        self.attempts.last().map(|a| a.confidence).unwrap_or(1.0)
    }

    /// Confidence after a structural or semantic repair: decays toward a
    /// floor of 0.5, never increases across a repair cycle.
    pub fn decayed_confidence(&self, base_confidence: f32) -> f32 {
        let previous = self.previous_confidence();
        (previous - 0.1).max(self.confidence_floor).min(base_confidence)
    }

    /// Confidence after a repair that itself failed to improve the SQL:
    /// decays toward a lower floor, 0.1 beneath the structural/semantic floor.
    pub fn failed_repair_confidence(&self) -> f32 {
        (self.previous_confidence() - 0.3).max((self.confidence_floor - 0.1).max(0.0))
    }

    /// Ceiling on the confidence of a repaired-but-ultimately-successful
    /// result: `1.0 - 0.1 * attempts`.
    pub fn success_ceiling(&self) -> f32 {
        (1.0 - 0.1 * self.attempt_count() as f32).max(0.0)
    }

    pub fn record(&mut self, attempt: RepairAttempt) {
        self.attempts.push(attempt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_floor_for_structural_repair_is_half() {
        let mut controller = RepairController::new(3);
        controller.record(RepairAttempt {
            attempt: 1,
            sql: "SELECT 1;".into(),
            confidence: 0.51,
            state: RepairState::ValidatingStructural,
            failure_reason: Some("denied keyword".into()),
        });
        assert!(controller.decayed_confidence(1.0) >= 0.5);
    }

    #[test]
    fn confidence_floor_for_failed_repair_is_four_tenths() {
        let mut controller = RepairController::new(3);
        controller.record(RepairAttempt {
            attempt: 1,
            sql: "SELECT 1;".into(),
            confidence: 0.41,
            state: RepairState::Failed,
            failure_reason: Some("repair made no difference".into()),
        });
        assert!(controller.failed_repair_confidence() >= 0.4);
    }

    #[test]
    fn max_attempts_default_is_three() {
        let controller = RepairController::new(3);
        assert!(!controller.exhausted());
    }

    #[test]
    fn exhausted_after_max_attempts_recorded() {
        let mut controller = RepairController::new(2);
        for i in 1..=2 {
            controller.record(RepairAttempt {
                attempt: i,
                sql: "SELECT 1;".into(),
                confidence: 0.5,
                state: RepairState::Failed,
                failure_reason: None,
            });
        }
        assert!(controller.exhausted());
    }

    #[test]
    fn success_ceiling_decreases_with_attempts() {
        let mut controller = RepairController::new(3);
        assert_eq!(controller.success_ceiling(), 1.0);
        controller.record(RepairAttempt {
            attempt: 1,
            sql: "SELECT 1;".into(),
            confidence: 0.9,
            state: RepairState::Done,
            failure_reason: None,
        });
        assert!((controller.success_ceiling() - 0.9).abs() < 1e-6);
    }
}
