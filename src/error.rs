//! Error taxonomy for the coordination engine.
//!
//! Conflicts between intents are data, not errors: they are returned as
//! values carrying their classification and candidate sides. Only
//! genuinely exceptional conditions (validation failures, duplicate ids,
//! backend corruption, exhausted budgets) surface through this enum.

use crate::types::intent::IntentId;

/// Error type for all engine operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConvergentError {
    /// Malformed intent, missing required field, or enum out of range.
    #[error("Validation failed: {detail}")]
    Validation {
        /// What was malformed.
        detail: String,
    },

    /// An intent id was reused with differing content.
    #[error("Duplicate intent {intent_id}: republished with differing content")]
    DuplicateIntent {
        /// The reused id.
        intent_id: IntentId,
    },

    /// The governor could not classify or auto-resolve without escalation.
    #[error("Conflict unresolved between {left} and {right}: {detail}")]
    ConflictUnresolved {
        /// One side of the conflict.
        left: IntentId,
        /// The other side.
        right: IntentId,
        /// Why resolution failed.
        detail: String,
    },

    /// A hard constraint failed via gate verdict.
    #[error("Hard constraint violated: {subject} {predicate} ({detail})")]
    ConstraintViolation {
        /// Constraint subject.
        subject: String,
        /// Constraint predicate.
        predicate: String,
        /// Gate detail.
        detail: String,
    },

    /// A gate exited non-zero or timed out.
    #[error("Gate {gate} failed: {detail}")]
    GateFailure {
        /// Gate name.
        gate: String,
        /// Inner detail.
        detail: String,
    },

    /// A recomputed snapshot differs from the recorded one.
    #[error("Replay diverged at merge {index}: expected {expected}, got {actual}")]
    ReplayDivergence {
        /// Index of the first differing merge in the log.
        index: usize,
        /// Snapshot id recorded in the log.
        expected: String,
        /// Snapshot id produced by replay.
        actual: String,
    },

    /// The persistent store is unreachable or corrupt.
    #[error("Backend unavailable: {detail}")]
    BackendUnavailable {
        /// What went wrong.
        detail: String,
    },

    /// An operation exceeded its configured deadline.
    #[error("Timeout in {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
    },

    /// The economics layer refuses further work.
    #[error("Budget exceeded: spent {spent:.2} of {budget:.2}")]
    BudgetExceeded {
        /// Amount already spent.
        spent: f64,
        /// Configured budget.
        budget: f64,
    },
}

impl ConvergentError {
    /// Shorthand for a validation error.
    pub fn validation(detail: impl Into<String>) -> Self {
        Self::Validation {
            detail: detail.into(),
        }
    }

    /// Shorthand for a backend error.
    pub fn backend(detail: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            detail: detail.into(),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for ConvergentError {
    fn from(e: rusqlite::Error) -> Self {
        Self::BackendUnavailable {
            detail: e.to_string(),
        }
    }
}
