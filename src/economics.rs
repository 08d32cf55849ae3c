//! Economics layer: budget tracking and the expected-value escalation
//! policy.
//!
//! Escalation (a consensus vote or human review) is expensive; wrongly
//! auto-resolving a contested design is also expensive. The policy
//! compares the two:
//!
//! ```text
//! ev = (1 - winner_confidence) * error_cost - escalation_cost
//! ```
//!
//! where `winner_confidence` is the higher-stability side's share of
//! total stability (0.5 when both sides have none). Above the threshold
//! tau the ambiguity is worth a vote; at or below it the higher-stability
//! intent wins outright. An exhausted budget blocks further escalation.

use serde::{Deserialize, Serialize};

use crate::types::conflict::Conflict;

/// What the economics layer decided for one conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum EconomicsDecision {
    /// Resolve in favor of the higher-stability side.
    AutoResolve {
        /// Expected value of escalating, for the report.
        ev: f64,
    },
    /// Escalate to a consensus vote or human review.
    Escalate {
        /// Expected value of escalating.
        ev: f64,
        /// Cost charged against the budget.
        cost: f64,
    },
    /// The budget is exhausted; no further escalation work.
    Block {
        /// Amount spent so far.
        spent: f64,
        /// The configured budget.
        budget: f64,
    },
}

/// Budgeted expected-value escalation policy.
#[derive(Debug, Clone)]
pub struct EconomicsPolicy {
    budget: f64,
    spent: f64,
    escalation_cost: f64,
    error_cost: f64,
    ev_threshold: f64,
}

impl EconomicsPolicy {
    /// Create a policy.
    pub fn new(budget: f64, escalation_cost: f64, error_cost: f64, ev_threshold: f64) -> Self {
        Self {
            budget,
            spent: 0.0,
            escalation_cost,
            error_cost,
            ev_threshold,
        }
    }

    /// Remaining budget.
    pub fn remaining(&self) -> f64 {
        self.budget - self.spent
    }

    /// Amount spent so far.
    pub fn spent(&self) -> f64 {
        self.spent
    }

    /// Confidence in the stronger side of a conflict: its share of total
    /// stability, 0.5 when neither side has any.
    pub fn winner_confidence(conflict: &Conflict) -> f64 {
        let total = conflict.left_stability + conflict.right_stability;
        if total <= 0.0 {
            0.5
        } else {
            conflict.left_stability.max(conflict.right_stability) / total
        }
    }

    /// Expected value of escalating this conflict instead of
    /// auto-resolving it.
    pub fn escalation_ev(&self, conflict: &Conflict) -> f64 {
        (1.0 - Self::winner_confidence(conflict)) * self.error_cost - self.escalation_cost
    }

    /// Decide one conflict, charging the budget when escalating.
    pub fn decide(&mut self, conflict: &Conflict) -> EconomicsDecision {
        let ev = self.escalation_ev(conflict);
        if ev <= self.ev_threshold {
            return EconomicsDecision::AutoResolve { ev };
        }
        if self.remaining() < self.escalation_cost {
            tracing::warn!(
                spent = self.spent,
                budget = self.budget,
                "escalation refused: budget exhausted"
            );
            return EconomicsDecision::Block {
                spent: self.spent,
                budget: self.budget,
            };
        }
        self.spent += self.escalation_cost;
        EconomicsDecision::Escalate {
            ev,
            cost: self.escalation_cost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::conflict::ConflictKind;
    use crate::types::intent::IntentId;

    fn conflict(left: f64, right: f64) -> Conflict {
        Conflict {
            left: IntentId::new("a"),
            right: IntentId::new("b"),
            kind: ConflictKind::Ambiguous,
            interface: Some("User".to_string()),
            left_stability: left,
            right_stability: right,
            detail: String::new(),
        }
    }

    fn policy() -> EconomicsPolicy {
        EconomicsPolicy::new(10.0, 0.1, 1.0, 0.25)
    }

    #[test]
    fn test_confident_winner_auto_resolves() {
        let mut p = policy();
        // Confidence 0.57/0.77 = 0.74 -> ev = 0.26 - 0.1 = 0.16 <= 0.25
        let decision = p.decide(&conflict(0.57, 0.2));
        assert!(matches!(decision, EconomicsDecision::AutoResolve { .. }));
        assert_eq!(p.spent(), 0.0);
    }

    #[test]
    fn test_even_split_escalates() {
        let mut p = policy();
        // Confidence 0.5 -> ev = 0.5 - 0.1 = 0.4 > 0.25
        let decision = p.decide(&conflict(0.2, 0.2));
        assert!(matches!(decision, EconomicsDecision::Escalate { .. }));
        assert!((p.spent() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_zero_stability_both_sides() {
        let c = conflict(0.0, 0.0);
        assert_eq!(EconomicsPolicy::winner_confidence(&c), 0.5);
    }

    #[test]
    fn test_exhausted_budget_blocks() {
        let mut p = EconomicsPolicy::new(0.15, 0.1, 1.0, 0.25);
        assert!(matches!(
            p.decide(&conflict(0.2, 0.2)),
            EconomicsDecision::Escalate { .. }
        ));
        // Second escalation would exceed the budget.
        assert!(matches!(
            p.decide(&conflict(0.2, 0.2)),
            EconomicsDecision::Block { .. }
        ));
    }
}
