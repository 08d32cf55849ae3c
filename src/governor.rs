//! The three-layer merge governor.
//!
//! Evaluates a proposed merge in strict order, short-circuiting on the
//! first decisive verdict:
//!
//! 1. **Constraints**: hard constraints queried via gates; any violation
//!    rejects outright.
//! 2. **Intent conflicts**: classified pairwise; hard-constraint clashes
//!    reject; soft/none advance; everything else goes to economics.
//! 3. **Economics**: expected value of escalation vs. auto-resolve under
//!    the budget. Low ambiguity auto-resolves in favor of the
//!    higher-stability intent; high ambiguity escalates; an exhausted
//!    budget blocks.
//!
//! Every outcome is reported with the deciding layer and full rationale.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::economics::{EconomicsDecision, EconomicsPolicy};
use crate::gates::{ConstraintEvaluator, ConstraintOutcome};
use crate::graph::ConflictClassifier;
use crate::types::conflict::{Conflict, ConflictKind};
use crate::types::intent::{Intent, IntentId};

/// The layer that produced the decisive verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionLayer {
    /// Layer 1: hard constraints via gates.
    Constraints,
    /// Layer 2: intent conflict classification.
    IntentConflicts,
    /// Layer 3: budgeted expected-value policy.
    Economics,
}

/// One auto-resolved conflict with its winner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictResolution {
    /// The conflict as classified.
    pub conflict: Conflict,
    /// The side that won (higher stability; earlier on an exact tie).
    pub winner: IntentId,
    /// The kind recorded after resolution (the losing side yields).
    pub resolved_kind: ConflictKind,
}

/// The governor's verdict for a proposed merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GovernorOutcome {
    /// No blocking conflicts; the merge may proceed.
    Merge,
    /// Contested ground resolved in favor of the higher-stability sides.
    AutoResolve {
        /// Per-conflict resolutions.
        resolutions: Vec<ConflictResolution>,
    },
    /// Ambiguity is worth a vote; escalate to the triumvirate or a human.
    Escalate {
        /// The conflicts needing a decision.
        conflicts: Vec<Conflict>,
    },
    /// A hard constraint or fatal conflict; the merge must not happen.
    Reject,
    /// The economics layer refuses further work on an exhausted budget.
    Block {
        /// Amount already spent.
        spent: f64,
        /// The configured budget.
        budget: f64,
    },
}

impl fmt::Display for GovernorOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Merge => write!(f, "merge"),
            Self::AutoResolve { .. } => write!(f, "auto_resolve"),
            Self::Escalate { .. } => write!(f, "escalate"),
            Self::Reject => write!(f, "reject"),
            Self::Block { .. } => write!(f, "block"),
        }
    }
}

/// Full report for one governor evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct GovernorReport {
    /// The verdict.
    pub outcome: GovernorOutcome,
    /// Which layer decided.
    pub layer: DecisionLayer,
    /// Why, in prose.
    pub rationale: String,
    /// Every constraint evaluated in layer 1.
    #[serde(skip)]
    pub constraint_outcomes: Vec<ConstraintOutcome>,
    /// Every non-`none` conflict classified in layer 2.
    pub conflicts: Vec<Conflict>,
}

/// The three-layer merge decision pipeline.
pub struct Governor {
    evaluator: ConstraintEvaluator,
    classifier: Arc<ConflictClassifier>,
    economics: Mutex<EconomicsPolicy>,
}

impl Governor {
    /// Create a governor.
    pub fn new(
        evaluator: ConstraintEvaluator,
        classifier: Arc<ConflictClassifier>,
        economics: EconomicsPolicy,
    ) -> Self {
        Self {
            evaluator,
            classifier,
            economics: Mutex::new(economics),
        }
    }

    /// Budget spent so far by the economics layer.
    pub fn budget_spent(&self) -> f64 {
        self.economics.lock().spent()
    }

    /// Evaluate a proposed merge of `incoming` intents into a graph
    /// currently containing `base` intents.
    pub fn evaluate_merge(
        &self,
        base: &[Intent],
        incoming: &[Intent],
        now: DateTime<Utc>,
    ) -> GovernorReport {
        // Layer 1: hard constraints via gates. Fatal on any violation.
        let mut constraint_outcomes = Vec::new();
        for intent in incoming {
            constraint_outcomes.extend(self.evaluator.evaluate(&intent.constraints, now));
        }
        if let Some(fatal) = constraint_outcomes.iter().find(|o| o.is_fatal()) {
            let rationale = format!(
                "constraints layer: hard constraint `{} {}` failed: {}",
                fatal.constraint.subject,
                fatal.constraint.predicate,
                fatal
                    .verdict
                    .as_ref()
                    .map(|v| v.detail.as_str())
                    .unwrap_or("no verdict"),
            );
            tracing::warn!(rationale = %rationale, "merge rejected");
            return GovernorReport {
                outcome: GovernorOutcome::Reject,
                layer: DecisionLayer::Constraints,
                rationale,
                constraint_outcomes,
                conflicts: Vec::new(),
            };
        }

        // Layer 2: conflict classification.
        let mut conflicts = Vec::new();
        for candidate in incoming {
            for existing in base {
                if existing.agent_id == candidate.agent_id
                    || existing.intent_id == candidate.intent_id
                {
                    continue;
                }
                let conflict = self.classifier.classify(existing, candidate, now);
                if conflict.kind != ConflictKind::None {
                    conflicts.push(conflict);
                }
            }
        }

        if let Some(fatal) = conflicts.iter().find(|c| c.kind.is_fatal()) {
            let rationale = format!(
                "intent layer: hard constraint conflict between {} and {}: {}",
                fatal.left, fatal.right, fatal.detail
            );
            tracing::warn!(rationale = %rationale, "merge rejected");
            return GovernorReport {
                outcome: GovernorOutcome::Reject,
                layer: DecisionLayer::IntentConflicts,
                rationale,
                constraint_outcomes,
                conflicts,
            };
        }

        let contested: Vec<Conflict> = conflicts
            .iter()
            .filter(|c| !c.kind.is_mergeable())
            .cloned()
            .collect();

        if contested.is_empty() {
            let rationale = if conflicts.is_empty() {
                "intent layer: no conflicts".to_string()
            } else {
                format!(
                    "intent layer: {} soft conflict(s); lower-stability sides yield",
                    conflicts.len()
                )
            };
            tracing::info!(rationale = %rationale, "merge approved");
            return GovernorReport {
                outcome: GovernorOutcome::Merge,
                layer: DecisionLayer::IntentConflicts,
                rationale,
                constraint_outcomes,
                conflicts,
            };
        }

        // Layer 3: economics.
        let mut economics = self.economics.lock();
        let mut resolutions = Vec::new();
        let mut escalations = Vec::new();

        for conflict in &contested {
            // Explicit human escalation bypasses the expected-value math.
            if conflict.kind == ConflictKind::HumanEscalation {
                escalations.push(conflict.clone());
                continue;
            }
            match economics.decide(conflict) {
                EconomicsDecision::AutoResolve { ev } => {
                    tracing::debug!(
                        left = %conflict.left,
                        right = %conflict.right,
                        ev,
                        "conflict auto-resolved"
                    );
                    resolutions.push(ConflictResolution {
                        winner: conflict.stronger_side().clone(),
                        resolved_kind: ConflictKind::Soft,
                        conflict: conflict.clone(),
                    });
                }
                EconomicsDecision::Escalate { ev, cost } => {
                    tracing::info!(
                        left = %conflict.left,
                        right = %conflict.right,
                        ev,
                        cost,
                        "conflict escalated"
                    );
                    escalations.push(conflict.clone());
                }
                EconomicsDecision::Block { spent, budget } => {
                    let rationale = format!(
                        "economics layer: budget exhausted ({spent:.2} of {budget:.2} spent)"
                    );
                    tracing::warn!(rationale = %rationale, "merge blocked");
                    return GovernorReport {
                        outcome: GovernorOutcome::Block { spent, budget },
                        layer: DecisionLayer::Economics,
                        rationale,
                        constraint_outcomes,
                        conflicts,
                    };
                }
            }
        }

        if !escalations.is_empty() {
            let rationale = format!(
                "economics layer: {} conflict(s) worth escalating, {} auto-resolved",
                escalations.len(),
                resolutions.len()
            );
            return GovernorReport {
                outcome: GovernorOutcome::Escalate {
                    conflicts: escalations,
                },
                layer: DecisionLayer::Economics,
                rationale,
                constraint_outcomes,
                conflicts,
            };
        }

        let rationale = format!(
            "economics layer: ambiguity below threshold; {} conflict(s) auto-resolved toward higher stability",
            resolutions.len()
        );
        GovernorReport {
            outcome: GovernorOutcome::AutoResolve { resolutions },
            layer: DecisionLayer::Economics,
            rationale,
            constraint_outcomes,
            conflicts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvidenceWeights;
    use crate::gates::{GateRegistry, StaticGate};
    use crate::matching::Matcher;
    use crate::stability::StabilityScorer;
    use crate::types::intent::{
        Constraint, Evidence, EvidenceKind, IntentBuilder, IntentCategory, InterfaceKind,
        InterfaceSpec, Severity,
    };
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    fn classifier(epsilon: f64) -> Arc<ConflictClassifier> {
        Arc::new(ConflictClassifier::new(
            Matcher::structural(0.6),
            StabilityScorer::new(0.1, EvidenceWeights::default()),
            epsilon,
        ))
    }

    fn governor(evaluator: ConstraintEvaluator, epsilon: f64) -> Governor {
        Governor::new(
            evaluator,
            classifier(epsilon),
            EconomicsPolicy::new(10.0, 0.1, 1.0, 0.25),
        )
    }

    fn intent(id: &str, agent: &str, iface: &str, kind: EvidenceKind, at: DateTime<Utc>) -> Intent {
        IntentBuilder::new(id, agent, format!("claim {iface}"), IntentCategory::Interface, at)
            .interface(InterfaceSpec::new(iface, InterfaceKind::Class, vec!["auth".into()]))
            .evidence(Evidence::new(kind, 0.0, at, "test"))
            .build()
    }

    #[test]
    fn test_hard_constraint_rejects_before_other_layers() {
        let mut registry = GateRegistry::new();
        registry.register("tests_pass", Box::new(StaticGate::failing("pytest", "3 failures")));
        let g = governor(ConstraintEvaluator::new(registry), 0.15);

        let incoming = IntentBuilder::new("i-x", "agent-x", "risky change", IntentCategory::Decision, t0())
            .constraint(Constraint::new("tests", "tests_pass", Severity::Hard, vec![]))
            .build();

        let report = g.evaluate_merge(&[], &[incoming], t0());
        assert!(matches!(report.outcome, GovernorOutcome::Reject));
        assert_eq!(report.layer, DecisionLayer::Constraints);
        assert!(report.rationale.contains("3 failures"));
    }

    #[test]
    fn test_no_conflicts_merges() {
        let g = governor(ConstraintEvaluator::empty(), 0.15);
        let base = intent("i-a", "agent-a", "AuthService", EvidenceKind::Committed, t0());
        let incoming = intent("i-b", "agent-b", "PaymentGateway", EvidenceKind::Committed, t0());

        let report = g.evaluate_merge(&[base], &[incoming], t0());
        assert!(matches!(report.outcome, GovernorOutcome::Merge));
    }

    #[test]
    fn test_soft_conflict_merges() {
        let g = governor(ConstraintEvaluator::empty(), 0.15);
        let base = intent("i-a", "agent-a", "User", EvidenceKind::Committed, t0());
        let incoming = intent("i-b", "agent-b", "User", EvidenceKind::Speculative, t0());

        let report = g.evaluate_merge(&[base], &[incoming], t0());
        assert!(matches!(report.outcome, GovernorOutcome::Merge));
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].kind, ConflictKind::Soft);
    }

    #[test]
    fn test_confident_ambiguity_auto_resolves() {
        // Epsilon wide enough that committed-vs-speculative is ambiguous,
        // yet the stability gap keeps winner confidence high.
        let g = governor(ConstraintEvaluator::empty(), 0.5);
        let base = intent("i-a", "agent-a", "User", EvidenceKind::Committed, t0());
        let incoming = intent("i-b", "agent-b", "User", EvidenceKind::Speculative, t0());

        let report = g.evaluate_merge(&[base], &[incoming], t0());
        match &report.outcome {
            GovernorOutcome::AutoResolve { resolutions } => {
                assert_eq!(resolutions.len(), 1);
                assert_eq!(resolutions[0].winner, IntentId::new("i-a"));
                assert_eq!(resolutions[0].resolved_kind, ConflictKind::Soft);
            }
            other => panic!("expected auto_resolve, got {other}"),
        }
        assert_eq!(report.layer, DecisionLayer::Economics);
    }

    #[test]
    fn test_even_ambiguity_escalates() {
        let g = governor(ConstraintEvaluator::empty(), 0.15);
        let base = intent("i-a", "agent-a", "User", EvidenceKind::Committed, t0());
        let incoming = intent("i-b", "agent-b", "User", EvidenceKind::Committed, t0());

        let report = g.evaluate_merge(&[base], &[incoming], t0());
        assert!(matches!(report.outcome, GovernorOutcome::Escalate { .. }));
    }

    #[test]
    fn test_exhausted_budget_blocks() {
        let g = Governor::new(
            ConstraintEvaluator::empty(),
            classifier(0.15),
            EconomicsPolicy::new(0.05, 0.1, 1.0, 0.25),
        );
        let base = intent("i-a", "agent-a", "User", EvidenceKind::Committed, t0());
        let incoming = intent("i-b", "agent-b", "User", EvidenceKind::Committed, t0());

        let report = g.evaluate_merge(&[base], &[incoming], t0());
        match report.outcome {
            GovernorOutcome::Block { spent, budget } => {
                assert_eq!(spent, 0.0);
                assert_eq!(budget, 0.05);
            }
            other => panic!("expected block, got {other}"),
        }
    }
}
