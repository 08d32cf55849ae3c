//! Constraints and gates.
//!
//! A gate is an external evidence producer (a test suite, a type checker,
//! a compile probe, an arbitrary command) that answers passed/failed for a
//! scope. The engine does not implement gates; it defines the interface
//! and consumes verdicts to evaluate typed constraints. Verdicts must be
//! reproducible for a given scope snapshot.
//!
//! A gate that crashes or times out is downgraded to a `failed` verdict
//! inside the governor pipeline, with the inner detail preserved. Strict
//! callers that need the crash itself get it as a `GateFailure` error
//! through [`GateRegistry::try_check`] and
//! [`ConstraintEvaluator::ensure_satisfied`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ConvergentError;
use crate::types::intent::{Constraint, Severity};

/// The outcome of one gate run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateVerdict {
    /// Gate name.
    pub gate: String,
    /// Whether the gate passed.
    pub passed: bool,
    /// Detail (failure output, counts, timings).
    pub detail: String,
    /// The scope the gate ran against.
    pub scope: Vec<String>,
    /// When the verdict was produced.
    pub checked_at: DateTime<Utc>,
}

/// An external evidence producer.
pub trait Gate: Send + Sync {
    /// Stable gate name; constraints reference it by predicate.
    fn name(&self) -> &str;

    /// Run the gate against a scope.
    fn run(&self, scope: &[String]) -> Result<GateVerdict, ConvergentError>;
}

/// A gate with a fixed verdict.
///
/// Serves as the constructor-injected null object when no real gate
/// exists for a predicate, and as a stand-in for external runners in
/// tests.
pub struct StaticGate {
    name: String,
    passed: bool,
    detail: String,
}

impl StaticGate {
    /// A gate that always passes.
    pub fn passing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            detail: String::new(),
        }
    }

    /// A gate that always fails with the given detail.
    pub fn failing(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            detail: detail.into(),
        }
    }
}

impl Gate for StaticGate {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, scope: &[String]) -> Result<GateVerdict, ConvergentError> {
        Ok(GateVerdict {
            gate: self.name.clone(),
            passed: self.passed,
            detail: self.detail.clone(),
            scope: scope.to_vec(),
            checked_at: Utc::now(),
        })
    }
}

/// Registry of gates keyed by the predicate they verify.
#[derive(Default)]
pub struct GateRegistry {
    gates: BTreeMap<String, Box<dyn Gate>>,
}

impl GateRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gate for a predicate.
    pub fn register(&mut self, predicate: impl Into<String>, gate: Box<dyn Gate>) {
        self.gates.insert(predicate.into(), gate);
    }

    /// Whether a gate exists for a predicate.
    pub fn has_gate(&self, predicate: &str) -> bool {
        self.gates.contains_key(predicate)
    }

    /// Run the gate registered for `predicate`.
    ///
    /// A missing gate is a failed verdict (there is no evidence the
    /// predicate holds); a gate that crashes or times out is a
    /// `GateFailure` error carrying the inner detail.
    pub fn try_check(
        &self,
        predicate: &str,
        scope: &[String],
        now: DateTime<Utc>,
    ) -> Result<GateVerdict, ConvergentError> {
        match self.gates.get(predicate) {
            None => Ok(GateVerdict {
                gate: predicate.to_string(),
                passed: false,
                detail: format!("no gate registered for predicate `{predicate}`"),
                scope: scope.to_vec(),
                checked_at: now,
            }),
            Some(gate) => gate.run(scope).map_err(|e| {
                tracing::warn!(gate = gate.name(), error = %e, "gate run failed");
                ConvergentError::GateFailure {
                    gate: gate.name().to_string(),
                    detail: e.to_string(),
                }
            }),
        }
    }

    /// Value-level wrapper over [`try_check`](Self::try_check): a crashed
    /// gate is downgraded to a failed verdict so the governor pipeline
    /// can keep going.
    pub fn check(&self, predicate: &str, scope: &[String], now: DateTime<Utc>) -> GateVerdict {
        match self.try_check(predicate, scope, now) {
            Ok(verdict) => verdict,
            Err(ConvergentError::GateFailure { gate, detail }) => GateVerdict {
                gate,
                passed: false,
                detail: format!("gate failed to run: {detail}"),
                scope: scope.to_vec(),
                checked_at: now,
            },
            Err(other) => GateVerdict {
                gate: predicate.to_string(),
                passed: false,
                detail: format!("gate failed to run: {other}"),
                scope: scope.to_vec(),
                checked_at: now,
            },
        }
    }
}

/// One evaluated constraint with its gate verdict.
#[derive(Debug, Clone)]
pub struct ConstraintOutcome {
    /// The constraint that was evaluated.
    pub constraint: Constraint,
    /// Verdict from the backing gate. Absent for advisory constraints
    /// with no registered gate.
    pub verdict: Option<GateVerdict>,
    /// Whether the constraint is satisfied.
    pub satisfied: bool,
    /// The `GateFailure` behind the verdict, when the gate crashed or
    /// timed out rather than genuinely failing.
    pub gate_error: Option<ConvergentError>,
}

impl ConstraintOutcome {
    /// Whether this outcome is a fatal hard-constraint violation.
    pub fn is_fatal(&self) -> bool {
        !self.satisfied && self.constraint.severity == Severity::Hard
    }
}

/// Evaluates typed constraints against gate verdicts.
pub struct ConstraintEvaluator {
    registry: GateRegistry,
}

impl ConstraintEvaluator {
    /// Create an evaluator over a gate registry.
    pub fn new(registry: GateRegistry) -> Self {
        Self { registry }
    }

    /// An evaluator with no gates; every hard constraint fails closed.
    pub fn empty() -> Self {
        Self::new(GateRegistry::new())
    }

    /// The registry.
    pub fn registry(&self) -> &GateRegistry {
        &self.registry
    }

    /// Evaluate a constraint list and fail on the first hard violation.
    ///
    /// A hard constraint whose gate crashed or timed out surfaces the
    /// underlying `GateFailure`; one whose gate genuinely failed is a
    /// `ConstraintViolation`.
    pub fn ensure_satisfied(
        &self,
        constraints: &[Constraint],
        now: DateTime<Utc>,
    ) -> Result<Vec<ConstraintOutcome>, ConvergentError> {
        let outcomes = self.evaluate(constraints, now);
        if let Some(fatal) = outcomes.iter().find(|o| o.is_fatal()) {
            if let Some(gate_error) = &fatal.gate_error {
                return Err(gate_error.clone());
            }
            return Err(ConvergentError::ConstraintViolation {
                subject: fatal.constraint.subject.clone(),
                predicate: fatal.constraint.predicate.clone(),
                detail: fatal
                    .verdict
                    .as_ref()
                    .map(|v| v.detail.clone())
                    .unwrap_or_default(),
            });
        }
        Ok(outcomes)
    }

    /// Evaluate a constraint list.
    ///
    /// Hard constraints are queried via their gates and fail closed when
    /// no gate is registered. Info/warn constraints without a gate are
    /// advisory and count as satisfied.
    pub fn evaluate(
        &self,
        constraints: &[Constraint],
        now: DateTime<Utc>,
    ) -> Vec<ConstraintOutcome> {
        constraints
            .iter()
            .map(|constraint| {
                let needs_gate = constraint.severity == Severity::Hard
                    || self.registry.has_gate(&constraint.predicate);
                if !needs_gate {
                    return ConstraintOutcome {
                        constraint: constraint.clone(),
                        verdict: None,
                        satisfied: true,
                        gate_error: None,
                    };
                }
                let (verdict, gate_error) =
                    match self
                        .registry
                        .try_check(&constraint.predicate, &constraint.scope, now)
                    {
                        Ok(verdict) => (verdict, None),
                        Err(e) => (
                            GateVerdict {
                                gate: constraint.predicate.clone(),
                                passed: false,
                                detail: e.to_string(),
                                scope: constraint.scope.clone(),
                                checked_at: now,
                            },
                            Some(e),
                        ),
                    };
                let satisfied = verdict.passed;
                ConstraintOutcome {
                    constraint: constraint.clone(),
                    verdict: Some(verdict),
                    satisfied,
                    gate_error,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_missing_gate_fails_closed() {
        let registry = GateRegistry::new();
        let verdict = registry.check("tests_pass", &[], t0());
        assert!(!verdict.passed);
        assert!(verdict.detail.contains("no gate registered"));
    }

    #[test]
    fn test_crashing_gate_treated_as_failed() {
        struct CrashingGate;
        impl Gate for CrashingGate {
            fn name(&self) -> &str {
                "crashy"
            }
            fn run(&self, _scope: &[String]) -> Result<GateVerdict, ConvergentError> {
                Err(ConvergentError::Timeout {
                    operation: "gate crashy".to_string(),
                })
            }
        }

        let mut registry = GateRegistry::new();
        registry.register("tests_pass", Box::new(CrashingGate));
        let verdict = registry.check("tests_pass", &[], t0());
        assert!(!verdict.passed);
        assert!(verdict.detail.contains("Timeout"));
    }

    #[test]
    fn test_hard_constraint_fails_without_gate() {
        let evaluator = ConstraintEvaluator::empty();
        let constraints = vec![Constraint::new(
            "tests",
            "tests_pass",
            Severity::Hard,
            vec!["src/".to_string()],
        )];
        let outcomes = evaluator.evaluate(&constraints, t0());
        assert!(outcomes[0].is_fatal());
    }

    #[test]
    fn test_advisory_constraint_without_gate_is_satisfied() {
        let evaluator = ConstraintEvaluator::empty();
        let constraints = vec![Constraint::new("style", "lint_clean", Severity::Warn, vec![])];
        let outcomes = evaluator.evaluate(&constraints, t0());
        assert!(outcomes[0].satisfied);
        assert!(outcomes[0].verdict.is_none());
    }

    #[test]
    fn test_ensure_satisfied_raises_gate_failure_on_crash() {
        struct CrashingGate;
        impl Gate for CrashingGate {
            fn name(&self) -> &str {
                "crashy"
            }
            fn run(&self, _scope: &[String]) -> Result<GateVerdict, ConvergentError> {
                Err(ConvergentError::Timeout {
                    operation: "gate crashy".to_string(),
                })
            }
        }

        let mut registry = GateRegistry::new();
        registry.register("tests_pass", Box::new(CrashingGate));
        let evaluator = ConstraintEvaluator::new(registry);

        let constraints = vec![Constraint::new("tests", "tests_pass", Severity::Hard, vec![])];
        let err = evaluator.ensure_satisfied(&constraints, t0()).unwrap_err();
        match err {
            ConvergentError::GateFailure { gate, detail } => {
                assert_eq!(gate, "crashy");
                assert!(detail.contains("Timeout"));
            }
            other => panic!("expected GateFailure, got {other}"),
        }
    }

    #[test]
    fn test_ensure_satisfied_surfaces_violation() {
        let mut registry = GateRegistry::new();
        registry.register("tests_pass", Box::new(StaticGate::failing("pytest", "1 failure")));
        let evaluator = ConstraintEvaluator::new(registry);

        let constraints = vec![Constraint::new("tests", "tests_pass", Severity::Hard, vec![])];
        let err = evaluator.ensure_satisfied(&constraints, t0()).unwrap_err();
        assert!(matches!(err, ConvergentError::ConstraintViolation { .. }));
    }

    #[test]
    fn test_registered_gate_decides() {
        let mut registry = GateRegistry::new();
        registry.register("tests_pass", Box::new(StaticGate::passing("pytest")));
        registry.register("no_cycles", Box::new(StaticGate::failing("cycles", "2 cycles")));
        let evaluator = ConstraintEvaluator::new(registry);

        let constraints = vec![
            Constraint::new("tests", "tests_pass", Severity::Hard, vec![]),
            Constraint::new("imports", "no_cycles", Severity::Hard, vec![]),
        ];
        let outcomes = evaluator.evaluate(&constraints, t0());
        assert!(outcomes[0].satisfied);
        assert!(outcomes[1].is_fatal());
        assert_eq!(outcomes[1].verdict.as_ref().unwrap().detail, "2 cycles");
    }
}
