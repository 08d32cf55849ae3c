//! Evidence-weighted stability scoring.
//!
//! Stability is a derived confidence in [0, 1] for an intent:
//!
//! ```text
//! score = clamp(Σ w_i · e^(-λ · age_days_i), 0, 1)
//! ```
//!
//! ## Properties
//!
//! - Monotone in additional evidence at the same instant
//! - Strictly decreasing in age absent new evidence
//! - Bounded in [0, 1]
//! - Deterministic given the evidence list and `now`

use chrono::{DateTime, Utc};

use crate::config::EvidenceWeights;
use crate::types::intent::{Evidence, Intent};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Evidence-weighted stability scorer with temporal decay.
#[derive(Debug, Clone)]
pub struct StabilityScorer {
    /// Decay rate lambda, per day.
    decay_rate: f64,
    /// Per-kind base weights.
    weights: EvidenceWeights,
}

impl StabilityScorer {
    /// Create a scorer.
    pub fn new(decay_rate: f64, weights: EvidenceWeights) -> Self {
        Self {
            decay_rate: decay_rate.max(0.0),
            weights,
        }
    }

    /// Decay rate lambda, per day.
    pub fn decay_rate(&self) -> f64 {
        self.decay_rate
    }

    /// Effective weight of one evidence record: the kind's base weight
    /// (manual passes the supplied weight through) decayed by age.
    pub fn evidence_weight_at(&self, evidence: &Evidence, now: DateTime<Utc>) -> f64 {
        let age_days = age_days(evidence.timestamp, now);
        let base = self.weights.base_weight(evidence.kind, evidence.weight);
        base * (-self.decay_rate * age_days).exp()
    }

    /// Stability of an evidence list at `now`. Empty evidence scores 0.
    pub fn score_at(&self, evidence: &[Evidence], now: DateTime<Utc>) -> f64 {
        let sum: f64 = evidence
            .iter()
            .map(|ev| self.evidence_weight_at(ev, now))
            .sum();
        sum.clamp(0.0, 1.0)
    }

    /// Stability of an intent at `now`.
    pub fn intent_score_at(&self, intent: &Intent, now: DateTime<Utc>) -> f64 {
        self.score_at(&intent.evidence, now)
    }
}

/// Age in fractional days, floored at zero for evidence from the future.
fn age_days(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let secs = (now - timestamp).num_milliseconds() as f64 / 1000.0;
    (secs / SECONDS_PER_DAY).max(0.0)
}
