//! Phi: Bayesian-smoothed, decaying trust per (agent, skill domain).
//!
//! ```text
//! phi = clamp((Σ w_i · [outcome_i approved] + p·π) / (Σ w_i + p), min, max)
//! w_i = e^(-λ · age_days_i),  π = 0.5,  p = 2
//! ```
//!
//! ## Properties
//!
//! - New agents converge from the prior π
//! - Old outcomes fade under the decay weight
//! - Scores are strictly bounded in [phi_min, phi_max]
//! - Domains are independent
//! - Recomputation is idempotent

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::error::ConvergentError;
use crate::store::CoordinationStore;
use crate::types::intent::AgentId;

/// The neutral prior a new agent starts from.
pub const PHI_PRIOR: f64 = 0.5;

/// Weight of the prior in the Bayesian smoothing.
pub const PHI_PRIOR_WEIGHT: f64 = 2.0;

const SECONDS_PER_DAY: f64 = 86_400.0;
const CACHE_ENTRIES: usize = 1024;

/// One recorded task outcome for an agent in a domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// The agent whose work was judged.
    pub agent_id: AgentId,
    /// Skill domain the work belongs to.
    pub domain: String,
    /// Whether the work was approved.
    pub approved: bool,
    /// When the outcome was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl OutcomeRecord {
    /// Create an outcome record.
    pub fn new(
        agent_id: AgentId,
        domain: impl Into<String>,
        approved: bool,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            agent_id,
            domain: domain.into(),
            approved,
            recorded_at,
        }
    }
}

/// Trust scorer over a coordination store, with an LRU cache in front of
/// the recomputation.
pub struct PhiScorer<C: CoordinationStore> {
    store: Arc<C>,
    decay_rate: f64,
    phi_min: f64,
    phi_max: f64,
    cache: Mutex<LruCache<(AgentId, String, i64), f64>>,
}

impl<C: CoordinationStore> PhiScorer<C> {
    /// Create a scorer.
    pub fn new(store: Arc<C>, decay_rate: f64, phi_min: f64, phi_max: f64) -> Self {
        Self {
            store,
            decay_rate: decay_rate.max(0.0),
            phi_min,
            phi_max,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_ENTRIES).expect("nonzero cache size"),
            )),
        }
    }

    /// Record a task outcome and invalidate the cache.
    pub fn record_outcome(&self, outcome: &OutcomeRecord) -> Result<(), ConvergentError> {
        self.store.record_outcome(outcome)?;
        self.cache.lock().clear();
        tracing::debug!(
            agent_id = %outcome.agent_id,
            domain = %outcome.domain,
            approved = outcome.approved,
            "phi outcome recorded"
        );
        Ok(())
    }

    /// Phi for `(agent, domain)` at `now`.
    pub fn phi_at(
        &self,
        agent: &AgentId,
        domain: &str,
        now: DateTime<Utc>,
    ) -> Result<f64, ConvergentError> {
        let key = (agent.clone(), domain.to_string(), now.timestamp());
        if let Some(cached) = self.cache.lock().get(&key) {
            return Ok(*cached);
        }

        let outcomes = self.store.outcomes_for(agent, domain)?;
        let mut weight_sum = 0.0;
        let mut approved_sum = 0.0;
        for outcome in &outcomes {
            let age_days =
                ((now - outcome.recorded_at).num_milliseconds() as f64 / 1000.0 / SECONDS_PER_DAY)
                    .max(0.0);
            let w = (-self.decay_rate * age_days).exp();
            weight_sum += w;
            if outcome.approved {
                approved_sum += w;
            }
        }

        let phi = ((approved_sum + PHI_PRIOR_WEIGHT * PHI_PRIOR)
            / (weight_sum + PHI_PRIOR_WEIGHT))
            .clamp(self.phi_min, self.phi_max);

        self.cache.lock().put(key, phi);
        Ok(phi)
    }
}
