//! Engine configuration.
//!
//! ## Float Normalization for Deterministic Hashing
//!
//! The policy parameters that govern merge decisions (decay rates,
//! thresholds, costs) are hashed into every replay log entry. Floats are
//! quantized to integers before hashing so the same configuration always
//! yields the same fingerprint across platforms and serializer versions.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::canonical::{canonical_hash_hex, quantize_float};
use crate::types::intent::EvidenceKind;
use crate::types::QuorumLevel;

/// Which signal bus backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalBackendKind {
    /// In-process only; lost on restart.
    Memory,
    /// One file per signal under a directory; atomic writes, poll scan.
    Filesystem,
    /// Shared single-file database; durable across restart.
    Persistent,
}

/// Per-kind base evidence weights.
///
/// The spec brackets (speculative 0.10–0.30, committed 0.50–0.70,
/// tested 0.70–0.85, consumed 0.85–1.00) are invariants; the exact point
/// inside each bracket is an operator knob. Defaults sit at the midpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceWeights {
    /// Base weight for speculative evidence.
    pub speculative: f64,
    /// Base weight for committed evidence.
    pub committed: f64,
    /// Base weight for tested evidence.
    pub tested: f64,
    /// Base weight for consumed evidence.
    pub consumed: f64,
}

impl EvidenceWeights {
    /// Base weight for a kind. `Manual` has no base; the operator weight
    /// passes through, so this returns the supplied weight.
    pub fn base_weight(&self, kind: EvidenceKind, supplied: f64) -> f64 {
        match kind {
            EvidenceKind::Speculative => self.speculative,
            EvidenceKind::Committed => self.committed,
            EvidenceKind::Tested => self.tested,
            EvidenceKind::Consumed => self.consumed,
            EvidenceKind::Manual => supplied,
        }
    }
}

impl Default for EvidenceWeights {
    fn default() -> Self {
        Self {
            speculative: 0.20,
            committed: 0.60,
            tested: 0.80,
            consumed: 0.90,
        }
    }
}

/// Engine configuration. Every recognized option from the external
/// interface, plus the policy knobs the open questions surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base path for the intent store. Coordination, stigmergy, and
    /// signal stores derive sibling paths. `None` means in-memory.
    pub db_path: Option<PathBuf>,
    /// Quorum used when a request omits one.
    pub default_quorum: QuorumLevel,
    /// Lambda in phi smoothing (per day).
    pub phi_decay_rate: f64,
    /// Lower clamp bound for phi.
    pub phi_min: f64,
    /// Upper clamp bound for phi.
    pub phi_max: f64,
    /// Kappa in marker decay (per day).
    pub stigmergy_evaporation_rate: f64,
    /// Markers strictly below this strength are purged.
    pub stigmergy_min_strength: f64,
    /// Which signal bus backend to use.
    pub signal_backend: SignalBackendKind,
    /// Default consensus timeout in seconds.
    pub vote_timeout_seconds: u64,
    /// Structural overlap score above which a match fires.
    pub structural_match_threshold: f64,
    /// Tau: expected value of escalation above which the economics layer
    /// escalates instead of auto-resolving.
    pub escalation_ev_threshold: f64,
    /// Per-kind base evidence weights.
    pub evidence_weights: EvidenceWeights,
    /// Lambda in stability decay (per day).
    pub stability_decay_rate: f64,
    /// Stability gap at or below which a conflict is ambiguous.
    pub ambiguity_epsilon: f64,
    /// Cost charged against the budget per escalation.
    pub escalation_cost: f64,
    /// Modeled cost of a wrong auto-resolution.
    pub error_cost: f64,
    /// Total escalation budget.
    pub budget: f64,
    /// Cohesion Jaccard below which a task is flagged as drifting.
    pub cohesion_threshold: f64,
    /// How far back separation looks for contending file modifications.
    pub separation_window_days: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            default_quorum: QuorumLevel::Majority,
            phi_decay_rate: 0.05,
            phi_min: 0.1,
            phi_max: 0.95,
            stigmergy_evaporation_rate: 0.1,
            stigmergy_min_strength: 0.05,
            signal_backend: SignalBackendKind::Memory,
            vote_timeout_seconds: 300,
            structural_match_threshold: 0.6,
            escalation_ev_threshold: 0.25,
            evidence_weights: EvidenceWeights::default(),
            stability_decay_rate: 0.1,
            ambiguity_epsilon: 0.15,
            escalation_cost: 0.1,
            error_cost: 1.0,
            budget: 10.0,
            cohesion_threshold: 0.2,
            separation_window_days: 2.0,
        }
    }
}

impl EngineConfig {
    /// Configuration for a persistent deployment rooted at `db_path`.
    pub fn persistent(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: Some(db_path.into()),
            signal_backend: SignalBackendKind::Persistent,
            ..Self::default()
        }
    }

    /// Sibling path for the coordination store.
    pub fn coordination_db_path(&self) -> Option<PathBuf> {
        self.db_path.as_deref().map(|p| sibling(p, "coordination"))
    }

    /// Sibling path for the stigmergy store.
    pub fn stigmergy_db_path(&self) -> Option<PathBuf> {
        self.db_path.as_deref().map(|p| sibling(p, "stigmergy"))
    }

    /// Sibling path for the signal store (or signal directory for the
    /// filesystem backend).
    pub fn signal_db_path(&self) -> Option<PathBuf> {
        self.db_path.as_deref().map(|p| sibling(p, "signals"))
    }

    /// Deterministic hash of the merge-relevant policy parameters.
    ///
    /// Recorded in replay log entries; replay with a different hash is a
    /// divergence by construction.
    pub fn params_hash(&self) -> String {
        let quantized = QuantizedPolicyParams {
            default_quorum: self.default_quorum.to_string(),
            phi_decay_rate: quantize_float(self.phi_decay_rate),
            phi_min: quantize_float(self.phi_min),
            phi_max: quantize_float(self.phi_max),
            stigmergy_evaporation_rate: quantize_float(self.stigmergy_evaporation_rate),
            stigmergy_min_strength: quantize_float(self.stigmergy_min_strength),
            vote_timeout_seconds: self.vote_timeout_seconds,
            structural_match_threshold: quantize_float(self.structural_match_threshold),
            escalation_ev_threshold: quantize_float(self.escalation_ev_threshold),
            evidence_speculative: quantize_float(self.evidence_weights.speculative),
            evidence_committed: quantize_float(self.evidence_weights.committed),
            evidence_tested: quantize_float(self.evidence_weights.tested),
            evidence_consumed: quantize_float(self.evidence_weights.consumed),
            stability_decay_rate: quantize_float(self.stability_decay_rate),
            ambiguity_epsilon: quantize_float(self.ambiguity_epsilon),
            escalation_cost: quantize_float(self.escalation_cost),
            error_cost: quantize_float(self.error_cost),
        };
        canonical_hash_hex(&quantized)
    }
}

/// Derive `base.tag.db`-style sibling paths from the intent db path.
fn sibling(base: &Path, tag: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "convergent".to_string());
    let ext = base
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "db".to_string());
    base.with_file_name(format!("{stem}.{tag}.{ext}"))
}

/// Quantized policy parameters for deterministic hashing.
#[derive(Serialize)]
struct QuantizedPolicyParams {
    default_quorum: String,
    phi_decay_rate: i64,
    phi_min: i64,
    phi_max: i64,
    stigmergy_evaporation_rate: i64,
    stigmergy_min_strength: i64,
    vote_timeout_seconds: u64,
    structural_match_threshold: i64,
    escalation_ev_threshold: i64,
    evidence_speculative: i64,
    evidence_committed: i64,
    evidence_tested: i64,
    evidence_consumed: i64,
    stability_decay_rate: i64,
    ambiguity_epsilon: i64,
    escalation_cost: i64,
    error_cost: i64,
}
