//! # convergent
//!
//! Coordination substrate for fleets of autonomous code-writing agents
//! working in parallel on the same project.
//!
//! The engine answers one question:
//!
//! > Before an agent commits to a design, what have all the other agents
//! > already decided to build?
//!
//! Each agent publishes structured **intents** into an append-only graph
//! and reads the accumulated intents of every other agent before
//! committing. Coherence is an emergent property of the shared
//! structure.
//!
//! ## Architecture
//!
//! ```text
//! publish → IntentGraph → Matcher → StabilityScorer
//!                ↓
//!          VersionedGraph → Governor (constraints → conflicts → economics)
//!                                ↓ escalate
//!                          Triumvirate (phi-weighted votes)
//!                                ↓ outcome
//!                     PhiScorer + StigmergyField + Flocking
//!                                ↓
//!                         ConvergentBridge
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same intent log + same policy parameters → identical snapshot ids
//! - Merge logs replay byte-for-byte or abort with the first divergence
//! - All derived orderings (overlaps, plans, timelines) are total

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod canonical;
pub mod config;
pub mod economics;
pub mod error;
pub mod events;
pub mod flocking;
pub mod gates;
pub mod governor;
pub mod graph;
pub mod health;
pub mod matching;
pub mod phi;
pub mod signals;
pub mod stability;
pub mod stigmergy;
pub mod store;
pub mod sweep;
pub mod triumvirate;
pub mod types;
pub mod versioning;

// Re-exports
pub use types::{
    AgentId, AgentIdentity, Conflict, ConflictKind, ConsensusOutcome, ConsensusRequest,
    Constraint, Decision, Evidence, EvidenceKind, Intent, IntentBuilder, IntentCategory,
    IntentId, InterfaceKind, InterfaceSpec, MarkerId, MarkerType, MatchReason, Overlap,
    QuorumLevel, RequestId, Severity, Signal, StigmergyMarker, Vote, VoteChoice,
};

pub use bridge::{BridgeBuilder, ConvergentBridge, InMemoryBridge, MergeSubmission};
pub use canonical::{canonical_hash, canonical_hash_hex, to_canonical_bytes, to_canonical_string};
pub use config::{EngineConfig, EvidenceWeights, SignalBackendKind};
pub use economics::{EconomicsDecision, EconomicsPolicy};
pub use error::ConvergentError;
pub use events::{CoordinationEvent, EventCursor, Timeline};
pub use flocking::{CohesionCheck, Contention, FlockingCoordinator};
pub use gates::{ConstraintEvaluator, Gate, GateRegistry, GateVerdict, StaticGate};
pub use governor::{DecisionLayer, Governor, GovernorOutcome, GovernorReport};
pub use graph::{ConflictClassifier, ExecutionPlan, IntentGraph};
pub use health::{HealthInputs, HealthIssue, HealthReport};
pub use matching::{Matcher, SemanticMatcher, SemanticVerdict, SignatureShape};
pub use phi::{OutcomeRecord, PhiScorer, PHI_PRIOR, PHI_PRIOR_WEIGHT};
pub use signals::{FilesystemSignalBus, InMemorySignalBus, SignalBus, SignalRouter};
pub use stability::StabilityScorer;
pub use stigmergy::{StigmergyField, SweepStats};
pub use store::{
    AppendOutcome, CoordinationStore, InMemoryCoordinationStore, InMemoryIntentStore,
    InMemoryStigmergyStore, IntentStore, StigmergyStore,
};
pub use sweep::SweepTask;
pub use triumvirate::{Evaluation, Triumvirate, VoteReception};
pub use versioning::{MergeLog, MergeLogEntry, MergeResult, Snapshot, SnapshotId, VersionedGraph};

#[cfg(feature = "sqlite")]
pub use bridge::PersistentBridge;
#[cfg(feature = "sqlite")]
pub use signals::PersistentSignalBus;
#[cfg(feature = "sqlite")]
pub use store::{SqliteCoordinationStore, SqliteIntentStore, SqliteStigmergyStore};

/// Schema version for all protocol types.
/// Increment on breaking changes to any persisted or hashed type.
pub const SCHEMA_VERSION: &str = "1.0.0";
