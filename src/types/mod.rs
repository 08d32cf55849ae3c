//! Protocol entities for the coordination engine.

pub mod agent;
pub mod conflict;
pub mod consensus;
pub mod intent;
pub mod marker;
pub mod signal;

pub use agent::AgentIdentity;
pub use conflict::{Conflict, ConflictKind, MatchReason, Overlap};
pub use consensus::{
    ConsensusOutcome, ConsensusRequest, Decision, QuorumLevel, RequestId, Vote, VoteChoice,
};
pub use intent::{
    AgentId, Constraint, Evidence, EvidenceKind, Intent, IntentBuilder, IntentCategory, IntentId,
    InterfaceKind, InterfaceSpec, Severity,
};
pub use marker::{MarkerId, MarkerType, StigmergyMarker};
pub use signal::Signal;
