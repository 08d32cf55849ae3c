//! Storage backends.
//!
//! Three logical stores back the engine: the intent store (intents,
//! denormalized interfaces, evidence, snapshots, branches), the
//! coordination store (phi outcomes, consensus requests, votes,
//! decisions, events), and the stigmergy store (markers). Backends are
//! interchangeable behind these traits; implementations must guarantee
//! deterministic ordering of results.
//!
//! Every store follows an append-only model except cached scores and
//! consumer cursors, which are updated in place.

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

use crate::error::ConvergentError;
use crate::events::CoordinationEvent;
use crate::phi::OutcomeRecord;
use crate::types::consensus::{ConsensusRequest, Decision, RequestId, Vote};
use crate::types::intent::{AgentId, Evidence, Intent, IntentId};
use crate::types::marker::{MarkerId, StigmergyMarker};
use crate::versioning::{Snapshot, SnapshotId};

/// Result of appending an intent to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The intent was new and received this sequence number.
    Appended(u64),
    /// An identical intent already held this sequence number (no-op).
    Unchanged(u64),
}

impl AppendOutcome {
    /// The sequence number either way.
    pub fn sequence(self) -> u64 {
        match self {
            Self::Appended(seq) | Self::Unchanged(seq) => seq,
        }
    }
}

/// Append-only, totally ordered store of intents plus snapshots and
/// branch refs.
pub trait IntentStore: Send + Sync {
    /// Append an intent. Idempotent on `(intent_id, content_fingerprint)`:
    /// an identical re-publish is a no-op, a differing one fails with
    /// `DuplicateIntent`. The store assigns a monotonic sequence number
    /// on first append.
    fn append(&self, intent: &Intent) -> Result<AppendOutcome, ConvergentError>;

    /// Fetch an intent by id.
    fn get(&self, id: &IntentId) -> Result<Option<Intent>, ConvergentError>;

    /// All intents published by an agent, in arrival order.
    fn list_by_agent(&self, agent: &AgentId) -> Result<Vec<Intent>, ConvergentError>;

    /// Every intent in arrival order. A consistent snapshot of the log.
    fn all_ordered(&self) -> Result<Vec<Intent>, ConvergentError>;

    /// Append evidence to an existing intent.
    fn add_evidence(&self, id: &IntentId, evidence: &Evidence) -> Result<(), ConvergentError>;

    /// Number of intents in the log.
    fn intent_count(&self) -> Result<u64, ConvergentError>;

    /// Persist a sealed snapshot. Idempotent on snapshot id.
    fn put_snapshot(&self, snapshot: &Snapshot) -> Result<(), ConvergentError>;

    /// Fetch a snapshot by id.
    fn get_snapshot(&self, id: &SnapshotId) -> Result<Option<Snapshot>, ConvergentError>;

    /// Point a named branch ref at a snapshot (created or moved).
    fn set_branch(&self, name: &str, snapshot: &SnapshotId) -> Result<(), ConvergentError>;

    /// Resolve a branch ref.
    fn get_branch(&self, name: &str) -> Result<Option<SnapshotId>, ConvergentError>;

    /// All branch refs, ordered by name.
    fn branches(&self) -> Result<Vec<(String, SnapshotId)>, ConvergentError>;
}

/// Store for phi outcomes, consensus state, and the event log.
pub trait CoordinationStore: Send + Sync {
    /// Record one task outcome for phi scoring.
    fn record_outcome(&self, outcome: &OutcomeRecord) -> Result<(), ConvergentError>;

    /// All outcomes for `(agent, domain)`, oldest first.
    fn outcomes_for(
        &self,
        agent: &AgentId,
        domain: &str,
    ) -> Result<Vec<OutcomeRecord>, ConvergentError>;

    /// Persist a consensus request. Fails on id reuse.
    fn put_request(&self, request: &ConsensusRequest) -> Result<(), ConvergentError>;

    /// Fetch a request by id.
    fn get_request(&self, id: &RequestId) -> Result<Option<ConsensusRequest>, ConvergentError>;

    /// Persist a vote. Fails when the agent already voted on the request.
    fn put_vote(&self, vote: &Vote) -> Result<(), ConvergentError>;

    /// All votes for a request, in cast order.
    fn votes_for(&self, id: &RequestId) -> Result<Vec<Vote>, ConvergentError>;

    /// Seal a decision. Fails when one already exists for the request.
    fn put_decision(&self, decision: &Decision) -> Result<(), ConvergentError>;

    /// Fetch the decision for a request.
    fn get_decision(&self, id: &RequestId) -> Result<Option<Decision>, ConvergentError>;

    /// Every sealed decision, oldest first.
    fn decisions(&self) -> Result<Vec<Decision>, ConvergentError>;

    /// Record the human confirmation flag for a request.
    fn record_human_confirmation(&self, id: &RequestId) -> Result<(), ConvergentError>;

    /// Whether a human confirmation is recorded for a request.
    fn human_confirmed(&self, id: &RequestId) -> Result<bool, ConvergentError>;

    /// Append a coordination event; returns its sequence number.
    fn append_event(&self, event: &CoordinationEvent) -> Result<u64, ConvergentError>;

    /// Events with sequence strictly greater than `after`, up to `limit`.
    fn events_after(
        &self,
        after: u64,
        limit: usize,
    ) -> Result<Vec<(u64, CoordinationEvent)>, ConvergentError>;
}

/// Store for stigmergy markers.
pub trait StigmergyStore: Send + Sync {
    /// Insert a marker.
    fn put_marker(&self, marker: &StigmergyMarker) -> Result<(), ConvergentError>;

    /// Fetch a marker by id.
    fn get_marker(&self, id: &MarkerId) -> Result<Option<StigmergyMarker>, ConvergentError>;

    /// Replace a marker in place (strength/reinforcement updates).
    fn update_marker(&self, marker: &StigmergyMarker) -> Result<(), ConvergentError>;

    /// Remove a marker.
    fn remove_marker(&self, id: &MarkerId) -> Result<(), ConvergentError>;

    /// Every marker, ordered by id for determinism.
    fn all_markers(&self) -> Result<Vec<StigmergyMarker>, ConvergentError>;
}

pub use memory::{InMemoryCoordinationStore, InMemoryIntentStore, InMemoryStigmergyStore};

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteCoordinationStore, SqliteIntentStore, SqliteStigmergyStore};
