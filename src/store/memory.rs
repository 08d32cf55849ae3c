//! In-memory store backends.
//!
//! Fast, per-process, lost on drop. Uses BTreeMap for deterministic
//! iteration order and parking_lot locks for interior mutability, so a
//! single store instance can be shared across worker threads.

use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::error::ConvergentError;
use crate::events::CoordinationEvent;
use crate::phi::OutcomeRecord;
use crate::types::consensus::{ConsensusRequest, Decision, RequestId, Vote};
use crate::types::intent::{AgentId, Evidence, Intent, IntentId};
use crate::types::marker::{MarkerId, StigmergyMarker};
use crate::versioning::{Snapshot, SnapshotId};

use super::{
    AppendOutcome, CoordinationStore, IntentStore, StigmergyStore,
};

// ─────────────────────────────────────────────────────────────────────────────
// Intent store
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct IntentInner {
    /// Intents with their store-assigned sequence numbers.
    intents: BTreeMap<IntentId, (u64, Intent)>,
    /// Arrival order.
    order: Vec<IntentId>,
    /// Sealed snapshots by id.
    snapshots: BTreeMap<String, Snapshot>,
    /// Named branch refs.
    branches: BTreeMap<String, SnapshotId>,
}

/// In-memory intent store.
#[derive(Debug, Default)]
pub struct InMemoryIntentStore {
    inner: RwLock<IntentInner>,
}

impl InMemoryIntentStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl IntentStore for InMemoryIntentStore {
    fn append(&self, intent: &Intent) -> Result<AppendOutcome, ConvergentError> {
        let mut inner = self.inner.write();
        if let Some((seq, existing)) = inner.intents.get(&intent.intent_id) {
            if existing.content_fingerprint() == intent.content_fingerprint() {
                return Ok(AppendOutcome::Unchanged(*seq));
            }
            return Err(ConvergentError::DuplicateIntent {
                intent_id: intent.intent_id.clone(),
            });
        }
        let seq = inner.order.len() as u64;
        inner
            .intents
            .insert(intent.intent_id.clone(), (seq, intent.clone()));
        inner.order.push(intent.intent_id.clone());
        Ok(AppendOutcome::Appended(seq))
    }

    fn get(&self, id: &IntentId) -> Result<Option<Intent>, ConvergentError> {
        Ok(self.inner.read().intents.get(id).map(|(_, i)| i.clone()))
    }

    fn list_by_agent(&self, agent: &AgentId) -> Result<Vec<Intent>, ConvergentError> {
        let inner = self.inner.read();
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.intents.get(id))
            .filter(|(_, i)| &i.agent_id == agent)
            .map(|(_, i)| i.clone())
            .collect())
    }

    fn all_ordered(&self) -> Result<Vec<Intent>, ConvergentError> {
        let inner = self.inner.read();
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.intents.get(id).map(|(_, i)| i.clone()))
            .collect())
    }

    fn add_evidence(&self, id: &IntentId, evidence: &Evidence) -> Result<(), ConvergentError> {
        let mut inner = self.inner.write();
        match inner.intents.get_mut(id) {
            Some((_, intent)) => {
                intent.evidence.push(evidence.clone());
                Ok(())
            }
            None => Err(ConvergentError::validation(format!(
                "cannot add evidence to unknown intent {id}"
            ))),
        }
    }

    fn intent_count(&self) -> Result<u64, ConvergentError> {
        Ok(self.inner.read().order.len() as u64)
    }

    fn put_snapshot(&self, snapshot: &Snapshot) -> Result<(), ConvergentError> {
        self.inner
            .write()
            .snapshots
            .insert(snapshot.snapshot_id.as_str().to_string(), snapshot.clone());
        Ok(())
    }

    fn get_snapshot(&self, id: &SnapshotId) -> Result<Option<Snapshot>, ConvergentError> {
        Ok(self.inner.read().snapshots.get(id.as_str()).cloned())
    }

    fn set_branch(&self, name: &str, snapshot: &SnapshotId) -> Result<(), ConvergentError> {
        self.inner
            .write()
            .branches
            .insert(name.to_string(), snapshot.clone());
        Ok(())
    }

    fn get_branch(&self, name: &str) -> Result<Option<SnapshotId>, ConvergentError> {
        Ok(self.inner.read().branches.get(name).cloned())
    }

    fn branches(&self) -> Result<Vec<(String, SnapshotId)>, ConvergentError> {
        Ok(self
            .inner
            .read()
            .branches
            .iter()
            .map(|(n, s)| (n.clone(), s.clone()))
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Coordination store
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct CoordinationInner {
    outcomes: Vec<OutcomeRecord>,
    requests: BTreeMap<RequestId, ConsensusRequest>,
    votes: BTreeMap<RequestId, Vec<Vote>>,
    decisions: BTreeMap<RequestId, Decision>,
    decision_order: Vec<RequestId>,
    human_confirmations: BTreeMap<RequestId, bool>,
    events: Vec<CoordinationEvent>,
}

/// In-memory coordination store.
#[derive(Debug, Default)]
pub struct InMemoryCoordinationStore {
    inner: RwLock<CoordinationInner>,
}

impl InMemoryCoordinationStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CoordinationStore for InMemoryCoordinationStore {
    fn record_outcome(&self, outcome: &OutcomeRecord) -> Result<(), ConvergentError> {
        self.inner.write().outcomes.push(outcome.clone());
        Ok(())
    }

    fn outcomes_for(
        &self,
        agent: &AgentId,
        domain: &str,
    ) -> Result<Vec<OutcomeRecord>, ConvergentError> {
        Ok(self
            .inner
            .read()
            .outcomes
            .iter()
            .filter(|o| &o.agent_id == agent && o.domain == domain)
            .cloned()
            .collect())
    }

    fn put_request(&self, request: &ConsensusRequest) -> Result<(), ConvergentError> {
        let mut inner = self.inner.write();
        if inner.requests.contains_key(&request.request_id) {
            return Err(ConvergentError::validation(format!(
                "consensus request {} already exists",
                request.request_id
            )));
        }
        inner
            .requests
            .insert(request.request_id.clone(), request.clone());
        Ok(())
    }

    fn get_request(&self, id: &RequestId) -> Result<Option<ConsensusRequest>, ConvergentError> {
        Ok(self.inner.read().requests.get(id).cloned())
    }

    fn put_vote(&self, vote: &Vote) -> Result<(), ConvergentError> {
        let mut inner = self.inner.write();
        let votes = inner.votes.entry(vote.request_id.clone()).or_default();
        if votes.iter().any(|v| v.agent_id == vote.agent_id) {
            return Err(ConvergentError::validation(format!(
                "agent {} already voted on request {}",
                vote.agent_id, vote.request_id
            )));
        }
        votes.push(vote.clone());
        Ok(())
    }

    fn votes_for(&self, id: &RequestId) -> Result<Vec<Vote>, ConvergentError> {
        Ok(self.inner.read().votes.get(id).cloned().unwrap_or_default())
    }

    fn put_decision(&self, decision: &Decision) -> Result<(), ConvergentError> {
        let mut inner = self.inner.write();
        let id = decision.request.request_id.clone();
        if inner.decisions.contains_key(&id) {
            return Err(ConvergentError::validation(format!(
                "decision for request {id} already sealed"
            )));
        }
        inner.decisions.insert(id.clone(), decision.clone());
        inner.decision_order.push(id);
        Ok(())
    }

    fn get_decision(&self, id: &RequestId) -> Result<Option<Decision>, ConvergentError> {
        Ok(self.inner.read().decisions.get(id).cloned())
    }

    fn decisions(&self) -> Result<Vec<Decision>, ConvergentError> {
        let inner = self.inner.read();
        Ok(inner
            .decision_order
            .iter()
            .filter_map(|id| inner.decisions.get(id).cloned())
            .collect())
    }

    fn record_human_confirmation(&self, id: &RequestId) -> Result<(), ConvergentError> {
        self.inner
            .write()
            .human_confirmations
            .insert(id.clone(), true);
        Ok(())
    }

    fn human_confirmed(&self, id: &RequestId) -> Result<bool, ConvergentError> {
        Ok(self
            .inner
            .read()
            .human_confirmations
            .get(id)
            .copied()
            .unwrap_or(false))
    }

    fn append_event(&self, event: &CoordinationEvent) -> Result<u64, ConvergentError> {
        let mut inner = self.inner.write();
        inner.events.push(event.clone());
        Ok(inner.events.len() as u64)
    }

    fn events_after(
        &self,
        after: u64,
        limit: usize,
    ) -> Result<Vec<(u64, CoordinationEvent)>, ConvergentError> {
        let inner = self.inner.read();
        Ok(inner
            .events
            .iter()
            .enumerate()
            .map(|(i, e)| (i as u64 + 1, e.clone()))
            .filter(|(seq, _)| *seq > after)
            .take(limit)
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stigmergy store
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory stigmergy store.
#[derive(Debug, Default)]
pub struct InMemoryStigmergyStore {
    markers: RwLock<BTreeMap<MarkerId, StigmergyMarker>>,
}

impl InMemoryStigmergyStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StigmergyStore for InMemoryStigmergyStore {
    fn put_marker(&self, marker: &StigmergyMarker) -> Result<(), ConvergentError> {
        self.markers
            .write()
            .insert(marker.marker_id.clone(), marker.clone());
        Ok(())
    }

    fn get_marker(&self, id: &MarkerId) -> Result<Option<StigmergyMarker>, ConvergentError> {
        Ok(self.markers.read().get(id).cloned())
    }

    fn update_marker(&self, marker: &StigmergyMarker) -> Result<(), ConvergentError> {
        let mut markers = self.markers.write();
        if !markers.contains_key(&marker.marker_id) {
            return Err(ConvergentError::validation(format!(
                "cannot update unknown marker {}",
                marker.marker_id
            )));
        }
        markers.insert(marker.marker_id.clone(), marker.clone());
        Ok(())
    }

    fn remove_marker(&self, id: &MarkerId) -> Result<(), ConvergentError> {
        self.markers.write().remove(id);
        Ok(())
    }

    fn all_markers(&self) -> Result<Vec<StigmergyMarker>, ConvergentError> {
        Ok(self.markers.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::intent::{EvidenceKind, IntentBuilder, IntentCategory};
    use chrono::{TimeZone, Utc};

    fn t0() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    fn make_intent(id: &str, agent: &str) -> Intent {
        IntentBuilder::new(id, agent, "do a thing", IntentCategory::Decision, t0()).build()
    }

    #[test]
    fn test_append_assigns_monotonic_sequence() {
        let store = InMemoryIntentStore::new();
        let s1 = store.append(&make_intent("a", "x")).unwrap();
        let s2 = store.append(&make_intent("b", "x")).unwrap();
        assert_eq!(s1, AppendOutcome::Appended(0));
        assert_eq!(s2, AppendOutcome::Appended(1));
    }

    #[test]
    fn test_append_idempotent_on_identical_content() {
        let store = InMemoryIntentStore::new();
        let intent = make_intent("a", "x");
        store.append(&intent).unwrap();
        let again = store.append(&intent).unwrap();
        assert_eq!(again, AppendOutcome::Unchanged(0));
        assert_eq!(store.intent_count().unwrap(), 1);
    }

    #[test]
    fn test_append_rejects_differing_content() {
        let store = InMemoryIntentStore::new();
        store.append(&make_intent("a", "x")).unwrap();
        let mut differing = make_intent("a", "x");
        differing.description = "do a different thing".to_string();
        let err = store.append(&differing).unwrap_err();
        assert!(matches!(err, ConvergentError::DuplicateIntent { .. }));
    }

    #[test]
    fn test_evidence_is_additive() {
        let store = InMemoryIntentStore::new();
        let intent = make_intent("a", "x");
        store.append(&intent).unwrap();
        let ev = Evidence::new(EvidenceKind::Committed, 0.0, t0(), "commit");
        store.add_evidence(&intent.intent_id, &ev).unwrap();
        let stored = store.get(&intent.intent_id).unwrap().unwrap();
        assert_eq!(stored.evidence.len(), 1);
    }

    #[test]
    fn test_list_by_agent_preserves_order() {
        let store = InMemoryIntentStore::new();
        store.append(&make_intent("a", "x")).unwrap();
        store.append(&make_intent("b", "y")).unwrap();
        store.append(&make_intent("c", "x")).unwrap();
        let mine = store.list_by_agent(&AgentId::new("x")).unwrap();
        let ids: Vec<_> = mine.iter().map(|i| i.intent_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_one_vote_per_agent() {
        let store = InMemoryCoordinationStore::new();
        let vote = Vote::new(
            RequestId::new("r"),
            AgentId::new("a"),
            crate::types::VoteChoice::Approve,
            0.5,
            "",
            t0(),
        )
        .unwrap();
        store.put_vote(&vote).unwrap();
        assert!(store.put_vote(&vote).is_err());
    }

    #[test]
    fn test_events_cursor() {
        let store = InMemoryCoordinationStore::new();
        for i in 0..5 {
            let event = CoordinationEvent::new("test", format!("event {i}"), t0());
            store.append_event(&event).unwrap();
        }
        let batch = store.events_after(2, 2).unwrap();
        let seqs: Vec<_> = batch.iter().map(|(s, _)| *s).collect();
        assert_eq!(seqs, vec![3, 4]);
    }
}
