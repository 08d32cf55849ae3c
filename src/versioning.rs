//! Versioned snapshots, branches, merges, and deterministic replay.
//!
//! A snapshot is an immutable reference to an ordered intent set. Its id
//! is the content hash of the ordered intent-id sequence plus parent ids
//! and schema version; creation time is deliberately excluded so that a
//! replayed merge reproduces the recorded id byte-for-byte.
//!
//! ## Determinism contract
//!
//! Given a merge log and the same policy parameters, `replay` reproduces
//! every recorded snapshot id exactly, or aborts with the first point of
//! divergence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::canonical::canonical_hash_hex;
use crate::error::ConvergentError;
use crate::graph::ConflictClassifier;
use crate::store::IntentStore;
use crate::types::conflict::{Conflict, ConflictKind};
use crate::types::intent::{Intent, IntentId};
use crate::SCHEMA_VERSION;

/// Content-hash identifier of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(String);

impl SnapshotId {
    /// Wrap an existing id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable, content-addressed reference to an ordered intent set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Content hash of parents + ordered intent ids + schema version.
    pub snapshot_id: SnapshotId,
    /// Parent snapshots (two for a merge, one for a seal, none for a root).
    pub parents: Vec<SnapshotId>,
    /// The ordered intent-id sequence.
    pub intent_ids: Vec<IntentId>,
    /// When the snapshot was sealed. Not part of the id.
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Compute a snapshot over an ordered intent-id sequence.
    pub fn compute(
        parents: Vec<SnapshotId>,
        intent_ids: Vec<IntentId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let snapshot_id = Self::id_for(&parents, &intent_ids);
        Self {
            snapshot_id,
            parents,
            intent_ids,
            created_at,
        }
    }

    /// The deterministic id for a parent set and intent sequence.
    pub fn id_for(parents: &[SnapshotId], intent_ids: &[IntentId]) -> SnapshotId {
        #[derive(Serialize)]
        struct IdInput<'a> {
            schema_version: &'static str,
            parents: &'a [SnapshotId],
            intent_ids: &'a [IntentId],
        }
        SnapshotId(canonical_hash_hex(&IdInput {
            schema_version: SCHEMA_VERSION,
            parents,
            intent_ids,
        }))
    }

    /// Recompute the id and compare.
    pub fn verify(&self) -> bool {
        Self::id_for(&self.parents, &self.intent_ids) == self.snapshot_id
    }
}

/// Result of attempting a merge.
#[derive(Debug, Clone)]
pub struct MergeResult {
    /// The derived snapshot, present only on a clean merge.
    pub snapshot: Option<Snapshot>,
    /// Incoming-only intents the merge added (or would add).
    pub merged_intents: Vec<IntentId>,
    /// Conflicts the caller must resolve via the governor
    /// (structural / semantic / ambiguous / human escalation).
    pub unresolved: Vec<Conflict>,
    /// A hard-constraint conflict that aborted the merge.
    pub fatal: Option<Conflict>,
}

impl MergeResult {
    /// Whether the merge produced a snapshot.
    pub fn is_clean(&self) -> bool {
        self.snapshot.is_some()
    }

    /// The sealed snapshot, or the reason there is none as an error:
    /// `ConstraintViolation` for a hard-constraint abort,
    /// `ConflictUnresolved` for conflicts awaiting the governor.
    pub fn into_snapshot(self) -> Result<Snapshot, ConvergentError> {
        if let Some(snapshot) = self.snapshot {
            return Ok(snapshot);
        }
        if let Some(fatal) = self.fatal {
            return Err(ConvergentError::ConstraintViolation {
                subject: fatal.interface.unwrap_or_else(|| fatal.left.to_string()),
                predicate: "merge".to_string(),
                detail: fatal.detail,
            });
        }
        let first = self.unresolved.into_iter().next().ok_or_else(|| {
            ConvergentError::backend("merge produced neither snapshot nor conflicts")
        })?;
        Err(ConvergentError::ConflictUnresolved {
            left: first.left,
            right: first.right,
            detail: first.detail,
        })
    }
}

/// One recorded merge: the ordered inputs plus the produced snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeLogEntry {
    /// Base snapshot id.
    pub base: SnapshotId,
    /// Incoming snapshot id.
    pub incoming: SnapshotId,
    /// Policy parameter hash the merge was evaluated under.
    pub policy_hash: String,
    /// Classification timestamp the merge was evaluated at.
    pub evaluated_at: DateTime<Utc>,
    /// The snapshot the merge produced.
    pub result: SnapshotId,
}

/// Append-only log of recorded merges, the input to `replay`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeLog {
    /// Entries in merge order.
    pub entries: Vec<MergeLogEntry>,
}

/// A DAG of snapshots with named branch refs over an intent store.
pub struct VersionedGraph<S: IntentStore> {
    store: Arc<S>,
    classifier: Arc<ConflictClassifier>,
    policy_hash: String,
}

impl<S: IntentStore> VersionedGraph<S> {
    /// Create a versioned view over a store.
    pub fn new(store: Arc<S>, classifier: Arc<ConflictClassifier>, policy_hash: String) -> Self {
        Self {
            store,
            classifier,
            policy_hash,
        }
    }

    /// The policy hash recorded into merge log entries.
    pub fn policy_hash(&self) -> &str {
        &self.policy_hash
    }

    /// Seal the current state of the full log as a snapshot.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Result<Snapshot, ConvergentError> {
        let intent_ids = self
            .store
            .all_ordered()?
            .into_iter()
            .map(|i| i.intent_id)
            .collect();
        let snapshot = Snapshot::compute(Vec::new(), intent_ids, now);
        self.store.put_snapshot(&snapshot)?;
        Ok(snapshot)
    }

    /// Seal an explicit intent-id sequence as a snapshot.
    pub fn seal(
        &self,
        parents: Vec<SnapshotId>,
        intent_ids: Vec<IntentId>,
        now: DateTime<Utc>,
    ) -> Result<Snapshot, ConvergentError> {
        let snapshot = Snapshot::compute(parents, intent_ids, now);
        self.store.put_snapshot(&snapshot)?;
        Ok(snapshot)
    }

    /// Create or move a named branch ref.
    pub fn branch(&self, name: &str, from: &SnapshotId) -> Result<(), ConvergentError> {
        if self.store.get_snapshot(from)?.is_none() {
            return Err(ConvergentError::validation(format!(
                "cannot branch from unknown snapshot {from}"
            )));
        }
        self.store.set_branch(name, from)
    }

    /// Resolve a branch ref.
    pub fn branch_head(&self, name: &str) -> Result<Option<SnapshotId>, ConvergentError> {
        self.store.get_branch(name)
    }

    /// All branch refs.
    pub fn branches(&self) -> Result<Vec<(String, SnapshotId)>, ConvergentError> {
        self.store.branches()
    }

    /// Fetch a snapshot.
    pub fn get_snapshot(&self, id: &SnapshotId) -> Result<Option<Snapshot>, ConvergentError> {
        self.store.get_snapshot(id)
    }

    /// Merge `incoming` into `base`.
    ///
    /// Produces a new snapshot if and only if every intent in `incoming`
    /// not already in `base` is conflict-free against `base` or its
    /// classification is `soft`/`none`. Hard-constraint conflicts abort;
    /// structural/semantic/ambiguous conflicts are returned unresolved
    /// for the governor.
    pub fn merge(
        &self,
        base: &SnapshotId,
        incoming: &SnapshotId,
        now: DateTime<Utc>,
    ) -> Result<MergeResult, ConvergentError> {
        let base_snapshot = self.require_snapshot(base)?;
        let incoming_snapshot = self.require_snapshot(incoming)?;

        let base_set: BTreeSet<&IntentId> = base_snapshot.intent_ids.iter().collect();
        let base_intents = self.load_intents(&base_snapshot.intent_ids)?;

        let mut merged_intents = Vec::new();
        let mut unresolved = Vec::new();

        for incoming_id in &incoming_snapshot.intent_ids {
            if base_set.contains(incoming_id) {
                continue;
            }
            let candidate = self.store.get(incoming_id)?.ok_or_else(|| {
                ConvergentError::backend(format!(
                    "snapshot {incoming} references missing intent {incoming_id}"
                ))
            })?;

            for base_intent in &base_intents {
                if base_intent.agent_id == candidate.agent_id {
                    continue;
                }
                let conflict = self.classifier.classify(base_intent, &candidate, now);
                match conflict.kind {
                    ConflictKind::None | ConflictKind::Soft => {}
                    ConflictKind::HardConstraint => {
                        tracing::warn!(
                            base = %base,
                            incoming = %incoming,
                            left = %conflict.left,
                            right = %conflict.right,
                            "merge aborted on hard constraint"
                        );
                        return Ok(MergeResult {
                            snapshot: None,
                            merged_intents: Vec::new(),
                            unresolved: Vec::new(),
                            fatal: Some(conflict),
                        });
                    }
                    _ => unresolved.push(conflict),
                }
            }
            merged_intents.push(incoming_id.clone());
        }

        if !unresolved.is_empty() {
            tracing::debug!(
                base = %base,
                incoming = %incoming,
                unresolved = unresolved.len(),
                "merge returned unresolved conflicts"
            );
            return Ok(MergeResult {
                snapshot: None,
                merged_intents,
                unresolved,
                fatal: None,
            });
        }

        let mut intent_ids = base_snapshot.intent_ids.clone();
        intent_ids.extend(merged_intents.iter().cloned());
        let snapshot = Snapshot::compute(vec![base.clone(), incoming.clone()], intent_ids, now);
        self.store.put_snapshot(&snapshot)?;

        tracing::info!(
            base = %base,
            incoming = %incoming,
            snapshot = %snapshot.snapshot_id,
            added = merged_intents.len(),
            "merge sealed"
        );

        Ok(MergeResult {
            snapshot: Some(snapshot),
            merged_intents,
            unresolved: Vec::new(),
            fatal: None,
        })
    }

    /// Merge and, when clean, record the entry into a merge log.
    pub fn merge_recorded(
        &self,
        log: &mut MergeLog,
        base: &SnapshotId,
        incoming: &SnapshotId,
        now: DateTime<Utc>,
    ) -> Result<MergeResult, ConvergentError> {
        let result = self.merge(base, incoming, now)?;
        if let Some(snapshot) = &result.snapshot {
            log.entries.push(MergeLogEntry {
                base: base.clone(),
                incoming: incoming.clone(),
                policy_hash: self.policy_hash.clone(),
                evaluated_at: now,
                result: snapshot.snapshot_id.clone(),
            });
        }
        Ok(result)
    }

    /// Replay a merge log, verifying every produced snapshot id.
    ///
    /// Returns the final snapshot id, or `ReplayDivergence` with a diff
    /// of the first differing snapshot. Divergence is fatal for the
    /// replay operation only.
    pub fn replay(&self, log: &MergeLog) -> Result<Option<SnapshotId>, ConvergentError> {
        let mut last = None;
        for (index, entry) in log.entries.iter().enumerate() {
            if entry.policy_hash != self.policy_hash {
                return Err(ConvergentError::ReplayDivergence {
                    index,
                    expected: format!("policy {}", entry.policy_hash),
                    actual: format!("policy {}", self.policy_hash),
                });
            }
            let result = self.merge(&entry.base, &entry.incoming, entry.evaluated_at)?;
            let produced = match result.snapshot {
                Some(s) => s.snapshot_id,
                None => {
                    return Err(ConvergentError::ReplayDivergence {
                        index,
                        expected: entry.result.as_str().to_string(),
                        actual: "no snapshot (merge did not complete)".to_string(),
                    })
                }
            };
            if produced != entry.result {
                return Err(ConvergentError::ReplayDivergence {
                    index,
                    expected: entry.result.as_str().to_string(),
                    actual: produced.as_str().to_string(),
                });
            }
            last = Some(produced);
        }
        Ok(last)
    }

    fn require_snapshot(&self, id: &SnapshotId) -> Result<Snapshot, ConvergentError> {
        self.store
            .get_snapshot(id)?
            .ok_or_else(|| ConvergentError::validation(format!("unknown snapshot {id}")))
    }

    fn load_intents(&self, ids: &[IntentId]) -> Result<Vec<Intent>, ConvergentError> {
        ids.iter()
            .map(|id| {
                self.store.get(id)?.ok_or_else(|| {
                    ConvergentError::backend(format!("snapshot references missing intent {id}"))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvidenceWeights;
    use crate::matching::Matcher;
    use crate::stability::StabilityScorer;
    use crate::store::InMemoryIntentStore;
    use crate::types::intent::{
        Evidence, EvidenceKind, IntentBuilder, IntentCategory, InterfaceKind, InterfaceSpec,
    };
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    fn versioned(store: Arc<InMemoryIntentStore>) -> VersionedGraph<InMemoryIntentStore> {
        let classifier = Arc::new(ConflictClassifier::new(
            Matcher::structural(0.6),
            StabilityScorer::new(0.1, EvidenceWeights::default()),
            0.15,
        ));
        VersionedGraph::new(store, classifier, "policy-test".to_string())
    }

    fn intent(id: &str, agent: &str, iface: &str) -> Intent {
        IntentBuilder::new(id, agent, format!("claim {iface}"), IntentCategory::Interface, t0())
            .interface(InterfaceSpec::new(iface, InterfaceKind::Class, vec![]))
            .evidence(Evidence::new(EvidenceKind::Committed, 0.0, t0(), "test"))
            .build()
    }

    #[test]
    fn test_snapshot_id_deterministic_and_time_free() {
        let ids = vec![IntentId::new("a"), IntentId::new("b")];
        let s1 = Snapshot::compute(vec![], ids.clone(), t0());
        let s2 = Snapshot::compute(vec![], ids, t0() + chrono::Duration::days(1));
        assert_eq!(s1.snapshot_id, s2.snapshot_id);
        assert!(s1.verify());
    }

    #[test]
    fn test_snapshot_id_sensitive_to_order() {
        let s1 = Snapshot::compute(vec![], vec![IntentId::new("a"), IntentId::new("b")], t0());
        let s2 = Snapshot::compute(vec![], vec![IntentId::new("b"), IntentId::new("a")], t0());
        assert_ne!(s1.snapshot_id, s2.snapshot_id);
    }

    #[test]
    fn test_branch_requires_known_snapshot() {
        let store = Arc::new(InMemoryIntentStore::new());
        let vg = versioned(Arc::clone(&store));
        assert!(vg.branch("main", &SnapshotId::new("nope")).is_err());

        let snap = vg.snapshot(t0()).unwrap();
        vg.branch("main", &snap.snapshot_id).unwrap();
        assert_eq!(vg.branch_head("main").unwrap(), Some(snap.snapshot_id));
    }

    #[test]
    fn test_clean_merge_produces_union_snapshot() {
        let store = Arc::new(InMemoryIntentStore::new());
        let vg = versioned(Arc::clone(&store));

        let a = intent("i-a", "agent-a", "AuthService");
        let b = intent("i-b", "agent-b", "PaymentGateway");
        store.append(&a).unwrap();
        let base = vg.seal(vec![], vec![a.intent_id.clone()], t0()).unwrap();
        store.append(&b).unwrap();
        let incoming = vg
            .seal(vec![], vec![a.intent_id.clone(), b.intent_id.clone()], t0())
            .unwrap();

        let result = vg
            .merge(&base.snapshot_id, &incoming.snapshot_id, t0())
            .unwrap();
        assert!(result.is_clean());
        let snapshot = result.snapshot.unwrap();
        assert_eq!(snapshot.intent_ids.len(), 2);
        assert_eq!(snapshot.parents.len(), 2);
    }

    #[test]
    fn test_ambiguous_conflict_blocks_merge() {
        let store = Arc::new(InMemoryIntentStore::new());
        let vg = versioned(Arc::clone(&store));

        let a = intent("i-a", "agent-a", "User");
        let b = intent("i-b", "agent-b", "User");
        store.append(&a).unwrap();
        store.append(&b).unwrap();
        let base = vg.seal(vec![], vec![a.intent_id.clone()], t0()).unwrap();
        let incoming = vg.seal(vec![], vec![b.intent_id.clone()], t0()).unwrap();

        let result = vg
            .merge(&base.snapshot_id, &incoming.snapshot_id, t0())
            .unwrap();
        assert!(!result.is_clean());
        assert_eq!(result.unresolved.len(), 1);
        assert_eq!(result.unresolved[0].kind, ConflictKind::Ambiguous);

        let err = result.into_snapshot().unwrap_err();
        assert!(matches!(err, ConvergentError::ConflictUnresolved { .. }));
    }

    #[test]
    fn test_replay_reproduces_merge_log() {
        let store = Arc::new(InMemoryIntentStore::new());
        let vg = versioned(Arc::clone(&store));

        let a = intent("i-a", "agent-a", "AuthService");
        let b = intent("i-b", "agent-b", "PaymentGateway");
        let c = intent("i-c", "agent-c", "SearchIndex");
        for i in [&a, &b, &c] {
            store.append(i).unwrap();
        }

        let base = vg.seal(vec![], vec![a.intent_id.clone()], t0()).unwrap();
        let s_b = vg.seal(vec![], vec![b.intent_id.clone()], t0()).unwrap();
        let s_c = vg.seal(vec![], vec![c.intent_id.clone()], t0()).unwrap();

        let mut log = MergeLog::default();
        let m1 = vg
            .merge_recorded(&mut log, &base.snapshot_id, &s_b.snapshot_id, t0())
            .unwrap();
        let head = m1.snapshot.unwrap().snapshot_id;
        let m2 = vg
            .merge_recorded(&mut log, &head, &s_c.snapshot_id, t0())
            .unwrap();
        let final_id = m2.snapshot.unwrap().snapshot_id;

        assert_eq!(log.entries.len(), 2);
        let replayed = vg.replay(&log).unwrap();
        assert_eq!(replayed, Some(final_id));
    }

    #[test]
    fn test_replay_divergence_on_policy_change() {
        let store = Arc::new(InMemoryIntentStore::new());
        let vg = versioned(Arc::clone(&store));

        let a = intent("i-a", "agent-a", "AuthService");
        store.append(&a).unwrap();
        let base = vg.seal(vec![], vec![], t0()).unwrap();
        let incoming = vg.seal(vec![], vec![a.intent_id.clone()], t0()).unwrap();

        let mut log = MergeLog::default();
        vg.merge_recorded(&mut log, &base.snapshot_id, &incoming.snapshot_id, t0())
            .unwrap();
        log.entries[0].policy_hash = "different-policy".to_string();

        let err = vg.replay(&log).unwrap_err();
        assert!(matches!(err, ConvergentError::ReplayDivergence { index: 0, .. }));
    }
}
