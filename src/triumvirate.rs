//! The triumvirate: phi-weighted consensus voting.
//!
//! Votes are weighted at evaluation time (`weighted_score = phi(agent,
//! domain) · confidence`), so a voter's trust at the moment of decision
//! is what counts, not at the moment of voting.
//!
//! ## Semantics
//!
//! - One vote per agent per request; duplicates are validation errors.
//! - Votes cast after the request's deadline are persisted for audit but
//!   excluded from evaluation.
//! - Evaluation before any decisive vote set and before the deadline is
//!   pending, not deadlock; after the deadline an undecidable request
//!   seals as deadlock.
//! - Exactly one decision is ever sealed per request; later evaluations
//!   return it unchanged.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::ConvergentError;
use crate::phi::PhiScorer;
use crate::store::CoordinationStore;
use crate::types::consensus::{
    ConsensusOutcome, ConsensusRequest, Decision, QuorumLevel, RequestId, Vote, VoteChoice,
};

/// What happened to a submitted vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteReception {
    /// The vote arrived inside the window and will count.
    Counted,
    /// The vote arrived after the deadline; stored for audit, ignored by
    /// evaluation.
    StoredLate,
}

/// Result of evaluating a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// No decision yet; the window is open and no rule is satisfied.
    Pending,
    /// The sealed decision.
    Decided(Decision),
}

impl Evaluation {
    /// The decision, when sealed.
    pub fn decision(&self) -> Option<&Decision> {
        match self {
            Self::Pending => None,
            Self::Decided(d) => Some(d),
        }
    }
}

/// Consensus coordinator over a coordination store.
pub struct Triumvirate<C: CoordinationStore> {
    store: Arc<C>,
    phi: Arc<PhiScorer<C>>,
    default_quorum: QuorumLevel,
    default_timeout_seconds: u64,
}

impl<C: CoordinationStore> Triumvirate<C> {
    /// Create a triumvirate.
    pub fn new(
        store: Arc<C>,
        phi: Arc<PhiScorer<C>>,
        default_quorum: QuorumLevel,
        default_timeout_seconds: u64,
    ) -> Self {
        Self {
            store,
            phi,
            default_quorum,
            default_timeout_seconds,
        }
    }

    /// Open a consensus request. Omitted quorum and timeout fall back to
    /// the configured defaults.
    #[allow(clippy::too_many_arguments)]
    pub fn request_consensus(
        &self,
        task_id: impl Into<String>,
        question: impl Into<String>,
        context: serde_json::Value,
        quorum: Option<QuorumLevel>,
        timeout_seconds: Option<u64>,
        artifacts: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<ConsensusRequest, ConvergentError> {
        let request = ConsensusRequest {
            request_id: RequestId::generate(),
            task_id: task_id.into(),
            question: question.into(),
            context,
            quorum: quorum.unwrap_or(self.default_quorum),
            timeout_seconds: timeout_seconds.unwrap_or(self.default_timeout_seconds),
            artifacts,
            created_at: now,
        };
        self.store.put_request(&request)?;
        tracing::info!(
            request_id = %request.request_id,
            quorum = %request.quorum,
            timeout_seconds = request.timeout_seconds,
            "consensus requested"
        );
        Ok(request)
    }

    /// Fetch a request.
    pub fn get_request(&self, id: &RequestId) -> Result<Option<ConsensusRequest>, ConvergentError> {
        self.store.get_request(id)
    }

    /// Submit a vote. Votes are serialized per request; an agent may vote
    /// once. Late votes are stored but will not count.
    pub fn submit_vote(&self, vote: Vote) -> Result<VoteReception, ConvergentError> {
        let request = self
            .store
            .get_request(&vote.request_id)?
            .ok_or_else(|| {
                ConvergentError::validation(format!("unknown consensus request {}", vote.request_id))
            })?;
        let late = vote.cast_at > request.deadline();
        self.store.put_vote(&vote)?;
        tracing::debug!(
            request_id = %vote.request_id,
            agent_id = %vote.agent_id,
            choice = %vote.choice,
            late,
            "vote recorded"
        );
        Ok(if late {
            VoteReception::StoredLate
        } else {
            VoteReception::Counted
        })
    }

    /// Record a human confirmation (required by `unanimous_human`).
    pub fn confirm_human(&self, id: &RequestId) -> Result<(), ConvergentError> {
        self.store.record_human_confirmation(id)
    }

    /// Votes persisted for a request, in cast order.
    pub fn votes(&self, id: &RequestId) -> Result<Vec<Vote>, ConvergentError> {
        self.store.votes_for(id)
    }

    /// The sealed decision for a request, if any.
    pub fn decision(&self, id: &RequestId) -> Result<Option<Decision>, ConvergentError> {
        self.store.get_decision(id)
    }

    /// Every sealed decision, oldest first.
    pub fn decision_history(&self) -> Result<Vec<Decision>, ConvergentError> {
        self.store.decisions()
    }

    /// Evaluate a request at `now`.
    ///
    /// Observes exactly the votes persisted before this call started.
    /// The outcome is a pure function of those votes, the quorum, and
    /// time; sealing it is the only side effect.
    pub fn evaluate(&self, id: &RequestId, now: DateTime<Utc>) -> Result<Evaluation, ConvergentError> {
        if let Some(existing) = self.store.get_decision(id)? {
            return Ok(Evaluation::Decided(existing));
        }

        let request = self
            .store
            .get_request(id)?
            .ok_or_else(|| ConvergentError::validation(format!("unknown consensus request {id}")))?;

        let all_votes = self.store.votes_for(id)?;
        let deadline = request.deadline();
        let expired = now > deadline;
        let eligible: Vec<&Vote> = all_votes.iter().filter(|v| v.cast_at <= deadline).collect();

        // An escalate vote forces the outcome regardless of quorum.
        if eligible.iter().any(|v| v.choice == VoteChoice::Escalate) {
            return self
                .seal(&request, &all_votes, ConsensusOutcome::Escalated, 0.0, 0.0, now)
                .map(Evaluation::Decided);
        }

        // Phi-weight the decisive votes at evaluation time.
        let domain = request.domain();
        let mut approve_weight = 0.0;
        let mut reject_weight = 0.0;
        let mut weighted: Vec<(&Vote, f64)> = Vec::new();
        for &vote in &eligible {
            let phi = self.phi.phi_at(&vote.agent_id, domain, now)?;
            let score = vote.weighted_score(phi);
            match vote.choice {
                VoteChoice::Approve => approve_weight += score,
                VoteChoice::Reject => reject_weight += score,
                VoteChoice::Abstain | VoteChoice::Escalate => {}
            }
            weighted.push((vote, score));
        }

        let outcome = match request.quorum {
            QuorumLevel::Any => {
                if approve_weight > 0.0 {
                    Some(ConsensusOutcome::Approved)
                } else if expired {
                    Some(ConsensusOutcome::Deadlock)
                } else {
                    None
                }
            }
            QuorumLevel::Majority => {
                if approve_weight > reject_weight {
                    Some(ConsensusOutcome::Approved)
                } else if reject_weight > approve_weight {
                    Some(ConsensusOutcome::Rejected)
                } else if !expired {
                    None
                } else {
                    Some(break_tie(&weighted))
                }
            }
            QuorumLevel::Unanimous | QuorumLevel::UnanimousHuman => {
                let substantive: Vec<&&Vote> = eligible
                    .iter()
                    .filter(|v| v.choice != VoteChoice::Abstain)
                    .collect();
                if substantive.is_empty() {
                    if expired {
                        Some(ConsensusOutcome::Deadlock)
                    } else {
                        None
                    }
                } else if substantive.iter().any(|v| v.choice == VoteChoice::Reject) {
                    Some(ConsensusOutcome::Rejected)
                } else if request.quorum == QuorumLevel::UnanimousHuman
                    && !self.store.human_confirmed(id)?
                {
                    // Unanimity holds but the human has not signed off.
                    if expired {
                        Some(ConsensusOutcome::Deadlock)
                    } else {
                        None
                    }
                } else {
                    Some(ConsensusOutcome::Approved)
                }
            }
        };

        match outcome {
            None => Ok(Evaluation::Pending),
            Some(outcome) => self
                .seal(&request, &all_votes, outcome, approve_weight, reject_weight, now)
                .map(Evaluation::Decided),
        }
    }

    fn seal(
        &self,
        request: &ConsensusRequest,
        votes: &[Vote],
        outcome: ConsensusOutcome,
        approve_weight: f64,
        reject_weight: f64,
        now: DateTime<Utc>,
    ) -> Result<Decision, ConvergentError> {
        let decision = Decision {
            request: request.clone(),
            votes: votes.to_vec(),
            outcome,
            approve_weight,
            reject_weight,
            human_confirmed: self.store.human_confirmed(&request.request_id)?,
            decided_at: now,
        };
        self.store.put_decision(&decision)?;
        tracing::info!(
            request_id = %request.request_id,
            outcome = %outcome,
            approve_weight,
            reject_weight,
            "decision sealed"
        );
        Ok(decision)
    }
}

/// Majority tie-break: the single highest-weighted approve-or-reject
/// vote wins its side; an exact top-score tie is a deadlock.
fn break_tie(weighted: &[(&Vote, f64)]) -> ConsensusOutcome {
    let mut best: Option<(&Vote, f64)> = None;
    let mut tied = false;
    for &(vote, score) in weighted {
        if !matches!(vote.choice, VoteChoice::Approve | VoteChoice::Reject) {
            continue;
        }
        match best {
            None => best = Some((vote, score)),
            Some((_, best_score)) => {
                if score > best_score {
                    best = Some((vote, score));
                    tied = false;
                } else if (score - best_score).abs() < f64::EPSILON {
                    tied = true;
                }
            }
        }
    }
    match best {
        Some((vote, _)) if !tied => match vote.choice {
            VoteChoice::Approve => ConsensusOutcome::Approved,
            _ => ConsensusOutcome::Rejected,
        },
        _ => ConsensusOutcome::Deadlock,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phi::OutcomeRecord;
    use crate::store::InMemoryCoordinationStore;
    use crate::types::intent::AgentId;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn triumvirate() -> Triumvirate<InMemoryCoordinationStore> {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let phi = Arc::new(PhiScorer::new(Arc::clone(&store), 0.05, 0.1, 0.95));
        Triumvirate::new(store, phi, QuorumLevel::Majority, 300)
    }

    fn vote(id: &RequestId, agent: &str, choice: VoteChoice, confidence: f64, at: DateTime<Utc>) -> Vote {
        Vote::new(id.clone(), AgentId::new(agent), choice, confidence, "", at).unwrap()
    }

    fn request(t: &Triumvirate<InMemoryCoordinationStore>) -> ConsensusRequest {
        t.request_consensus(
            "task-1",
            "merge the auth refactor?",
            serde_json::json!({}),
            None,
            None,
            vec![],
            t0(),
        )
        .unwrap()
    }

    #[test]
    fn test_no_votes_pending_before_timeout() {
        let t = triumvirate();
        let req = request(&t);
        let eval = t.evaluate(&req.request_id, t0() + Duration::seconds(10)).unwrap();
        assert_eq!(eval, Evaluation::Pending);
    }

    #[test]
    fn test_no_votes_deadlock_after_timeout() {
        let t = triumvirate();
        let req = request(&t);
        let eval = t.evaluate(&req.request_id, t0() + Duration::seconds(301)).unwrap();
        assert_eq!(eval.decision().unwrap().outcome, ConsensusOutcome::Deadlock);
    }

    #[test]
    fn test_majority_decides() {
        let t = triumvirate();
        let req = request(&t);
        t.submit_vote(vote(&req.request_id, "a", VoteChoice::Approve, 0.9, t0())).unwrap();
        t.submit_vote(vote(&req.request_id, "b", VoteChoice::Reject, 0.5, t0())).unwrap();

        let eval = t.evaluate(&req.request_id, t0() + Duration::seconds(60)).unwrap();
        let decision = eval.decision().unwrap();
        assert_eq!(decision.outcome, ConsensusOutcome::Approved);
        assert!(decision.approve_weight > decision.reject_weight);
    }

    #[test]
    fn test_escalate_vote_forces_escalated() {
        let t = triumvirate();
        let req = request(&t);
        t.submit_vote(vote(&req.request_id, "a", VoteChoice::Approve, 1.0, t0())).unwrap();
        t.submit_vote(vote(&req.request_id, "b", VoteChoice::Escalate, 1.0, t0())).unwrap();

        let eval = t.evaluate(&req.request_id, t0() + Duration::seconds(60)).unwrap();
        assert_eq!(eval.decision().unwrap().outcome, ConsensusOutcome::Escalated);
    }

    #[test]
    fn test_duplicate_vote_rejected() {
        let t = triumvirate();
        let req = request(&t);
        t.submit_vote(vote(&req.request_id, "a", VoteChoice::Approve, 0.9, t0())).unwrap();
        let err = t.submit_vote(vote(&req.request_id, "a", VoteChoice::Reject, 0.9, t0()));
        assert!(err.is_err());
    }

    #[test]
    fn test_late_vote_stored_but_ignored() {
        let t = triumvirate();
        let req = request(&t);
        let eval = t.evaluate(&req.request_id, t0() + Duration::seconds(301)).unwrap();
        assert_eq!(eval.decision().unwrap().outcome, ConsensusOutcome::Deadlock);

        let reception = t
            .submit_vote(vote(&req.request_id, "late", VoteChoice::Approve, 1.0, t0() + Duration::seconds(400)))
            .unwrap();
        assert_eq!(reception, VoteReception::StoredLate);

        // Decision is unchanged; the vote exists for audit.
        let again = t.evaluate(&req.request_id, t0() + Duration::seconds(500)).unwrap();
        assert_eq!(again.decision().unwrap().outcome, ConsensusOutcome::Deadlock);
        assert_eq!(t.votes(&req.request_id).unwrap().len(), 1);
    }

    #[test]
    fn test_unanimous_rejected_by_single_reject() {
        let t = triumvirate();
        let req = t
            .request_consensus(
                "task-2",
                "ship it?",
                serde_json::json!({}),
                Some(QuorumLevel::Unanimous),
                None,
                vec![],
                t0(),
            )
            .unwrap();
        t.submit_vote(vote(&req.request_id, "a", VoteChoice::Approve, 1.0, t0())).unwrap();
        t.submit_vote(vote(&req.request_id, "b", VoteChoice::Abstain, 1.0, t0())).unwrap();
        t.submit_vote(vote(&req.request_id, "c", VoteChoice::Reject, 0.2, t0())).unwrap();

        let eval = t.evaluate(&req.request_id, t0() + Duration::seconds(60)).unwrap();
        assert_eq!(eval.decision().unwrap().outcome, ConsensusOutcome::Rejected);
    }

    #[test]
    fn test_unanimous_human_waits_for_confirmation() {
        let t = triumvirate();
        let req = t
            .request_consensus(
                "task-3",
                "delete the legacy tables?",
                serde_json::json!({}),
                Some(QuorumLevel::UnanimousHuman),
                None,
                vec![],
                t0(),
            )
            .unwrap();
        t.submit_vote(vote(&req.request_id, "a", VoteChoice::Approve, 1.0, t0())).unwrap();

        let eval = t.evaluate(&req.request_id, t0() + Duration::seconds(60)).unwrap();
        assert_eq!(eval, Evaluation::Pending);

        t.confirm_human(&req.request_id).unwrap();
        let eval = t.evaluate(&req.request_id, t0() + Duration::seconds(120)).unwrap();
        let decision = eval.decision().unwrap();
        assert_eq!(decision.outcome, ConsensusOutcome::Approved);
        assert!(decision.human_confirmed);
    }

    #[test]
    fn test_phi_weighting_lets_trusted_minority_win() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let phi = Arc::new(PhiScorer::new(Arc::clone(&store), 0.05, 0.1, 0.95));
        let t = Triumvirate::new(Arc::clone(&store), Arc::clone(&phi), QuorumLevel::Majority, 300);

        // Agent a earns high trust; b and c earn low trust.
        for _ in 0..40 {
            phi.record_outcome(&OutcomeRecord::new(AgentId::new("a"), "general", true, t0())).unwrap();
            phi.record_outcome(&OutcomeRecord::new(AgentId::new("b"), "general", false, t0())).unwrap();
            phi.record_outcome(&OutcomeRecord::new(AgentId::new("c"), "general", false, t0())).unwrap();
        }

        let req = t
            .request_consensus("task-4", "adopt design A?", serde_json::json!({}), None, None, vec![], t0())
            .unwrap();
        t.submit_vote(vote(&req.request_id, "a", VoteChoice::Approve, 0.9, t0())).unwrap();
        t.submit_vote(vote(&req.request_id, "b", VoteChoice::Reject, 0.9, t0())).unwrap();
        t.submit_vote(vote(&req.request_id, "c", VoteChoice::Reject, 0.8, t0())).unwrap();

        let eval = t.evaluate(&req.request_id, t0() + Duration::seconds(60)).unwrap();
        assert_eq!(eval.decision().unwrap().outcome, ConsensusOutcome::Approved);
    }
}
