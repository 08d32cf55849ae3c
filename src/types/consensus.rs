//! Consensus voting types: requests, votes, and decisions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::ConvergentError;
use crate::types::intent::AgentId;

/// Quorum rule governing a consensus outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuorumLevel {
    /// Any positive approve weight decides.
    Any,
    /// Approve weight must exceed reject weight.
    Majority,
    /// Every non-abstain, non-escalate vote must approve.
    Unanimous,
    /// Unanimous plus a recorded human confirmation.
    UnanimousHuman,
}

impl QuorumLevel {
    /// Parse a quorum from its lowercase spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "any" => Some(Self::Any),
            "majority" => Some(Self::Majority),
            "unanimous" => Some(Self::Unanimous),
            "unanimous_human" => Some(Self::UnanimousHuman),
            _ => None,
        }
    }
}

impl fmt::Display for QuorumLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Majority => write!(f, "majority"),
            Self::Unanimous => write!(f, "unanimous"),
            Self::UnanimousHuman => write!(f, "unanimous_human"),
        }
    }
}

/// A voter's choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    /// Approve the proposal.
    Approve,
    /// Reject the proposal.
    Reject,
    /// Decline to weigh in.
    Abstain,
    /// Force escalation to a human.
    Escalate,
}

impl fmt::Display for VoteChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approve => write!(f, "approve"),
            Self::Reject => write!(f, "reject"),
            Self::Abstain => write!(f, "abstain"),
            Self::Escalate => write!(f, "escalate"),
        }
    }
}

/// Identifier for a consensus request.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Create from an existing string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request for consensus among agents. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusRequest {
    /// Unique request id.
    pub request_id: RequestId,
    /// Task the question belongs to.
    pub task_id: String,
    /// The question being decided.
    pub question: String,
    /// Opaque context. An optional `"domain"` key selects the phi skill
    /// domain used to weight votes; otherwise `"general"` applies.
    pub context: serde_json::Value,
    /// Quorum rule for this request.
    pub quorum: QuorumLevel,
    /// Voting window in seconds from `created_at`.
    pub timeout_seconds: u64,
    /// Artifact references (file paths, snapshot ids) under discussion.
    pub artifacts: Vec<String>,
    /// When the request was opened.
    pub created_at: DateTime<Utc>,
}

impl ConsensusRequest {
    /// The instant after which evaluation treats the request as expired.
    pub fn deadline(&self) -> DateTime<Utc> {
        self.created_at + Duration::seconds(self.timeout_seconds as i64)
    }

    /// Phi skill domain for weighting votes on this request.
    pub fn domain(&self) -> &str {
        self.context
            .get("domain")
            .and_then(|v| v.as_str())
            .unwrap_or("general")
    }
}

/// A single agent's vote on a request. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    /// The request voted on.
    pub request_id: RequestId,
    /// The voting agent.
    pub agent_id: AgentId,
    /// The choice.
    pub choice: VoteChoice,
    /// Voter confidence in [0, 1].
    pub confidence: f64,
    /// Free-text reasoning.
    pub reasoning: String,
    /// When the vote was cast.
    pub cast_at: DateTime<Utc>,
}

impl Vote {
    /// Create a vote, validating the confidence range.
    pub fn new(
        request_id: RequestId,
        agent_id: AgentId,
        choice: VoteChoice,
        confidence: f64,
        reasoning: impl Into<String>,
        cast_at: DateTime<Utc>,
    ) -> Result<Self, ConvergentError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ConvergentError::validation(format!(
                "vote confidence must be in [0, 1], got {confidence}"
            )));
        }
        Ok(Self {
            request_id,
            agent_id,
            choice,
            confidence,
            reasoning: reasoning.into(),
            cast_at,
        })
    }

    /// Phi-weighted score for this vote, computed at evaluation time.
    pub fn weighted_score(&self, phi: f64) -> f64 {
        phi * self.confidence
    }
}

/// Final outcome of a consensus request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusOutcome {
    /// The proposal passed its quorum rule.
    Approved,
    /// The proposal failed its quorum rule.
    Rejected,
    /// Timeout with no decisive vote set, or an unbreakable tie.
    Deadlock,
    /// An escalate vote forced the request to a human.
    Escalated,
}

impl fmt::Display for ConsensusOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::Deadlock => write!(f, "deadlock"),
            Self::Escalated => write!(f, "escalated"),
        }
    }
}

/// The sealed result of evaluating a request. Exactly one per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// The request that was decided.
    pub request: ConsensusRequest,
    /// Every vote persisted before evaluation started (audit trail).
    pub votes: Vec<Vote>,
    /// The outcome, a pure function of votes + quorum + time.
    pub outcome: ConsensusOutcome,
    /// Sum of phi-weighted approve scores.
    pub approve_weight: f64,
    /// Sum of phi-weighted reject scores.
    pub reject_weight: f64,
    /// Whether a human confirmation was recorded (unanimous_human).
    pub human_confirmed: bool,
    /// When the decision was sealed.
    pub decided_at: DateTime<Utc>,
}
