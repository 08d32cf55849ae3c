//! Overlap and conflict types.
//!
//! A conflict is data carried alongside success, never an error: callers
//! receive the classification and both candidate sides and decide (or let
//! the governor decide) what to do.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::intent::IntentId;

/// Why the matcher considered two interfaces to overlap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "match_kind", rename_all = "snake_case")]
pub enum MatchReason {
    /// Normalized names are similar.
    NameSimilarity {
        /// Similarity in [0, 1].
        score: f64,
    },
    /// Kinds are equal (required for any structural match).
    KindMatch {
        /// The shared kind spelling.
        kind: String,
    },
    /// Tag sets overlap.
    TagOverlap {
        /// Jaccard similarity of the tag sets.
        jaccard: f64,
    },
    /// Both signatures parsed and their parameter shapes agree.
    SignatureCompatible,
    /// The semantic matcher related the two specs.
    SemanticRelated {
        /// The matcher's stated reason.
        reason: String,
    },
}

/// A reported overlap between two intents' interface ground.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Overlap {
    /// The intent that was queried.
    pub intent_id: IntentId,
    /// The earlier/other intent it overlaps with.
    pub other_id: IntentId,
    /// Interface name on which the overlap fired.
    pub interface: String,
    /// Combined structural score in [0, 1].
    pub score: f64,
    /// Evidence for the overlap.
    pub reasons: Vec<MatchReason>,
}

/// Classification of a conflict between two overlapping intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Compatible; no action needed.
    None,
    /// The lower-stability side yields.
    Soft,
    /// Stabilities are within epsilon of each other.
    Ambiguous,
    /// Signatures disagree.
    Structural,
    /// The semantic matcher says unrelated despite structural overlap.
    Semantic,
    /// A hard constraint is violated.
    HardConstraint,
    /// Matcher or governor explicitly escalates to a human.
    HumanEscalation,
}

impl ConflictKind {
    /// Whether a merge may proceed past this conflict without resolution.
    pub fn is_mergeable(self) -> bool {
        matches!(self, Self::None | Self::Soft)
    }

    /// Whether this kind aborts a merge outright.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::HardConstraint)
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Soft => write!(f, "soft"),
            Self::Ambiguous => write!(f, "ambiguous"),
            Self::Structural => write!(f, "structural"),
            Self::Semantic => write!(f, "semantic"),
            Self::HardConstraint => write!(f, "hard_constraint"),
            Self::HumanEscalation => write!(f, "human_escalation"),
        }
    }
}

/// A classified disagreement between two overlapping intents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    /// One side (the earlier intent).
    pub left: IntentId,
    /// The other side (the later intent).
    pub right: IntentId,
    /// Classification.
    pub kind: ConflictKind,
    /// Interface name the conflict is about, when interface-scoped.
    pub interface: Option<String>,
    /// Stability of the left side at classification time.
    pub left_stability: f64,
    /// Stability of the right side at classification time.
    pub right_stability: f64,
    /// Human-readable detail.
    pub detail: String,
}

impl Conflict {
    /// The side with higher stability (left wins exact ties, being earlier).
    pub fn stronger_side(&self) -> &IntentId {
        if self.right_stability > self.left_stability {
            &self.right
        } else {
            &self.left
        }
    }

    /// Absolute stability gap between the two sides.
    pub fn stability_gap(&self) -> f64 {
        (self.left_stability - self.right_stability).abs()
    }
}
