//! Stigmergy marker types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::types::intent::AgentId;

/// Unique identifier for a stigmergy marker.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarkerId(String);

impl MarkerId {
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

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of trace an agent leaves for others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerType {
    /// A file was modified.
    FileModified,
    /// A known issue lives at the target.
    KnownIssue,
    /// A reusable pattern was found at the target.
    PatternFound,
    /// The target depends on something noteworthy.
    Dependency,
    /// A quality observation about the target.
    QualitySignal,
}

impl fmt::Display for MarkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileModified => write!(f, "file_modified"),
            Self::KnownIssue => write!(f, "known_issue"),
            Self::PatternFound => write!(f, "pattern_found"),
            Self::Dependency => write!(f, "dependency"),
            Self::QualitySignal => write!(f, "quality_signal"),
        }
    }
}

/// A decaying, reinforceable annotation on a target, left by one agent
/// for others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StigmergyMarker {
    /// Unique marker id.
    pub marker_id: MarkerId,
    /// The depositing agent.
    pub agent_id: AgentId,
    /// Kind of marker.
    pub marker_type: MarkerType,
    /// What the marker is attached to (typically a file path).
    pub target: String,
    /// Free-text content for future agents.
    pub content: String,
    /// Current strength, non-negative. Decays over time.
    pub strength: f64,
    /// When the marker was deposited.
    pub created_at: DateTime<Utc>,
    /// Anchor for decay: deposit time, advanced by each reinforcement
    /// and each evaporation sweep.
    pub last_reinforced_at: DateTime<Utc>,
    /// Optional hard expiry regardless of strength.
    pub expires_at: Option<DateTime<Utc>>,
}

impl StigmergyMarker {
    /// Create a fresh marker.
    pub fn new(
        agent_id: AgentId,
        marker_type: MarkerType,
        target: impl Into<String>,
        content: impl Into<String>,
        strength: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            marker_id: MarkerId::generate(),
            agent_id,
            marker_type,
            target: target.into(),
            content: content.into(),
            strength: strength.max(0.0),
            created_at,
            last_reinforced_at: created_at,
            expires_at: None,
        }
    }

    /// Attach a hard expiry.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the marker is past its hard expiry at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|e| now > e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_marker_type_spelling() {
        let json = serde_json::to_string(&MarkerType::FileModified).unwrap();
        assert_eq!(json, "\"file_modified\"");
        let json = serde_json::to_string(&MarkerType::QualitySignal).unwrap();
        assert_eq!(json, "\"quality_signal\"");
    }

    #[test]
    fn test_negative_strength_clamped() {
        let t = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let m = StigmergyMarker::new(
            AgentId::new("a"),
            MarkerType::KnownIssue,
            "src/lib.rs",
            "flaky test",
            -3.0,
            t,
        );
        assert_eq!(m.strength, 0.0);
    }

    #[test]
    fn test_expiry() {
        let t = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let m = StigmergyMarker::new(
            AgentId::new("a"),
            MarkerType::FileModified,
            "src/lib.rs",
            "",
            1.0,
            t,
        )
        .with_expiry(t + chrono::Duration::days(1));
        assert!(!m.is_expired(t));
        assert!(!m.is_expired(t + chrono::Duration::days(1)));
        assert!(m.is_expired(t + chrono::Duration::days(2)));
    }
}
