//! Signal types for the pub/sub bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::intent::AgentId;

/// A published signal. Immutable; delivery is at-least-once in
/// per-consumer non-decreasing timestamp order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Engine-assigned id, stable across redelivery.
    pub signal_id: String,
    /// Type string subscribers filter on.
    pub signal_type: String,
    /// The publishing agent.
    pub source_agent: AgentId,
    /// Target agent; broadcast when absent.
    pub target_agent: Option<AgentId>,
    /// Opaque payload.
    pub payload: serde_json::Value,
    /// Publication time; the per-consumer ordering key.
    pub timestamp: DateTime<Utc>,
    /// Optional expiry; expired signals are swept.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Signal {
    /// Create a broadcast signal.
    pub fn broadcast(
        signal_type: impl Into<String>,
        source_agent: AgentId,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            signal_id: Uuid::new_v4().to_string(),
            signal_type: signal_type.into(),
            source_agent,
            target_agent: None,
            payload,
            timestamp,
            expires_at: None,
        }
    }

    /// Create a directed signal.
    pub fn directed(
        signal_type: impl Into<String>,
        source_agent: AgentId,
        target_agent: AgentId,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            target_agent: Some(target_agent),
            ..Self::broadcast(signal_type, source_agent, payload, timestamp)
        }
    }

    /// Attach an expiry.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the signal is past its expiry at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|e| now > e)
    }

    /// Whether the signal should be delivered to `consumer`.
    pub fn addressed_to(&self, consumer: &AgentId) -> bool {
        match &self.target_agent {
            None => true,
            Some(target) => target == consumer,
        }
    }
}
