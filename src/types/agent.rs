//! Agent identity.

use serde::{Deserialize, Serialize};

use crate::types::intent::AgentId;

/// Identity of a participating agent.
///
/// The cached `phi_score` is advisory only; authoritative scores come
/// from the phi scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Unique agent id.
    pub agent_id: AgentId,
    /// Role in the fleet, e.g. `"implementer"` or `"reviewer"`.
    pub role: String,
    /// Model backing the agent.
    pub model: String,
    /// Cached trust score; may be stale.
    pub phi_score: Option<f64>,
}

impl AgentIdentity {
    /// Create an identity with no cached score.
    pub fn new(
        agent_id: AgentId,
        role: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            agent_id,
            role: role.into(),
            model: model.into(),
            phi_score: None,
        }
    }
}
