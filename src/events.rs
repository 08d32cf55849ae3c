//! Append-only coordination events.
//!
//! Every externally meaningful engine action (publish, merge verdict,
//! consensus decision, sweep) appends an event with a correlation id, so
//! an operator can assemble the timeline of one piece of work across
//! subsystems after the fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ConvergentError;
use crate::store::CoordinationStore;
use crate::types::intent::AgentId;

/// One append-only coordination event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationEvent {
    /// Unique event id.
    pub event_id: String,
    /// Groups events belonging to the same piece of work.
    pub correlation_id: String,
    /// Event type, e.g. `"intent_published"` or `"merge_rejected"`.
    pub event_type: String,
    /// Acting agent, when one is attributable.
    pub agent_id: Option<AgentId>,
    /// Subject of the event (intent id, request id, file path).
    pub subject: Option<String>,
    /// Human-readable detail.
    pub detail: String,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
}

impl CoordinationEvent {
    /// Create an event. The correlation id defaults to the event's own
    /// id until overridden.
    pub fn new(
        event_type: impl Into<String>,
        detail: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let event_id = Uuid::new_v4().to_string();
        Self {
            correlation_id: event_id.clone(),
            event_id,
            event_type: event_type.into(),
            agent_id: None,
            subject: None,
            detail: detail.into(),
            timestamp,
        }
    }

    /// Attach a correlation id.
    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Attach the acting agent.
    pub fn with_agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    /// Attach a subject.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// Restartable cursor over the event log.
///
/// Yields finite batches; the position survives across calls, so a caller
/// can resume where it left off (or persist the position and resume in a
/// later process).
pub struct EventCursor<C: CoordinationStore> {
    store: Arc<C>,
    position: u64,
    batch_size: usize,
}

impl<C: CoordinationStore> EventCursor<C> {
    /// Create a cursor starting at the log head.
    pub fn new(store: Arc<C>, batch_size: usize) -> Self {
        Self::from_position(store, 0, batch_size)
    }

    /// Create a cursor resuming after `position`.
    pub fn from_position(store: Arc<C>, position: u64, batch_size: usize) -> Self {
        Self {
            store,
            position,
            batch_size: batch_size.max(1),
        }
    }

    /// Current position (sequence of the last event yielded).
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Fetch the next batch. Empty when the cursor has drained the log.
    pub fn next_batch(&mut self) -> Result<Vec<CoordinationEvent>, ConvergentError> {
        let batch = self.store.events_after(self.position, self.batch_size)?;
        if let Some((seq, _)) = batch.last() {
            self.position = *seq;
        }
        Ok(batch.into_iter().map(|(_, e)| e).collect())
    }
}

/// An assembled per-correlation timeline.
#[derive(Debug, Clone, Serialize)]
pub struct Timeline {
    /// The correlation id the timeline was assembled for.
    pub correlation_id: String,
    /// Events in non-decreasing timestamp order.
    pub events: Vec<CoordinationEvent>,
}

impl Timeline {
    /// Assemble the timeline for one correlation id from an event slice.
    pub fn assemble(events: &[CoordinationEvent], correlation_id: &str) -> Self {
        let mut matching: Vec<CoordinationEvent> = events
            .iter()
            .filter(|e| e.correlation_id == correlation_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });
        Self {
            correlation_id: correlation_id.to_string(),
            events: matching,
        }
    }
}
