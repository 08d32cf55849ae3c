//! In-memory signal bus.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::error::ConvergentError;
use crate::types::intent::AgentId;
use crate::types::signal::Signal;

use super::SignalBus;

#[derive(Default)]
struct Inner {
    /// Signals keyed by publish sequence.
    signals: BTreeMap<u64, Signal>,
    /// Next publish sequence.
    next_seq: u64,
    /// Per-consumer cursor: the last sequence delivered.
    cursors: BTreeMap<AgentId, u64>,
}

/// In-process signal bus; contents are lost on drop.
#[derive(Default)]
pub struct InMemorySignalBus {
    inner: RwLock<Inner>,
}

impl InMemorySignalBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of signals currently retained.
    pub fn len(&self) -> usize {
        self.inner.read().signals.len()
    }

    /// Whether the bus retains no signals.
    pub fn is_empty(&self) -> bool {
        self.inner.read().signals.is_empty()
    }
}

impl SignalBus for InMemorySignalBus {
    fn publish(&self, signal: &Signal) -> Result<(), ConvergentError> {
        let mut inner = self.inner.write();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.signals.insert(seq, signal.clone());
        Ok(())
    }

    fn poll(&self, consumer: &AgentId) -> Result<Vec<Signal>, ConvergentError> {
        let mut inner = self.inner.write();
        let cursor = inner.cursors.get(consumer).copied().unwrap_or(0);

        let mut delivered = Vec::new();
        let mut last_seq = cursor;
        for (&seq, signal) in inner.signals.range(cursor..) {
            last_seq = seq + 1;
            if signal.addressed_to(consumer) {
                delivered.push(signal.clone());
            }
        }
        inner.cursors.insert(consumer.clone(), last_seq);

        // Publish sequence already tracks arrival; sorting by timestamp
        // keeps the per-consumer ordering guarantee even for publishers
        // with skewed clocks.
        delivered.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.signal_id.cmp(&b.signal_id))
        });
        Ok(delivered)
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, ConvergentError> {
        let mut inner = self.inner.write();
        let before = inner.signals.len();
        inner.signals.retain(|_, s| !s.is_expired(now));
        Ok(before - inner.signals.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, sec).unwrap()
    }

    fn broadcast(signal_type: &str, at: DateTime<Utc>) -> Signal {
        Signal::broadcast(signal_type, AgentId::new("src"), serde_json::json!({}), at)
    }

    #[test]
    fn test_poll_advances_cursor() {
        let bus = InMemorySignalBus::new();
        bus.publish(&broadcast("a", t(1))).unwrap();
        bus.publish(&broadcast("b", t(2))).unwrap();

        let consumer = AgentId::new("c");
        assert_eq!(bus.poll(&consumer).unwrap().len(), 2);
        assert!(bus.poll(&consumer).unwrap().is_empty());

        bus.publish(&broadcast("c", t(3))).unwrap();
        assert_eq!(bus.poll(&consumer).unwrap().len(), 1);
    }

    #[test]
    fn test_consumers_are_independent() {
        let bus = InMemorySignalBus::new();
        bus.publish(&broadcast("a", t(1))).unwrap();
        assert_eq!(bus.poll(&AgentId::new("x")).unwrap().len(), 1);
        assert_eq!(bus.poll(&AgentId::new("y")).unwrap().len(), 1);
    }

    #[test]
    fn test_targeted_signal_skipped_for_others() {
        let bus = InMemorySignalBus::new();
        let s = Signal::directed("handoff", AgentId::new("a"), AgentId::new("b"), serde_json::json!({}), t(1));
        bus.publish(&s).unwrap();
        assert!(bus.poll(&AgentId::new("c")).unwrap().is_empty());
        assert_eq!(bus.poll(&AgentId::new("b")).unwrap().len(), 1);
    }

    #[test]
    fn test_timestamp_order() {
        let bus = InMemorySignalBus::new();
        for sec in [5u32, 1, 3] {
            bus.publish(&broadcast("t", t(sec))).unwrap();
        }
        let delivered = bus.poll(&AgentId::new("c")).unwrap();
        let times: Vec<_> = delivered.iter().map(|s| s.timestamp).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_sweep_removes_expired_only() {
        let bus = InMemorySignalBus::new();
        bus.publish(&broadcast("keep", t(1))).unwrap();
        bus.publish(&broadcast("drop", t(1)).with_expiry(t(1) + Duration::seconds(5)))
            .unwrap();

        let removed = bus.sweep_expired(t(30)).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(bus.len(), 1);
    }
}
