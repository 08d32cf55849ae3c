//! Pluggable pub/sub signal bus.
//!
//! ## Semantics
//!
//! - **At-least-once delivery**: a consumer's cursor advances only after
//!   signals are handed back from `poll`.
//! - **Ordering**: each consumer sees signals in non-decreasing
//!   timestamp order.
//! - **Durability**: the persistent backend survives process restart;
//!   memory does not; filesystem survives as long as its directory does.
//! - **Expiry**: expired signals are swept on a caller-driven interval.
//!
//! Subscribers register callbacks by signal type on a [`SignalRouter`];
//! pumping the router polls the backend and dispatches.

pub mod filesystem;
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod persistent;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

use crate::error::ConvergentError;
use crate::types::intent::AgentId;
use crate::types::signal::Signal;

pub use filesystem::FilesystemSignalBus;
pub use memory::InMemorySignalBus;

#[cfg(feature = "sqlite")]
pub use persistent::PersistentSignalBus;

/// A pub/sub backend.
pub trait SignalBus: Send + Sync {
    /// Publish a signal.
    fn publish(&self, signal: &Signal) -> Result<(), ConvergentError>;

    /// Deliver the signals addressed to `consumer` that it has not yet
    /// seen, in non-decreasing timestamp order, advancing its cursor.
    fn poll(&self, consumer: &AgentId) -> Result<Vec<Signal>, ConvergentError>;

    /// Remove signals past their expiry. Returns how many were removed.
    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, ConvergentError>;
}

type Callback = Box<dyn Fn(&Signal) + Send + Sync>;

struct Subscription {
    /// Signal type filter; `None` receives everything.
    signal_type: Option<String>,
    callback: Callback,
}

/// Dispatches polled signals to type-filtered callbacks.
pub struct SignalRouter {
    bus: Arc<dyn SignalBus>,
    subscriptions: RwLock<Vec<Subscription>>,
}

impl SignalRouter {
    /// Create a router over a backend.
    pub fn new(bus: Arc<dyn SignalBus>) -> Self {
        Self {
            bus,
            subscriptions: RwLock::new(Vec::new()),
        }
    }

    /// The underlying bus.
    pub fn bus(&self) -> &Arc<dyn SignalBus> {
        &self.bus
    }

    /// Register a callback for a signal type (`None` for all types).
    pub fn subscribe<F>(&self, signal_type: Option<&str>, callback: F)
    where
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        self.subscriptions.write().push(Subscription {
            signal_type: signal_type.map(str::to_string),
            callback: Box::new(callback),
        });
    }

    /// Poll the backend as `consumer` and dispatch each signal to every
    /// matching callback. Returns how many signals were delivered.
    pub fn pump(&self, consumer: &AgentId) -> Result<usize, ConvergentError> {
        let signals = self.bus.poll(consumer)?;
        let subscriptions = self.subscriptions.read();
        for signal in &signals {
            for sub in subscriptions.iter() {
                let type_matches = sub
                    .signal_type
                    .as_deref()
                    .map_or(true, |t| t == signal.signal_type);
                if type_matches {
                    (sub.callback)(signal);
                }
            }
        }
        Ok(signals.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn t(sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, sec).unwrap()
    }

    #[test]
    fn test_router_dispatches_by_type() {
        let bus: Arc<dyn SignalBus> = Arc::new(InMemorySignalBus::new());
        let router = SignalRouter::new(Arc::clone(&bus));

        let task_done = Arc::new(AtomicUsize::new(0));
        let all = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&task_done);
        router.subscribe(Some("task_done"), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&all);
        router.subscribe(None, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&Signal::broadcast("task_done", AgentId::new("a"), serde_json::json!({}), t(1)))
            .unwrap();
        bus.publish(&Signal::broadcast("file_claim", AgentId::new("a"), serde_json::json!({}), t(2)))
            .unwrap();

        let delivered = router.pump(&AgentId::new("b")).unwrap();
        assert_eq!(delivered, 2);
        assert_eq!(task_done.load(Ordering::SeqCst), 1);
        assert_eq!(all.load(Ordering::SeqCst), 2);
    }
}
