//! Background sweep tasks.
//!
//! A sweep (marker evaporation, expired-signal cleanup, bus polling)
//! runs on a dedicated worker thread with an explicit lifecycle: spawn,
//! cooperative stop flag, join on stop. There is no implicit thread
//! pool. For deterministic tests the caller skips the thread entirely
//! and drives the tick closure directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Granularity of the stop-flag check while sleeping between ticks.
const STOP_POLL: Duration = Duration::from_millis(25);

/// A named background sweep with explicit start/stop.
pub struct SweepTask {
    name: String,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SweepTask {
    /// Spawn a worker thread running `tick` every `interval`.
    ///
    /// The first tick runs after one interval, not immediately. The
    /// thread observes the stop flag at 25ms granularity and terminates
    /// before the next tick.
    pub fn spawn<F>(name: impl Into<String>, interval: Duration, tick: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let name = name.into();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let thread_name = name.clone();

        let handle = std::thread::Builder::new()
            .name(format!("convergent-sweep-{name}"))
            .spawn(move || {
                tracing::debug!(sweep = %thread_name, "sweep started");
                loop {
                    let mut slept = Duration::ZERO;
                    while slept < interval {
                        if stop_flag.load(Ordering::Relaxed) {
                            tracing::debug!(sweep = %thread_name, "sweep stopped");
                            return;
                        }
                        let step = STOP_POLL.min(interval - slept);
                        std::thread::sleep(step);
                        slept += step;
                    }
                    if stop_flag.load(Ordering::Relaxed) {
                        tracing::debug!(sweep = %thread_name, "sweep stopped");
                        return;
                    }
                    tick();
                }
            })
            .expect("spawn sweep thread");

        Self {
            name,
            stop,
            handle: Some(handle),
        }
    }

    /// The sweep's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal the worker to stop and wait for it to terminate.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SweepTask {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_tick_runs_and_stop_terminates() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let task = SweepTask::spawn("test", Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(100));
        task.stop();
        let after_stop = ticks.load(Ordering::SeqCst);
        assert!(after_stop >= 1, "tick should have run at least once");

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop, "no ticks after stop");
    }

    #[test]
    fn test_stop_before_first_tick() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let task = SweepTask::spawn("slow", Duration::from_secs(3600), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        // Stop returns promptly despite the long interval.
        task.stop();
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }
}
