//! Monitors that run alongside a supervised job.
//!
//! The supervisor starts a memory monitor right before the job when memory
//! checks are enabled and stops every monitor exactly once when the task
//! reaches a terminal state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use sysinfo::System;
use tokio::task::JoinHandle;

/// Estimates peak memory use of a running job.
pub trait MemoryMonitor: Send + Sync {
    /// Starts sampling.
    fn start(&self);

    /// Stops sampling and returns the estimated peak in bytes, if any sample was taken.
    fn stop(&self) -> Option<u64>;
}

/// Watches the liveness of the process that owns the node.
pub trait LivenessMonitor: Send + Sync {
    fn stop(&self);
}

/// Builds a fresh memory monitor for each run.
pub type MemoryMonitorFactory = Arc<dyn Fn() -> Box<dyn MemoryMonitor> + Send + Sync>;

/// Default interval between host memory samples.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Samples host memory usage and reports the peak increase over the
/// first sample, in bytes.
pub struct HostMemoryMonitor {
    interval: Duration,
    peak_increase: Arc<AtomicU64>,
    sampled: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HostMemoryMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            peak_increase: Arc::new(AtomicU64::new(0)),
            sampled: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Factory producing monitors that sample every `interval`.
    pub fn factory(interval: Duration) -> MemoryMonitorFactory {
        Arc::new(move || Box::new(HostMemoryMonitor::new(interval)) as Box<dyn MemoryMonitor>)
    }
}

impl MemoryMonitor for HostMemoryMonitor {
    fn start(&self) {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.is_some() {
            return;
        }

        let interval = self.interval;
        let peak_increase = Arc::clone(&self.peak_increase);
        let sampled = Arc::clone(&self.sampled);

        *handle = Some(tokio::spawn(async move {
            let mut sys = System::new();
            let mut ticker = tokio::time::interval(interval);
            let mut baseline: Option<u64> = None;

            loop {
                ticker.tick().await;
                sys.refresh_memory();
                let used = sys.used_memory();
                let base = *baseline.get_or_insert(used);
                peak_increase.fetch_max(used.saturating_sub(base), Ordering::SeqCst);
                sampled.store(true, Ordering::SeqCst);
            }
        }));
    }

    fn stop(&self) -> Option<u64> {
        if let Some(handle) = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }

        self.sampled
            .load(Ordering::SeqCst)
            .then(|| self.peak_increase.load(Ordering::SeqCst))
    }
}

impl Drop for HostMemoryMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self
            .handle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}
