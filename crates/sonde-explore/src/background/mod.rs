//! Workers that run beside the exploration loop.
//!
//! Both communicate with the loop only through channels: the syncer
//! receives triggers, the log watcher reports a fatal marker. Each is
//! closed cooperatively and joined with a bounded wait.

pub mod log_watch;
pub mod syncer;

use std::time::Duration;

use crossbeam::channel::Receiver;

pub use log_watch::{FatalLog, LogWatcher};
pub use syncer::ArtifactSyncer;

/// Pulls device-side artifacts to the host on demand.
pub trait ArtifactSync {
    /// Request a sync without waiting for it. Repeated requests before the
    /// worker wakes collapse into one.
    fn trigger(&self);

    /// Stop the worker, then pull once more and clean the device side.
    fn close(&mut self);
}

/// Watches the agent's log for fatal errors.
pub trait LogMonitor {
    /// A fatal marker seen since the last call, if any.
    fn poll_fatal(&mut self) -> Option<FatalLog>;

    /// Stop watching. Returns the fatal marker if one shows up in the
    /// remainder of the log.
    fn close(&mut self) -> Result<(), FatalLog>;
}

/// Wait for a worker's completion signal. `None` when it did not finish
/// in time; the worker is then left detached.
pub(crate) fn await_done<T>(done: &Receiver<T>, timeout: Duration, worker: &str) -> Option<T> {
    match done.recv_timeout(timeout) {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(worker, timeout_secs = timeout.as_secs_f64(), "worker did not stop in time");
            None
        }
    }
}
