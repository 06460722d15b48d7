//! Device artifact syncer.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, select, Receiver, Sender};

use super::{await_done, ArtifactSync};
use crate::device::DeviceDriver;

/// How often the worker rechecks for shutdown while idle.
pub const SYNC_WAIT: Duration = Duration::from_secs(1);
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Mirrors the agent's device output directory into the host output
/// directory whenever triggered.
pub struct ArtifactSyncer<D: DeviceDriver + 'static> {
    device: Arc<D>,
    device_dir: String,
    local_dir: PathBuf,
    trigger_tx: Sender<()>,
    stop_tx: Option<Sender<()>>,
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
    closed: bool,
}

impl<D: DeviceDriver + 'static> ArtifactSyncer<D> {
    /// Start the worker. Pulled files land in
    /// `<output_dir>/<basename of device_dir>`.
    pub fn spawn(device: Arc<D>, device_dir: impl Into<String>, output_dir: &Path) -> Self {
        let device_dir = device_dir.into();
        let local_dir = output_dir.join(basename(&device_dir));
        let (trigger_tx, trigger_rx) = bounded::<()>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(1);

        let worker = Worker {
            device: Arc::clone(&device),
            device_dir: device_dir.clone(),
            local_dir: local_dir.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("artifact-sync".into())
            .spawn(move || {
                worker.run(trigger_rx, stop_rx);
                let _ = done_tx.send(());
            });
        let handle = match handle {
            Ok(h) => Some(h),
            Err(e) => {
                tracing::error!(error = %e, "could not start artifact syncer, syncing only on close");
                None
            }
        };

        Self {
            device,
            device_dir,
            local_dir,
            trigger_tx,
            stop_tx: Some(stop_tx),
            done_rx,
            handle,
            closed: false,
        }
    }

    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }
}

impl<D: DeviceDriver + 'static> ArtifactSync for ArtifactSyncer<D> {
    fn trigger(&self) {
        // A full channel already holds a pending request.
        let _ = self.trigger_tx.try_send(());
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let started = Instant::now();

        drop(self.stop_tx.take());
        if let Some(handle) = self.handle.take() {
            tracing::info!("syncing result data from device");
            if await_done(&self.done_rx, JOIN_TIMEOUT, "artifact-sync").is_some() {
                let _ = handle.join();
            }
        }

        let worker = Worker {
            device: Arc::clone(&self.device),
            device_dir: self.device_dir.clone(),
            local_dir: self.local_dir.clone(),
        };
        worker.sync();
        tracing::debug!(dir = %self.device_dir, "removing device output directory");
        if let Err(e) = self.device.shell(&format!("rm -rf {}", self.device_dir)) {
            tracing::error!(error = %e, "could not remove device output directory");
        }
        tracing::info!(secs = started.elapsed().as_secs_f64(), "artifact sync finished");
    }
}

impl<D: DeviceDriver + 'static> Drop for ArtifactSyncer<D> {
    fn drop(&mut self) {
        drop(self.stop_tx.take());
    }
}

struct Worker<D: DeviceDriver> {
    device: Arc<D>,
    device_dir: String,
    local_dir: PathBuf,
}

impl<D: DeviceDriver> Worker<D> {
    fn run(&self, trigger_rx: Receiver<()>, stop_rx: Receiver<()>) {
        loop {
            select! {
                recv(trigger_rx) -> msg => match msg {
                    Ok(()) => self.sync(),
                    Err(_) => break,
                },
                recv(stop_rx) -> _ => break,
                default(SYNC_WAIT) => {}
            }
        }
    }

    /// Pull the device directory, then drop the screenshots just pulled
    /// so the next pull only moves new ones. Failures are logged.
    fn sync(&self) {
        tracing::debug!(from = %self.device_dir, to = %self.local_dir.display(), "syncing data");
        if let Err(e) = self.device.pull_dir(&self.device_dir, &self.local_dir) {
            tracing::error!(error = %e, "device data sync failed");
            return;
        }
        let cleanup = format!("find {} -name \"*.png\" -delete", self.device_dir);
        if let Err(e) = self.device.shell(&cleanup) {
            tracing::error!(error = %e, "could not delete pulled screenshots");
        }
    }
}

fn basename(device_dir: &str) -> &str {
    let trimmed = device_dir.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basename() {
        assert_eq!(basename("/sdcard/output_2024"), "output_2024");
        assert_eq!(basename("/sdcard/output_2024/"), "output_2024");
        assert_eq!(basename("plain"), "plain");
    }
}
