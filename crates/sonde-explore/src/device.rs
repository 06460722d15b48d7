//! Live device access for scripts and background pulls.

use std::path::Path;

use sonde_transport::{AdbDevice, TransportError};

/// Direct device operations outside the fuzzing agent.
///
/// The exploration loop hands this to property scripts while the artifact
/// syncer pulls through it from its own thread.
pub trait DeviceDriver: Send + Sync {
    fn shell(&self, command: &str) -> Result<String, TransportError>;

    fn app_stop(&self, package: &str) -> Result<(), TransportError>;

    /// Copy the contents of `remote` into `local`, creating it if needed.
    fn pull_dir(&self, remote: &str, local: &Path) -> Result<(), TransportError>;
}

impl DeviceDriver for AdbDevice {
    fn shell(&self, command: &str) -> Result<String, TransportError> {
        AdbDevice::shell(self, command)
    }

    fn app_stop(&self, package: &str) -> Result<(), TransportError> {
        AdbDevice::app_stop(self, package)
    }

    fn pull_dir(&self, remote: &str, local: &Path) -> Result<(), TransportError> {
        AdbDevice::pull_dir(self, remote, local)
    }
}

impl<D: DeviceDriver + ?Sized> DeviceDriver for std::sync::Arc<D> {
    fn shell(&self, command: &str) -> Result<String, TransportError> {
        (**self).shell(command)
    }

    fn app_stop(&self, package: &str) -> Result<(), TransportError> {
        (**self).app_stop(package)
    }

    fn pull_dir(&self, remote: &str, local: &Path) -> Result<(), TransportError> {
        (**self).pull_dir(remote, local)
    }
}
