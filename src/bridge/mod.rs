//! Transport collaborators
//!
//! A bridge is the only way the core reaches a physical device: it lists the
//! reachable serials, runs shell commands and moves files. The registry and
//! the device handles hold it behind `Arc<dyn Bridge>`.

pub mod adb;
pub mod mock;
pub mod v4l;

pub use adb::AdbBridge;
pub use mock::MockBridge;
pub use v4l::V4lBridge;

use crate::error::{HarnessError, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::Path;

/// Set of serials currently reachable through a bridge
pub type ConnectionSet = BTreeSet<String>;

/// Request/response channel to devices of one transport
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Transport name reported in lifecycle events ("android", "usb_cam")
    fn transport(&self) -> &'static str;

    /// Serials that can be talked to right now
    ///
    /// Fails with `TransportTransient` when the bridge itself is unavailable.
    async fn list_reachable_devices(&self) -> Result<ConnectionSet>;

    /// Run a shell command on the device and return its output
    ///
    /// Fails with `DeviceUnreachable` when the device session is gone.
    async fn exec_shell(&self, serial: &str, command: &str) -> Result<String>;

    /// Copy a local file onto the device
    async fn push_file(&self, serial: &str, local: &Path, remote: &str) -> Result<()>;

    /// Copy a file from the device to a local path
    async fn pull_file(&self, serial: &str, remote: &str, local: &Path) -> Result<()>;

    /// Ask the device to restart its bridge daemon with root rights
    ///
    /// Returns whether the device now runs as root. The device usually drops
    /// off the bridge briefly while this happens.
    async fn root_request(&self, serial: &str) -> Result<bool>;

    /// Remount system partitions read-write
    async fn remount(&self, _serial: &str) -> Result<()> {
        Err(HarnessError::Unsupported {
            operation: "remount",
            transport: self.transport(),
        })
    }

    /// Disable dm-verity so a remount survives
    async fn disable_verity(&self, _serial: &str) -> Result<()> {
        Err(HarnessError::Unsupported {
            operation: "disable-verity",
            transport: self.transport(),
        })
    }

    /// Install or update an application package
    async fn install(&self, _serial: &str, _package_file: &Path) -> Result<()> {
        Err(HarnessError::Unsupported {
            operation: "install",
            transport: self.transport(),
        })
    }
}
