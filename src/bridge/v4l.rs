use super::{Bridge, ConnectionSet};
use crate::error::{HarnessError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

const TRANSPORT: &str = "usb_cam";

/// Bridge for USB capture devices exposed as `/dev/video<N>` nodes.
///
/// Cameras only have a presence; there is no shell or filesystem behind
/// them, so everything except enumeration is unsupported.
pub struct V4lBridge {
    dev_dir: PathBuf,
}

impl V4lBridge {
    pub fn new() -> Self {
        Self::with_dev_dir("/dev")
    }

    /// Enumerate nodes under another directory instead of `/dev`
    pub fn with_dev_dir(dev_dir: impl Into<PathBuf>) -> Self {
        Self {
            dev_dir: dev_dir.into(),
        }
    }

    fn unsupported(operation: &'static str) -> HarnessError {
        HarnessError::Unsupported {
            operation,
            transport: TRANSPORT,
        }
    }
}

impl Default for V4lBridge {
    fn default() -> Self {
        Self::new()
    }
}

/// Serial a camera port is known by
pub fn serial_for_port(port: u32) -> String {
    format!("cam_{}", port)
}

/// Port number back from a `cam_<N>` serial
pub fn port_from_serial(serial: &str) -> Option<u32> {
    serial.strip_prefix("cam_")?.parse().ok()
}

#[async_trait]
impl Bridge for V4lBridge {
    fn transport(&self) -> &'static str {
        TRANSPORT
    }

    async fn list_reachable_devices(&self) -> Result<ConnectionSet> {
        let mut entries = tokio::fs::read_dir(&self.dev_dir).await.map_err(|e| {
            HarnessError::TransportTransient(format!(
                "Cannot list {}: {}",
                self.dev_dir.display(),
                e
            ))
        })?;

        let mut devices = ConnectionSet::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(port) = name
                .to_str()
                .and_then(|n| n.strip_prefix("video"))
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            devices.insert(serial_for_port(port));
        }
        Ok(devices)
    }

    async fn exec_shell(&self, _serial: &str, _command: &str) -> Result<String> {
        Err(Self::unsupported("shell"))
    }

    async fn push_file(&self, _serial: &str, _local: &Path, _remote: &str) -> Result<()> {
        Err(Self::unsupported("push"))
    }

    async fn pull_file(&self, _serial: &str, _remote: &str, _local: &Path) -> Result<()> {
        Err(Self::unsupported("pull"))
    }

    async fn root_request(&self, _serial: &str) -> Result<bool> {
        Ok(false)
    }
}
