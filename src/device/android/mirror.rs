//! Screen mirroring through scrcpy
//!
//! Each mirror window is a child process owned by the device handle. They
//! are killed when the handle is released, so a detached device never
//! leaves a window behind.

use crate::error::Result;
use chrono::Local;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use tokio::process::{Child, Command};

/// A running scrcpy process
pub struct MirrorSession {
    child: Child,
    recording: Option<PathBuf>,
}

impl MirrorSession {
    /// Start scrcpy for one device with extra arguments
    pub fn spawn(scrcpy: &Path, serial: &str, extra: &[String]) -> Result<Self> {
        let mut cmd = Command::new(scrcpy);
        cmd.arg("-s").arg(serial).args(extra).kill_on_drop(true);
        debug!("Starting mirror: {:?}", cmd);

        let child = cmd.spawn()?;
        info!(
            "Mirror started for {} (pid {})",
            serial,
            child.id().unwrap_or_default()
        );
        Ok(Self {
            child,
            recording: None,
        })
    }

    /// Start scrcpy recording into `dest_dir`
    pub fn record(scrcpy: &Path, serial: &str, name: &str, dest_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dest_dir)?;
        let file = dest_dir.join(recording_file_name(name));
        let args = vec!["-r".to_string(), file.display().to_string()];

        let mut session = Self::spawn(scrcpy, serial, &args)?;
        session.recording = Some(file);
        Ok(session)
    }

    pub fn recording(&self) -> Option<&Path> {
        self.recording.as_deref()
    }

    /// True while the process has not exited
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    pub async fn kill(mut self) {
        if let Err(e) = self.child.kill().await {
            warn!("Failed to stop mirror process: {}", e);
        }
        if let Some(file) = &self.recording {
            info!("Screen recording saved to {}", file.display());
        }
    }
}

/// `<name>_screenrec_<YYYYmmdd-HHMMSS>.mp4`
pub fn recording_file_name(name: &str) -> String {
    format!(
        "{}_screenrec_{}.mp4",
        name.replace(char::is_whitespace, "_"),
        Local::now().format("%Y%m%d-%H%M%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_file_name() {
        let name = recording_file_name("Pixel 7");
        assert!(name.starts_with("Pixel_7_screenrec_"));
        assert!(name.ends_with(".mp4"));
        // 8 digit date, dash, 6 digit time
        let stamp = &name["Pixel_7_screenrec_".len()..name.len() - 4];
        assert_eq!(stamp.len(), 15);
        assert_eq!(&stamp[8..9], "-");
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_spawn() {
        let result = MirrorSession::spawn(Path::new("/nonexistent/scrcpy"), "R58", &[]);
        assert!(result.is_err());
    }
}
