use super::{Bridge, ConnectionSet};
use crate::error::{HarnessError, Result};
use crate::utils::binary_resolver;
use crate::utils::config::HarnessConfig;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;

/// What adb itself says, after its `error:` prefix, when the device
/// session is gone
const UNREACHABLE_MESSAGES: [&str; 5] = [
    "device offline",
    "no devices/emulators found",
    "device unauthorized",
    "device still authorizing",
    "closed",
];

/// Bridge backed by the adb command line client
pub struct AdbBridge {
    adb_path: PathBuf,
}

impl AdbBridge {
    /// Wrap an already resolved adb binary
    pub fn new(adb_path: PathBuf) -> Self {
        Self { adb_path }
    }

    /// Resolve adb and make sure its server is running.
    ///
    /// A missing binary is `ConfigurationMissing`; there is nothing useful
    /// the harness can do without it.
    pub async fn start(config: &HarnessConfig) -> Result<Self> {
        let adb_path = binary_resolver::find_adb(config.adb_path.as_deref())?;
        let bridge = Self::new(adb_path);

        info!("Starting the ADB server...");
        let output = bridge.run(None, &["start-server"]).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            debug!("ADB start output: {}", stdout.trim());
        }
        if !stderr.trim().is_empty() {
            debug!("ADB start error: {}", stderr.trim());
        }

        Ok(bridge)
    }

    async fn run(&self, serial: Option<&str>, args: &[&str]) -> Result<Output> {
        let mut full_args = Vec::new();
        if let Some(s) = serial {
            full_args.push("-s");
            full_args.push(s);
        }
        full_args.extend_from_slice(args);

        Command::new(&self.adb_path)
            .args(&full_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => HarnessError::ConfigurationMissing {
                    binary: "adb".to_string(),
                    checked: format!("{:?}", self.adb_path),
                },
                _ => HarnessError::TransportTransient(format!(
                    "Failed to execute adb {:?}: {}",
                    full_args, e
                )),
            })
    }

    /// Run a per-device command, mapping failures to the error taxonomy
    async fn run_checked(&self, serial: &str, args: &[&str]) -> Result<String> {
        let output = self.run(Some(serial), args).await?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(classify_failure(serial, &stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl Bridge for AdbBridge {
    fn transport(&self) -> &'static str {
        "android"
    }

    async fn list_reachable_devices(&self) -> Result<ConnectionSet> {
        let output = self.run(None, &["devices"]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HarnessError::TransportTransient(format!(
                "adb devices failed: {}",
                stderr.trim()
            )));
        }
        Ok(parse_devices_output(&String::from_utf8_lossy(
            &output.stdout,
        )))
    }

    async fn exec_shell(&self, serial: &str, command: &str) -> Result<String> {
        let output = self.run(Some(serial), &["shell", command]).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        // Remote commands exit non-zero all the time (grep without a match);
        // only a lost session is an error.
        if !output.status.success() && is_unreachable(&stderr) {
            return Err(HarnessError::unreachable(serial, stderr.trim()));
        }

        let mut text = stdout.into_owned();
        if !stderr.trim().is_empty() {
            text.push_str(&stderr);
        }
        Ok(text)
    }

    async fn push_file(&self, serial: &str, local: &Path, remote: &str) -> Result<()> {
        let local = local.to_string_lossy();
        debug!("Pushing {} to {}:{}", local, serial, remote);
        self.run_checked(serial, &["push", &*local, remote])
            .await
            .map(|_| ())
    }

    async fn pull_file(&self, serial: &str, remote: &str, local: &Path) -> Result<()> {
        let local = local.to_string_lossy();
        debug!("Pulling {}:{} into {}", serial, remote, local);
        self.run_checked(serial, &["pull", remote, &*local])
            .await
            .map(|_| ())
    }

    async fn root_request(&self, serial: &str) -> Result<bool> {
        info!("Rooting device {}", serial);
        let output = self.run(Some(serial), &["root"]).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if stderr.contains("unauthorized") {
            error!(
                "Device {} not rooted (probably) or USB debugging was not allowed: {}",
                serial,
                stderr.trim()
            );
            return Ok(false);
        }
        if !stderr.trim().is_empty() {
            if is_unreachable(&stderr) {
                return Err(HarnessError::unreachable(serial, stderr.trim()));
            }
            error!("Rooting errors on {}: {}", serial, stderr.trim());
        }
        if !stdout.trim().is_empty() {
            info!("Rooting output: {}", stdout.trim());
        }

        Ok(output.status.success() && root_granted(&stdout))
    }

    async fn remount(&self, serial: &str) -> Result<()> {
        info!("Remounting device {}", serial);
        let out = self.run_checked(serial, &["remount"]).await?;
        if !out.trim().is_empty() {
            warn!("Remount output: {}", out.trim());
        }
        Ok(())
    }

    async fn disable_verity(&self, serial: &str) -> Result<()> {
        info!("Disabling verity on device {}", serial);
        let out = self.run_checked(serial, &["disable-verity"]).await?;
        if !out.trim().is_empty() {
            warn!("Disable verity output: {}", out.trim());
        }
        info!("Device {} needs a reboot for verity changes", serial);
        Ok(())
    }

    async fn install(&self, serial: &str, package_file: &Path) -> Result<()> {
        let file = package_file.to_string_lossy();
        self.run_checked(serial, &["install", "-r", &*file])
            .await
            .map(|_| ())
    }
}

/// Serials in `device` state from `adb devices` output.
///
/// Offline and unauthorized entries are listed by adb but cannot take
/// commands, so they are not reachable.
pub fn parse_devices_output(stdout: &str) -> ConnectionSet {
    stdout
        .lines()
        .filter(|line| !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            match parts.as_slice() {
                [serial, "device", ..] => Some(serial.to_string()),
                _ => None,
            }
        })
        .collect()
}

/// True when a line of stderr is adb reporting a lost session.
///
/// Remote shell errors such as `/system/bin/sh: foo: not found` carry no
/// adb prefix and never count.
fn is_unreachable(stderr: &str) -> bool {
    stderr.lines().any(|line| {
        let line = line.trim().to_lowercase();
        let Some(message) = line
            .strip_prefix("adb: error:")
            .or_else(|| line.strip_prefix("error:"))
        else {
            return false;
        };
        let message = message.trim();
        let missing_device = message.starts_with("device '") && message.ends_with("not found");
        missing_device || UNREACHABLE_MESSAGES.iter().any(|m| message.starts_with(m))
    })
}

fn classify_failure(serial: &str, stderr: &str) -> HarnessError {
    if is_unreachable(stderr) {
        HarnessError::unreachable(serial, stderr.trim())
    } else {
        HarnessError::TransportTransient(stderr.trim().to_string())
    }
}

fn root_granted(stdout: &str) -> bool {
    !stdout.contains("cannot run as root")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_devices_output() {
        let stdout = "* daemon not running; starting now at tcp:5037\n\
                      * daemon started successfully\n\
                      List of devices attached\n\
                      R58M123ABC\tdevice\n\
                      emulator-5554\tdevice product:sdk model:sdk transport_id:1\n\
                      0123456789\toffline\n\
                      ZY22\tunauthorized\n\n";
        let devices = parse_devices_output(stdout);
        let expected: ConnectionSet = ["R58M123ABC", "emulator-5554"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(devices, expected);
    }

    #[test]
    fn test_parse_devices_output_empty() {
        assert!(parse_devices_output("List of devices attached\n\n").is_empty());
    }

    #[test]
    fn test_classify_failure() {
        assert!(classify_failure("x", "error: device 'x' not found").is_device_lost());
        assert!(classify_failure("x", "error: device offline").is_device_lost());
        assert!(!classify_failure("x", "error: remote object does not exist").is_device_lost());
        assert!(classify_failure("x", "adb: error: closed").is_device_lost());
        assert!(classify_failure("x", "error: no devices/emulators found").is_device_lost());
    }

    #[test]
    fn test_remote_shell_errors_are_not_session_loss() {
        assert!(!is_unreachable("/system/bin/sh: screenrecord2: not found\n"));
        assert!(!is_unreachable("ls: /sdcard/missing: No such file or directory\n"));
        assert!(!is_unreachable("cat: /proc/closed: not found\n"));
        assert!(is_unreachable("some noise\nerror: device 'R58' not found\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_shell_returns_missing_command_output() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let adb = dir.path().join("adb");
        std::fs::write(
            &adb,
            "#!/bin/sh\necho '/system/bin/sh: screenrecord2: not found' >&2\nexit 127\n",
        )
        .unwrap();
        std::fs::set_permissions(&adb, std::fs::Permissions::from_mode(0o755)).unwrap();

        let bridge = AdbBridge::new(adb);
        let out = bridge.exec_shell("R58", "screenrecord2").await.unwrap();
        assert!(out.contains("screenrecord2: not found"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_shell_reports_missing_device() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let adb = dir.path().join("adb");
        std::fs::write(
            &adb,
            "#!/bin/sh\necho \"adb: error: device 'R58' not found\" >&2\nexit 1\n",
        )
        .unwrap();
        std::fs::set_permissions(&adb, std::fs::Permissions::from_mode(0o755)).unwrap();

        let bridge = AdbBridge::new(adb);
        let err = bridge.exec_shell("R58", "ls").await.unwrap_err();
        assert!(err.is_device_lost());
    }

    #[test]
    fn test_root_granted() {
        assert!(root_granted("restarting adbd as root\n"));
        assert!(root_granted("adbd is already running as root\n"));
        assert!(!root_granted("adbd cannot run as root in production builds\n"));
    }
}
