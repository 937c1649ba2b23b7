//! Device properties and power state

use super::AndroidDevice;
use crate::device::DeviceHandle;
use crate::error::{HarnessError, Result};
use crate::settings::DeviceInfo;
use log::{debug, info, warn};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Whether the screen is off and the keyguard is up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepState {
    pub sleeping: bool,
    pub lock_screen_shown: Option<bool>,
}

/// Parse `mSleeping=true mLockScreenShown=false`
pub fn parse_sleep_state(output: &str) -> Option<SleepState> {
    let mut sleeping = None;
    let mut lock_screen_shown = None;
    for token in output.split_whitespace() {
        if let Some((key, value)) = token.split_once('=') {
            let flag = match value {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            };
            match key {
                "mSleeping" => sleeping = flag,
                "mLockScreenShown" => lock_screen_shown = flag,
                _ => {}
            }
        }
    }
    sleeping.map(|sleeping| SleepState {
        sleeping,
        lock_screen_shown,
    })
}

/// Screen size from window manager output.
///
/// Handles `mUnrestrictedScreen=(0,0) 1080x1920`, `Physical size: 1080x2400`
/// and the bracketed `mUnrestricted=[0,0][1080,2400]` form.
pub fn parse_resolution(output: &str) -> Option<(u32, u32)> {
    static SIZE: OnceLock<Regex> = OnceLock::new();
    static RECT: OnceLock<Regex> = OnceLock::new();
    let size = SIZE.get_or_init(|| Regex::new(r"(\d+)x(\d+)").expect("size regex"));
    let rect = RECT.get_or_init(|| Regex::new(r"\]\[(\d+),(\d+)\]").expect("rect regex"));

    let caps = size.captures(output).or_else(|| rect.captures(output))?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

/// Major release number from `ro.build.version.release` ("8.1.0" -> 8)
pub fn parse_major_version(release: &str) -> Option<u32> {
    release.trim().split('.').next()?.parse().ok()
}

/// `pm list packages` output, sorted
pub fn parse_packages(output: &str) -> Vec<String> {
    let mut packages: Vec<String> = output
        .lines()
        .filter_map(|l| l.trim().strip_prefix("package:"))
        .map(str::to_string)
        .collect();
    packages.sort();
    packages
}

impl AndroidDevice {
    /// Read a system property, `None` when unset or unreadable
    pub async fn getprop(&self, name: &str) -> Option<String> {
        match self.exec_remote(&format!("getprop {}", name)).await {
            Ok(out) => {
                let value = out.trim();
                (!value.is_empty()).then(|| value.to_string())
            }
            Err(e) => {
                debug!("getprop {} failed: {}", name, e);
                None
            }
        }
    }

    pub async fn model(&self) -> Option<String> {
        self.getprop("ro.product.model").await
    }

    pub async fn product_name(&self) -> Option<String> {
        self.getprop("ro.product.name").await
    }

    pub async fn manufacturer(&self) -> Option<String> {
        self.getprop("ro.product.manufacturer").await
    }

    pub async fn board(&self) -> Option<String> {
        self.getprop("ro.product.board").await
    }

    pub async fn cpu_abi(&self) -> Option<String> {
        self.getprop("ro.product.cpu.abi").await
    }

    pub async fn release(&self) -> Option<String> {
        self.getprop("ro.build.version.release").await
    }

    pub async fn sdk_version(&self) -> Option<u32> {
        self.getprop("ro.build.version.sdk").await?.parse().ok()
    }

    pub async fn screen_resolution(&self) -> Option<(u32, u32)> {
        for cmd in ["dumpsys window | grep \"mUnrestricted\"", "wm size"] {
            if let Ok(out) = self.exec_remote(cmd).await {
                if let Some(size) = parse_resolution(&out) {
                    return Some(size);
                }
            }
        }
        None
    }

    /// Power manager wakefulness ("Awake", "Asleep", "Dozing")
    pub async fn wakefulness(&self) -> Option<String> {
        let out = self
            .exec_remote("dumpsys activity | grep -E 'mWakefulness'")
            .await
            .ok()?;
        let (_, value) = out.trim().split_once('=')?;
        Some(value.trim().to_string())
    }

    pub async fn sleep_state(&self) -> Option<SleepState> {
        let out = self
            .exec_remote("dumpsys activity | grep -E 'mSleeping'")
            .await
            .ok()?;
        parse_sleep_state(&out)
    }

    /// Turn the screen on and dismiss the keyguard if the device sleeps
    pub async fn unlock_if_sleeping(&self) -> Result<()> {
        match self.sleep_state().await {
            Some(state) if state.sleeping => {
                info!("{} is sleeping, waking it up", self.friendly_name());
                self.exec_remote("input keyevent 26").await?;
                self.exec_remote("input keyevent 82").await?;
            }
            Some(_) => debug!("{} is awake", self.friendly_name()),
            None => debug!("Could not read sleep state of {}", self.friendly_name()),
        }
        Ok(())
    }

    /// Keep the screen on while plugged in
    pub async fn keep_awake(&self) -> Result<()> {
        self.exec_remote("settings put global stay_on_while_plugged_in 1")
            .await?;
        self.exec_remote("settings put system screen_off_timeout 9999999")
            .await?;
        Ok(())
    }

    pub async fn installed_packages(&self) -> Result<Vec<String>> {
        Ok(parse_packages(&self.exec_remote("pm list packages").await?))
    }

    pub async fn is_installed(&self, package: &str) -> Result<bool> {
        let out = self
            .exec_remote(&format!("pm list packages {}", package))
            .await?;
        Ok(parse_packages(&out).iter().any(|p| p == package))
    }

    pub async fn install_apk(&self, package_file: &Path) -> Result<()> {
        info!(
            "Installing {} on {}",
            package_file.display(),
            self.friendly_name()
        );
        let result = self.bridge.install(self.serial(), package_file).await;
        if let Err(e) = &result {
            self.core.check_lost(e);
        }
        result
    }

    pub async fn uninstall_apk(&self, package: &str) -> Result<()> {
        let out = self.exec_remote(&format!("pm uninstall {}", package)).await?;
        if out.contains("Success") {
            Ok(())
        } else {
            Err(HarnessError::UnexpectedShellOutput {
                command: format!("pm uninstall {}", package),
                output: out.trim().to_string(),
            })
        }
    }

    pub async fn reboot(&self) -> Result<()> {
        info!("Rebooting {}", self.friendly_name());
        match self.exec_remote("reboot").await {
            Ok(_) => Ok(()),
            // the shell session may die before the command returns
            Err(e) if e.is_device_lost() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Diagnostic snapshot for the settings document
    pub async fn device_info(&self) -> DeviceInfo {
        let resolution = self.screen_resolution().await;
        if resolution.is_none() {
            warn!("Could not read screen resolution of {}", self.serial());
        }
        DeviceInfo {
            serial: self.serial().to_string(),
            manufacturer: self.manufacturer().await,
            board: self.board().await,
            name: self.product_name().await,
            model: self.model().await,
            cpu: self.cpu_abi().await,
            screen_resolution: resolution.map(|(w, h)| format!("{}x{}", w, h)),
            android_version: self.release().await,
            friendly_name: Some(self.friendly_name().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_state() {
        let state = parse_sleep_state("  mSleeping=true mLockScreenShown=false\n").unwrap();
        assert!(state.sleeping);
        assert_eq!(state.lock_screen_shown, Some(false));
        assert!(parse_sleep_state("").is_none());
    }

    #[test]
    fn test_resolution_formats() {
        assert_eq!(
            parse_resolution("    mUnrestrictedScreen=(0,0) 1080x1920"),
            Some((1080, 1920))
        );
        assert_eq!(
            parse_resolution("    mUnrestricted=[0,0][1440,3200]"),
            Some((1440, 3200))
        );
        assert_eq!(parse_resolution("Physical size: 1080x2400"), Some((1080, 2400)));
        assert_eq!(parse_resolution("nothing here"), None);
    }

    #[test]
    fn test_major_version() {
        assert_eq!(parse_major_version("5.1.1"), Some(5));
        assert_eq!(parse_major_version("14\n"), Some(14));
        assert_eq!(parse_major_version("Tiramisu"), None);
    }

    #[test]
    fn test_packages_sorted_and_stripped() {
        let out = "package:com.b\npackage:com.a\n\n";
        assert_eq!(parse_packages(out), vec!["com.a", "com.b"]);
    }
}
