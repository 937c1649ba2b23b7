use crate::error::{HarnessError, Result};
use std::path::{Path, PathBuf};

/// Locate an external tool.
///
/// Order: explicit override, the install directory (`~/.camrig`), a sibling
/// of the current executable, then the system PATH.
pub fn find_binary(name: &str, explicit: Option<&Path>) -> Result<PathBuf> {
    let mut checked_paths = Vec::new();

    if let Some(path) = explicit {
        checked_paths.push(format!("Override: {:?}", path));
        if path.exists() {
            return Ok(path.to_path_buf());
        }
    }

    let file_name = executable_name(name);

    if let Some(home) = dirs::home_dir() {
        let install_dir = home.join(".camrig");
        for sub in ["platform-tools", "scrcpy", "bin"] {
            let candidate = install_dir.join(sub).join(&file_name);
            checked_paths.push(format!("Install Dir: {:?}", candidate));
            if candidate.exists() {
                return Ok(candidate);
            }
        }
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            let sibling = exe_dir.join(&file_name);
            checked_paths.push(format!("Sibling: {:?}", sibling));
            if sibling.exists() {
                return Ok(sibling);
            }
        }
    }

    if let Ok(path) = which::which(&file_name) {
        return Ok(path);
    }
    checked_paths.push(format!("PATH: {}", file_name));

    Err(HarnessError::ConfigurationMissing {
        binary: name.to_string(),
        checked: checked_paths.join("\n"),
    })
}

fn executable_name(name: &str) -> String {
    if cfg!(windows) && !name.ends_with(".exe") {
        format!("{}.exe", name)
    } else {
        name.to_string()
    }
}

/// Find the adb binary
pub fn find_adb(explicit: Option<&Path>) -> Result<PathBuf> {
    find_binary("adb", explicit)
}

/// Find the scrcpy binary used for screen mirroring
pub fn find_scrcpy(explicit: Option<&Path>) -> Result<PathBuf> {
    find_binary("scrcpy", explicit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("adb");
        std::fs::write(&fake, b"").unwrap();
        assert_eq!(find_adb(Some(&fake)).unwrap(), fake);
    }

    #[test]
    fn test_missing_binary_is_configuration_error() {
        let err = find_binary("camrig-definitely-not-installed", None).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("camrig-definitely-not-installed"));
    }
}
