//! File management on the device

use super::listing::{self, EntryKind, RemoteEntry};
use super::AndroidDevice;
use crate::device::DeviceHandle;
use crate::error::{HarnessError, Result};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

fn local_name(remote: &str) -> &str {
    remote
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(remote)
}

impl AndroidDevice {
    /// Names in a directory, or full paths with `full_paths`.
    ///
    /// `None` when the directory does not exist.
    pub async fn list_dir(&self, dir: &str, full_paths: bool) -> Result<Option<Vec<String>>> {
        let dir = listing::normalize_dir(dir);
        let cmd = if full_paths {
            let base = if dir == "/" { "" } else { dir.as_str() };
            format!("ls -d {}/*", base)
        } else {
            format!("ls {}", dir)
        };
        let out = self.exec_remote(&cmd).await?;
        Ok(listing::parse_names(&out))
    }

    /// Detailed listing of a directory
    pub async fn list_entries(&self, dir: &str) -> Result<Option<Vec<RemoteEntry>>> {
        let dir = listing::normalize_dir(dir);
        let out = self.exec_remote(&format!("ls -l {}", dir)).await?;
        Ok(listing::parse_long_listing(&out))
    }

    /// Kind of a remote path, `None` if it does not exist
    pub async fn file_type(&self, path: &str) -> Result<Option<EntryKind>> {
        let (parent, name) = listing::split_path(path);
        if name.is_empty() {
            return Ok(Some(EntryKind::Dir));
        }
        let entries = self.list_entries(&parent).await?.unwrap_or_default();
        Ok(entries.into_iter().find(|e| e.name == name).map(|e| e.kind))
    }

    /// Remove a file, or empty a directory
    pub async fn delete_path(&self, path: &str) -> Result<()> {
        let cmd = match self.file_type(path).await? {
            Some(EntryKind::Dir) | Some(EntryKind::Link) => {
                format!("rm -rf {}/*", path.trim_end_matches('/'))
            }
            Some(EntryKind::File) => format!("rm {}", path),
            None => {
                warn!("{} does not exist on {}", path, self.serial());
                return Ok(());
            }
        };
        self.exec_remote(&cmd).await?;
        Ok(())
    }

    /// Pull files into `dest`, keeping their names
    pub async fn pull_files(&self, remote: &[String], dest: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dest)?;
        let mut pulled = Vec::with_capacity(remote.len());
        for file in remote {
            let local = dest.join(local_name(file));
            self.pull_file(file, &local).await?;
            pulled.push(local);
        }
        Ok(pulled)
    }

    /// Pull files and directories, recreating the tree under `dest`.
    ///
    /// Links are not followed.
    pub async fn pull_files_recursive(
        &self,
        remote: &[String],
        dest: &Path,
    ) -> Result<Vec<PathBuf>> {
        let mut pulled = Vec::new();
        let mut pending: Vec<(String, PathBuf)> = remote
            .iter()
            .rev()
            .map(|r| (r.clone(), dest.to_path_buf()))
            .collect();

        while let Some((path, into)) = pending.pop() {
            match self.file_type(&path).await? {
                Some(EntryKind::Dir) => {
                    let local_dir = into.join(local_name(&path));
                    std::fs::create_dir_all(&local_dir)?;
                    let children = self.list_dir(&path, true).await?.unwrap_or_default();
                    debug!("{} holds {} entries", path, children.len());
                    for child in children.into_iter().rev() {
                        pending.push((child, local_dir.clone()));
                    }
                }
                Some(EntryKind::File) => {
                    std::fs::create_dir_all(&into)?;
                    let local = into.join(local_name(&path));
                    self.pull_file(&path, &local).await?;
                    pulled.push(local);
                }
                Some(EntryKind::Link) => info!("Skipping link {}", path),
                None => error!("{} not found on {}", path, self.serial()),
            }
        }
        Ok(pulled)
    }

    /// Push local files into a remote directory
    pub async fn push_files(&self, local: &[PathBuf], remote_dir: &str) -> Result<()> {
        let remote_dir = listing::normalize_dir(remote_dir);
        for file in local {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    HarnessError::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("{} has no file name", file.display()),
                    ))
                })?;
            self.push_file(file, &format!("{}/{}", remote_dir.trim_end_matches('/'), name))
                .await?;
        }
        Ok(())
    }

    /// Push a local directory tree into `remote_dir`
    pub async fn push_dir(&self, local_dir: &Path, remote_dir: &str) -> Result<usize> {
        let remote_root = listing::normalize_dir(remote_dir);
        let mut pushed = 0;

        for entry in WalkDir::new(local_dir).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| HarnessError::Io(e.into()))?;
            let relative = match entry.path().strip_prefix(local_dir) {
                Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };
            let remote = format!("{}/{}", remote_root.trim_end_matches('/'), relative);

            if entry.file_type().is_dir() {
                self.exec_remote(&format!("mkdir -p {}", remote)).await?;
            } else if entry.file_type().is_file() {
                self.push_file(entry.path(), &remote).await?;
                pushed += 1;
            }
        }
        Ok(pushed)
    }

    /// Pull everything in the camera save location, optionally clearing it
    pub async fn pull_images(&self, dest: &Path, clear_after: bool) -> Result<Vec<PathBuf>> {
        let location = self.core.settings().images_save_location;
        if location.is_empty() {
            warn!("No image save location configured for {}", self.serial());
            return Ok(Vec::new());
        }

        let files = self.list_dir(&location, true).await?.unwrap_or_default();
        info!("Pulling {} files from {}", files.len(), location);
        let pulled = self.pull_files(&files, dest).await?;
        if clear_after {
            self.delete_path(&location).await?;
        }
        Ok(pulled)
    }

    /// Pull one file and give it a new name, keeping its extension
    pub async fn pull_and_rename(&self, remote: &str, dest: &Path, stem: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(dest)?;
        let name = local_name(remote);
        let file = match Path::new(name).extension() {
            Some(ext) => format!("{}.{}", stem, ext.to_string_lossy()),
            None => stem.to_string(),
        };
        let local = dest.join(file);
        self.pull_file(remote, &local).await?;
        Ok(local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::mock::BridgeCall;
    use crate::bridge::MockBridge;
    use crate::client::{AttachContext, Lifecycle};
    use crate::settings::XmlSettingsStore;
    use crate::utils::config::HarnessConfig;
    use std::sync::Arc;
    use tempfile::TempDir;

    const SERIAL: &str = "R58M123";

    async fn attach(bridge: Arc<MockBridge>, dir: &TempDir) -> AndroidDevice {
        let store = Arc::new(XmlSettingsStore::new(dir.path().join("devices")));
        let config = HarnessConfig {
            ui_dump_dir: dir.path().join("XML"),
            ..Default::default()
        };
        let ctx = AttachContext {
            serial: SERIAL.to_string(),
            bridge,
            lifecycle: Lifecycle::standalone(SERIAL),
        };
        AndroidDevice::attach(ctx, store, &config).await.unwrap()
    }

    fn camera_tree() -> Arc<MockBridge> {
        let bridge = Arc::new(MockBridge::new());
        bridge.set_devices(&[SERIAL]);
        // most specific listing registered last so it wins the match
        bridge.respond(
            "ls -l /sdcard",
            "drwxrwx--x 4 root sdcard_rw 4096 2024-03-02 10:15 DCIM\n\
             lrwxrwxrwx 1 root root 19 2024-01-01 00:00 latest -> /sdcard/DCIM/Camera\n",
        );
        bridge.respond(
            "ls -l /sdcard/DCIM",
            "total 12\n\
             drwxrwx--x 2 root sdcard_rw 4096 2024-03-02 10:15 Camera\n\
             -rw-rw---- 1 root sdcard_rw 4 2024-03-02 10:16 IMG_1.jpg\n\
             lrwxrwxrwx 1 root root 12 2024-01-01 00:00 shortcut -> /sdcard/Pictures\n",
        );
        bridge.respond(
            "ls -l /sdcard/DCIM/Camera",
            "-rw-rw---- 1 root sdcard_rw 5 2024-03-02 10:17 IMG_2.jpg\n",
        );
        bridge.respond(
            "ls -d /sdcard/DCIM/*",
            "/sdcard/DCIM/Camera\n/sdcard/DCIM/IMG_1.jpg\n/sdcard/DCIM/shortcut\n",
        );
        bridge.respond("ls -d /sdcard/DCIM/Camera/*", "/sdcard/DCIM/Camera/IMG_2.jpg\n");
        bridge.add_remote_file("/sdcard/DCIM/IMG_1.jpg", b"img1");
        bridge.add_remote_file("/sdcard/DCIM/Camera/IMG_2.jpg", b"img22");
        bridge
    }

    #[tokio::test(start_paused = true)]
    async fn test_recursive_pull_walks_dirs_and_skips_links() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = camera_tree();
        let device = attach(bridge.clone(), &dir).await;
        let dest = dir.path().join("out");

        let roots = vec!["/sdcard/DCIM".to_string(), "/sdcard/latest".to_string()];
        let pulled = device.pull_files_recursive(&roots, &dest).await.unwrap();

        assert_eq!(
            pulled,
            vec![
                dest.join("DCIM").join("Camera").join("IMG_2.jpg"),
                dest.join("DCIM").join("IMG_1.jpg"),
            ]
        );
        assert!(dest.join("DCIM").join("Camera").is_dir());
        assert_eq!(std::fs::read(dest.join("DCIM").join("IMG_1.jpg")).unwrap(), b"img1");

        let remotes: Vec<String> = bridge
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                BridgeCall::Pull { remote, .. } => Some(remote),
                _ => None,
            })
            .collect();
        assert_eq!(
            remotes,
            vec!["/sdcard/DCIM/Camera/IMG_2.jpg", "/sdcard/DCIM/IMG_1.jpg"]
        );

        let listed = bridge.shell_commands(SERIAL);
        assert!(!listed.iter().any(|c| c.contains("shortcut") || c.contains("latest")));
        assert!(!dest.join("latest").exists());
        assert!(!dest.join("DCIM").join("shortcut").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recursive_pull_of_missing_path_pulls_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = camera_tree();
        let device = attach(bridge.clone(), &dir).await;

        let roots = vec!["/sdcard/nothing_here".to_string()];
        let pulled = device
            .pull_files_recursive(&roots, &dir.path().join("out"))
            .await
            .unwrap();
        assert!(pulled.is_empty());
        assert!(!bridge.calls().iter().any(|c| matches!(c, BridgeCall::Pull { .. })));
    }

    #[test]
    fn test_local_name() {
        assert_eq!(local_name("/sdcard/DCIM/Camera/IMG_1.jpg"), "IMG_1.jpg");
        assert_eq!(local_name("/sdcard/DCIM/"), "DCIM");
        assert_eq!(local_name("plain"), "plain");
    }
}
