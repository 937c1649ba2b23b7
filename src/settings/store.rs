use super::document::{from_document, to_document};
use super::DeviceSettings;
use crate::error::{HarnessError, Result};
use crate::utils::xml_tree;
use log::{error, info};
use std::path::{Path, PathBuf};

/// Where device settings live between runs
pub trait SettingsStore: Send + Sync {
    /// Load a device's settings, `None` for a clean slate.
    ///
    /// Never fails: unreadable documents are logged and reported as absent.
    fn load(&self, serial: &str) -> Option<DeviceSettings>;

    /// Write the full document for a device, replacing any previous one
    fn save(&self, serial: &str, settings: &DeviceSettings) -> Result<()>;
}

/// One `<serial>.xml` file per device in a directory
pub struct XmlSettingsStore {
    dir: PathBuf,
}

impl XmlSettingsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, serial: &str) -> PathBuf {
        self.dir.join(format!("{}.xml", serial))
    }

    /// Parse a settings file, distinguishing missing from malformed
    pub fn read(&self, serial: &str) -> Result<Option<DeviceSettings>> {
        let path = self.path_for(serial);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let root = xml_tree::parse(&content).map_err(|reason| {
            HarnessError::MalformedPersistedData {
                path: path.display().to_string(),
                reason,
            }
        })?;
        if root.tag != "device" {
            return Err(HarnessError::MalformedPersistedData {
                path: path.display().to_string(),
                reason: format!("unexpected root element <{}>", root.tag),
            });
        }
        Ok(Some(from_document(&root, serial)))
    }
}

impl SettingsStore for XmlSettingsStore {
    fn load(&self, serial: &str) -> Option<DeviceSettings> {
        info!(
            "Checking for device settings at {} and possibly loading it",
            self.path_for(serial).display()
        );
        match self.read(serial) {
            Ok(Some(settings)) => Some(settings),
            Ok(None) => {
                info!("No settings file for {}, starting from a clean slate", serial);
                None
            }
            Err(e) => {
                error!("Failed to load settings for {}: {}", serial, e);
                None
            }
        }
    }

    fn save(&self, serial: &str, settings: &DeviceSettings) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(serial);
        let xml = xml_tree::to_string(&to_document(settings)).map_err(|e| {
            HarnessError::MalformedPersistedData {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        })?;

        info!("Writing settings to file {}", path.display());
        std::fs::write(&path, xml)?;
        Ok(())
    }
}
