//! Per-device settings persistence
//!
//! Each device keeps one document with three sections: `info` (a read-only
//! snapshot of what the device reported when it was last saved), `settings`
//! (camera app, image location, logging, one subtree per sequence role and
//! the replay gap) and `device_settings_persistence` (free-form key/value
//! pairs).
//!
//! Loading never fails: a missing file is a clean slate and a corrupt one
//! is logged and treated the same way.

pub mod document;
pub mod store;

pub use store::{SettingsStore, XmlSettingsStore};

use crate::sequence::{ActionSequence, SequenceRole};
use std::collections::BTreeMap;
use std::time::Duration;

/// Diagnostic snapshot written into the `info` section on save
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial: String,
    pub manufacturer: Option<String>,
    pub board: Option<String>,
    pub name: Option<String>,
    pub model: Option<String>,
    pub cpu: Option<String>,
    pub screen_resolution: Option<String>,
    pub android_version: Option<String>,
    pub friendly_name: Option<String>,
}

/// Device log capture switch and filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings {
    pub enabled: bool,
    pub filter: String,
}

/// Everything persisted for one device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSettings {
    pub info: DeviceInfo,
    /// Package of the camera app the sequences were recorded against
    pub camera_app: String,
    /// Directory on the device the camera app saves into
    pub images_save_location: String,
    pub logs: LogSettings,
    /// Sequences keyed by role name; unknown roles are kept as-is
    pub sequences: BTreeMap<String, ActionSequence>,
    /// Pause applied after every replayed action
    pub actions_time_gap: Duration,
    /// Free-form persisted key/value pairs
    pub persistence: BTreeMap<String, String>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            info: DeviceInfo::default(),
            camera_app: String::new(),
            images_save_location: String::new(),
            logs: LogSettings::default(),
            sequences: BTreeMap::new(),
            actions_time_gap: Duration::from_secs(1),
            persistence: BTreeMap::new(),
        }
    }
}

impl DeviceSettings {
    pub fn sequence(&self, role: SequenceRole) -> Option<&ActionSequence> {
        self.sequences.get(role.as_str())
    }

    pub fn set_sequence(&mut self, role: &str, sequence: ActionSequence) {
        self.sequences.insert(role.to_string(), sequence);
    }

    pub fn persist_setting(&self, key: &str) -> Option<&str> {
        self.persistence.get(key).map(String::as_str)
    }

    pub fn set_persist_setting(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.persistence.insert(key.into(), value.into());
    }
}
