pub mod bridge;
pub mod client;
pub mod device;
pub mod error;
pub mod sequence;
pub mod settings;
pub mod utils;

// Re-export common items
pub use bridge::{AdbBridge, Bridge, ConnectionSet, MockBridge, V4lBridge};
pub use client::{CallbackTable, DeviceClient, DeviceEvent, EventKind};
pub use device::{DeviceHandle, ForegroundApp};
pub use error::{HarnessError, Result};
pub use sequence::{Action, ActionSequence, SequenceRole};
pub use settings::{DeviceSettings, SettingsStore, XmlSettingsStore};
pub use utils::config::HarnessConfig;
