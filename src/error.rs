//! Error types shared by the bridge, device handles and the registry.

use thiserror::Error;

/// Errors raised below the registry boundary.
///
/// Most of these never reach a caller of the watchdog: transport problems are
/// reported through the `error` callback and unreachable devices detach
/// themselves. Only `ConfigurationMissing` is fatal, and only at startup.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// The bridge connection was reset or a single command timed out.
    #[error("Bridge transport error: {0}")]
    TransportTransient(String),

    /// A specific device stopped answering in the middle of a command.
    #[error("Device {serial} is unreachable: {reason}")]
    DeviceUnreachable { serial: String, reason: String },

    /// A settings or UI dump document could not be parsed.
    #[error("Malformed persisted data in {path}: {reason}")]
    MalformedPersistedData { path: String, reason: String },

    /// A required external binary (adb) could not be located.
    #[error("Required binary '{binary}' not found. Checked:\n{checked}")]
    ConfigurationMissing { binary: String, checked: String },

    /// A diagnostic shell command returned fewer fields than expected.
    #[error("Unexpected shell output for '{command}': {output}")]
    UnexpectedShellOutput { command: String, output: String },

    /// The transport behind this handle does not offer the operation.
    #[error("'{operation}' is not supported by {transport} devices")]
    Unsupported {
        operation: &'static str,
        transport: &'static str,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Returns true if the error means the device session is gone.
    pub const fn is_device_lost(&self) -> bool {
        matches!(self, Self::DeviceUnreachable { .. })
    }

    /// Returns true if the error should stop the process.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ConfigurationMissing { .. })
    }

    pub(crate) fn unreachable(serial: &str, reason: impl Into<String>) -> Self {
        Self::DeviceUnreachable {
            serial: serial.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_missing_configuration_is_fatal() {
        let missing = HarnessError::ConfigurationMissing {
            binary: "adb".into(),
            checked: String::new(),
        };
        assert!(missing.is_fatal());
        assert!(!HarnessError::TransportTransient("reset".into()).is_fatal());
        assert!(!HarnessError::unreachable("abc", "closed").is_fatal());
    }

    #[test]
    fn test_device_lost_classification() {
        assert!(HarnessError::unreachable("abc", "closed").is_device_lost());
        assert!(!HarnessError::TransportTransient("reset".into()).is_device_lost());
    }

    #[test]
    fn test_unreachable_message_names_serial() {
        let err = HarnessError::unreachable("R58M123", "device offline");
        assert_eq!(
            err.to_string(),
            "Device R58M123 is unreachable: device offline"
        );
    }
}
