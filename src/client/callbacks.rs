//! Lifecycle events and the callback table they are delivered through

use log::{error, info};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Kinds of lifecycle event the registry emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connected,
    Disconnected,
    Error,
    WatchdogStarting,
    WatchdogStarted,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::Error,
        EventKind::WatchdogStarting,
        EventKind::WatchdogStarted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::Error => "error",
            EventKind::WatchdogStarting => "watchdog_starting",
            EventKind::WatchdogStarted => "watchdog_started",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload handed to a callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceEvent {
    pub action: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(rename = "type")]
    pub device_type: String,
    pub error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl DeviceEvent {
    pub fn device(action: EventKind, serial: &str, device_type: &str) -> Self {
        Self {
            action,
            serial: Some(serial.to_string()),
            device_type: device_type.to_string(),
            error: false,
            details: None,
        }
    }

    pub fn watchdog(action: EventKind, device_type: &str) -> Self {
        Self {
            action,
            serial: None,
            device_type: device_type.to_string(),
            error: false,
            details: None,
        }
    }

    pub fn failure(device_type: &str, details: impl Into<String>) -> Self {
        Self {
            action: EventKind::Error,
            serial: None,
            device_type: device_type.to_string(),
            error: true,
            details: Some(details.into()),
        }
    }
}

/// Callback invoked on the watchdog task
pub type EventHandler = Arc<dyn Fn(&DeviceEvent) + Send + Sync>;

/// Logs the event; used for every kind the caller did not handle
pub fn log_event(event: &DeviceEvent) {
    let serial = event.serial.as_deref().unwrap_or("-");
    if event.error {
        error!(
            "[{}] {} {}: {}",
            event.device_type,
            event.action,
            serial,
            event.details.as_deref().unwrap_or_default()
        );
    } else {
        info!("[{}] {} {}", event.device_type, event.action, serial);
    }
}

/// One handler per event kind, always complete
#[derive(Clone)]
pub struct CallbackTable {
    handlers: HashMap<EventKind, EventHandler>,
}

impl CallbackTable {
    pub fn builder() -> CallbackTableBuilder {
        CallbackTableBuilder::default()
    }

    /// Table that only logs
    pub fn logging() -> Self {
        Self::builder().build()
    }

    pub fn emit(&self, event: &DeviceEvent) {
        match self.handlers.get(&event.action) {
            Some(handler) => handler(event),
            None => log_event(event),
        }
    }
}

impl Default for CallbackTable {
    fn default() -> Self {
        Self::logging()
    }
}

#[derive(Default)]
pub struct CallbackTableBuilder {
    handlers: HashMap<EventKind, EventHandler>,
}

impl CallbackTableBuilder {
    pub fn on<F>(mut self, kind: EventKind, handler: F) -> Self
    where
        F: Fn(&DeviceEvent) + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    /// Same handler for every kind
    pub fn on_all<F>(mut self, handler: F) -> Self
    where
        F: Fn(&DeviceEvent) + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(handler);
        for kind in EventKind::ALL {
            self.handlers.insert(kind, handler.clone());
        }
        self
    }

    /// Fill the kinds left unset with the logging handler
    pub fn build(mut self) -> CallbackTable {
        for kind in EventKind::ALL {
            self.handlers
                .entry(kind)
                .or_insert_with(|| Arc::new(log_event) as EventHandler);
        }
        CallbackTable {
            handlers: self.handlers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_missing_handlers_are_filled() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let table = CallbackTable::builder()
            .on(EventKind::Connected, move |e| {
                sink.lock().unwrap().push(e.serial.clone())
            })
            .build();

        assert_eq!(table.handlers.len(), EventKind::ALL.len());
        table.emit(&DeviceEvent::device(EventKind::Connected, "a", "android"));
        table.emit(&DeviceEvent::device(EventKind::Disconnected, "a", "android"));
        assert_eq!(*seen.lock().unwrap(), vec![Some("a".to_string())]);
    }

    #[test]
    fn test_event_json_shape() {
        let event = DeviceEvent::device(EventKind::WatchdogStarted, "R58", "android");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["action"], "watchdog_started");
        assert_eq!(json["type"], "android");
        assert_eq!(json["error"], false);
        assert!(json.get("details").is_none());

        let failure = serde_json::to_value(DeviceEvent::failure("android", "adb died")).unwrap();
        assert_eq!(failure["error"], true);
        assert!(failure.get("serial").is_none());
    }
}
