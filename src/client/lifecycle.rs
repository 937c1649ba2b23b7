use super::Shared;
use crate::bridge::Bridge;
use log::{debug, info};
use std::sync::{Arc, Weak};

/// Everything a factory needs to build a handle
pub struct AttachContext {
    pub serial: String,
    pub bridge: Arc<dyn Bridge>,
    pub lifecycle: Lifecycle,
}

/// A handle's link back to the registry that attached it.
///
/// Holds a weak reference, so a handle kept alive by a caller does not keep
/// the registry alive. The attach id makes a stale handle's detach request a
/// no-op once the serial has been attached again.
#[derive(Clone)]
pub struct Lifecycle {
    serial: String,
    attach_id: u64,
    registry: Weak<Shared>,
}

impl Lifecycle {
    pub(super) fn new(serial: &str, attach_id: u64, registry: &Arc<Shared>) -> Self {
        Self {
            serial: serial.to_string(),
            attach_id,
            registry: Arc::downgrade(registry),
        }
    }

    /// Link for a handle created outside any registry
    pub fn standalone(serial: &str) -> Self {
        Self {
            serial: serial.to_string(),
            attach_id: 0,
            registry: Weak::new(),
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Remove this handle from the attached set
    pub fn request_detach(&self) {
        let Some(shared) = self.registry.upgrade() else {
            return;
        };
        if shared.forget(&self.serial, self.attach_id).is_some() {
            info!("{} detached after losing contact", self.serial);
        } else {
            debug!("{} was no longer attached under this handle", self.serial);
        }
    }

    /// Suppress callbacks for this serial until the guard drops
    pub fn anticipate_root(&self) -> Option<AnticipateRootGuard> {
        self.registry
            .upgrade()
            .map(|shared| AnticipateRootGuard::new(shared, &self.serial))
    }
}

/// While alive, connection changes of one serial are not reported.
///
/// Guards nest: the serial is reported again once the last one drops.
pub struct AnticipateRootGuard {
    shared: Arc<Shared>,
    serial: String,
}

impl AnticipateRootGuard {
    pub(super) fn new(shared: Arc<Shared>, serial: &str) -> Self {
        *shared
            .state()
            .anticipate_root
            .entry(serial.to_string())
            .or_insert(0) += 1;
        debug!("Anticipating root on {}", serial);
        Self {
            shared,
            serial: serial.to_string(),
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }
}

impl Drop for AnticipateRootGuard {
    fn drop(&mut self) {
        let mut state = self.shared.state();
        if let Some(count) = state.anticipate_root.get_mut(&self.serial) {
            *count -= 1;
            if *count == 0 {
                state.anticipate_root.remove(&self.serial);
                debug!("Stopped anticipating root on {}", self.serial);
            }
        }
    }
}
