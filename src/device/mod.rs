//! Device handles
//!
//! A handle is created by the registry when a device is attached and stays
//! the only way to talk to it until it is detached. Handles are shared as
//! `Arc<dyn DeviceHandle>`; their mutable state (settings, camera mode) sits
//! behind short-lived locks in [`DeviceCore`].

pub mod android;
pub mod capture;
pub mod usbcam;

pub use android::{AndroidDevice, ForegroundApp};
pub use capture::{CameraMode, CaptureOp, CaptureState};
pub use usbcam::UsbCamDevice;

use crate::client::Lifecycle;
use crate::error::{HarnessError, Result};
use crate::sequence::{ActionSequence, SequenceRole, TapInput};
use crate::settings::{DeviceSettings, SettingsStore};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Capabilities shared by every attached device
#[async_trait]
pub trait DeviceHandle: TapInput {
    /// State common to all transports
    fn core(&self) -> &DeviceCore;

    /// Transport name ("android", "usb_cam")
    fn transport(&self) -> &'static str;

    fn serial(&self) -> &str {
        self.core().serial()
    }

    /// Run a shell command on the device.
    ///
    /// A `DeviceUnreachable` failure detaches the handle from the registry
    /// before the error is returned.
    async fn exec_remote(&self, command: &str) -> Result<String>;

    async fn push_file(&self, local: &Path, remote: &str) -> Result<()>;

    async fn pull_file(&self, remote: &str, local: &Path) -> Result<()>;

    /// App in front, `None` when it cannot be determined
    async fn current_foreground_app(&self) -> Option<ForegroundApp>;

    /// Replay a sequence with this device's action gap
    async fn do_sequence(&self, sequence: &ActionSequence) -> Result<()>;

    async fn take_photo(&self) -> Result<()> {
        run_capture(self, CaptureOp::TakePhoto).await
    }

    async fn start_video(&self) -> Result<()> {
        run_capture(self, CaptureOp::StartVideo).await
    }

    async fn stop_video(&self) -> Result<()> {
        run_capture(self, CaptureOp::StopVideo).await
    }

    /// Persist the current settings together with a fresh info snapshot
    async fn save_settings(&self) -> Result<()>;

    /// Free transport resources. Called once when the handle is detached.
    async fn release(&self);

    fn settings(&self) -> DeviceSettings {
        self.core().settings()
    }

    fn sequence(&self, role: SequenceRole) -> Option<ActionSequence> {
        self.core().sequence(role)
    }

    fn set_sequence(&self, role: &str, sequence: ActionSequence) {
        self.core()
            .update_settings(|s| s.set_sequence(role, sequence));
    }

    fn capture_state(&self) -> CaptureState {
        self.core().capture()
    }
}

/// Serial, settings and capture state of one device
pub struct DeviceCore {
    serial: String,
    settings: Mutex<DeviceSettings>,
    capture: Mutex<CaptureState>,
    store: Arc<dyn SettingsStore>,
    lifecycle: Lifecycle,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl DeviceCore {
    pub fn new(
        serial: impl Into<String>,
        settings: DeviceSettings,
        store: Arc<dyn SettingsStore>,
        lifecycle: Lifecycle,
    ) -> Self {
        Self {
            serial: serial.into(),
            settings: Mutex::new(settings),
            capture: Mutex::new(CaptureState::default()),
            store,
            lifecycle,
        }
    }

    /// Load persisted settings, falling back to defaults with `default_gap`
    pub fn load_settings(store: &dyn SettingsStore, serial: &str, default_gap: Duration) -> DeviceSettings {
        let mut settings = store.load(serial).unwrap_or_else(|| DeviceSettings {
            actions_time_gap: default_gap,
            ..Default::default()
        });
        settings.info.serial = serial.to_string();
        settings
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Snapshot of the current settings
    pub fn settings(&self) -> DeviceSettings {
        lock(&self.settings).clone()
    }

    pub fn update_settings<R>(&self, f: impl FnOnce(&mut DeviceSettings) -> R) -> R {
        f(&mut lock(&self.settings))
    }

    pub fn sequence(&self, role: SequenceRole) -> Option<ActionSequence> {
        lock(&self.settings).sequence(role).cloned()
    }

    pub fn actions_gap(&self) -> Duration {
        lock(&self.settings).actions_time_gap
    }

    pub fn capture(&self) -> CaptureState {
        *lock(&self.capture)
    }

    pub fn set_capture(&self, state: CaptureState) {
        *lock(&self.capture) = state;
    }

    /// Apply a capture request without replaying anything
    pub fn advance_capture(&self, op: CaptureOp) -> Vec<SequenceRole> {
        let mut state = lock(&self.capture);
        let steps = state.plan(op);
        if let Some(last) = steps.last() {
            *state = last.then;
        }
        steps.iter().map(|s| s.role).collect()
    }

    /// Write the settings through the store
    pub fn save(&self) -> Result<()> {
        let snapshot = self.settings();
        self.store.save(&self.serial, &snapshot)
    }

    /// Detach from the registry if `err` means the device is gone
    pub fn check_lost(&self, err: &HarnessError) -> bool {
        if err.is_device_lost() {
            error!("Device {} disconnected unexpectedly! Detaching...", self.serial);
            self.lifecycle.request_detach();
            true
        } else {
            false
        }
    }
}

/// Replay the sequences a capture request needs and track the mode.
///
/// State is committed after each sequence, so a failure part way leaves the
/// mode matching what was actually replayed. Roles without a recorded
/// sequence are logged and treated as empty.
pub(crate) async fn run_capture<H>(handle: &H, op: CaptureOp) -> Result<()>
where
    H: DeviceHandle + ?Sized,
{
    let core = handle.core();
    let steps = core.capture().plan(op);
    if steps.is_empty() {
        debug!("{:?} on {} needs nothing", op, core.serial());
        return Ok(());
    }

    for step in steps {
        match core.sequence(step.role) {
            Some(sequence) if !sequence.is_empty() => {
                info!("Running {} on {}", step.role, core.serial());
                handle.do_sequence(&sequence).await?;
            }
            _ => warn!(
                "No {} sequence recorded for {}, skipping",
                step.role,
                core.serial()
            ),
        }
        core.set_capture(step.then);
    }
    Ok(())
}
