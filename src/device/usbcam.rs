//! USB (V4L2) camera handle
//!
//! A plain UVC camera has no shell and no screen to tap. The handle still
//! tracks the photo/video mode so callers can drive both kinds of device
//! through the same capture calls.

use super::{CaptureOp, DeviceCore, DeviceHandle, ForegroundApp};
use crate::bridge::v4l::port_from_serial;
use crate::bridge::Bridge;
use crate::client::AttachContext;
use crate::error::{HarnessError, Result};
use crate::sequence::{replay, ActionSequence, TapInput};
use crate::settings::SettingsStore;
use crate::utils::config::HarnessConfig;
use async_trait::async_trait;
use log::{debug, info};
use std::path::Path;
use std::sync::Arc;

pub struct UsbCamDevice {
    core: DeviceCore,
    bridge: Arc<dyn Bridge>,
    port: Option<u32>,
}

impl UsbCamDevice {
    pub async fn attach(
        ctx: AttachContext,
        store: Arc<dyn SettingsStore>,
        config: &HarnessConfig,
    ) -> Result<Self> {
        let AttachContext {
            serial,
            bridge,
            lifecycle,
        } = ctx;
        let port = port_from_serial(&serial);
        info!("Attaching USB camera {} (port {:?})", serial, port);

        let mut settings = DeviceCore::load_settings(&*store, &serial, config.default_actions_gap);
        settings.info.name = port.map(|p| format!("video{}", p));
        Ok(Self {
            core: DeviceCore::new(serial, settings, store, lifecycle),
            bridge,
            port,
        })
    }

    pub fn port(&self) -> Option<u32> {
        self.port
    }

    fn capture(&self, op: CaptureOp) {
        let roles = self.core.advance_capture(op);
        debug!("{:?} on {} passes through {:?}", op, self.serial(), roles);
    }
}

#[async_trait]
impl TapInput for UsbCamDevice {
    fn label(&self) -> &str {
        self.core.serial()
    }

    async fn input_tap(&self, _x: i32, _y: i32) -> Result<()> {
        Err(HarnessError::Unsupported {
            operation: "input tap",
            transport: self.bridge.transport(),
        })
    }
}

#[async_trait]
impl DeviceHandle for UsbCamDevice {
    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn transport(&self) -> &'static str {
        self.bridge.transport()
    }

    async fn exec_remote(&self, command: &str) -> Result<String> {
        let result = self.bridge.exec_shell(self.serial(), command).await;
        if let Err(e) = &result {
            self.core.check_lost(e);
        }
        result
    }

    async fn push_file(&self, local: &Path, remote: &str) -> Result<()> {
        self.bridge.push_file(self.serial(), local, remote).await
    }

    async fn pull_file(&self, remote: &str, local: &Path) -> Result<()> {
        self.bridge.pull_file(self.serial(), remote, local).await
    }

    async fn current_foreground_app(&self) -> Option<ForegroundApp> {
        None
    }

    async fn do_sequence(&self, sequence: &ActionSequence) -> Result<()> {
        replay(sequence, self, self.core.actions_gap()).await
    }

    async fn take_photo(&self) -> Result<()> {
        self.capture(CaptureOp::TakePhoto);
        Ok(())
    }

    async fn start_video(&self) -> Result<()> {
        self.capture(CaptureOp::StartVideo);
        Ok(())
    }

    async fn stop_video(&self) -> Result<()> {
        self.capture(CaptureOp::StopVideo);
        Ok(())
    }

    async fn save_settings(&self) -> Result<()> {
        self.core.save()
    }

    async fn release(&self) {
        debug!("Releasing {}", self.serial());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::MockBridge;
    use crate::client::Lifecycle;
    use crate::device::CameraMode;
    use crate::sequence::Action;
    use crate::settings::XmlSettingsStore;

    async fn attach(dir: &Path) -> UsbCamDevice {
        let ctx = AttachContext {
            serial: "cam_2".to_string(),
            bridge: Arc::new(MockBridge::with_transport("usb_cam")),
            lifecycle: Lifecycle::standalone("cam_2"),
        };
        let store = Arc::new(XmlSettingsStore::new(dir));
        UsbCamDevice::attach(ctx, store, &HarnessConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_capture_tracks_mode_without_taps() {
        let dir = tempfile::tempdir().unwrap();
        let cam = attach(dir.path()).await;
        assert_eq!(cam.port(), Some(2));

        cam.start_video().await.unwrap();
        assert!(cam.capture_state().recording);
        cam.stop_video().await.unwrap();
        cam.take_photo().await.unwrap();
        assert_eq!(cam.capture_state().mode, CameraMode::Photo);
    }

    #[tokio::test]
    async fn test_tapping_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let cam = attach(dir.path()).await;
        let seq = ActionSequence::new(vec![Action::tap("a", "", 1, 1)]);
        assert!(matches!(
            cam.do_sequence(&seq).await,
            Err(HarnessError::Unsupported { .. })
        ));
        assert!(cam.do_sequence(&ActionSequence::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_settings_saved_under_port_serial() {
        let dir = tempfile::tempdir().unwrap();
        let cam = attach(dir.path()).await;
        cam.save_settings().await.unwrap();
        assert!(dir.path().join("cam_2.xml").exists());
    }
}
