use super::foreground::{ForegroundApp, STRATEGIES};
use super::info::parse_major_version;
use super::mirror::MirrorSession;
use super::ui_dump::{self, ClickableElement};
use crate::bridge::Bridge;
use crate::client::AttachContext;
use crate::device::{DeviceCore, DeviceHandle};
use crate::error::{HarnessError, Result};
use crate::sequence::{replay, ActionSequence, TapInput};
use crate::settings::SettingsStore;
use crate::utils::binary_resolver;
use crate::utils::config::HarnessConfig;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Time given to an app to come to the front after launch
const APP_LAUNCH_SETTLE: Duration = Duration::from_secs(1);

/// Attempts at the first command after a root request, one second apart
const ROOT_SETTLE_ATTEMPTS: u32 = 10;

const UI_DUMP_ATTEMPTS: u32 = 2;

/// Android device handle
pub struct AndroidDevice {
    pub(super) core: DeviceCore,
    pub(super) bridge: Arc<dyn Bridge>,
    friendly_name: String,
    model: Option<String>,
    android_version: Option<u32>,
    rooted: bool,
    ui_dump_dir: PathBuf,
    scrcpy_path: Option<PathBuf>,
    mirrors: Mutex<Vec<MirrorSession>>,
}

impl AndroidDevice {
    /// Bring a freshly connected device into a known state.
    ///
    /// Requests root (suppressing the reconnect this causes), reads the model
    /// and release, loads persisted settings, keeps the screen on and wakes
    /// the device if it sleeps.
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
        info!("Attaching Android device {}", serial);

        let root_scope = lifecycle.anticipate_root();
        let rooted = match bridge.root_request(&serial).await {
            Ok(rooted) => rooted,
            Err(e) if e.is_device_lost() => return Err(e),
            Err(e) => {
                warn!("Root request on {} failed: {}", serial, e);
                false
            }
        };
        let model = settle_after_root(&*bridge, &serial).await?;
        drop(root_scope);

        let release = bridge
            .exec_shell(&serial, "getprop ro.build.version.release")
            .await?;
        let android_version = parse_major_version(&release);

        let settings =
            DeviceCore::load_settings(&*store, &serial, config.default_actions_gap);
        let friendly_name = settings
            .info
            .friendly_name
            .clone()
            .or_else(|| model.clone())
            .unwrap_or_else(|| serial.clone());

        info!(
            "{} is {} (Android {}, root: {})",
            serial,
            model.as_deref().unwrap_or("unknown model"),
            release.trim(),
            rooted
        );

        let device = Self {
            core: DeviceCore::new(serial, settings, store, lifecycle),
            bridge,
            friendly_name,
            model,
            android_version,
            rooted,
            ui_dump_dir: config.ui_dump_dir.clone(),
            scrcpy_path: config.scrcpy_path.clone(),
            mirrors: Mutex::new(Vec::new()),
        };

        device.keep_awake().await?;
        device.unlock_if_sleeping().await?;
        Ok(device)
    }

    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    pub fn cached_model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn android_version(&self) -> Option<u32> {
        self.android_version
    }

    pub fn is_rooted(&self) -> bool {
        self.rooted
    }

    async fn on_error<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if self.core.check_lost(e) {
                self.kill_mirrors().await;
            }
        }
        result
    }

    /// Bring `package` to the front unless it already is
    pub async fn open_app(&self, package: &str) -> Result<()> {
        if let Some(app) = self.current_foreground_app().await {
            if app.package == package {
                debug!("{} already in front", package);
                return Ok(());
            }
        }
        info!("Opening {} on {}", package, self.friendly_name);
        self.exec_remote(&format!("monkey -p '{}' -v 1", package))
            .await?;
        tokio::time::sleep(APP_LAUNCH_SETTLE).await;
        Ok(())
    }

    fn scrcpy(&self) -> Result<PathBuf> {
        binary_resolver::find_scrcpy(self.scrcpy_path.as_deref())
    }

    /// Open a mirror window with extra scrcpy arguments
    pub async fn open_mirror(&self, extra: &[String]) -> Result<()> {
        let session = MirrorSession::spawn(&self.scrcpy()?, self.serial(), extra)?;
        self.mirrors.lock().await.push(session);
        Ok(())
    }

    /// Record the screen into `dest_dir`, replacing any open mirror
    pub async fn record_screen(&self, dest_dir: &Path) -> Result<PathBuf> {
        self.kill_mirrors().await;
        let session =
            MirrorSession::record(&self.scrcpy()?, self.serial(), &self.friendly_name, dest_dir)?;
        let file = session
            .recording()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| dest_dir.to_path_buf());
        self.mirrors.lock().await.push(session);
        Ok(file)
    }

    /// Number of mirror processes still alive
    pub async fn open_mirrors(&self) -> usize {
        let mut mirrors = self.mirrors.lock().await;
        mirrors.retain_mut(|m| m.is_running());
        mirrors.len()
    }

    pub async fn kill_mirrors(&self) {
        let sessions: Vec<MirrorSession> = self.mirrors.lock().await.drain(..).collect();
        if !sessions.is_empty() {
            info!("Closing {} mirror(s) of {}", sessions.len(), self.serial());
        }
        for session in sessions {
            session.kill().await;
        }
    }

    /// Dump the view hierarchy and pull it into the dump directory
    pub async fn dump_window_elements(&self) -> Result<PathBuf> {
        let out = self.exec_remote("uiautomator dump").await?;
        let remote = ui_dump::dump_location(&out)
            .ok_or_else(|| HarnessError::UnexpectedShellOutput {
                command: "uiautomator dump".to_string(),
                output: out.trim().to_string(),
            })?
            .to_string();

        let (package, activity) = match self.current_foreground_app().await {
            Some(app) => (app.package, app.activity),
            None => ("unknown".to_string(), "unknown".to_string()),
        };

        std::fs::create_dir_all(&self.ui_dump_dir)?;
        let local = self
            .ui_dump_dir
            .join(ui_dump::dump_file_name(self.serial(), &package, &activity));
        self.pull_file(&remote, &local).await?;
        info!("UI dump saved to {}", local.display());
        Ok(local)
    }

    /// Clickable elements of the current screen.
    ///
    /// A missing or unreadable dump is taken once more before giving up.
    pub async fn clickable_elements(&self) -> Result<Vec<ClickableElement>> {
        let mut attempt = 1;
        loop {
            let path = self.dump_window_elements().await?;
            let parsed = match std::fs::read_to_string(&path) {
                Ok(xml) => ui_dump::parse_clickable(&xml).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match parsed {
                Ok(elements) => return Ok(elements),
                Err(reason) if attempt < UI_DUMP_ATTEMPTS => {
                    warn!("Dump {} unusable ({}), dumping again", path.display(), reason);
                    attempt += 1;
                }
                Err(reason) => {
                    return Err(HarnessError::MalformedPersistedData {
                        path: path.display().to_string(),
                        reason,
                    })
                }
            }
        }
    }

    /// Turn device log capture on or off
    pub fn set_logs(&self, enabled: bool, filter: &str) {
        self.core.update_settings(|s| {
            s.logs.enabled = enabled;
            s.logs.filter = filter.to_string();
        });
    }
}

/// Wait for the device to answer again after a root request
async fn settle_after_root(bridge: &dyn Bridge, serial: &str) -> Result<Option<String>> {
    let mut attempt = 1;
    loop {
        match bridge.exec_shell(serial, "getprop ro.product.model").await {
            Ok(out) => {
                let model = out.trim();
                return Ok((!model.is_empty()).then(|| model.to_string()));
            }
            Err(e) if attempt < ROOT_SETTLE_ATTEMPTS => {
                debug!("{} not ready after root request ({}), retrying", serial, e);
                attempt += 1;
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[async_trait]
impl TapInput for AndroidDevice {
    fn label(&self) -> &str {
        self.core.serial()
    }

    async fn input_tap(&self, x: i32, y: i32) -> Result<()> {
        let cmd = match self.android_version {
            Some(v) if v <= 5 => "input touchscreen tap",
            _ => "input tap",
        };
        self.exec_remote(&format!("{} {} {}", cmd, x, y)).await?;
        Ok(())
    }
}

#[async_trait]
impl DeviceHandle for AndroidDevice {
    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn transport(&self) -> &'static str {
        self.bridge.transport()
    }

    async fn exec_remote(&self, command: &str) -> Result<String> {
        debug!("[{}] $ {}", self.serial(), command);
        let result = self.bridge.exec_shell(self.serial(), command).await;
        self.on_error(result).await
    }

    async fn push_file(&self, local: &Path, remote: &str) -> Result<()> {
        debug!("[{}] push {} -> {}", self.serial(), local.display(), remote);
        let result = self.bridge.push_file(self.serial(), local, remote).await;
        self.on_error(result).await
    }

    async fn pull_file(&self, remote: &str, local: &Path) -> Result<()> {
        debug!("[{}] pull {} -> {}", self.serial(), remote, local.display());
        let result = self.bridge.pull_file(self.serial(), remote, local).await;
        self.on_error(result).await
    }

    async fn current_foreground_app(&self) -> Option<ForegroundApp> {
        for strategy in &STRATEGIES {
            match self.exec_remote(strategy.command).await {
                Ok(out) => {
                    if let Some(app) = (strategy.parse)(&out) {
                        debug!("Foreground app via {}: {:?}", strategy.name, app);
                        return Some(app);
                    }
                }
                Err(e) if e.is_device_lost() => return None,
                Err(e) => debug!("{} lookup failed: {}", strategy.name, e),
            }
        }
        debug!("Could not determine foreground app on {}", self.serial());
        None
    }

    async fn do_sequence(&self, sequence: &ActionSequence) -> Result<()> {
        let settings = self.core.settings();
        if !settings.camera_app.is_empty() {
            self.open_app(&settings.camera_app).await?;
        }
        replay(sequence, self, settings.actions_time_gap).await
    }

    async fn save_settings(&self) -> Result<()> {
        let info = self.device_info().await;
        self.core.update_settings(|s| s.info = info);
        self.core.save()
    }

    async fn release(&self) {
        debug!("Releasing {}", self.serial());
        self.kill_mirrors().await;
    }
}
