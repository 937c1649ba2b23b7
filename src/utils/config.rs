use std::path::PathBuf;
use std::time::Duration;

/// Harness configuration
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Directory holding one `<serial>.xml` settings file per device
    pub settings_dir: PathBuf,

    /// Directory that pulled UI hierarchy dumps are written to
    pub ui_dump_dir: PathBuf,

    /// Idle delay between two watchdog polls
    pub poll_interval: Duration,

    /// Idle delay while the watchdog waits for the GUI
    pub gui_wait_interval: Duration,

    /// Explicit adb binary, skips resolution when set
    pub adb_path: Option<PathBuf>,

    /// Explicit scrcpy binary, skips resolution when set
    pub scrcpy_path: Option<PathBuf>,

    /// Gap applied after every replayed action until a device overrides it
    pub default_actions_gap: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            settings_dir: PathBuf::from("devices"),
            ui_dump_dir: PathBuf::from("XML"),
            poll_interval: Duration::from_millis(500),
            gui_wait_interval: Duration::from_secs(1),
            adb_path: None,
            scrcpy_path: None,
            default_actions_gap: Duration::from_secs(1),
        }
    }
}

impl HarnessConfig {
    /// Defaults overridden by `CAMRIG_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("CAMRIG_SETTINGS_DIR") {
            config.settings_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("CAMRIG_UI_DUMP_DIR") {
            config.ui_dump_dir = PathBuf::from(dir);
        }
        if let Some(ms) = std::env::var("CAMRIG_POLL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Ok(path) = std::env::var("CAMRIG_ADB") {
            config.adb_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("CAMRIG_SCRCPY") {
            config.scrcpy_path = Some(PathBuf::from(path));
        }

        config
    }
}
