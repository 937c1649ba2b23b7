//! Device registry and watchdog
//!
//! [`DeviceClient`] owns one bridge. Its watchdog polls the bridge, keeps the
//! connected set current and reports changes through a [`CallbackTable`].
//! Attaching a serial builds a handle through the configured
//! [`HandleFactory`]; detaching releases it.
//!
//! Callbacks run on the watchdog task and must not block. A caller that
//! wants to attach on `connected` forwards the event to its own task.

pub mod callbacks;
pub mod factory;
pub mod lifecycle;

pub use callbacks::{CallbackTable, DeviceEvent, EventHandler, EventKind};
pub use factory::{AndroidFactory, HandleFactory, UsbCamFactory};
pub use lifecycle::{AnticipateRootGuard, AttachContext, Lifecycle};

use crate::bridge::{Bridge, ConnectionSet};
use crate::device::DeviceHandle;
use crate::error::{HarnessError, Result};
use crate::utils::config::HarnessConfig;
use log::{debug, error, info, warn};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Longest wait for a device to come back after a root or remount request
const ROOT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Serials that appeared and disappeared between two polls
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeviceDiff {
    pub connected: Vec<String>,
    pub disconnected: Vec<String>,
}

impl DeviceDiff {
    pub fn is_empty(&self) -> bool {
        self.connected.is_empty() && self.disconnected.is_empty()
    }
}

/// Compare two polls, each side in serial order
pub fn diff_devices(old: &ConnectionSet, new: &ConnectionSet) -> DeviceDiff {
    DeviceDiff {
        connected: new.difference(old).cloned().collect(),
        disconnected: old.difference(new).cloned().collect(),
    }
}

struct AttachedDevice {
    id: u64,
    handle: Arc<dyn DeviceHandle>,
}

#[derive(Default)]
struct RegistryState {
    connected: ConnectionSet,
    attached: HashMap<String, AttachedDevice>,
    /// Serials whose connection changes are expected, with guard counts
    anticipate_root: HashMap<String, usize>,
}

struct Shared {
    bridge: Arc<dyn Bridge>,
    factory: Arc<dyn HandleFactory>,
    callbacks: CallbackTable,
    config: HarnessConfig,
    state: Mutex<RegistryState>,
    kill: AtomicBool,
    wait_for_gui: AtomicBool,
    next_attach_id: AtomicU64,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transport(&self) -> &'static str {
        self.bridge.transport()
    }

    /// Drop an attached handle if it is still the one registered under `id`
    fn forget(&self, serial: &str, id: u64) -> Option<Arc<dyn DeviceHandle>> {
        let mut state = self.state();
        let current = state.attached.get(serial).is_some_and(|e| e.id == id);
        if current {
            state.attached.remove(serial).map(|e| e.handle)
        } else {
            None
        }
    }

    /// One watchdog poll. Returns false when the bridge could not be read,
    /// in which case the connected set is left as it was.
    async fn tick(&self) -> bool {
        let polled = match self.bridge.list_reachable_devices().await {
            Ok(set) => set,
            Err(e) => {
                warn!("Polling {} devices failed: {}", self.transport(), e);
                self.callbacks
                    .emit(&DeviceEvent::failure(self.transport(), e.to_string()));
                return false;
            }
        };

        let (connected, disconnected) = {
            let mut state = self.state();
            let mut next = polled;
            // anticipated serials keep the membership they had before the window
            for serial in state.anticipate_root.keys() {
                let was_connected = state.connected.contains(serial);
                if was_connected != next.contains(serial) {
                    debug!("Change on {} suppressed while anticipating root", serial);
                }
                if was_connected {
                    next.insert(serial.clone());
                } else {
                    next.remove(serial);
                }
            }
            let diff = diff_devices(&state.connected, &next);
            state.connected = next;
            (diff.connected, diff.disconnected)
        };

        for serial in &connected {
            info!("{} connected", serial);
            self.callbacks.emit(&DeviceEvent::device(
                EventKind::Connected,
                serial,
                self.transport(),
            ));
        }
        for serial in &disconnected {
            info!("{} disconnected", serial);
            self.callbacks.emit(&DeviceEvent::device(
                EventKind::Disconnected,
                serial,
                self.transport(),
            ));
        }
        true
    }
}

async fn run_watchdog(shared: Arc<Shared>) {
    let transport = shared.transport();
    info!("Starting {} watchdog", transport);
    shared
        .callbacks
        .emit(&DeviceEvent::watchdog(EventKind::WatchdogStarting, transport));

    let mut started = false;
    while !shared.kill.load(Ordering::SeqCst) {
        if shared.wait_for_gui.load(Ordering::SeqCst) {
            tokio::time::sleep(shared.config.gui_wait_interval).await;
            continue;
        }

        if shared.tick().await && !started {
            started = true;
            shared
                .callbacks
                .emit(&DeviceEvent::watchdog(EventKind::WatchdogStarted, transport));
        }
        tokio::time::sleep(shared.config.poll_interval).await;
    }
    info!("{} watchdog stopped", transport);
}

/// Registry of the devices reachable through one bridge
pub struct DeviceClient {
    shared: Arc<Shared>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceClient {
    pub fn new(
        bridge: Arc<dyn Bridge>,
        factory: Arc<dyn HandleFactory>,
        callbacks: CallbackTable,
        config: HarnessConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                bridge,
                factory,
                callbacks,
                config,
                state: Mutex::new(RegistryState::default()),
                kill: AtomicBool::new(false),
                wait_for_gui: AtomicBool::new(false),
                next_attach_id: AtomicU64::new(0),
            }),
            watchdog: Mutex::new(None),
        }
    }

    /// Registry for Android devices with settings under the configured directory
    pub fn android(bridge: Arc<dyn Bridge>, callbacks: CallbackTable, config: HarnessConfig) -> Self {
        let factory = Arc::new(AndroidFactory::from_config(&config));
        Self::new(bridge, factory, callbacks, config)
    }

    /// Registry for USB cameras
    pub fn usb_cam(bridge: Arc<dyn Bridge>, callbacks: CallbackTable, config: HarnessConfig) -> Self {
        let factory = Arc::new(UsbCamFactory::from_config(&config));
        Self::new(bridge, factory, callbacks, config)
    }

    pub fn transport(&self) -> &'static str {
        self.shared.transport()
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.shared.config
    }

    /// Ask the bridge directly, without touching the connected set
    pub async fn get_devices(&self) -> Result<ConnectionSet> {
        self.shared.bridge.list_reachable_devices().await
    }

    /// Serials seen by the last successful watchdog poll
    pub fn connected_devices(&self) -> ConnectionSet {
        self.shared.state().connected.clone()
    }

    pub fn attached_devices(&self) -> BTreeSet<String> {
        self.shared.state().attached.keys().cloned().collect()
    }

    pub fn handle(&self, serial: &str) -> Option<Arc<dyn DeviceHandle>> {
        self.shared
            .state()
            .attached
            .get(serial)
            .map(|entry| entry.handle.clone())
    }

    /// Build a handle for `serial` and register it.
    ///
    /// Attaching an already attached serial replaces its handle; the old one
    /// is released.
    pub async fn attach_device(&self, serial: &str) -> Result<Arc<dyn DeviceHandle>> {
        let id = self.shared.next_attach_id.fetch_add(1, Ordering::SeqCst) + 1;
        let ctx = AttachContext {
            serial: serial.to_string(),
            bridge: self.shared.bridge.clone(),
            lifecycle: Lifecycle::new(serial, id, &self.shared),
        };

        let handle = self.shared.factory.create(ctx).await?;
        let previous = self.shared.state().attached.insert(
            serial.to_string(),
            AttachedDevice {
                id,
                handle: handle.clone(),
            },
        );

        if let Some(previous) = previous {
            debug!("{} was already attached, replacing its handle", serial);
            previous.handle.release().await;
        }
        info!("{} attached", serial);
        Ok(handle)
    }

    /// Release and forget a handle. Unknown serials are logged and ignored.
    pub async fn detach_device(&self, serial: &str) {
        let removed = self.shared.state().attached.remove(serial);
        match removed {
            Some(entry) => {
                entry.handle.release().await;
                info!("{} detached", serial);
            }
            None => error!("{} not found in attached devices", serial),
        }
    }

    /// Detach everything that is still attached
    pub async fn detach_all(&self) {
        let entries: Vec<AttachedDevice> = self
            .shared
            .state()
            .attached
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in entries {
            entry.handle.release().await;
        }
    }

    /// Start the watchdog task. Must be called within a tokio runtime.
    pub fn watchdog(&self) {
        let mut slot = self.watchdog.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = slot.as_ref() {
            if !task.is_finished() {
                if !self.shared.kill.load(Ordering::SeqCst) {
                    warn!("{} watchdog is already running", self.transport());
                    return;
                }
                task.abort();
            }
        }

        self.shared.kill.store(false, Ordering::SeqCst);
        *slot = Some(tokio::spawn(run_watchdog(self.shared.clone())));
    }

    /// Ask the watchdog to stop after its current iteration
    pub fn kill_watchdog(&self) {
        self.shared.kill.store(true, Ordering::SeqCst);
    }

    /// Wait for the watchdog task to finish
    pub async fn join_watchdog(&self) {
        let task = self
            .watchdog
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!("Watchdog task failed: {}", e);
                }
            }
        }
    }

    pub fn is_watchdog_running(&self) -> bool {
        self.watchdog
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Pause polling while a UI holds the bridge
    pub fn set_wait_for_gui(&self, wait: bool) {
        self.shared.wait_for_gui.store(wait, Ordering::SeqCst);
    }

    /// Suppress connection callbacks for `serial` while the guard lives
    pub fn anticipate_root(&self, serial: &str) -> AnticipateRootGuard {
        AnticipateRootGuard::new(self.shared.clone(), serial)
    }

    /// Restart the device's bridge daemon as root.
    ///
    /// The reconnect this causes is not reported to the callbacks.
    pub async fn root(&self, serial: &str) -> Result<bool> {
        let _scope = self.anticipate_root(serial);
        let rooted = self.shared.bridge.root_request(serial).await?;
        self.wait_until_reachable(serial).await;
        Ok(rooted)
    }

    pub async fn remount(&self, serial: &str) -> Result<()> {
        let _scope = self.anticipate_root(serial);
        self.shared.bridge.remount(serial).await?;
        self.wait_until_reachable(serial).await;
        Ok(())
    }

    pub async fn disable_verity(&self, serial: &str) -> Result<()> {
        let _scope = self.anticipate_root(serial);
        self.shared.bridge.disable_verity(serial).await?;
        self.wait_until_reachable(serial).await;
        Ok(())
    }

    async fn wait_until_reachable(&self, serial: &str) {
        let poll = self.shared.config.poll_interval;
        let waited = tokio::time::timeout(ROOT_RECOVERY_TIMEOUT, async {
            loop {
                tokio::time::sleep(poll).await;
                if let Ok(set) = self.shared.bridge.list_reachable_devices().await {
                    if set.contains(serial) {
                        return;
                    }
                }
            }
        })
        .await;
        if waited.is_err() {
            warn!("{} did not come back within {:?}", serial, ROOT_RECOVERY_TIMEOUT);
        }
    }

    /// Reboot a device, wait for it to drop off and come back, and attach
    /// it again.
    pub async fn reboot_and_wait(
        &self,
        serial: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn DeviceHandle>> {
        if !self.get_devices().await?.contains(serial) {
            return Err(HarnessError::unreachable(serial, "not connected"));
        }
        let handle = match self.handle(serial) {
            Some(handle) => handle,
            None => self.attach_device(serial).await?,
        };

        info!("Rebooting {}", serial);
        match handle.exec_remote("reboot").await {
            Ok(_) => {}
            Err(e) if e.is_device_lost() => {}
            Err(e) => return Err(e),
        }

        let stale = self.shared.state().attached.remove(serial);
        if let Some(entry) = stale {
            entry.handle.release().await;
        }
        drop(handle);

        tokio::time::timeout(timeout, self.wait_for_reconnect(serial))
            .await
            .map_err(|_| {
                HarnessError::unreachable(serial, format!("no reconnect within {:?}", timeout))
            })?;
        self.attach_device(serial).await
    }

    async fn wait_for_reconnect(&self, serial: &str) {
        let mut gone = false;
        loop {
            match self.shared.bridge.list_reachable_devices().await {
                Ok(set) if set.contains(serial) => {
                    if gone {
                        info!("{} is back", serial);
                        return;
                    }
                }
                Ok(_) => gone = true,
                Err(e) => debug!("Poll during reboot failed: {}", e),
            }
            tokio::time::sleep(self.shared.config.poll_interval).await;
        }
    }
}

impl Drop for DeviceClient {
    fn drop(&mut self) {
        self.shared.kill.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::MockBridge;
    use tempfile::TempDir;

    type Events = Arc<Mutex<Vec<DeviceEvent>>>;

    fn setup(dir: &TempDir) -> (Arc<MockBridge>, DeviceClient, Events) {
        let bridge = Arc::new(MockBridge::new());
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let callbacks = CallbackTable::builder()
            .on_all(move |e| sink.lock().unwrap().push(e.clone()))
            .build();
        let config = HarnessConfig {
            settings_dir: dir.path().join("devices"),
            ui_dump_dir: dir.path().join("XML"),
            ..Default::default()
        };
        let client = DeviceClient::android(bridge.clone(), callbacks, config);
        (bridge, client, events)
    }

    fn kinds(events: &Events) -> Vec<(EventKind, Option<String>)> {
        events
            .lock()
            .unwrap()
            .iter()
            .map(|e| (e.action, e.serial.clone()))
            .collect()
    }

    fn set(serials: &[&str]) -> ConnectionSet {
        serials.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_diff_devices() {
        let diff = diff_devices(&set(&["a", "b"]), &set(&["b", "c", "d"]));
        assert_eq!(diff.connected, vec!["c", "d"]);
        assert_eq!(diff.disconnected, vec!["a"]);
        assert!(diff_devices(&set(&["a"]), &set(&["a"])).is_empty());
    }

    #[tokio::test]
    async fn test_tick_reports_changes_once() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, client, events) = setup(&dir);
        bridge.queue_poll(&["a", "b"]);
        bridge.queue_poll(&["b"]);
        bridge.queue_poll(&["b"]);

        for _ in 0..3 {
            assert!(client.shared.tick().await);
        }
        assert_eq!(
            kinds(&events),
            vec![
                (EventKind::Connected, Some("a".into())),
                (EventKind::Connected, Some("b".into())),
                (EventKind::Disconnected, Some("a".into())),
            ]
        );
        assert_eq!(client.connected_devices(), set(&["b"]));
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_previous_set() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, client, events) = setup(&dir);
        bridge.queue_poll(&["a"]);
        bridge.queue_poll_failure("adb server restarted");

        assert!(client.shared.tick().await);
        assert!(!client.shared.tick().await);
        assert_eq!(client.connected_devices(), set(&["a"]));

        let last = events.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.action, EventKind::Error);
        assert!(last.error);
        assert!(last.details.unwrap().contains("adb server restarted"));
    }

    #[tokio::test]
    async fn test_anticipated_root_is_not_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, client, events) = setup(&dir);
        bridge.queue_poll(&["a"]);
        client.shared.tick().await;
        events.lock().unwrap().clear();

        {
            let _outer = client.anticipate_root("a");
            let inner = client.anticipate_root("a");
            bridge.queue_poll(&[]);
            client.shared.tick().await;
            drop(inner);
            bridge.queue_poll(&["a"]);
            client.shared.tick().await;
        }
        assert!(events.lock().unwrap().is_empty());

        bridge.queue_poll(&[]);
        client.shared.tick().await;
        assert_eq!(
            kinds(&events),
            vec![(EventKind::Disconnected, Some("a".into()))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_inside_root_window_is_not_reported_on_return() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, client, events) = setup(&dir);
        bridge.queue_poll(&["a"]);
        client.shared.tick().await;
        events.lock().unwrap().clear();

        let guard = client.anticipate_root("a");
        bridge.queue_poll(&[]);
        client.shared.tick().await;
        assert!(client.connected_devices().contains("a"));
        drop(guard);

        bridge.queue_poll(&["a"]);
        client.shared.tick().await;
        assert!(events.lock().unwrap().is_empty());
        assert!(client.connected_devices().contains("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_appearance_inside_root_window_is_reported_after() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, client, events) = setup(&dir);
        bridge.queue_poll(&[]);
        client.shared.tick().await;

        let guard = client.anticipate_root("b");
        bridge.queue_poll(&["b"]);
        client.shared.tick().await;
        assert!(!client.connected_devices().contains("b"));
        drop(guard);

        bridge.queue_poll(&["b"]);
        client.shared.tick().await;
        assert_eq!(
            kinds(&events),
            vec![(EventKind::Connected, Some("b".into()))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_lifecycle_events() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, client, events) = setup(&dir);
        bridge.queue_poll_failure("daemon not running");
        bridge.queue_poll(&["a"]);
        bridge.queue_poll(&["a"]);

        client.watchdog();
        tokio::time::sleep(Duration::from_millis(1_750)).await;
        assert!(client.is_watchdog_running());
        client.kill_watchdog();
        client.join_watchdog().await;
        assert!(!client.is_watchdog_running());

        assert_eq!(
            kinds(&events),
            vec![
                (EventKind::WatchdogStarting, None),
                (EventKind::Error, None),
                (EventKind::Connected, Some("a".into())),
                (EventKind::WatchdogStarted, None),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_waits_for_gui() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, client, _events) = setup(&dir);
        client.set_wait_for_gui(true);
        client.watchdog();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(bridge.poll_count(), 0);

        client.set_wait_for_gui(false);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(bridge.poll_count() > 0);

        client.kill_watchdog();
        client.join_watchdog().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_and_detach() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, client, _events) = setup(&dir);
        bridge.set_devices(&["a"]);

        let handle = client.attach_device("a").await.unwrap();
        assert_eq!(handle.serial(), "a");
        assert_eq!(client.attached_devices(), BTreeSet::from(["a".to_string()]));

        client.detach_device("a").await;
        assert!(client.attached_devices().is_empty());
        // unknown serial is only logged
        client.detach_device("a").await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_root_during_attach_is_suppressed() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, client, events) = setup(&dir);
        bridge.queue_poll(&["a"]);
        client.shared.tick().await;
        events.lock().unwrap().clear();

        client.attach_device("a").await.unwrap();
        assert!(client.shared.state().anticipate_root.is_empty());
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_handle_detaches_itself() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, client, _events) = setup(&dir);
        let handle = client.attach_device("a").await.unwrap();

        bridge.set_unreachable("a");
        let err = handle.exec_remote("ls /sdcard").await.unwrap_err();
        assert!(err.is_device_lost());
        assert!(client.attached_devices().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_handle_does_not_detach_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let (_bridge, client, _events) = setup(&dir);
        let old = client.attach_device("a").await.unwrap();
        let new = client.attach_device("a").await.unwrap();

        old.core().lifecycle().request_detach();
        let current = client.handle("a").unwrap();
        assert!(Arc::ptr_eq(&current, &new));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reboot_and_wait() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, client, _events) = setup(&dir);
        bridge.set_devices(&["a"]);
        let before = client.attach_device("a").await.unwrap();

        bridge.queue_poll(&["a"]);
        bridge.queue_poll(&[]);
        bridge.queue_poll(&[]);
        bridge.queue_poll(&["a"]);
        let after = client
            .reboot_and_wait("a", Duration::from_secs(30))
            .await
            .unwrap();

        assert!(!Arc::ptr_eq(&before, &after));
        assert!(bridge.shell_commands("a").contains(&"reboot".to_string()));
        assert!(client.handle("a").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reboot_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, client, _events) = setup(&dir);
        client.attach_device("a").await.unwrap();
        bridge.queue_poll(&["a"]);
        bridge.queue_poll(&[]);

        let err = client
            .reboot_and_wait("a", Duration::from_secs(5))
            .await
            .err()
            .unwrap();
        assert!(err.is_device_lost());
        assert!(client.attached_devices().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reboot_requires_connection() {
        let dir = tempfile::tempdir().unwrap();
        let (_bridge, client, _events) = setup(&dir);
        let err = client
            .reboot_and_wait("ghost", Duration::from_secs(5))
            .await
            .err()
            .unwrap();
        assert!(err.is_device_lost());
        assert!(client.handle("ghost").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_root_request_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, client, _events) = setup(&dir);
        bridge.set_devices(&["a"]);
        bridge.set_root_granted(false);
        assert!(!client.root("a").await.unwrap());
        assert!(client.shared.state().anticipate_root.is_empty());
    }
}
