//! Scriptable in-memory bridge.
//!
//! Records every shell command and file transfer and answers with scripted
//! device sets and shell outputs. Used by the unit tests of the registry and
//! the device handles, and handy for dry runs without hardware.
//!
//! ```rust,ignore
//! let bridge = MockBridge::new();
//! bridge.set_devices(&["R58M123"]);
//! bridge.respond("getprop ro.product.model", "Pixel 7\n");
//! ```

use super::{Bridge, ConnectionSet};
use crate::error::{HarnessError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Recorded bridge call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCall {
    Shell { serial: String, command: String },
    Push { serial: String, local: PathBuf, remote: String },
    Pull { serial: String, remote: String, local: PathBuf },
    Root { serial: String },
    Remount { serial: String },
    DisableVerity { serial: String },
}

#[derive(Default)]
struct MockState {
    current: ConnectionSet,
    polls: VecDeque<Result<ConnectionSet>>,
    responses: Vec<(String, String)>,
    unreachable: HashSet<String>,
    remote_files: HashMap<String, Vec<u8>>,
    calls: Vec<BridgeCall>,
    root_granted: bool,
    poll_count: usize,
}

/// In-memory bridge for tests
pub struct MockBridge {
    transport: &'static str,
    state: Mutex<MockState>,
}

impl MockBridge {
    pub fn new() -> Self {
        Self::with_transport("android")
    }

    pub fn with_transport(transport: &'static str) -> Self {
        Self {
            transport,
            state: Mutex::new(MockState {
                root_granted: true,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        // a panicking test thread must not hide the real failure
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the reachable set returned once scripted polls run out
    pub fn set_devices(&self, serials: &[&str]) {
        self.state().current = serials.iter().map(|s| s.to_string()).collect();
    }

    /// Queue the result of the next poll
    pub fn queue_poll(&self, serials: &[&str]) {
        let set = serials.iter().map(|s| s.to_string()).collect();
        self.state().polls.push_back(Ok(set));
    }

    /// Queue a failing poll
    pub fn queue_poll_failure(&self, reason: &str) {
        self.state()
            .polls
            .push_back(Err(HarnessError::TransportTransient(reason.to_string())));
    }

    /// Number of device polls served so far
    pub fn poll_count(&self) -> usize {
        self.state().poll_count
    }

    /// Answer shell commands containing `pattern` with `output`.
    /// Later registrations take precedence.
    pub fn respond(&self, pattern: &str, output: &str) {
        self.state()
            .responses
            .insert(0, (pattern.to_string(), output.to_string()));
    }

    /// Make every command sent to `serial` fail as unreachable
    pub fn set_unreachable(&self, serial: &str) {
        self.state().unreachable.insert(serial.to_string());
    }

    pub fn set_root_granted(&self, granted: bool) {
        self.state().root_granted = granted;
    }

    /// Content served by `pull_file` for a remote path
    pub fn add_remote_file(&self, remote: &str, content: &[u8]) {
        self.state()
            .remote_files
            .insert(remote.to_string(), content.to_vec());
    }

    pub fn calls(&self) -> Vec<BridgeCall> {
        self.state().calls.clone()
    }

    /// Shell commands sent to one device, in order
    pub fn shell_commands(&self, serial: &str) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                BridgeCall::Shell { serial: s, command } if s == serial => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    /// Coordinates of every `input tap` sent to one device
    pub fn taps(&self, serial: &str) -> Vec<(i32, i32)> {
        self.shell_commands(serial)
            .iter()
            .filter_map(|cmd| {
                let rest = cmd
                    .strip_prefix("input touchscreen tap ")
                    .or_else(|| cmd.strip_prefix("input tap "))?;
                let mut parts = rest.split_whitespace().map(|p| p.parse::<i32>());
                match (parts.next(), parts.next()) {
                    (Some(Ok(x)), Some(Ok(y))) => Some((x, y)),
                    _ => None,
                }
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    fn check_reachable(&self, state: &MockState, serial: &str) -> Result<()> {
        if state.unreachable.contains(serial) {
            Err(HarnessError::unreachable(serial, "device offline"))
        } else {
            Ok(())
        }
    }
}

impl Default for MockBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bridge for MockBridge {
    fn transport(&self) -> &'static str {
        self.transport
    }

    async fn list_reachable_devices(&self) -> Result<ConnectionSet> {
        let mut state = self.state();
        state.poll_count += 1;
        match state.polls.pop_front() {
            Some(Ok(set)) => {
                state.current = set.clone();
                Ok(set)
            }
            Some(Err(e)) => Err(e),
            None => Ok(state.current.clone()),
        }
    }

    async fn exec_shell(&self, serial: &str, command: &str) -> Result<String> {
        let mut state = self.state();
        state.calls.push(BridgeCall::Shell {
            serial: serial.to_string(),
            command: command.to_string(),
        });
        self.check_reachable(&state, serial)?;

        Ok(state
            .responses
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }

    async fn push_file(&self, serial: &str, local: &Path, remote: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(BridgeCall::Push {
            serial: serial.to_string(),
            local: local.to_path_buf(),
            remote: remote.to_string(),
        });
        self.check_reachable(&state, serial)
    }

    async fn pull_file(&self, serial: &str, remote: &str, local: &Path) -> Result<()> {
        let content = {
            let mut state = self.state();
            state.calls.push(BridgeCall::Pull {
                serial: serial.to_string(),
                remote: remote.to_string(),
                local: local.to_path_buf(),
            });
            self.check_reachable(&state, serial)?;
            state.remote_files.get(remote).cloned().unwrap_or_default()
        };
        std::fs::write(local, content)?;
        Ok(())
    }

    async fn root_request(&self, serial: &str) -> Result<bool> {
        let mut state = self.state();
        state.calls.push(BridgeCall::Root {
            serial: serial.to_string(),
        });
        self.check_reachable(&state, serial)?;
        Ok(state.root_granted)
    }

    async fn remount(&self, serial: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(BridgeCall::Remount {
            serial: serial.to_string(),
        });
        self.check_reachable(&state, serial)
    }

    async fn disable_verity(&self, serial: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(BridgeCall::DisableVerity {
            serial: serial.to_string(),
        });
        self.check_reachable(&state, serial)
    }
}
