//! Recorded UI action sequences
//!
//! A sequence is an ordered list of taps and value/delay entries recorded
//! against one camera app. Sequences are stored per device under a role name
//! and replayed by the capture operations of a device handle.

pub mod codec;
pub mod replay;

pub use codec::{decode_sequence, encode_sequence};
pub use replay::{replay, TapInput};

use std::fmt;
use std::str::FromStr;

/// Roles the capture operations know how to replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SequenceRole {
    GotoPhoto,
    Photo,
    GotoVideo,
    VideoStart,
    VideoStop,
}

impl SequenceRole {
    pub const ALL: [SequenceRole; 5] = [
        SequenceRole::GotoPhoto,
        SequenceRole::Photo,
        SequenceRole::GotoVideo,
        SequenceRole::VideoStart,
        SequenceRole::VideoStop,
    ];

    /// Name used as the sequence key and as the settings element tag
    pub fn as_str(&self) -> &'static str {
        match self {
            SequenceRole::GotoPhoto => "goto_photo",
            SequenceRole::Photo => "photo",
            SequenceRole::GotoVideo => "goto_video",
            SequenceRole::VideoStart => "video_start",
            SequenceRole::VideoStop => "video_stop",
        }
    }

    /// Human readable label shown when recording a sequence
    pub fn description(&self) -> &'static str {
        match self {
            SequenceRole::GotoPhoto => "Change Mode to Photo",
            SequenceRole::Photo => "Shoot Photo",
            SequenceRole::GotoVideo => "Change Mode to Video",
            SequenceRole::VideoStart => "Start Shooting Video",
            SequenceRole::VideoStop => "Stop Shooting Video",
        }
    }
}

impl fmt::Display for SequenceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SequenceRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SequenceRole::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| format!("Unknown sequence role: {}", s))
    }
}

/// What an action does when replayed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    /// Tap the screen at a pixel coordinate
    Tap { x: i32, y: i32 },
    /// Wait for the given number of seconds
    Delay { seconds: String },
    /// Any other recorded value; kept on round-trip, skipped on replay
    Value { type_name: String, value: String },
}

impl ActionKind {
    /// The `type` attribute this kind is persisted under
    pub fn type_name(&self) -> &str {
        match self {
            ActionKind::Tap { .. } => "tap",
            ActionKind::Delay { .. } => "delay",
            ActionKind::Value { type_name, .. } => type_name,
        }
    }

    /// Build a non-tap kind from its persisted type and value
    pub fn from_value(type_name: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        if type_name == "delay" {
            ActionKind::Delay { seconds: value }
        } else {
            ActionKind::Value {
                type_name: type_name.to_string(),
                value,
            }
        }
    }
}

/// One recorded UI interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    /// UI element id or any label chosen while recording
    pub id: String,
    pub description: String,
    pub kind: ActionKind,
}

impl Action {
    pub fn tap(id: impl Into<String>, description: impl Into<String>, x: i32, y: i32) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            kind: ActionKind::Tap { x, y },
        }
    }

    pub fn delay(id: impl Into<String>, description: impl Into<String>, seconds: u64) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            kind: ActionKind::Delay {
                seconds: seconds.to_string(),
            },
        }
    }
}

/// Ordered list of actions, replayed front to back
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionSequence {
    pub actions: Vec<Action>,
}

impl ActionSequence {
    pub fn new(actions: Vec<Action>) -> Self {
        Self { actions }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Action> {
        self.actions.iter()
    }
}

impl From<Vec<Action>> for ActionSequence {
    fn from(actions: Vec<Action>) -> Self {
        Self::new(actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_names_round_trip() {
        for role in SequenceRole::ALL {
            assert_eq!(role.as_str().parse::<SequenceRole>(), Ok(role));
        }
        assert!("shoot_photo".parse::<SequenceRole>().is_err());
    }

    #[test]
    fn test_kind_from_value() {
        assert_eq!(
            ActionKind::from_value("delay", "3"),
            ActionKind::Delay {
                seconds: "3".into()
            }
        );
        let other = ActionKind::from_value("text", "hello");
        assert_eq!(other.type_name(), "text");
    }
}
