//! Camera app mode tracking
//!
//! The harness cannot see which view the camera app shows, so it tracks the
//! mode it last switched to and replays a `goto_*` sequence only when the
//! requested capture needs the other mode. Stopping a video leaves the mode
//! on video: the app does not go back to the photo view by itself.

use crate::sequence::SequenceRole;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CameraMode {
    #[default]
    Photo,
    Video,
}

impl fmt::Display for CameraMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraMode::Photo => f.write_str("photo"),
            CameraMode::Video => f.write_str("video"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureState {
    pub mode: CameraMode,
    pub recording: bool,
}

/// High level capture requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOp {
    TakePhoto,
    StartVideo,
    StopVideo,
}

/// One sequence to replay and the state to commit once it has run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStep {
    pub role: SequenceRole,
    pub then: CaptureState,
}

impl CaptureState {
    /// Steps needed to perform `op` from this state, in replay order
    pub fn plan(&self, op: CaptureOp) -> Vec<CaptureStep> {
        let mut steps = Vec::new();
        let mut state = *self;

        match op {
            CaptureOp::TakePhoto => {
                if state.mode != CameraMode::Photo {
                    state.mode = CameraMode::Photo;
                    steps.push(CaptureStep {
                        role: SequenceRole::GotoPhoto,
                        then: state,
                    });
                }
                steps.push(CaptureStep {
                    role: SequenceRole::Photo,
                    then: state,
                });
            }
            CaptureOp::StartVideo => {
                if state.mode != CameraMode::Video {
                    state.mode = CameraMode::Video;
                    steps.push(CaptureStep {
                        role: SequenceRole::GotoVideo,
                        then: state,
                    });
                }
                state.recording = true;
                steps.push(CaptureStep {
                    role: SequenceRole::VideoStart,
                    then: state,
                });
            }
            CaptureOp::StopVideo => {
                if state.recording {
                    state.recording = false;
                    steps.push(CaptureStep {
                        role: SequenceRole::VideoStop,
                        then: state,
                    });
                }
            }
        }

        steps
    }
}
