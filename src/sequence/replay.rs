use super::{ActionKind, ActionSequence};
use crate::error::Result;
use async_trait::async_trait;
use log::{debug, warn};
use std::time::Duration;

/// Anything a sequence can be replayed against
#[async_trait]
pub trait TapInput: Send + Sync {
    /// Serial used in log lines
    fn label(&self) -> &str;

    /// Send one tap at a screen coordinate
    async fn input_tap(&self, x: i32, y: i32) -> Result<()>;
}

/// Replay a sequence front to back.
///
/// Taps go to `target`; delay actions sleep for their value in seconds. The
/// `gap` is applied after every action, delays included, so a delay of `d`
/// costs `d + gap` in total. A failing tap aborts the replay.
pub async fn replay(sequence: &ActionSequence, target: &dyn TapInput, gap: Duration) -> Result<()> {
    debug!(
        "Replaying {} actions on {} (gap {:?})",
        sequence.len(),
        target.label(),
        gap
    );

    for action in sequence.iter() {
        debug!("Performing {}", action.id);
        match &action.kind {
            ActionKind::Tap { x, y } => {
                target.input_tap(*x, *y).await?;
            }
            ActionKind::Delay { seconds } => match parse_seconds(seconds) {
                Some(wait) => {
                    debug!("Sleeping {:?}", wait);
                    tokio::time::sleep(wait).await;
                }
                None => warn!(
                    "Delay action '{}' has unusable value '{}', not waiting",
                    action.id, seconds
                ),
            },
            ActionKind::Value { type_name, .. } => {
                debug!(
                    "Skipping '{}' action '{}' during replay",
                    type_name, action.id
                );
            }
        }
        tokio::time::sleep(gap).await;
    }

    Ok(())
}

fn parse_seconds(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}
