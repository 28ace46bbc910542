//! Built-in Actions
//!
//! Each action turns one step's arguments into device primitives. Actions
//! report `Ok(true)` on success, `Ok(false)` for an expected failure they
//! already logged, and `Err` for argument or device faults; the dispatcher
//! folds all of these into a boolean outcome.
//!
//! | Action    | Arguments                               |
//! |-----------|-----------------------------------------|
//! | `launch`  | `[app]` alias or package name           |
//! | `touch`   | `[x, y]`                                |
//! | `swipe`   | `[x1, y1, x2, y2]`, kwarg `duration` ms |
//! | `input`   | `[text]` (non-string types nothing)     |
//! | `back`    | none                                    |
//! | `succeed` | none                                    |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::device::{AppRegistry, Device, DeviceError};
use crate::monitoring::LogStream;
use crate::workflow::Step;

/// Swipe duration used when the step does not name one.
pub const DEFAULT_SWIPE_MS: u64 = 300;

/// Faults raised while performing an action.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Missing argument {index} ({what})")]
    MissingArgument { index: usize, what: &'static str },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// A pluggable step action.
#[async_trait]
pub trait Action: Send + Sync {
    async fn perform(&self, step: &Step, log: &LogStream) -> Result<bool, ActionError>;
}

fn coordinate(step: &Step, index: usize, what: &'static str) -> Result<i64, ActionError> {
    step.arg_i64(index)
        .ok_or(ActionError::MissingArgument { index, what })
}

/// Launches an application by alias or package name.
pub struct LaunchAction {
    device: Arc<dyn Device>,
    apps: Arc<AppRegistry>,
}

impl LaunchAction {
    pub fn new(device: Arc<dyn Device>, apps: Arc<AppRegistry>) -> Self {
        Self { device, apps }
    }
}

#[async_trait]
impl Action for LaunchAction {
    async fn perform(&self, step: &Step, log: &LogStream) -> Result<bool, ActionError> {
        let name = step.arg_str(0).ok_or(ActionError::MissingArgument {
            index: 0,
            what: "application",
        })?;

        let Some(package) = self.apps.resolve(name) else {
            log.warn(format!("Cannot resolve application '{}'", name));
            return Ok(false);
        };

        self.device.launch(&package).await?;
        log.info(format!("Launched {}", package));
        Ok(true)
    }
}

/// Taps a screen coordinate.
pub struct TouchAction {
    device: Arc<dyn Device>,
}

impl TouchAction {
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self { device }
    }
}

#[async_trait]
impl Action for TouchAction {
    async fn perform(&self, step: &Step, log: &LogStream) -> Result<bool, ActionError> {
        let x = coordinate(step, 0, "x")?;
        let y = coordinate(step, 1, "y")?;

        self.device.tap(x, y).await?;
        log.info(format!("Tapped ({}, {})", x, y));
        Ok(true)
    }
}

/// Swipes between two coordinates.
pub struct SwipeAction {
    device: Arc<dyn Device>,
}

impl SwipeAction {
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self { device }
    }
}

#[async_trait]
impl Action for SwipeAction {
    async fn perform(&self, step: &Step, log: &LogStream) -> Result<bool, ActionError> {
        let from = (coordinate(step, 0, "x1")?, coordinate(step, 1, "y1")?);
        let to = (coordinate(step, 2, "x2")?, coordinate(step, 3, "y2")?);

        let duration_ms = match step.kwarg_i64("duration") {
            Some(ms) if ms < 0 => {
                return Err(ActionError::InvalidArgument(format!(
                    "swipe duration {} ms is negative",
                    ms
                )))
            }
            Some(ms) => ms as u64,
            None => DEFAULT_SWIPE_MS,
        };

        self.device
            .swipe(from, to, Duration::from_millis(duration_ms))
            .await?;
        log.info(format!(
            "Swiped ({}, {}) -> ({}, {})",
            from.0, from.1, to.0, to.1
        ));
        Ok(true)
    }
}

/// Types text into the focused field.
pub struct InputAction {
    device: Arc<dyn Device>,
}

impl InputAction {
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self { device }
    }
}

#[async_trait]
impl Action for InputAction {
    async fn perform(&self, step: &Step, log: &LogStream) -> Result<bool, ActionError> {
        // Anything but a string types nothing.
        let text = step.arg_str(0).unwrap_or_default().to_string();

        self.device.input_text(&text).await?;
        log.info(format!("Typed {} characters", text.chars().count()));
        Ok(true)
    }
}

/// Sends the system back gesture.
pub struct BackAction {
    device: Arc<dyn Device>,
}

impl BackAction {
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self { device }
    }
}

#[async_trait]
impl Action for BackAction {
    async fn perform(&self, _step: &Step, log: &LogStream) -> Result<bool, ActionError> {
        self.device.back().await?;
        log.info("Pressed back");
        Ok(true)
    }
}

/// Succeeds immediately.
pub struct SucceedAction;

#[async_trait]
impl Action for SucceedAction {
    async fn perform(&self, _step: &Step, _log: &LogStream) -> Result<bool, ActionError> {
        Ok(true)
    }
}
