//! Simulated Device
//!
//! An in-memory [`Device`] that checks launch targets against a set of
//! installed packages, bounds-checks coordinates against a fixed screen,
//! waits a configurable latency per gesture, and records every gesture it
//! accepted.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use super::{Device, DeviceError};
use crate::config::Settings;

/// Default screen size, portrait.
pub const DEFAULT_SCREEN: (i64, i64) = (1080, 2400);

/// A gesture the simulated device accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gesture {
    Launch(String),
    Tap(i64, i64),
    Swipe {
        from: (i64, i64),
        to: (i64, i64),
        duration_ms: u64,
    },
    Input(String),
    Back,
}

/// In-process device used by the CLI and tests.
#[derive(Debug)]
pub struct SimulatedDevice {
    installed: HashSet<String>,
    screen: (i64, i64),
    tap_latency: Duration,
    swipe_latency: Duration,
    gestures: Mutex<Vec<Gesture>>,
}

impl SimulatedDevice {
    /// Creates a device with no installed packages and no latency.
    pub fn new() -> Self {
        Self {
            installed: HashSet::new(),
            screen: DEFAULT_SCREEN,
            tap_latency: Duration::ZERO,
            swipe_latency: Duration::ZERO,
            gestures: Mutex::new(Vec::new()),
        }
    }

    /// Creates a device using the latencies from `settings`.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new().with_latency(settings.tap_delay(), settings.swipe_delay())
    }

    pub fn with_latency(mut self, tap: Duration, swipe: Duration) -> Self {
        self.tap_latency = tap;
        self.swipe_latency = swipe;
        self
    }

    pub fn with_screen(mut self, width: i64, height: i64) -> Self {
        self.screen = (width, height);
        self
    }

    /// Marks a package as installed.
    pub fn install(mut self, package: impl Into<String>) -> Self {
        self.installed.insert(package.into());
        self
    }

    pub fn is_installed(&self, package: &str) -> bool {
        self.installed.contains(package)
    }

    /// Returns every gesture accepted so far, in order.
    pub fn gestures(&self) -> Vec<Gesture> {
        self.gestures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, gesture: Gesture) {
        debug!("Simulated gesture: {:?}", gesture);
        self.gestures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(gesture);
    }

    fn check_point(&self, x: i64, y: i64) -> Result<(), DeviceError> {
        let (width, height) = self.screen;
        if (0..width).contains(&x) && (0..height).contains(&y) {
            Ok(())
        } else {
            Err(DeviceError::OutOfBounds { x, y })
        }
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

async fn pause(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

#[async_trait]
impl Device for SimulatedDevice {
    async fn launch(&self, package: &str) -> Result<(), DeviceError> {
        if !self.is_installed(package) {
            return Err(DeviceError::AppNotFound(package.to_string()));
        }
        self.record(Gesture::Launch(package.to_string()));
        Ok(())
    }

    async fn tap(&self, x: i64, y: i64) -> Result<(), DeviceError> {
        self.check_point(x, y)?;
        pause(self.tap_latency).await;
        self.record(Gesture::Tap(x, y));
        Ok(())
    }

    async fn swipe(
        &self,
        from: (i64, i64),
        to: (i64, i64),
        duration: Duration,
    ) -> Result<(), DeviceError> {
        self.check_point(from.0, from.1)?;
        self.check_point(to.0, to.1)?;
        pause(self.swipe_latency.max(duration)).await;
        self.record(Gesture::Swipe {
            from,
            to,
            duration_ms: duration.as_millis() as u64,
        });
        Ok(())
    }

    async fn input_text(&self, text: &str) -> Result<(), DeviceError> {
        self.record(Gesture::Input(text.to_string()));
        Ok(())
    }

    async fn back(&self) -> Result<(), DeviceError> {
        self.record(Gesture::Back);
        Ok(())
    }
}
