//! Runtime Settings
//!
//! Tunables for the engine, the run coordinator, and the simulated device.
//! Every field has a default, so a step table file may carry a partial
//! `settings:` block or none at all.
//!
//! ```yaml
//! settings:
//!   step_delay_ms: 800
//!   hold_max_secs: 300
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Step id a run begins at unless configured otherwise.
pub const DEFAULT_ENTRY_STEP: u32 = 1;

/// Pacing interval between two steps.
pub const DEFAULT_STEP_DELAY_MS: u64 = 500;

/// Minimum interval between two accepted start/stop requests.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Maximum wait for engine teardown after a stop request.
pub const DEFAULT_TEARDOWN_GRACE_MS: u64 = 50;

/// Safety cap on the keep-alive hold (10 minutes).
pub const DEFAULT_HOLD_MAX_SECS: u64 = 600;

/// Number of log entries retained.
pub const DEFAULT_LOG_CAPACITY: usize = 500;

/// Settings for one automation engine instance.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Step id the run starts at
    pub entry_step: u32,

    /// Delay between steps in milliseconds
    pub step_delay_ms: u64,

    /// Debounce window for start/stop requests in milliseconds
    pub debounce_ms: u64,

    /// How long a stop request waits for the run to tear down
    pub teardown_grace_ms: u64,

    /// Keep-alive safety cap in seconds (0 disables the cap)
    pub hold_max_secs: u64,

    /// Log stream retention bound
    pub log_capacity: usize,

    /// Settle time before an expected-screen check
    pub verify_settle_ms: u64,

    /// Simulated tap latency
    pub tap_delay_ms: u64,

    /// Simulated swipe latency
    pub swipe_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            entry_step: DEFAULT_ENTRY_STEP,
            step_delay_ms: DEFAULT_STEP_DELAY_MS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            teardown_grace_ms: DEFAULT_TEARDOWN_GRACE_MS,
            hold_max_secs: DEFAULT_HOLD_MAX_SECS,
            log_capacity: DEFAULT_LOG_CAPACITY,
            verify_settle_ms: 1000,
            tap_delay_ms: 300,
            swipe_delay_ms: 500,
        }
    }
}

impl Settings {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }

    /// Returns the keep-alive cap, or `None` when disabled.
    pub fn hold_max(&self) -> Option<Duration> {
        (self.hold_max_secs > 0).then(|| Duration::from_secs(self.hold_max_secs))
    }

    pub fn verify_settle(&self) -> Duration {
        Duration::from_millis(self.verify_settle_ms)
    }

    pub fn tap_delay(&self) -> Duration {
        Duration::from_millis(self.tap_delay_ms)
    }

    pub fn swipe_delay(&self) -> Duration {
        Duration::from_millis(self.swipe_delay_ms)
    }
}
