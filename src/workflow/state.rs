//! Run Context
//!
//! The observable state of an automation engine: which step is current,
//! whether a run is active, the last fatal error, and the correlation
//! fields that external reporting round-trips without the engine reading
//! them.

use serde::{Deserialize, Serialize};

/// Lifecycle of an engine. `Idle` and `Stopped` both accept a new run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    #[default]
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl EngineState {
    /// Returns true if a new run may begin from this state.
    pub fn accepts_start(self) -> bool {
        matches!(self, Self::Idle | Self::Stopped)
    }
}

/// Identity of the device the automation runs on.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DeviceIdentity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    #[serde(default)]
    pub mobile_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wx_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wx_phone: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl DeviceIdentity {
    /// Builds an identity for the host, named after its hostname.
    pub fn detect() -> Self {
        let mobile_name = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "unknown-device".to_string());

        Self {
            mobile_name,
            ..Self::default()
        }
    }
}

/// Snapshot of an engine's run state.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunContext {
    pub state: EngineState,

    /// Step about to execute, or the last branch target taken
    pub current_step: u32,

    pub is_running: bool,

    /// Most recent fatal error; cleared when a run starts
    pub last_error: Option<String>,

    /// Dispatcher invocations in the current run
    pub dispatches: u64,

    /// Incremented every time a run starts
    pub run_id: u64,

    #[serde(flatten)]
    pub device: DeviceIdentity,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    #[serde(default)]
    pub loop_failed_count: u32,

    #[serde(default)]
    pub same_step_counter: u32,
}

impl RunContext {
    /// Creates an idle context pointing at `entry`.
    pub fn new(entry: u32) -> Self {
        Self {
            state: EngineState::Idle,
            current_step: entry,
            is_running: false,
            last_error: None,
            dispatches: 0,
            run_id: 0,
            device: DeviceIdentity::default(),
            result: None,
            loop_failed_count: 0,
            same_step_counter: 0,
        }
    }

    /// Resets per-run fields for a run starting at `entry`.
    pub fn begin_run(&mut self, entry: u32) {
        self.state = EngineState::Running;
        self.current_step = entry;
        self.is_running = true;
        self.last_error = None;
        self.dispatches = 0;
        self.run_id += 1;
    }

    /// Marks the run as ended.
    pub fn finish(&mut self) {
        self.state = EngineState::Stopped;
        self.is_running = false;
    }

    /// Serializes the snapshot for external reporting.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_ENTRY_STEP)
    }
}
