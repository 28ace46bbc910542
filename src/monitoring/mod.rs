//! Run Monitoring Module
//!
//! Provides the observable side of an automation run.
//!
//! # Components
//!
//! - [`LogStream`]: Bounded, timestamped run log shared with observers
//! - [`ExecutionTimeline`]: Step visit timing for Gantt charts

pub mod run_log;
pub mod timeline;

pub use run_log::{LogEntry, LogStream, RUN_LOG_TARGET};
pub use timeline::{EventType, ExecutionTimeline, StepTiming, StepVisit, TimelineEvent};
