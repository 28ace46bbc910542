//! Automation Execution Module
//!
//! Provides the step execution engine, the action dispatcher it drives,
//! and the coordinator that owns run lifecycle and the keep-alive hold.
//!
//! # Architecture
//!
//! - [`actions`]: The [`Action`] trait and built-in actions
//! - [`dispatcher`]: Action name resolution and post-step checks
//! - [`cancel`]: Cooperative cancellation signal
//! - [`engine`]: Branching step loop
//! - [`coordinator`]: Start/stop requests, debounce, exclusive runs

pub mod actions;
pub mod cancel;
pub mod coordinator;
pub mod dispatcher;
pub mod engine;

pub use actions::{Action, ActionError};
pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use coordinator::RunCoordinator;
pub use dispatcher::{ActionDispatcher, BUILTIN_ACTIONS};
pub use engine::{Engine, RunOutcome};
