//! Step Table Module
//!
//! Provides data structures and utilities for defining, loading, and
//! validating automation step tables.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (Step, StepTable)
//! - [`parser`]: YAML loading and saving
//! - [`validator`]: Branch target and entry checks
//! - [`state`]: Observable run context

pub mod model;
pub mod parser;
pub mod state;
pub mod validator;

pub use model::{Step, StepTable, TERMINAL_STEP};
pub use parser::{load_step_table, parse_step_table, save_step_table, LoadedTable};
pub use state::{DeviceIdentity, EngineState, RunContext};
pub use validator::{validate_table, ValidationError};
