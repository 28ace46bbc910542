//! autostep - Branching Step Engine for Device Automation
//!
//! Drives a device through a flat table of steps. Each step names an action
//! (launch an app, tap, swipe, type, go back) and the step to continue with
//! on success or on failure; step `0` ends the run.
//!
//! # Architecture
//!
//! The library is organized into four main modules:
//!
//! - [`workflow`]: Step table model, YAML loading, validation, run context
//! - [`execution`]: Action dispatcher, step engine, and run coordinator
//! - [`device`]: Device primitives, app aliases, keep-alive hold, screen checks
//! - [`monitoring`]: Bounded run log and execution timeline
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use autostep::device::{AppRegistry, KeepAlive, SimulatedDevice};
//! use autostep::execution::{ActionDispatcher, Engine, RunCoordinator};
//! use autostep::monitoring::LogStream;
//! use autostep::load_step_table;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load a step table from YAML
//!     let loaded = load_step_table("login.yaml")?;
//!
//!     // Bind the built-in actions to a device
//!     let device = Arc::new(SimulatedDevice::new().install("com.tencent.mm"));
//!     let log = LogStream::new(loaded.settings.log_capacity);
//!     let dispatcher =
//!         ActionDispatcher::with_builtin_actions(device, Arc::new(AppRegistry::load()), log);
//!
//!     // Run it through the coordinator
//!     let engine = Engine::new(Arc::new(loaded.table), Arc::new(dispatcher))
//!         .with_settings(&loaded.settings);
//!     let coordinator =
//!         RunCoordinator::new(Arc::new(engine), Arc::new(KeepAlive::new("autostep")), &loaded.settings);
//!
//!     coordinator.request_start();
//!     coordinator.wait_until_idle().await;
//!     println!("{}", coordinator.log().render());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod execution;
pub mod monitoring;
pub mod workflow;

// Re-export commonly used types
pub use config::Settings;
pub use error::AutomationError;
pub use execution::{Engine, RunCoordinator};
pub use workflow::model::{Step, StepTable};
pub use workflow::parser::load_step_table;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "autostep";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "autostep");
    }

    #[test]
    fn test_module_exports_step() {
        let step = Step::new(1, "Open WeChat", "launch");
        assert_eq!(step.id, 1);
        assert_eq!(step.action, "launch");
    }

    #[test]
    fn test_module_exports_table() {
        let table = StepTable::new();
        assert!(table.is_empty());
    }

    #[test]
    fn test_version_format() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
        for part in parts {
            assert!(part.parse::<u32>().is_ok(), "Version components should be numeric");
        }
    }
}
