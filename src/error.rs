//! Crate Error Types
//!
//! Errors raised while building, loading, or saving step tables. Run-time
//! failures inside an automation run never surface as errors; they are
//! reported through the log stream and the status snapshot instead.

use thiserror::Error;

use crate::workflow::validator::ValidationError;

/// Errors produced by step table construction and persistence.
#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("Failed to access '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse step table YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to process JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Step table is invalid:\n{}", join_errors(.0))]
    Invalid(Vec<ValidationError>),

    #[error("Step '{0}' uses id 0, which is reserved for ending the run")]
    ReservedStepId(String),

    #[error("Step {0} is defined more than once")]
    DuplicateStep(u32),

    #[error("Step {0} not found in step table")]
    StepNotFound(u32),
}

impl AutomationError {
    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, AutomationError>;
