//! Step Table Validation
//!
//! Construction-time checks for step tables:
//! - Step field validation
//! - Branch target integrity (every target exists or is the terminal sentinel)
//! - Entry step existence
//! - Reachability and self-loop diagnostics
//!
//! Self-referencing steps are legal. A step whose branches both point back
//! at itself only ends when the run is stopped from outside; validation
//! reports it as a warning and never rejects it.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;

use log::{debug, info, warn};
use thiserror::Error;

use super::model::{Step, StepTable, TERMINAL_STEP};
use crate::error::{AutomationError, Result};

/// Which branch of a step a target belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Success,
    Failure,
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "on_success"),
            Self::Failure => write!(f, "on_failure"),
        }
    }
}

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Step table has no steps")]
    EmptyTable,

    #[error("Step {0} has no action specified")]
    EmptyAction(u32),

    #[error("Step {step} routes {branch} to unknown step {target}")]
    UnknownTarget { step: u32, branch: Branch, target: u32 },

    #[error("Entry step {0} is not in the step table")]
    UnknownEntry(u32),
}

/// Validates a single step's fields.
fn validate_step(step: &Step, table: &StepTable) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if step.action.trim().is_empty() {
        errors.push(ValidationError::EmptyAction(step.id));
    }

    for (branch, target) in [(Branch::Success, step.on_success), (Branch::Failure, step.on_failure)] {
        if target != TERMINAL_STEP && !table.contains(target) {
            errors.push(ValidationError::UnknownTarget {
                step: step.id,
                branch,
                target,
            });
        }
    }

    if step.on_success == step.id && step.on_failure == step.id {
        warn!(
            "Step {} ('{}') branches to itself on both outcomes; the run only ends when stopped",
            step.id, step.name
        );
    } else if step.loops_on_itself() {
        debug!("Step {} retries itself on one branch", step.id);
    }

    errors
}

/// Validates the whole table for a run starting at `entry`.
///
/// Performs the following checks:
/// 1. Table is not empty
/// 2. Every step names an action
/// 3. Every branch target exists or is the terminal sentinel
/// 4. The entry step exists
///
/// Id 0 never reaches here; [`StepTable::add_step`] rejects it.
///
/// Steps unreachable from the entry are reported but accepted.
pub fn validate_table(table: &StepTable, entry: u32) -> Result<()> {
    info!("Validating step table with {} steps", table.len());

    if table.is_empty() {
        return Err(AutomationError::Invalid(vec![ValidationError::EmptyTable]));
    }

    let mut all_errors = Vec::new();
    for step in table.steps() {
        all_errors.extend(validate_step(step, table));
    }

    if !table.contains(entry) {
        all_errors.push(ValidationError::UnknownEntry(entry));
    }

    if !all_errors.is_empty() {
        return Err(AutomationError::Invalid(all_errors));
    }

    let reachable = reachable_steps(table, entry);
    let unreachable: Vec<u32> = table
        .steps()
        .map(|s| s.id)
        .filter(|id| !reachable.contains(id))
        .collect();

    if !unreachable.is_empty() {
        info!("Steps never reached from entry {}: {:?}", entry, unreachable);
    }

    info!(
        "Step table validated: {} steps, {} actions",
        table.len(),
        table.actions().len()
    );
    Ok(())
}

/// Collects every step id reachable from `entry` by following branches.
pub fn reachable_steps(table: &StepTable, entry: u32) -> BTreeSet<u32> {
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([entry]);

    while let Some(id) = queue.pop_front() {
        if id == TERMINAL_STEP || !seen.insert(id) {
            continue;
        }
        match table.get(id) {
            Some(step) => {
                queue.push_back(step.on_success);
                queue.push_back(step.on_failure);
            }
            None => {
                seen.remove(&id);
            }
        }
    }

    seen
}

/// Returns `(step id, action)` pairs whose action is not in `known`.
///
/// Unknown actions are not a table error: the dispatcher fails them at run
/// time and the engine takes the failure branch.
pub fn find_unknown_actions(table: &StepTable, known: &[&str]) -> Vec<(u32, String)> {
    table
        .steps()
        .filter(|s| !known.contains(&s.action.as_str()))
        .map(|s| (s.id, s.action.clone()))
        .collect()
}
