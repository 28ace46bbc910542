//! Step Table Parser
//!
//! Handles loading step tables from YAML files and writing them back.
//! A table file carries the steps plus an optional entry id and an
//! optional `settings:` block; both fall back to defaults.

use std::fs;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::model::{Step, StepTable};
use super::validator::validate_table;
use crate::config::Settings;
use crate::error::{AutomationError, Result};

/// On-disk layout of a step table file.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StepTableFile {
    /// Entry step id; overrides `settings.entry_step`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<u32>,

    /// Optional engine settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,

    /// Steps in any order
    pub steps: Vec<Step>,
}

/// A validated table together with the settings it was loaded with.
#[derive(Debug, Clone)]
pub struct LoadedTable {
    pub table: StepTable,
    pub settings: Settings,
}

/// Parses and validates a step table from YAML text.
pub fn parse_step_table(yaml: &str) -> Result<LoadedTable> {
    let file: StepTableFile = serde_yaml::from_str(yaml)?;

    let mut settings = file.settings.unwrap_or_default();
    if let Some(entry) = file.entry {
        settings.entry_step = entry;
    }

    info!(
        "Parsed {} steps (entry step {})",
        file.steps.len(),
        settings.entry_step
    );

    let table = StepTable::from_steps(file.steps)?;
    validate_table(&table, settings.entry_step)?;

    Ok(LoadedTable { table, settings })
}

/// Loads a step table from a YAML file.
///
/// This function:
/// 1. Reads and parses the YAML file
/// 2. Applies the file's entry id and settings over the defaults
/// 3. Rejects duplicate step ids
/// 4. Validates branch targets and the entry step
///
/// # Example
///
/// ```rust,no_run
/// use autostep::workflow::load_step_table;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let loaded = load_step_table("login.yaml")?;
///     println!("Loaded {} steps", loaded.table.len());
///     Ok(())
/// }
/// ```
pub fn load_step_table(path: &str) -> Result<LoadedTable> {
    info!("Loading step table from: {}", path);

    let yaml_content = fs::read_to_string(path).map_err(|e| AutomationError::io(path, e))?;
    debug!("YAML content loaded ({} bytes)", yaml_content.len());

    parse_step_table(&yaml_content)
}

/// Saves a step table to a YAML file.
///
/// # Arguments
///
/// * `table` - The table to save
/// * `settings` - Settings to embed; `None` writes steps only
/// * `path` - Output file path
pub fn save_step_table(table: &StepTable, settings: Option<&Settings>, path: &str) -> Result<()> {
    let file = StepTableFile {
        entry: settings.map(|s| s.entry_step),
        settings: settings.cloned(),
        steps: table.clone().into_steps(),
    };

    let yaml_content = serde_yaml::to_string(&file)?;
    fs::write(path, yaml_content).map_err(|e| AutomationError::io(path, e))?;
    info!("Step table saved to: {}", path);
    Ok(())
}
