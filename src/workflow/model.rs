//! Step Table Data Model
//!
//! Core data structures describing the automation state machine: each
//! [`Step`] names an action and two branch targets, and a [`StepTable`]
//! maps step ids to steps.
//!
//! # Example YAML Format
//!
//! ```yaml
//! entry: 1
//! steps:
//!   - id: 1
//!     name: Open WeChat
//!     action: launch
//!     args: [wechat]
//!     on_success: 3
//!     on_failure: 0
//!
//!   - id: 3
//!     name: Tap login
//!     action: touch
//!     args: [500, 1000]
//!     kwargs:
//!       expected_check: true
//!       expected: login_page.png
//!     on_success: 0
//!     on_failure: 1
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AutomationError, Result};

/// Reserved branch target meaning "end of run". Never a valid step id.
pub const TERMINAL_STEP: u32 = 0;

/// Named argument enabling the post-step screen check.
pub const EXPECTED_CHECK_KEY: &str = "expected_check";

/// Named argument carrying the reference the screen check looks for.
pub const EXPECTED_KEY: &str = "expected";

/// One node of the automation state machine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Step {
    /// Unique key within the table (never 0)
    pub id: u32,

    /// Human-readable label, only used in logs
    #[serde(default)]
    pub name: String,

    /// Action dispatcher entry to invoke (e.g. "launch", "touch")
    #[serde(alias = "func")]
    pub action: String,

    /// Positional arguments consumed by the action
    #[serde(
        default,
        alias = "positional_args",
        deserialize_with = "single_or_vec",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub args: Vec<Value>,

    /// Named arguments consumed by the action or the screen check
    #[serde(default, alias = "named_args", skip_serializing_if = "HashMap::is_empty")]
    pub kwargs: HashMap<String, Value>,

    /// Step to run next when this one succeeds
    #[serde(alias = "next")]
    pub on_success: u32,

    /// Step to run next when this one fails
    #[serde(alias = "fail_next")]
    pub on_failure: u32,
}

fn value_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Deserializes either a single value or a sequence into `Vec<Value>`.
fn single_or_vec<'de, D>(deserializer: D) -> std::result::Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(Vec::new()),
        Value::Array(arr) => Ok(arr),
        other => Ok(vec![other]),
    }
}

impl Step {
    /// Creates a step that ends the run on either outcome.
    ///
    /// # Example
    ///
    /// ```
    /// use autostep::workflow::Step;
    ///
    /// let step = Step::new(3, "Tap login", "touch")
    ///     .with_args(vec![500.into(), 1000.into()])
    ///     .with_branches(0, 1);
    /// assert_eq!(step.next_after(false), 1);
    /// ```
    pub fn new(id: u32, name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into().trim().to_string(),
            action: action.into().trim().to_string(),
            args: Vec::new(),
            kwargs: HashMap::new(),
            on_success: TERMINAL_STEP,
            on_failure: TERMINAL_STEP,
        }
    }

    /// Sets the positional arguments.
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Appends one positional argument.
    pub fn with_arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Sets one named argument.
    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Requests a screen check against `expected` after the action succeeds.
    pub fn expecting(self, expected: impl Into<String>) -> Self {
        let expected: String = expected.into();
        self.with_kwarg(EXPECTED_CHECK_KEY, true)
            .with_kwarg(EXPECTED_KEY, expected)
    }

    /// Sets both branch targets.
    pub fn with_branches(mut self, on_success: u32, on_failure: u32) -> Self {
        self.on_success = on_success;
        self.on_failure = on_failure;
        self
    }

    /// Returns the branch target for an outcome.
    pub fn next_after(&self, succeeded: bool) -> u32 {
        if succeeded {
            self.on_success
        } else {
            self.on_failure
        }
    }

    /// Returns true if either branch points back at this step.
    pub fn loops_on_itself(&self) -> bool {
        self.on_success == self.id || self.on_failure == self.id
    }

    /// Returns the positional argument at `index` as a string.
    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.args.get(index).and_then(Value::as_str)
    }

    /// Returns the positional argument at `index` as an integer.
    ///
    /// Floats are truncated, numeric strings are parsed.
    pub fn arg_i64(&self, index: usize) -> Option<i64> {
        self.args.get(index).and_then(value_i64)
    }

    /// Returns a named argument as an integer, parsed like [`Step::arg_i64`].
    pub fn kwarg_i64(&self, key: &str) -> Option<i64> {
        self.kwargs.get(key).and_then(value_i64)
    }

    /// Returns the screen-check reference when the check is enabled.
    ///
    /// The check is only requested when `expected_check` is `true` and
    /// `expected` is a string.
    pub fn expected_screen(&self) -> Option<&str> {
        let enabled = self
            .kwargs
            .get(EXPECTED_CHECK_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if !enabled {
            return None;
        }
        self.kwargs.get(EXPECTED_KEY).and_then(Value::as_str)
    }
}

/// Immutable mapping from step id to step, consumed by the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepTable {
    steps: BTreeMap<u32, Step>,
}

impl StepTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            steps: BTreeMap::new(),
        }
    }

    /// Creates a table from a list of steps, rejecting duplicate ids.
    pub fn from_steps(steps: Vec<Step>) -> Result<Self> {
        let mut table = Self::new();
        for step in steps {
            table.add_step(step)?;
        }
        Ok(table)
    }

    /// Adds a step to the table.
    ///
    /// Fails for id 0, which is reserved for ending the run, and for an id
    /// already present.
    pub fn add_step(&mut self, step: Step) -> Result<()> {
        if step.id == TERMINAL_STEP {
            return Err(AutomationError::ReservedStepId(step.name));
        }
        if self.steps.contains_key(&step.id) {
            return Err(AutomationError::DuplicateStep(step.id));
        }
        self.steps.insert(step.id, step);
        Ok(())
    }

    /// Looks up a step, failing with [`AutomationError::StepNotFound`].
    pub fn lookup(&self, id: u32) -> Result<&Step> {
        self.steps.get(&id).ok_or(AutomationError::StepNotFound(id))
    }

    /// Gets a step by id.
    pub fn get(&self, id: u32) -> Option<&Step> {
        self.steps.get(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.steps.contains_key(&id)
    }

    /// Iterates steps in ascending id order.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.values()
    }

    /// Returns the distinct action names used by the table.
    pub fn actions(&self) -> BTreeSet<&str> {
        self.steps.values().map(|s| s.action.as_str()).collect()
    }

    /// Returns the number of steps in the table.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the table has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Consumes the table, returning its steps in id order.
    pub fn into_steps(self) -> Vec<Step> {
        self.steps.into_values().collect()
    }
}
