//! Action Dispatcher
//!
//! Resolves a step's action name against a registry of [`Action`]s and
//! reduces whatever happens into a single success flag. Nothing escapes as
//! an error: unknown actions, argument problems, and device faults are all
//! logged and reported as failure.
//!
//! When a step enables the expected-screen check and its action succeeded,
//! the configured [`ScreenVerifier`] runs before the outcome is final; a
//! mismatch demotes the step to failure.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use super::actions::{
    Action, BackAction, InputAction, LaunchAction, SucceedAction, SwipeAction, TouchAction,
};
use crate::device::{AppRegistry, Device, ScreenVerifier};
use crate::monitoring::LogStream;
use crate::workflow::Step;

/// Action names registered by [`ActionDispatcher::with_builtin_actions`].
pub const BUILTIN_ACTIONS: &[&str] = &[
    "launch",
    "touch",
    "swipe",
    "input",
    "back",
    "succeed",
    "return_true",
];

/// Maps action names to implementations.
pub struct ActionDispatcher {
    handlers: HashMap<String, Arc<dyn Action>>,
    verifier: Option<Arc<dyn ScreenVerifier>>,
    log: LogStream,
}

impl ActionDispatcher {
    /// Creates a dispatcher with no actions registered.
    pub fn new(log: LogStream) -> Self {
        Self {
            handlers: HashMap::new(),
            verifier: None,
            log,
        }
    }

    /// Creates a dispatcher with every built-in action bound to `device`.
    pub fn with_builtin_actions(device: Arc<dyn Device>, apps: Arc<AppRegistry>, log: LogStream) -> Self {
        let succeed: Arc<dyn Action> = Arc::new(SucceedAction);

        Self::new(log)
            .register("launch", LaunchAction::new(device.clone(), apps))
            .register("touch", TouchAction::new(device.clone()))
            .register("swipe", SwipeAction::new(device.clone()))
            .register("input", InputAction::new(device.clone()))
            .register("back", BackAction::new(device))
            .register_shared("succeed", succeed.clone())
            .register_shared("return_true", succeed)
    }

    /// Registers an action, replacing any previous one with the same name.
    pub fn register(self, name: impl Into<String>, action: impl Action + 'static) -> Self {
        self.register_shared(name, Arc::new(action))
    }

    pub fn register_shared(mut self, name: impl Into<String>, action: Arc<dyn Action>) -> Self {
        self.handlers.insert(name.into(), action);
        self
    }

    /// Sets the verifier used for expected-screen checks.
    pub fn with_verifier(mut self, verifier: Arc<dyn ScreenVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Returns true if `name` resolves to an action.
    pub fn knows(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered action names, sorted.
    pub fn action_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn log(&self) -> &LogStream {
        &self.log
    }

    /// Executes one step and returns whether it succeeded.
    pub async fn execute(&self, step: &Step) -> bool {
        let Some(action) = self.handlers.get(&step.action) else {
            self.log.error(format!(
                "Unknown action '{}' in step {}",
                step.action, step.id
            ));
            return false;
        };

        let success = match action.perform(step, &self.log).await {
            Ok(success) => success,
            Err(e) => {
                self.log
                    .error(format!("Action '{}' failed in step {}: {}", step.action, step.id, e));
                false
            }
        };

        if !success {
            return false;
        }

        match step.expected_screen() {
            Some(expected) => self.check_expected(step, expected).await,
            None => true,
        }
    }

    async fn check_expected(&self, step: &Step, expected: &str) -> bool {
        let Some(verifier) = &self.verifier else {
            self.log.warn(format!(
                "No screen verifier configured, skipping check for '{}'",
                expected
            ));
            return true;
        };

        self.log.info(format!("Checking expected screen '{}'", expected));
        match verifier.verify(expected).await {
            Ok(true) => {
                debug!("Step {} matched '{}'", step.id, expected);
                true
            }
            Ok(false) => {
                self.log.warn(format!(
                    "Step {}: screen does not match '{}'",
                    step.id, expected
                ));
                false
            }
            Err(e) => {
                self.log
                    .error(format!("Step {}: screen check failed: {}", step.id, e));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceError, Gesture, SimulatedDevice};
    use crate::execution::actions::ActionError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Verdict(Result<bool, DeviceError>, AtomicU32);

    #[async_trait]
    impl ScreenVerifier for Verdict {
        async fn verify(&self, _expected: &str) -> Result<bool, DeviceError> {
            self.1.fetch_add(1, Ordering::SeqCst);
            self.0.clone()
        }
    }

    struct Failing;

    #[async_trait]
    impl Action for Failing {
        async fn perform(&self, _step: &Step, _log: &LogStream) -> Result<bool, ActionError> {
            Err(ActionError::InvalidArgument("bad".to_string()))
        }
    }

    fn dispatcher(device: Arc<SimulatedDevice>) -> ActionDispatcher {
        ActionDispatcher::with_builtin_actions(device, Arc::new(AppRegistry::default()), LogStream::new(50))
    }

    #[test]
    fn test_builtin_actions_registered() {
        let d = dispatcher(Arc::new(SimulatedDevice::new()));
        for name in BUILTIN_ACTIONS {
            assert!(d.knows(name), "missing action {}", name);
        }
        assert_eq!(d.action_names().len(), BUILTIN_ACTIONS.len());
    }

    #[tokio::test]
    async fn test_unknown_action_fails() {
        let d = dispatcher(Arc::new(SimulatedDevice::new()));
        let step = Step::new(1, "jump", "jump");

        assert!(!d.execute(&step).await);
        assert!(d.log().contains("Unknown action 'jump' in step 1"));
    }

    #[tokio::test]
    async fn test_action_error_becomes_failure() {
        let d = ActionDispatcher::new(LogStream::new(10)).register("broken", Failing);

        assert!(!d.execute(&Step::new(2, "broken", "broken")).await);
        assert!(d.log().contains("Invalid argument: bad"));
    }

    #[tokio::test]
    async fn test_device_fault_becomes_failure() {
        let device = Arc::new(SimulatedDevice::new());
        let d = dispatcher(device.clone());
        let step = Step::new(1, "open", "launch").with_arg("wechat");

        assert!(!d.execute(&step).await);
        assert!(d.log().contains("not installed"));
        assert!(device.gestures().is_empty());
    }

    #[tokio::test]
    async fn test_return_true_alias() {
        let d = dispatcher(Arc::new(SimulatedDevice::new()));
        assert!(d.execute(&Step::new(9, "done", "return_true")).await);
    }

    #[tokio::test]
    async fn test_touch_dispatch() {
        let device = Arc::new(SimulatedDevice::new());
        let d = dispatcher(device.clone());
        let step = Step::new(3, "tap", "touch").with_arg(500).with_arg(1000);

        assert!(d.execute(&step).await);
        assert_eq!(device.gestures(), vec![Gesture::Tap(500, 1000)]);
    }

    #[tokio::test]
    async fn test_verifier_rejection_demotes_success() {
        let verifier = Arc::new(Verdict(Ok(false), AtomicU32::new(0)));
        let d = dispatcher(Arc::new(SimulatedDevice::new())).with_verifier(verifier.clone());
        let step = Step::new(1, "ok", "succeed").expecting("home.png");

        assert!(!d.execute(&step).await);
        assert_eq!(verifier.1.load(Ordering::SeqCst), 1);
        assert!(d.log().contains("does not match 'home.png'"));
    }

    #[tokio::test]
    async fn test_verifier_error_demotes_success() {
        let verifier = Arc::new(Verdict(
            Err(DeviceError::Unavailable("no screen".to_string())),
            AtomicU32::new(0),
        ));
        let d = dispatcher(Arc::new(SimulatedDevice::new())).with_verifier(verifier);

        assert!(!d.execute(&Step::new(1, "ok", "succeed").expecting("home.png")).await);
    }

    #[tokio::test]
    async fn test_verifier_not_run_after_failure() {
        let verifier = Arc::new(Verdict(Ok(true), AtomicU32::new(0)));
        let d = dispatcher(Arc::new(SimulatedDevice::new())).with_verifier(verifier.clone());

        assert!(!d.execute(&Step::new(1, "jump", "jump").expecting("home.png")).await);
        assert_eq!(verifier.1.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_verifier_acceptance() {
        let verifier = Arc::new(Verdict(Ok(true), AtomicU32::new(0)));
        let d = dispatcher(Arc::new(SimulatedDevice::new())).with_verifier(verifier);

        assert!(d.execute(&Step::new(1, "ok", "succeed").expecting("home.png")).await);
        assert!(d.log().contains("Checking expected screen 'home.png'"));
    }

    #[tokio::test]
    async fn test_missing_verifier_skips_check() {
        let d = dispatcher(Arc::new(SimulatedDevice::new()));

        assert!(d.execute(&Step::new(1, "ok", "succeed").expecting("home.png")).await);
        assert!(d.log().contains("skipping check"));
    }
}
