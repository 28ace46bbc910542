//! Step Execution Engine
//!
//! Walks a [`StepTable`] one step at a time:
//! - Looks up the current step (a missing id stops the run)
//! - Hands it to the [`ActionDispatcher`]
//! - Follows `on_success` or `on_failure` depending on the outcome
//! - Ends on the terminal step `0`, otherwise paces before the next step
//!
//! Cancellation is cooperative. The signal is checked at the top of every
//! step and raced against the dispatcher call and the pacing delay.
//!
//! A panic escaping an action is caught at the run boundary and recorded as
//! the run's last error; the engine stays usable for the next run. Cleanup
//! (final log line, status reset) also runs if the run future is dropped.
//!
//! A step whose branches both point at itself loops until cancelled. That
//! is accepted behavior, not an error.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use log::debug;
use tokio::sync::watch;

use super::cancel::CancelSignal;
use super::dispatcher::ActionDispatcher;
use crate::config::{Settings, DEFAULT_ENTRY_STEP, DEFAULT_STEP_DELAY_MS};
use crate::error::AutomationError;
use crate::monitoring::{EventType, ExecutionTimeline, LogStream};
use crate::workflow::{DeviceIdentity, EngineState, RunContext, Step, StepTable, TERMINAL_STEP};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// A branch reached the terminal step
    Completed { last_step: u32 },
    /// A stop was requested
    Cancelled,
    /// The current step id is not in the table
    StepNotFound(u32),
    /// Something panicked inside the run
    Faulted(String),
    /// A run was already active; nothing happened
    AlreadyRunning,
}

/// Branching state machine over a step table.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use autostep::device::{AppRegistry, SimulatedDevice};
/// use autostep::execution::{ActionDispatcher, CancelSignal, Engine};
/// use autostep::monitoring::LogStream;
/// use autostep::workflow::load_step_table;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let loaded = load_step_table("login.yaml")?;
///     let device = Arc::new(SimulatedDevice::new().install("com.tencent.mm"));
///     let dispatcher = ActionDispatcher::with_builtin_actions(
///         device,
///         Arc::new(AppRegistry::load()),
///         LogStream::default(),
///     );
///
///     let engine = Engine::new(Arc::new(loaded.table), Arc::new(dispatcher))
///         .with_settings(&loaded.settings);
///     let outcome = engine.run(CancelSignal::never()).await;
///     println!("{:?}", outcome);
///     Ok(())
/// }
/// ```
pub struct Engine {
    table: Arc<StepTable>,
    dispatcher: Arc<ActionDispatcher>,
    log: LogStream,
    status: watch::Sender<RunContext>,
    timeline: Mutex<ExecutionTimeline>,
    entry_step: u32,
    step_delay: Duration,
}

impl Engine {
    /// Creates an engine logging to the dispatcher's log stream.
    pub fn new(table: Arc<StepTable>, dispatcher: Arc<ActionDispatcher>) -> Self {
        let log = dispatcher.log().clone();
        let (status, _) = watch::channel(RunContext::new(DEFAULT_ENTRY_STEP));

        Self {
            table,
            dispatcher,
            log,
            status,
            timeline: Mutex::new(ExecutionTimeline::new()),
            entry_step: DEFAULT_ENTRY_STEP,
            step_delay: Duration::from_millis(DEFAULT_STEP_DELAY_MS),
        }
    }

    /// Applies the entry step and pacing from `settings`.
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        self.set_entry_step(settings.entry_step);
        self.set_step_delay(settings.step_delay());
        self
    }

    /// Sets the correlation fields reported with every status snapshot.
    pub fn with_identity(self, identity: DeviceIdentity) -> Self {
        self.status.send_modify(|ctx| ctx.device = identity);
        self
    }

    pub fn set_entry_step(&mut self, entry: u32) {
        self.entry_step = entry;
        self.status.send_if_modified(|ctx| {
            if ctx.is_running {
                return false;
            }
            ctx.current_step = entry;
            true
        });
    }

    /// Sets the pause between two steps.
    pub fn set_step_delay(&mut self, delay: Duration) {
        self.step_delay = delay;
    }

    pub fn entry_step(&self) -> u32 {
        self.entry_step
    }

    /// Returns a snapshot of the run context.
    pub fn status(&self) -> RunContext {
        self.status.borrow().clone()
    }

    /// Subscribes to run context changes.
    pub fn subscribe(&self) -> watch::Receiver<RunContext> {
        self.status.subscribe()
    }

    /// Updates the correlation fields carried alongside the status.
    pub fn update_context(&self, update: impl FnOnce(&mut RunContext)) {
        self.status.send_modify(update);
    }

    pub fn is_running(&self) -> bool {
        self.status.borrow().is_running
    }

    pub fn log(&self) -> &LogStream {
        &self.log
    }

    pub fn table(&self) -> &StepTable {
        &self.table
    }

    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    /// Returns a copy of the timeline of the current or last run.
    pub fn timeline(&self) -> ExecutionTimeline {
        self.lock_timeline().clone()
    }

    fn lock_timeline(&self) -> MutexGuard<'_, ExecutionTimeline> {
        self.timeline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs from the entry step until the run ends.
    pub async fn run(&self, cancel: CancelSignal) -> RunOutcome {
        if !self.begin() {
            return RunOutcome::AlreadyRunning;
        }
        self.drive(cancel).await
    }

    /// Moves the engine into `Running`. Returns false if a run is active.
    pub(crate) fn begin(&self) -> bool {
        let entry = self.entry_step;
        let accepted = self.status.send_if_modified(|ctx| {
            if ctx.is_running || !ctx.state.accepts_start() {
                return false;
            }
            ctx.begin_run(entry);
            true
        });

        if !accepted {
            debug!("Start ignored, engine already running");
            return false;
        }

        self.lock_timeline().reset();
        self.log
            .info(format!("Automation engine started at step {}", entry));
        true
    }

    /// Drives a run accepted by [`Engine::begin`] to its end.
    pub(crate) async fn drive(&self, cancel: CancelSignal) -> RunOutcome {
        let mut cleanup = Cleanup {
            engine: self,
            armed: true,
        };

        let outcome = match AssertUnwindSafe(self.step_loop(cancel)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => RunOutcome::Faulted(panic_message(panic.as_ref())),
        };

        cleanup.armed = false;
        self.finish(&outcome);
        outcome
    }

    async fn step_loop(&self, mut cancel: CancelSignal) -> RunOutcome {
        let mut current = self.entry_step;

        loop {
            if cancel.is_cancelled() {
                return self.stopping();
            }

            // The terminal id never names a runnable step.
            let step = match self.table.lookup(current) {
                Ok(step) if current != TERMINAL_STEP => step,
                _ => return RunOutcome::StepNotFound(current),
            };

            self.log
                .info(format!("Executing step [{}]: {}", step.id, step.name));
            self.record(step, EventType::Started);
            self.status.send_modify(|ctx| {
                ctx.current_step = step.id;
                ctx.dispatches += 1;
            });

            let success = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.stopping(),
                success = self.dispatcher.execute(step) => success,
            };

            let next = step.next_after(success);
            if success {
                self.record(step, EventType::Succeeded);
            } else {
                self.record(step, EventType::Failed);
                self.log.warn(format!(
                    "Step [{}] failed, continuing at step {}",
                    step.id, next
                ));
            }
            self.status.send_modify(|ctx| ctx.current_step = next);

            if next == TERMINAL_STEP {
                return RunOutcome::Completed { last_step: step.id };
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.stopping(),
                _ = tokio::time::sleep(self.step_delay) => {}
            }

            current = next;
        }
    }

    fn record(&self, step: &Step, event: EventType) {
        self.lock_timeline().record(step.id, step.name.clone(), event);
    }

    fn stopping(&self) -> RunOutcome {
        self.status.send_modify(|ctx| ctx.state = EngineState::Stopping);
        RunOutcome::Cancelled
    }

    fn finish(&self, outcome: &RunOutcome) {
        let last_error = match outcome {
            RunOutcome::Completed { last_step } => {
                self.log
                    .info(format!("Run completed after step {}", last_step));
                None
            }
            RunOutcome::Cancelled => {
                self.log.info("Automation run cancelled");
                None
            }
            RunOutcome::StepNotFound(id) => {
                let message = AutomationError::StepNotFound(*id).to_string();
                self.log.error(message.clone());
                Some(message)
            }
            RunOutcome::Faulted(message) => {
                self.log.error(format!("Automation fault: {}", message));
                Some(message.clone())
            }
            RunOutcome::AlreadyRunning => return,
        };

        self.status.send_modify(|ctx| {
            if last_error.is_some() {
                ctx.last_error = last_error;
            }
            ctx.finish();
        });
        self.log.info("Automation engine finished");
    }
}

/// Finishes a run whose future was dropped before it returned.
struct Cleanup<'a> {
    engine: &'a Engine,
    armed: bool,
}

impl Drop for Cleanup<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.engine.finish(&RunOutcome::Cancelled);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panic: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panic: {}", message)
    } else {
        "panic with unknown payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::actions::{Action, ActionError};
    use crate::execution::cancel::cancel_pair;
    use async_trait::async_trait;
    use tokio::time::Instant;

    struct Fixed(bool);

    #[async_trait]
    impl Action for Fixed {
        async fn perform(&self, _step: &Step, _log: &LogStream) -> Result<bool, ActionError> {
            Ok(self.0)
        }
    }

    struct Panicking;

    #[async_trait]
    impl Action for Panicking {
        async fn perform(&self, _step: &Step, _log: &LogStream) -> Result<bool, ActionError> {
            panic!("boom");
        }
    }

    struct Stall;

    #[async_trait]
    impl Action for Stall {
        async fn perform(&self, _step: &Step, _log: &LogStream) -> Result<bool, ActionError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(true)
        }
    }

    fn fixed(success: bool) -> Arc<dyn Action> {
        Arc::new(Fixed(success))
    }

    fn login_steps() -> Vec<Step> {
        vec![
            Step::new(1, "Open WeChat", "launch")
                .with_arg("wechat")
                .with_branches(3, 0),
            Step::new(3, "Tap login", "touch")
                .with_args(vec![500.into(), 1000.into()])
                .with_branches(0, 1),
        ]
    }

    fn engine(steps: Vec<Step>, actions: Vec<(&str, Arc<dyn Action>)>) -> Engine {
        let mut dispatcher = ActionDispatcher::new(LogStream::new(500));
        for (name, action) in actions {
            dispatcher = dispatcher.register_shared(name, action);
        }
        Engine::new(
            Arc::new(StepTable::from_steps(steps).unwrap()),
            Arc::new(dispatcher),
        )
    }

    fn spin() -> Vec<Step> {
        vec![Step::new(1, "spin", "succeed").with_branches(1, 1)]
    }

    fn count(log: &LogStream, needle: &str) -> usize {
        log.entries().iter().filter(|e| e.message.contains(needle)).count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_scenario_completes_after_two_dispatches() {
        let engine = engine(
            login_steps(),
            vec![("launch", fixed(true)), ("touch", fixed(true))],
        );

        let outcome = engine.run(CancelSignal::never()).await;

        assert_eq!(outcome, RunOutcome::Completed { last_step: 3 });
        let status = engine.status();
        assert_eq!(status.dispatches, 2);
        assert_eq!(status.current_step, TERMINAL_STEP);
        assert_eq!(status.state, EngineState::Stopped);
        assert!(!status.is_running);
        assert!(status.last_error.is_none());
        assert!(engine.log().contains("Executing step [1]: Open WeChat"));
        assert!(engine.log().contains("Executing step [3]: Tap login"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_failure_ends_after_one_dispatch() {
        let engine = engine(
            login_steps(),
            vec![("launch", fixed(false)), ("touch", fixed(true))],
        );

        let outcome = engine.run(CancelSignal::never()).await;

        assert_eq!(outcome, RunOutcome::Completed { last_step: 1 });
        assert_eq!(engine.status().dispatches, 1);
        assert!(engine.log().contains("Step [1] failed, continuing at step 0"));
        assert!(engine.status().last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_failure_takes_failure_branch() {
        let engine = engine(
            login_steps(),
            vec![("launch", fixed(true)), ("touch", fixed(false))],
        );
        let (handle, signal) = cancel_pair();
        let engine = Arc::new(engine);
        let task = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run(signal).await })
        };

        // 1 -> 3 -> 1 -> 3 ... each hop paced by 500 ms
        tokio::time::sleep(Duration::from_millis(1250)).await;
        handle.cancel();
        let outcome = task.await.unwrap();

        assert_eq!(outcome, RunOutcome::Cancelled);
        let visits: Vec<u32> = engine
            .timeline()
            .visits()
            .iter()
            .map(|v| v.step_id)
            .collect();
        assert_eq!(visits, vec![1, 3, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_action_takes_failure_branch() {
        let engine = engine(
            vec![
                Step::new(1, "jump", "jump").with_branches(0, 2),
                Step::new(2, "done", "succeed"),
            ],
            vec![("succeed", fixed(true))],
        );

        let outcome = engine.run(CancelSignal::never()).await;

        assert_eq!(outcome, RunOutcome::Completed { last_step: 2 });
        assert_eq!(engine.status().dispatches, 2);
        assert!(engine.log().contains("Unknown action 'jump'"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_entry_step_stops_without_dispatch() {
        let mut engine = engine(login_steps(), vec![]);
        engine.set_entry_step(99);

        let outcome = engine.run(CancelSignal::never()).await;

        assert_eq!(outcome, RunOutcome::StepNotFound(99));
        let status = engine.status();
        assert_eq!(status.dispatches, 0);
        assert!(!status.is_running);
        assert!(status.last_error.unwrap().contains("Step 99 not found"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_entry_stops_without_dispatch() {
        let mut engine = engine(login_steps(), vec![("launch", fixed(true))]);
        engine.set_entry_step(TERMINAL_STEP);

        let outcome = engine.run(CancelSignal::never()).await;

        assert_eq!(outcome, RunOutcome::StepNotFound(TERMINAL_STEP));
        let status = engine.status();
        assert_eq!(status.dispatches, 0);
        assert!(!status.is_running);
        assert!(status.last_error.unwrap().contains("Step 0 not found"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dangling_branch_stops_run() {
        let engine = engine(
            vec![Step::new(1, "ok", "succeed").with_branches(7, 0)],
            vec![("succeed", fixed(true))],
        );

        let outcome = engine.run(CancelSignal::never()).await;

        assert_eq!(outcome, RunOutcome::StepNotFound(7));
        assert_eq!(engine.status().dispatches, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_error_cleared_on_next_run() {
        let mut engine = engine(login_steps(), vec![("launch", fixed(false))]);
        engine.set_entry_step(42);
        engine.run(CancelSignal::never()).await;
        assert!(engine.status().last_error.is_some());

        engine.set_entry_step(1);
        let outcome = engine.run(CancelSignal::never()).await;

        assert_eq!(outcome, RunOutcome::Completed { last_step: 1 });
        assert!(engine.status().last_error.is_none());
        assert_eq!(engine.status().run_id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_loop_runs_until_cancelled() {
        let engine = Arc::new(engine(spin(), vec![("succeed", fixed(true))]));
        let (handle, signal) = cancel_pair();
        let task = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run(signal).await })
        };

        tokio::time::sleep(Duration::from_millis(2600)).await;
        assert!(engine.is_running());
        handle.cancel();
        let outcome = task.await.unwrap();

        assert_eq!(outcome, RunOutcome::Cancelled);
        let status = engine.status();
        assert!(status.dispatches >= 5);
        assert!(status.last_error.is_none());
        assert_eq!(status.state, EngineState::Stopped);
        assert!(engine.log().contains("Automation run cancelled"));
        assert_eq!(engine.timeline().step_timings()[&1].visits as u64, status.dispatches);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_running_action() {
        let engine = Arc::new(engine(spin(), vec![("succeed", Arc::new(Stall) as Arc<dyn Action>)]));
        let (handle, signal) = cancel_pair();
        let started = Instant::now();
        let task = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run(signal).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();

        assert_eq!(task.await.unwrap(), RunOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(engine.status().dispatches, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_cancel_handle_stops_run() {
        let engine = engine(spin(), vec![("succeed", fixed(true))]);
        let (handle, signal) = cancel_pair();
        drop(handle);

        assert_eq!(engine.run(signal).await, RunOutcome::Cancelled);
        assert_eq!(engine.status().dispatches, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_is_recorded_and_engine_reusable() {
        let engine = engine(
            vec![Step::new(1, "explode", "explode")],
            vec![("explode", Arc::new(Panicking) as Arc<dyn Action>)],
        );

        let outcome = engine.run(CancelSignal::never()).await;
        assert!(matches!(outcome, RunOutcome::Faulted(ref msg) if msg.contains("boom")));
        let status = engine.status();
        assert!(!status.is_running);
        assert!(status.last_error.unwrap().contains("boom"));

        let again = engine.run(CancelSignal::never()).await;
        assert!(matches!(again, RunOutcome::Faulted(_)));
        assert_eq!(engine.status().run_id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_rejected_while_running() {
        let engine = Arc::new(engine(spin(), vec![("succeed", fixed(true))]));
        let (handle, signal) = cancel_pair();
        let task = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run(signal).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            engine.run(CancelSignal::never()).await,
            RunOutcome::AlreadyRunning
        );

        handle.cancel();
        task.await.unwrap();
        assert_eq!(engine.status().run_id, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_logged_once_per_run() {
        let engine = engine(
            login_steps(),
            vec![("launch", fixed(true)), ("touch", fixed(true))],
        );

        engine.run(CancelSignal::never()).await;
        assert_eq!(count(engine.log(), "Automation engine finished"), 1);

        engine.run(CancelSignal::never()).await;
        assert_eq!(count(engine.log(), "Automation engine finished"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_run_still_cleans_up() {
        let engine = Arc::new(engine(spin(), vec![("succeed", fixed(true))]));
        let task = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run(CancelSignal::never()).await })
        };
        tokio::time::sleep(Duration::from_millis(700)).await;

        task.abort();
        assert!(task.await.is_err());

        assert!(!engine.is_running());
        assert_eq!(engine.status().state, EngineState::Stopped);
        assert_eq!(count(engine.log(), "Automation engine finished"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_delay_paces_steps() {
        let engine = engine(
            login_steps(),
            vec![("launch", fixed(true)), ("touch", fixed(true))],
        )
        .with_settings(&Settings {
            step_delay_ms: 800,
            ..Settings::default()
        });
        let started = Instant::now();

        engine.run(CancelSignal::never()).await;

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(800));
        assert!(elapsed < Duration::from_millis(1600));
    }

    #[tokio::test]
    async fn test_status_subscription_sees_end_state() {
        let engine = engine(
            login_steps(),
            vec![("launch", fixed(true)), ("touch", fixed(true))],
        )
        .with_settings(&Settings {
            step_delay_ms: 0,
            ..Settings::default()
        });
        let rx = engine.subscribe();

        engine.run(CancelSignal::never()).await;

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow().state, EngineState::Stopped);
    }

    #[test]
    fn test_identity_is_carried_in_status() {
        let identity = DeviceIdentity {
            mobile_name: "Pixel 7".to_string(),
            ..DeviceIdentity::default()
        };
        let engine = engine(login_steps(), vec![]).with_identity(identity);

        assert_eq!(engine.status().device.mobile_name, "Pixel 7");
        engine.update_context(|ctx| ctx.result = Some("ok".to_string()));
        assert_eq!(engine.status().result.as_deref(), Some("ok"));
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "panic: static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "panic: owned");
        let boxed: Box<dyn Any + Send> = Box::new(5_u8);
        assert_eq!(panic_message(boxed.as_ref()), "panic with unknown payload");
    }
}
