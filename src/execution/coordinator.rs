//! Run Coordinator
//!
//! The only entry point callers use to start and stop automation. It makes
//! sure that:
//! - at most one run is active at a time
//! - start/stop requests arriving within the debounce window of the last
//!   accepted request, or while one is still being handled, are ignored
//! - the keep-alive hold is taken before the first step and released
//!   exactly once however the run ends
//!
//! All request bookkeeping lives in one mutex-guarded state owned by the
//! coordinator. The run itself executes on a spawned Tokio task.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, error};
use tokio::sync::watch;
use tokio::time::Instant;

use super::cancel::{cancel_pair, CancelHandle};
use super::engine::Engine;
use crate::config::Settings;
use crate::device::{HoldGuard, ResourceHold};
use crate::monitoring::{LogEntry, LogStream};
use crate::workflow::RunContext;

struct ActiveRun {
    id: u64,
    cancel: CancelHandle,
    hold: Arc<HoldGuard>,
}

#[derive(Default)]
struct CoordinatorState {
    /// Set while an accepted stop waits for the run to tear down.
    handling: bool,
    last_accepted: Option<Instant>,
    active: Option<ActiveRun>,
    next_run: u64,
}

/// Starts and stops automation runs on behalf of callers.
///
/// Requests must be made from within a Tokio runtime.
pub struct RunCoordinator {
    engine: Arc<Engine>,
    hold: Arc<dyn ResourceHold>,
    log: LogStream,
    debounce: Duration,
    teardown_grace: Duration,
    hold_max: Option<Duration>,
    state: Arc<Mutex<CoordinatorState>>,
    idle: Arc<watch::Sender<bool>>,
}

fn lock(state: &Mutex<CoordinatorState>) -> MutexGuard<'_, CoordinatorState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RunCoordinator {
    pub fn new(engine: Arc<Engine>, hold: Arc<dyn ResourceHold>, settings: &Settings) -> Self {
        let log = engine.log().clone();
        let (idle, _) = watch::channel(true);

        Self {
            engine,
            hold,
            log,
            debounce: settings.debounce(),
            teardown_grace: settings.teardown_grace(),
            hold_max: settings.hold_max(),
            state: Arc::new(Mutex::new(CoordinatorState::default())),
            idle: Arc::new(idle),
        }
    }

    fn admits(&self, state: &CoordinatorState, now: Instant) -> bool {
        if state.handling {
            return false;
        }
        match state.last_accepted {
            Some(at) => now.saturating_duration_since(at) >= self.debounce,
            None => true,
        }
    }

    /// Starts a run. Returns false if the request was ignored.
    pub fn request_start(&self) -> bool {
        let mut state = lock(&self.state);
        let now = Instant::now();

        if !self.admits(&state, now) {
            debug!("Start request ignored (debounced)");
            return false;
        }
        if state.active.is_some() || self.engine.is_running() {
            debug!("Start request ignored, a run is already active");
            return false;
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Cannot start automation outside an async runtime: {}", e);
                return false;
            }
        };

        state.last_accepted = Some(now);

        let guard = HoldGuard::acquire(self.hold.clone(), self.hold_max, &self.log);
        if !self.engine.begin() {
            guard.release();
            return false;
        }

        let (cancel, signal) = cancel_pair();
        state.next_run += 1;
        let id = state.next_run;
        state.active = Some(ActiveRun {
            id,
            cancel,
            hold: guard.clone(),
        });
        self.idle.send_replace(false);

        let engine = self.engine.clone();
        let shared = self.state.clone();
        let idle = self.idle.clone();
        runtime.spawn(async move {
            let outcome = engine.drive(signal).await;
            guard.release();

            let mut state = lock(&shared);
            if state.active.as_ref().map_or(true, |run| run.id == id) {
                state.active = None;
                idle.send_replace(true);
            }
            debug!("Run {} ended: {:?}", id, outcome);
        });

        true
    }

    /// Stops the active run. Returns false if the request was ignored.
    pub fn request_stop(&self) -> bool {
        let mut state = lock(&self.state);
        let now = Instant::now();

        if !self.admits(&state, now) {
            debug!("Stop request ignored (debounced)");
            return false;
        }
        // A run whose loop already ended is only waiting for its task to
        // clear `active`.
        if !self.engine.is_running() {
            debug!("Stop request ignored, no active run");
            return false;
        }
        let Some(run) = state.active.take() else {
            debug!("Stop request ignored, no active run");
            return false;
        };

        state.handling = true;
        state.last_accepted = Some(now);
        drop(state);

        self.log.info("Automation task stop requested");
        run.cancel.cancel();
        run.hold.release();

        // Keep rejecting requests until the run has torn down or the grace
        // period is over.
        let shared = self.state.clone();
        let mut idle = self.idle.subscribe();
        let grace = self.teardown_grace;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let torn_down = async move { idle.wait_for(|idle| *idle).await.is_ok() };
                    let settled = tokio::time::timeout(grace, torn_down)
                        .await
                        .unwrap_or(false);
                    if !settled {
                        debug!("Run still tearing down after {:?}", grace);
                    }
                    lock(&shared).handling = false;
                });
            }
            Err(_) => lock(&self.state).handling = false,
        }

        true
    }

    /// Waits until no run is active.
    pub async fn wait_until_idle(&self) {
        let mut idle = self.idle.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = idle.wait_for(|idle| *idle).await;
    }

    pub fn is_running(&self) -> bool {
        self.engine.is_running()
    }

    /// Returns a snapshot of the run context.
    pub fn status(&self) -> RunContext {
        self.engine.status()
    }

    /// Returns the retained log entries, oldest first.
    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.log.entries()
    }

    pub fn clear_log(&self) {
        self.log.clear();
    }

    pub fn log(&self) -> &LogStream {
        &self.log
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }
}
