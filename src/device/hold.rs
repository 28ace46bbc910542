//! Keep-Alive Resource Hold
//!
//! A resource hold keeps the host from suspending background work while an
//! automation runs (a wake lock on a phone). The [`HoldGuard`] wraps one
//! acquisition: it releases exactly once, whether the run completes, is
//! cancelled, faults, or the guard is simply dropped.
//!
//! A hold may carry a maximum duration. When the cap expires the guard
//! releases the hold and logs it, but the run itself is left alone.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info};
use tokio::task::JoinHandle;

use crate::monitoring::LogStream;

/// Host facility that can be held while automation runs.
pub trait ResourceHold: Send + Sync {
    /// Takes the hold, optionally capped at `max`.
    fn acquire(&self, max: Option<Duration>);

    /// Drops the hold. Calling it while not held has no effect.
    fn release(&self);

    fn is_held(&self) -> bool;
}

/// In-process keep-alive that tracks its own state and counts transitions.
#[derive(Debug, Default)]
pub struct KeepAlive {
    tag: String,
    held: AtomicBool,
    acquisitions: AtomicU32,
    releases: AtomicU32,
}

impl KeepAlive {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Number of times the hold was taken.
    pub fn acquisitions(&self) -> u32 {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Number of times a taken hold was dropped.
    pub fn releases(&self) -> u32 {
        self.releases.load(Ordering::SeqCst)
    }
}

impl ResourceHold for KeepAlive {
    fn acquire(&self, max: Option<Duration>) {
        self.held.store(true, Ordering::SeqCst);
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        match max {
            Some(max) => info!("Keep-alive '{}' acquired ({}s cap)", self.tag, max.as_secs()),
            None => info!("Keep-alive '{}' acquired", self.tag),
        }
    }

    fn release(&self) {
        if self.held.swap(false, Ordering::SeqCst) {
            self.releases.fetch_add(1, Ordering::SeqCst);
            info!("Keep-alive '{}' released", self.tag);
        }
    }

    fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

/// One scoped acquisition of a [`ResourceHold`].
pub struct HoldGuard {
    hold: Arc<dyn ResourceHold>,
    released: AtomicBool,
    expired: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
    log: LogStream,
}

impl HoldGuard {
    /// Acquires `hold` and, when `max` is set, arms the expiry timer.
    ///
    /// The timer needs a Tokio runtime; outside one the cap is not enforced.
    pub fn acquire(hold: Arc<dyn ResourceHold>, max: Option<Duration>, log: &LogStream) -> Arc<Self> {
        hold.acquire(max);

        let guard = Arc::new(Self {
            hold,
            released: AtomicBool::new(false),
            expired: AtomicBool::new(false),
            timer: Mutex::new(None),
            log: log.clone(),
        });

        if let Some(max) = max {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let weak = Arc::downgrade(&guard);
                    let timer = handle.spawn(async move {
                        tokio::time::sleep(max).await;
                        if let Some(guard) = weak.upgrade() {
                            guard.expire(max);
                        }
                    });
                    *guard.timer.lock().unwrap_or_else(PoisonError::into_inner) = Some(timer);
                }
                Err(_) => debug!("No async runtime, keep-alive cap not armed"),
            }
        }

        guard
    }

    fn expire(&self, max: Duration) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.expired.store(true, Ordering::SeqCst);
        self.hold.release();
        self.log.warn(format!(
            "Keep-alive hold expired after {}s, automation keeps running",
            max.as_secs()
        ));
    }

    /// Releases the hold. Returns false if it was already released.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(timer) = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            timer.abort();
        }
        self.hold.release();
        true
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Returns true if the safety cap released the hold.
    pub fn has_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }
}

impl Drop for HoldGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_alive_release_is_idempotent() {
        let hold = KeepAlive::new("test");
        hold.acquire(None);
        hold.release();
        hold.release();

        assert!(!hold.is_held());
        assert_eq!(hold.acquisitions(), 1);
        assert_eq!(hold.releases(), 1);
    }

    #[test]
    fn test_guard_releases_once() {
        let hold = Arc::new(KeepAlive::new("test"));
        let log = LogStream::new(10);
        let guard = HoldGuard::acquire(hold.clone(), None, &log);

        assert!(hold.is_held());
        assert!(guard.release());
        assert!(!guard.release());
        drop(guard);

        assert_eq!(hold.releases(), 1);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let hold = Arc::new(KeepAlive::new("test"));
        let log = LogStream::new(10);
        {
            let _guard = HoldGuard::acquire(hold.clone(), None, &log);
            assert!(hold.is_held());
        }
        assert!(!hold.is_held());
        assert_eq!(hold.releases(), 1);
    }

    #[test]
    fn test_cap_without_runtime_is_ignored() {
        let hold = Arc::new(KeepAlive::new("test"));
        let log = LogStream::new(10);
        let guard = HoldGuard::acquire(hold.clone(), Some(Duration::from_secs(1)), &log);

        assert!(!guard.has_expired());
        assert!(guard.release());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cap_expiry_releases_and_logs() {
        let hold = Arc::new(KeepAlive::new("test"));
        let log = LogStream::new(10);
        let guard = HoldGuard::acquire(hold.clone(), Some(Duration::from_secs(600)), &log);

        tokio::time::sleep(Duration::from_secs(601)).await;

        assert!(guard.has_expired());
        assert!(!hold.is_held());
        assert!(log.contains("expired"));
        assert!(!guard.release());
        assert_eq!(hold.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_before_cap_disarms_timer() {
        let hold = Arc::new(KeepAlive::new("test"));
        let log = LogStream::new(10);
        let guard = HoldGuard::acquire(hold.clone(), Some(Duration::from_secs(5)), &log);

        assert!(guard.release());
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(!guard.has_expired());
        assert!(log.is_empty());
        assert_eq!(hold.releases(), 1);
    }
}
