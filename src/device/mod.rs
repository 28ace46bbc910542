//! Device Module
//!
//! Interfaces the automation core consumes at the platform boundary, and
//! the in-process implementations used by the CLI and the tests.
//!
//! # Structure
//!
//! - [`Device`]: Launch and gesture primitives
//! - [`simulated`]: An in-memory device that records gestures
//! - [`apps`]: Application alias registry
//! - [`hold`]: Keep-alive resource hold with a scoped guard
//! - [`verify`]: Post-step expected-screen checks

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub mod apps;
pub mod hold;
pub mod simulated;
pub mod verify;

pub use apps::AppRegistry;
pub use hold::{HoldGuard, KeepAlive, ResourceHold};
pub use simulated::{Gesture, SimulatedDevice};
pub use verify::{ScreenVerifier, SettleVerifier};

/// Failures reported by device primitives.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeviceError {
    #[error("Application '{0}' is not installed")]
    AppNotFound(String),

    #[error("Point ({x}, {y}) is outside the screen")]
    OutOfBounds { x: i64, y: i64 },

    #[error("Device unavailable: {0}")]
    Unavailable(String),
}

/// Primitive operations a device offers to actions.
///
/// Every call may suspend; callers are expected to run them on the
/// automation task, never on the observer side.
#[async_trait]
pub trait Device: Send + Sync {
    /// Brings the application with the given package name to the front.
    async fn launch(&self, package: &str) -> Result<(), DeviceError>;

    async fn tap(&self, x: i64, y: i64) -> Result<(), DeviceError>;

    async fn swipe(
        &self,
        from: (i64, i64),
        to: (i64, i64),
        duration: Duration,
    ) -> Result<(), DeviceError>;

    async fn input_text(&self, text: &str) -> Result<(), DeviceError>;

    /// Sends the system back gesture.
    async fn back(&self) -> Result<(), DeviceError>;
}
