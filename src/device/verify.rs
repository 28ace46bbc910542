//! Expected-Screen Verification
//!
//! After an action succeeds, a step may ask for the screen to be compared
//! with a reference template. The comparison itself belongs to an external
//! image matcher; this module defines the seam and a settle-only verifier.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use super::DeviceError;

/// Checks that the screen shows what a step expects.
#[async_trait]
pub trait ScreenVerifier: Send + Sync {
    /// Returns `Ok(false)` when the screen does not match `expected`.
    async fn verify(&self, expected: &str) -> Result<bool, DeviceError>;
}

/// Waits for the screen to settle, then accepts.
///
/// Stands in for template matching on devices without a screen source.
#[derive(Debug, Clone)]
pub struct SettleVerifier {
    settle: Duration,
}

impl SettleVerifier {
    pub fn new(settle: Duration) -> Self {
        Self { settle }
    }
}

#[async_trait]
impl ScreenVerifier for SettleVerifier {
    async fn verify(&self, expected: &str) -> Result<bool, DeviceError> {
        debug!("Waiting {:?} before checking '{}'", self.settle, expected);
        tokio::time::sleep(self.settle).await;
        Ok(true)
    }
}
