//! Driver configuration

use crate::lifecycle::error::LifecycleError;
use std::net::SocketAddr;
use std::time::Duration;

/// Packet lifecycle driver configuration
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Where packets are sent for processing
    pub hop_addr: SocketAddr,

    /// Hop count at which a packet terminates
    pub max_iterations: u8,

    /// How long to wait for a hop to answer
    pub hop_timeout: Duration,

    /// Resend policy for unanswered hops
    pub retry: RetryConfig,

    /// Packets allowed in flight at once
    pub max_in_flight: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            hop_addr: SocketAddr::from(([127, 0, 0, 1], 9000)),
            max_iterations: 64,
            hop_timeout: Duration::from_secs(1),
            retry: RetryConfig::default(),
            max_in_flight: 256,
        }
    }
}

impl DriverConfig {
    /// Reject settings the driver cannot run with
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::InvalidConfig` naming the offending field.
    pub fn validate(&self) -> Result<(), LifecycleError> {
        if self.max_iterations == 0 {
            return Err(LifecycleError::InvalidConfig(
                "max_iterations must be positive",
            ));
        }
        if self.hop_timeout.is_zero() {
            return Err(LifecycleError::InvalidConfig("hop_timeout must be positive"));
        }
        if self.max_in_flight == 0 {
            return Err(LifecycleError::InvalidConfig(
                "max_in_flight must be positive",
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(LifecycleError::InvalidConfig(
                "retry multiplier must be at least 1.0",
            ));
        }
        Ok(())
    }
}

/// Retry configuration for unanswered hops
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of resends per hop
    pub max_retries: u32,

    /// Backoff before the first resend
    pub initial_backoff: Duration,

    /// Backoff ceiling
    pub max_backoff: Duration,

    /// Backoff multiplier
    pub multiplier: f64,

    /// Add up to 25% random jitter
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Calculate backoff duration for attempt number
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_millis() as f64
            * self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let capped = base.min(self.max_backoff.as_millis() as f64);

        let duration = if self.jitter {
            let jitter_factor = f64::from(rand::random::<u32>() % 25) / 100.0;
            capped * (1.0 + jitter_factor)
        } else {
            capped
        };

        Duration::from_millis(duration as u64)
    }
}
