//! Politeness gate shared by every worker of a session.
//!
//! Bounds both in-flight requests and request starts per second toward the
//! archive, independent of how many workers the resolver runs.

use std::time::Duration;

use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::Instant;
use tracing::debug;

use crate::error::FetchError;

pub struct PolitenessGate {
    in_flight: Semaphore,
    spacing: Duration,
    next_start: Mutex<Instant>,
}

/// Held for the duration of one request.
pub struct GatePermit<'a> {
    _permit: SemaphorePermit<'a>,
}

impl PolitenessGate {
    pub fn new(max_concurrent: usize, per_second: u32) -> Self {
        let spacing = if per_second == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / per_second
        };
        Self {
            in_flight: Semaphore::new(max_concurrent.max(1)),
            spacing,
            next_start: Mutex::new(Instant::now()),
        }
    }

    /// No spacing and effectively unbounded concurrency. Used by tests.
    pub fn unlimited() -> Self {
        Self {
            in_flight: Semaphore::new(Semaphore::MAX_PERMITS),
            spacing: Duration::ZERO,
            next_start: Mutex::new(Instant::now()),
        }
    }

    /// Wait for a concurrency slot, then for this request's start slot.
    pub async fn admit(&self) -> Result<GatePermit<'_>, FetchError> {
        let permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| FetchError::network("politeness gate closed"))?;

        if !self.spacing.is_zero() {
            let start_at = {
                let mut next = self.next_start.lock().await;
                let now = Instant::now();
                let start_at = (*next).max(now);
                *next = start_at + self.spacing;
                start_at
            };
            let wait = start_at.saturating_duration_since(Instant::now());
            if !wait.is_zero() {
                debug!(wait_ms = wait.as_millis() as u64, "Politeness gate delaying request");
                tokio::time::sleep_until(start_at).await;
            }
        }

        Ok(GatePermit { _permit: permit })
    }

    pub fn available(&self) -> usize {
        self.in_flight.available_permits()
    }
}
