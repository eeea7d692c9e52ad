use crate::error::StoreError;
use crate::time::Clock;
use tokio::time::{Duration, Instant};

/// Absolute deadline of one attempt of a logical operation.
#[derive(Clone)]
pub struct Deadline<C: Clock> {
    clock: C,
    expires_at: Instant,
}

impl<C: Clock> Deadline<C> {
    pub fn new(clock: C, timeout: Duration) -> Self {
        let expires_at = clock.now() + timeout;
        Deadline { clock, expires_at }
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(self.clock.now())
    }

    pub fn is_expired(&self) -> bool {
        self.clock.now() >= self.expires_at
    }

    /// Terminal timeout. Used on a first attempt, where nothing has been retried yet.
    pub fn check_timeout(&self) -> Result<(), StoreError> {
        if self.is_expired() {
            return Err(StoreError::deadline_exceeded());
        }
        Ok(())
    }

    /// Mid-retry expiry is reported as Gone so the retry policy makes the final call.
    pub fn check_gone(&self) -> Result<(), StoreError> {
        if self.is_expired() {
            return Err(StoreError::gone_on_deadline());
        }
        Ok(())
    }

    pub(crate) fn clock(&self) -> &C {
        &self.clock
    }
}
