use crate::config::ConsistencyOptionsValidated;
use crate::error::{ErrorKind, StoreError};
use crate::time::Clock;
use std::cmp;
use tokio::time::{Duration, Instant};

pub(crate) struct SessionRetryState {
    started_at: Instant,
    current_backoff: Duration,
    retries: u32,
}

impl SessionRetryState {
    pub(crate) fn retries(&self) -> u32 {
        self.retries
    }
}

/// Retries reads and writes whose session token no replica could satisfy yet.
#[derive(Clone)]
pub(crate) struct SessionTokenMismatchRetryPolicy<C: Clock> {
    clock: C,
    initial_backoff: Duration,
    max_backoff: Duration,
    wait: Duration,
}

impl<C: Clock> SessionTokenMismatchRetryPolicy<C> {
    pub(crate) fn new(options: &ConsistencyOptionsValidated, clock: C) -> Self {
        SessionTokenMismatchRetryPolicy {
            clock,
            initial_backoff: options.session_mismatch_initial_backoff,
            max_backoff: options.session_mismatch_max_backoff,
            wait: options.session_mismatch_wait,
        }
    }

    pub(crate) fn start(&self) -> SessionRetryState {
        SessionRetryState {
            started_at: self.clock.now(),
            current_backoff: self.initial_backoff,
            retries: 0,
        }
    }

    pub(crate) fn should_retry(&self, state: &mut SessionRetryState, error: &StoreError) -> Option<Duration> {
        if error.kind() != ErrorKind::SessionNotAvailable {
            return None;
        }

        let elapsed = self.clock.now().saturating_duration_since(state.started_at);
        let remaining = self.wait.checked_sub(elapsed).unwrap_or_default();
        if remaining == Duration::from_secs(0) {
            return None;
        }

        let backoff = cmp::min(state.current_backoff, remaining);
        state.current_backoff = cmp::min(state.current_backoff * 2, self.max_backoff);
        state.retries += 1;

        Some(backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsistencyOptions;
    use crate::time::mocked_clock;
    use std::convert::TryFrom;

    fn policy<C: Clock>(clock: C) -> SessionTokenMismatchRetryPolicy<C> {
        let options = ConsistencyOptionsValidated::try_from(ConsistencyOptions::default()).unwrap();
        SessionTokenMismatchRetryPolicy::new(&options, clock)
    }

    #[tokio::test]
    async fn backs_off_until_wait_is_spent() {
        let (clock, mut controller) = mocked_clock();
        let policy = policy(clock);
        let mut state = policy.start();
        let error = StoreError::session_not_available("behind");

        let mut observed = Vec::new();
        for _ in 0..9 {
            observed.push(policy.should_retry(&mut state, &error).unwrap());
        }
        let millis: Vec<u64> = observed.iter().map(|d| d.as_millis() as u64).collect();
        assert_eq!(millis, vec![5, 10, 20, 40, 80, 160, 320, 500, 500]);
        assert_eq!(state.retries(), 9);

        controller.advance(Duration::from_secs(5));
        assert!(policy.should_retry(&mut state, &error).is_none());
    }

    #[tokio::test]
    async fn ignores_other_errors() {
        let (clock, _controller) = mocked_clock();
        let policy = policy(clock);
        let mut state = policy.start();

        assert!(policy.should_retry(&mut state, &StoreError::read_quorum_not_met()).is_none());
    }
}
