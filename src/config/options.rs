use crate::config::BarrierSchedule;
use std::convert::TryFrom;
use tokio::time::Duration;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReplicaOrdering {
    /// Spread load by shuffling the resolved replicas of every fan-out.
    Randomized,
    /// Contact replicas in the order the resolver returned them.
    AsResolved,
}

#[derive(Copy, Clone, Debug)]
pub struct RetryWithOptions {
    pub enabled: bool,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Upper bound of the random jitter added to every RetryWith backoff.
    pub salt: Duration,
}

impl Default for RetryWithOptions {
    fn default() -> Self {
        RetryWithOptions {
            enabled: true,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
            salt: Duration::from_millis(5),
        }
    }
}

#[derive(Clone, Default)]
pub struct ConsistencyOptions {
    pub gone_retry_wait: Option<Duration>,
    pub strong_gone_retry_wait: Option<Duration>,
    pub gone_initial_backoff: Option<Duration>,
    pub gone_backoff_multiplier: Option<u32>,
    pub gone_max_backoff: Option<Duration>,
    pub min_timeout_in_backoff: Option<Duration>,
    pub retry_with: Option<RetryWithOptions>,
    pub detect_connectivity_issues: Option<bool>,
    pub min_failed_replicas_for_connectivity: Option<usize>,
    pub min_backoff_for_region_reroute: Option<Duration>,
    pub read_barrier_retries: Option<u32>,
    pub read_barrier_delay: Option<Duration>,
    pub multi_region_read_barrier: Option<BarrierSchedule>,
    pub write_barrier: Option<BarrierSchedule>,
    pub primary_catch_up_retries: Option<u32>,
    pub primary_catch_up_delay: Option<Duration>,
    pub max_read_quorum_retries: Option<u32>,
    pub session_mismatch_initial_backoff: Option<Duration>,
    pub session_mismatch_max_backoff: Option<Duration>,
    pub session_mismatch_wait: Option<Duration>,
    pub replica_ordering: Option<ReplicaOrdering>,
    pub enforce_session_check: Option<bool>,
    pub use_multiple_write_locations: Option<bool>,
}

#[derive(Clone, Debug)]
pub(crate) struct ConsistencyOptionsValidated {
    pub gone_retry_wait: Duration,
    pub strong_gone_retry_wait: Duration,
    pub gone_initial_backoff: Duration,
    pub gone_backoff_multiplier: u32,
    pub gone_max_backoff: Duration,
    pub min_timeout_in_backoff: Duration,
    pub retry_with: RetryWithOptions,
    pub detect_connectivity_issues: bool,
    pub min_failed_replicas_for_connectivity: usize,
    pub min_backoff_for_region_reroute: Duration,
    pub read_barrier_retries: u32,
    pub read_barrier_delay: Duration,
    pub multi_region_read_barrier: BarrierSchedule,
    pub write_barrier: BarrierSchedule,
    /// Computed once from `write_barrier`.
    pub write_barrier_budget: Duration,
    pub primary_catch_up_retries: u32,
    pub primary_catch_up_delay: Duration,
    pub max_read_quorum_retries: u32,
    pub session_mismatch_initial_backoff: Duration,
    pub session_mismatch_max_backoff: Duration,
    pub session_mismatch_wait: Duration,
    pub replica_ordering: ReplicaOrdering,
    pub enforce_session_check: bool,
    pub use_multiple_write_locations: bool,
}

impl ConsistencyOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.gone_initial_backoff > self.gone_max_backoff {
            return Err("Gone initial backoff must not exceed the maximum backoff");
        }
        if self.gone_backoff_multiplier < 1 {
            return Err("Gone backoff multiplier must be at least 1");
        }
        if self.retry_with.initial_backoff > self.retry_with.max_backoff {
            return Err("RetryWith initial backoff must not exceed the maximum backoff");
        }
        if self.retry_with.salt < Duration::from_millis(1) {
            return Err("RetryWith salt must be at least 1ms");
        }
        if self.read_barrier_retries < 1 || self.primary_catch_up_retries < 1 || self.max_read_quorum_retries < 1 {
            return Err("Read barrier, primary catch-up and quorum retry counts must be at least 1");
        }
        if self.session_mismatch_initial_backoff > self.session_mismatch_max_backoff {
            return Err("Session mismatch initial backoff must not exceed the maximum backoff");
        }
        self.multi_region_read_barrier.validate()?;
        self.write_barrier.validate()?;

        Ok(())
    }
}

impl TryFrom<ConsistencyOptions> for ConsistencyOptionsValidated {
    type Error = &'static str;

    fn try_from(options: ConsistencyOptions) -> Result<Self, Self::Error> {
        let write_barrier = options.write_barrier.unwrap_or(BarrierSchedule {
            short_count: 4,
            short_delay: Duration::from_millis(10),
            long_count: 30,
            long_delay: Duration::from_millis(30),
        });

        let values = ConsistencyOptionsValidated {
            gone_retry_wait: options.gone_retry_wait.unwrap_or(Duration::from_secs(30)),
            strong_gone_retry_wait: options.strong_gone_retry_wait.unwrap_or(Duration::from_secs(60)),
            gone_initial_backoff: options.gone_initial_backoff.unwrap_or(Duration::from_secs(1)),
            gone_backoff_multiplier: options.gone_backoff_multiplier.unwrap_or(2),
            gone_max_backoff: options.gone_max_backoff.unwrap_or(Duration::from_secs(15)),
            min_timeout_in_backoff: options.min_timeout_in_backoff.unwrap_or(Duration::from_secs(5)),
            retry_with: options.retry_with.unwrap_or_default(),
            detect_connectivity_issues: options.detect_connectivity_issues.unwrap_or(true),
            min_failed_replicas_for_connectivity: options.min_failed_replicas_for_connectivity.unwrap_or(3),
            min_backoff_for_region_reroute: options.min_backoff_for_region_reroute.unwrap_or(Duration::from_secs(0)),
            read_barrier_retries: options.read_barrier_retries.unwrap_or(6),
            read_barrier_delay: options.read_barrier_delay.unwrap_or(Duration::from_millis(5)),
            multi_region_read_barrier: options.multi_region_read_barrier.unwrap_or(BarrierSchedule {
                short_count: 4,
                short_delay: Duration::from_millis(10),
                long_count: 26,
                long_delay: Duration::from_millis(30),
            }),
            write_barrier,
            write_barrier_budget: write_barrier.total_delay(),
            primary_catch_up_retries: options.primary_catch_up_retries.unwrap_or(6),
            primary_catch_up_delay: options.primary_catch_up_delay.unwrap_or(Duration::from_millis(5)),
            max_read_quorum_retries: options.max_read_quorum_retries.unwrap_or(6),
            session_mismatch_initial_backoff: options
                .session_mismatch_initial_backoff
                .unwrap_or(Duration::from_millis(5)),
            session_mismatch_max_backoff: options
                .session_mismatch_max_backoff
                .unwrap_or(Duration::from_millis(500)),
            session_mismatch_wait: options.session_mismatch_wait.unwrap_or(Duration::from_secs(5)),
            replica_ordering: options.replica_ordering.unwrap_or(ReplicaOrdering::Randomized),
            enforce_session_check: options.enforce_session_check.unwrap_or(true),
            use_multiple_write_locations: options.use_multiple_write_locations.unwrap_or(false),
        };

        values.validate()?;
        Ok(values)
    }
}
