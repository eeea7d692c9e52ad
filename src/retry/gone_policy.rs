use crate::config::{ConsistencyOptionsValidated, RetryWithOptions};
use crate::error::{ErrorKind, StoreError};
use crate::model::{LogicalRequest, Lsn, RoutingContext, SubStatusCode};
use crate::time::Clock;
use rand::Rng;
use std::cmp;
use tokio::time::{Duration, Instant};

const MAX_INVALID_PARTITION_RETRIES: u32 = 2;

#[derive(Debug)]
pub enum RetryDecision {
    NoRetry(StoreError),
    RetryAfter(Duration),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Signal {
    Gone,
    PartitionMigrating,
    InvalidPartition,
    PartitionSplitting,
    RetryWith,
}

/// Per-operation state of the gone retry policy. Created once per logical operation by the
/// retry loop that owns it; the routing hints it carries are applied to the request before
/// every attempt.
#[derive(Debug)]
pub struct RetryPolicyContext {
    started_at: Instant,
    attempt_count: u32,
    invalid_partition_attempts: u32,
    current_backoff: Duration,
    current_retry_with_backoff: Duration,
    last_retry_with: Option<StoreError>,

    pub force_address_refresh: bool,
    pub force_collection_routing_map_refresh: bool,
    pub force_master_refresh: bool,
    pub force_name_cache_refresh: bool,
    pub force_partition_key_range_refresh: bool,
    pub is_in_retry: bool,
    pub remaining_time: Option<Duration>,
    pub timeout_in_backoff: Option<Duration>,
    pub region_reroute_attempt_count: u32,
    pub client_retry_count: u32,
}

impl RetryPolicyContext {
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn apply_to(&self, routing: &mut RoutingContext) {
        routing.force_refresh = self.force_address_refresh;
        routing.force_collection_routing_map_refresh = self.force_collection_routing_map_refresh;
        routing.force_master_refresh = self.force_master_refresh;
        routing.force_name_cache_refresh = self.force_name_cache_refresh;
        routing.force_partition_key_range_refresh = self.force_partition_key_range_refresh;
        routing.is_in_retry = self.is_in_retry;
        routing.remaining_time = self.remaining_time;
        routing.timeout_in_backoff = self.timeout_in_backoff;
        routing.region_reroute_attempt_count = self.region_reroute_attempt_count;
        routing.client_retry_count = self.client_retry_count;
    }

    fn reset_hints(&mut self) {
        self.force_address_refresh = false;
        self.force_collection_routing_map_refresh = false;
        self.force_master_refresh = false;
        self.force_name_cache_refresh = false;
        self.force_partition_key_range_refresh = false;
    }
}

/// Decides whether a failed attempt is retried, how long to back off, and which routing caches
/// the next attempt must refresh.
pub struct GoneRetryPolicy<C: Clock> {
    logger: slog::Logger,
    clock: C,
    wait_time: Duration,
    initial_backoff: Duration,
    backoff_multiplier: u32,
    max_backoff: Duration,
    min_timeout_in_backoff: Duration,
    retry_with: RetryWithOptions,
    detect_connectivity_issues: bool,
    min_failed_replicas_for_connectivity: usize,
    min_backoff_for_region_reroute: Duration,
}

impl<C: Clock> GoneRetryPolicy<C> {
    pub(crate) fn new(
        logger: slog::Logger,
        options: &ConsistencyOptionsValidated,
        wait_time: Duration,
        clock: C,
    ) -> Self {
        GoneRetryPolicy {
            logger,
            clock,
            wait_time,
            initial_backoff: options.gone_initial_backoff,
            backoff_multiplier: options.gone_backoff_multiplier,
            max_backoff: options.gone_max_backoff,
            min_timeout_in_backoff: options.min_timeout_in_backoff,
            retry_with: options.retry_with,
            detect_connectivity_issues: options.detect_connectivity_issues,
            min_failed_replicas_for_connectivity: options.min_failed_replicas_for_connectivity,
            min_backoff_for_region_reroute: options.min_backoff_for_region_reroute,
        }
    }

    pub fn start(&self) -> RetryPolicyContext {
        RetryPolicyContext {
            started_at: self.clock.now(),
            attempt_count: 0,
            invalid_partition_attempts: 0,
            current_backoff: self.initial_backoff,
            current_retry_with_backoff: self.retry_with.initial_backoff,
            last_retry_with: None,
            force_address_refresh: false,
            force_collection_routing_map_refresh: false,
            force_master_refresh: false,
            force_name_cache_refresh: false,
            force_partition_key_range_refresh: false,
            is_in_retry: false,
            remaining_time: None,
            timeout_in_backoff: None,
            region_reroute_attempt_count: 0,
            client_retry_count: 0,
        }
    }

    pub fn decide(&self, ctx: &mut RetryPolicyContext, request: &mut LogicalRequest, error: StoreError) -> RetryDecision {
        ctx.reset_hints();

        let signal = match error.kind() {
            ErrorKind::LeaseNotFound => {
                slog::warn!(self.logger, "Lease not found, failing over: {}", error);
                return RetryDecision::NoRetry(StoreError::service_unavailable(
                    SubStatusCode::LEASE_NOT_FOUND,
                    "partition lease not found",
                    Some(error),
                ));
            }
            ErrorKind::ArchivalPartitionNotPresent if request.allow_archival_partition_failover => {
                slog::warn!(self.logger, "Archival partition not present, failing over: {}", error);
                return RetryDecision::NoRetry(StoreError::service_unavailable(
                    SubStatusCode::ARCHIVAL_PARTITION_NOT_PRESENT,
                    "archival partition not present",
                    Some(error),
                ));
            }
            ErrorKind::Gone | ErrorKind::BarrierNotMet(_) | ErrorKind::ArchivalPartitionNotPresent => Signal::Gone,
            ErrorKind::PartitionMigrating => Signal::PartitionMigrating,
            ErrorKind::InvalidPartition => Signal::InvalidPartition,
            ErrorKind::PartitionSplitting => Signal::PartitionSplitting,
            ErrorKind::RetryWith if self.retry_with.enabled => Signal::RetryWith,
            _ => return RetryDecision::NoRetry(error),
        };

        if signal == Signal::RetryWith {
            ctx.last_retry_with = Some(error.clone());
        }

        let elapsed = self.clock.now().saturating_duration_since(ctx.started_at);
        let remaining = self.wait_time.checked_sub(elapsed).unwrap_or_default();
        let attempt = ctx.attempt_count;
        ctx.attempt_count += 1;

        // First retry is immediate.
        let mut backoff = Duration::from_secs(0);
        if attempt > 0 {
            if remaining == Duration::from_secs(0) {
                return RetryDecision::NoRetry(self.exhausted(ctx, request, signal, error));
            }
            backoff = self.next_backoff(ctx, signal, remaining);
        }

        let timeout = match remaining.checked_sub(backoff) {
            Some(timeout) if timeout > Duration::from_secs(0) => timeout,
            _ => self.min_timeout_in_backoff,
        };

        if backoff >= self.min_backoff_for_region_reroute {
            ctx.region_reroute_attempt_count += 1;
        }

        match signal {
            Signal::Gone => ctx.force_address_refresh = true,
            Signal::PartitionMigrating => {
                request.routing.clear_target();
                ctx.force_collection_routing_map_refresh = true;
                ctx.force_master_refresh = true;
            }
            Signal::InvalidPartition => {
                request.routing.clear_target();
                request.routing.global_committed_selected_lsn = Lsn::UNKNOWN;
                request.routing.write_barrier = None;

                ctx.invalid_partition_attempts += 1;
                if ctx.invalid_partition_attempts > MAX_INVALID_PARTITION_RETRIES {
                    slog::warn!(
                        self.logger,
                        "Name cache still stale after {} refreshes.",
                        MAX_INVALID_PARTITION_RETRIES
                    );
                    return RetryDecision::NoRetry(StoreError::service_unavailable(
                        SubStatusCode::UNKNOWN,
                        "partition could not be resolved",
                        Some(error),
                    ));
                }
                ctx.force_name_cache_refresh = true;
            }
            Signal::PartitionSplitting => {
                request.routing.clear_target();
                ctx.force_partition_key_range_refresh = true;
            }
            Signal::RetryWith => {}
        }

        ctx.is_in_retry = true;
        ctx.remaining_time = Some(timeout);
        ctx.timeout_in_backoff = Some(backoff);
        ctx.client_retry_count = attempt;

        slog::info!(
            self.logger,
            "Retrying {:?} after {}ms (attempt {}, {}ms left): {}",
            signal,
            backoff.as_millis(),
            ctx.attempt_count,
            remaining.as_millis(),
            error
        );

        RetryDecision::RetryAfter(backoff)
    }

    fn next_backoff(&self, ctx: &mut RetryPolicyContext, signal: Signal, remaining: Duration) -> Duration {
        if signal == Signal::RetryWith {
            let backoff = cmp::min(
                cmp::min(ctx.current_retry_with_backoff, remaining),
                self.retry_with.max_backoff,
            );
            ctx.current_retry_with_backoff = cmp::min(ctx.current_retry_with_backoff * 2, self.retry_with.max_backoff);

            let salt_millis = self.retry_with.salt.as_millis() as u64;
            let salt = Duration::from_millis(rand::thread_rng().gen_range(0..=salt_millis));
            return backoff + salt;
        }

        let backoff = cmp::min(cmp::min(ctx.current_backoff, remaining), self.max_backoff);
        ctx.current_backoff = cmp::min(ctx.current_backoff * self.backoff_multiplier, self.max_backoff);
        backoff
    }

    /// The error surfaced once the wait budget is spent.
    fn exhausted(
        &self,
        ctx: &mut RetryPolicyContext,
        request: &LogicalRequest,
        signal: Signal,
        error: StoreError,
    ) -> StoreError {
        slog::warn!(
            self.logger,
            "Retry budget of {}s exhausted after {} attempts: {}",
            self.wait_time.as_secs(),
            ctx.attempt_count,
            error
        );

        if signal == Signal::RetryWith {
            return error;
        }
        if let Some(retry_with) = ctx.last_retry_with.take() {
            return retry_with;
        }

        let statistics = request.routing.statistics.as_ref();
        if self.detect_connectivity_issues && statistics.map_or(false, |s| s.is_cpu_overloaded()) {
            return StoreError::service_unavailable(
                SubStatusCode::CLIENT_CPU_OVERLOAD,
                "client CPU is overloaded",
                Some(error),
            );
        }

        let failed_replicas = statistics.map_or(0, |s| s.failed_replicas().len());
        if self.detect_connectivity_issues && failed_replicas >= self.min_failed_replicas_for_connectivity {
            return StoreError::service_unavailable(
                SubStatusCode::CLIENT_UNAVAILABLE,
                format!("{} replicas unreachable from this client", failed_replicas),
                Some(error),
            );
        }

        let sub_status = error.sub_status();
        StoreError::service_unavailable(sub_status, "service unavailable", Some(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsistencyOptions;
    use crate::model::{OperationType, ResourceType, StatusCode, WriteBarrierKind};
    use crate::routing::ReplicaAddress;
    use crate::test_utils::{create_logger, mock_store_response};
    use crate::time::{mocked_clock, MockClock};
    use std::convert::TryFrom;

    fn policy(clock: MockClock, options: ConsistencyOptions) -> GoneRetryPolicy<MockClock> {
        let options = ConsistencyOptionsValidated::try_from(options).unwrap();
        GoneRetryPolicy::new(create_logger(), &options, options.gone_retry_wait, clock)
    }

    fn request() -> LogicalRequest {
        LogicalRequest::new(OperationType::Read, ResourceType::Document, "coll-1")
    }

    fn gone() -> StoreError {
        StoreError::gone(SubStatusCode::UNKNOWN, "replica gone")
    }

    fn backoff_of(decision: RetryDecision) -> Duration {
        match decision {
            RetryDecision::RetryAfter(backoff) => backoff,
            RetryDecision::NoRetry(e) => panic!("Expected retry, got {}", e),
        }
    }

    fn error_of(decision: RetryDecision) -> StoreError {
        match decision {
            RetryDecision::NoRetry(e) => e,
            RetryDecision::RetryAfter(backoff) => panic!("Expected no retry, got backoff {:?}", backoff),
        }
    }

    #[tokio::test]
    async fn backoff_doubles_from_second_retry_and_caps() {
        // -- setup --
        let (clock, _controller) = mocked_clock();
        let policy = policy(clock, ConsistencyOptions::default());
        let mut ctx = policy.start();
        let mut request = request();

        // -- execute & verify --
        let backoffs: Vec<u64> = (0..7)
            .map(|_| backoff_of(policy.decide(&mut ctx, &mut request, gone())).as_secs())
            .collect();

        assert_eq!(backoffs, vec![0, 1, 2, 4, 8, 15, 15]);
        assert!(ctx.force_address_refresh);
        assert!(ctx.is_in_retry);
    }

    #[tokio::test]
    async fn backoff_bounded_by_remaining_budget() {
        // -- setup --
        let (clock, mut controller) = mocked_clock();
        let policy = policy(clock, ConsistencyOptions::default());
        let mut ctx = policy.start();
        let mut request = request();

        // -- execute & verify --
        backoff_of(policy.decide(&mut ctx, &mut request, gone()));
        controller.advance(Duration::from_millis(29_500));

        let backoff = backoff_of(policy.decide(&mut ctx, &mut request, gone()));
        assert_eq!(backoff, Duration::from_millis(500));
        // Nothing left once the backoff is paid, so the next attempt gets the minimum timeout.
        assert_eq!(ctx.remaining_time, Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn every_retry_records_its_backoff_and_counts_as_reroute() {
        // -- setup --
        let (clock, _controller) = mocked_clock();
        let policy = policy(clock, ConsistencyOptions::default());
        let mut ctx = policy.start();
        let mut request = request();

        // -- execute & verify --
        for (i, expected) in [0, 1, 2].iter().enumerate() {
            let backoff = backoff_of(policy.decide(&mut ctx, &mut request, gone()));
            assert_eq!(backoff, Duration::from_secs(*expected));
            assert_eq!(ctx.timeout_in_backoff, Some(backoff));
            assert_eq!(ctx.region_reroute_attempt_count, i as u32 + 1);
        }
        assert_eq!(ctx.remaining_time, Some(Duration::from_secs(28)));
    }

    #[tokio::test]
    async fn reroute_counter_respects_minimum_backoff() {
        // -- setup --
        let (clock, _controller) = mocked_clock();
        let policy = policy(
            clock,
            ConsistencyOptions {
                min_backoff_for_region_reroute: Some(Duration::from_secs(2)),
                ..ConsistencyOptions::default()
            },
        );
        let mut ctx = policy.start();
        let mut request = request();

        // -- execute & verify --
        let counts: Vec<u32> = (0..4)
            .map(|_| {
                backoff_of(policy.decide(&mut ctx, &mut request, gone()));
                ctx.region_reroute_attempt_count
            })
            .collect();
        assert_eq!(counts, vec![0, 0, 1, 2]);
    }

    #[tokio::test]
    async fn first_retry_is_immediate_even_without_budget() {
        // -- setup --
        let (clock, mut controller) = mocked_clock();
        let policy = policy(clock, ConsistencyOptions::default());
        let mut ctx = policy.start();
        let mut request = request();
        controller.advance(Duration::from_secs(31));

        // -- execute & verify --
        assert_eq!(
            backoff_of(policy.decide(&mut ctx, &mut request, gone())),
            Duration::from_secs(0)
        );
        let error = error_of(policy.decide(&mut ctx, &mut request, gone()));
        assert_eq!(error.kind(), ErrorKind::ServiceUnavailable);
        assert_eq!(error.cause().map(|c| c.kind()), Some(ErrorKind::Gone));
    }

    #[tokio::test]
    async fn third_invalid_partition_is_service_unavailable() {
        // -- setup --
        let (clock, _controller) = mocked_clock();
        let policy = policy(clock, ConsistencyOptions::default());
        let mut ctx = policy.start();
        let mut request = request();
        request.routing.global_committed_selected_lsn = Lsn::new(9);
        let stale = || StoreError::gone(SubStatusCode::NAME_CACHE_IS_STALE, "stale name cache");

        // -- execute & verify --
        backoff_of(policy.decide(&mut ctx, &mut request, stale()));
        assert!(ctx.force_name_cache_refresh);
        assert!(!ctx.force_address_refresh);
        assert_eq!(request.routing.global_committed_selected_lsn, Lsn::UNKNOWN);

        backoff_of(policy.decide(&mut ctx, &mut request, stale()));

        let error = error_of(policy.decide(&mut ctx, &mut request, stale()));
        assert_eq!(error.kind(), ErrorKind::ServiceUnavailable);
        assert_eq!(error.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn topology_signals_set_their_routing_hints() {
        // -- setup --
        let (clock, _controller) = mocked_clock();
        let policy = policy(clock, ConsistencyOptions::default());
        let mut ctx = policy.start();
        let mut request = request();
        request.routing.target_identity = Some("pkrange-1".into());

        // -- execute & verify --
        let migrating = StoreError::gone(SubStatusCode::COMPLETING_PARTITION_MIGRATION, "migrating");
        backoff_of(policy.decide(&mut ctx, &mut request, migrating));
        assert!(ctx.force_collection_routing_map_refresh);
        assert!(ctx.force_master_refresh);
        assert!(!ctx.force_address_refresh);
        assert!(request.routing.target_identity.is_none());

        let splitting = StoreError::gone(SubStatusCode::COMPLETING_SPLIT, "splitting");
        backoff_of(policy.decide(&mut ctx, &mut request, splitting));
        assert!(ctx.force_partition_key_range_refresh);
        assert!(!ctx.force_collection_routing_map_refresh);

        ctx.apply_to(&mut request.routing);
        assert!(request.routing.force_partition_key_range_refresh);
        assert!(request.routing.is_in_retry);
    }

    #[tokio::test]
    async fn lease_not_found_fails_over_without_backoff() {
        // -- setup --
        let (clock, _controller) = mocked_clock();
        let policy = policy(clock, ConsistencyOptions::default());
        let mut ctx = policy.start();
        let mut request = request();

        // -- execute & verify --
        let lease = StoreError::gone(SubStatusCode::LEASE_NOT_FOUND, "lease lost");
        let error = error_of(policy.decide(&mut ctx, &mut request, lease));
        assert_eq!(error.kind(), ErrorKind::ServiceUnavailable);
        assert_eq!(ctx.attempt_count(), 0);
    }

    #[tokio::test]
    async fn archival_partition_only_fails_over_when_opted_in() {
        // -- setup --
        let (clock, _controller) = mocked_clock();
        let policy = policy(clock, ConsistencyOptions::default());
        let mut ctx = policy.start();
        let mut request = request();
        let archival = || StoreError::gone(SubStatusCode::ARCHIVAL_PARTITION_NOT_PRESENT, "archived");

        // -- execute & verify --
        backoff_of(policy.decide(&mut ctx, &mut request, archival()));
        assert!(ctx.force_address_refresh);

        request.allow_archival_partition_failover = true;
        let error = error_of(policy.decide(&mut ctx, &mut request, archival()));
        assert_eq!(error.kind(), ErrorKind::ServiceUnavailable);
    }

    #[tokio::test]
    async fn retry_with_uses_its_own_ladder_and_is_surfaced_on_exhaustion() {
        // -- setup --
        let (clock, mut controller) = mocked_clock();
        let policy = policy(clock, ConsistencyOptions::default());
        let mut ctx = policy.start();
        let mut request = request();
        let retry_with = || StoreError::from_response("rntbd://replica-1", mock_store_response(StatusCode::RETRY_WITH, 3));

        // -- execute & verify --
        assert_eq!(backoff_of(policy.decide(&mut ctx, &mut request, retry_with())), Duration::from_secs(0));
        let second = backoff_of(policy.decide(&mut ctx, &mut request, retry_with()));
        assert!(second >= Duration::from_millis(10) && second <= Duration::from_millis(15));
        let third = backoff_of(policy.decide(&mut ctx, &mut request, retry_with()));
        assert!(third >= Duration::from_millis(20) && third <= Duration::from_millis(25));
        assert!(!ctx.force_address_refresh);

        // A later gone is surfaced as the RetryWith seen before it.
        controller.advance(Duration::from_secs(31));
        let error = error_of(policy.decide(&mut ctx, &mut request, gone()));
        assert_eq!(error.kind(), ErrorKind::RetryWith);
    }

    #[tokio::test]
    async fn retry_with_can_be_disabled() {
        // -- setup --
        let (clock, _controller) = mocked_clock();
        let options = ConsistencyOptions {
            retry_with: Some(RetryWithOptions {
                enabled: false,
                ..RetryWithOptions::default()
            }),
            ..ConsistencyOptions::default()
        };
        let policy = policy(clock, options);
        let mut ctx = policy.start();
        let mut request = request();

        // -- execute & verify --
        let retry_with = StoreError::from_response("rntbd://replica-1", mock_store_response(StatusCode::RETRY_WITH, 3));
        let error = error_of(policy.decide(&mut ctx, &mut request, retry_with));
        assert_eq!(error.kind(), ErrorKind::RetryWith);
    }

    #[tokio::test]
    async fn exhaustion_blames_client_connectivity() {
        // -- setup --
        let (clock, mut controller) = mocked_clock();
        let policy = policy(clock, ConsistencyOptions::default());
        let mut ctx = policy.start();
        let mut request = request();
        for i in 0..3 {
            request
                .routing
                .statistics_mut()
                .record_failed(&ReplicaAddress::secondary(format!("rntbd://replica-{}", i)));
        }

        // -- execute & verify --
        backoff_of(policy.decide(&mut ctx, &mut request, gone()));
        controller.advance(Duration::from_secs(30));
        let error = error_of(policy.decide(&mut ctx, &mut request, gone()));
        assert_eq!(error.sub_status(), SubStatusCode::CLIENT_UNAVAILABLE);

        request.routing.statistics_mut().record_cpu_overload();
        let error = error_of(policy.decide(&mut ctx, &mut request, gone()));
        assert_eq!(error.sub_status(), SubStatusCode::CLIENT_CPU_OVERLOAD);
    }

    #[tokio::test]
    async fn cpu_overload_ignored_when_connectivity_detection_disabled() {
        // -- setup --
        let (clock, mut controller) = mocked_clock();
        let policy = policy(
            clock,
            ConsistencyOptions {
                detect_connectivity_issues: Some(false),
                ..ConsistencyOptions::default()
            },
        );
        let mut ctx = policy.start();
        let mut request = request();
        request.routing.statistics_mut().record_cpu_overload();
        for i in 0..3 {
            request
                .routing
                .statistics_mut()
                .record_failed(&ReplicaAddress::secondary(format!("rntbd://replica-{}", i)));
        }

        // -- execute --
        backoff_of(policy.decide(&mut ctx, &mut request, gone()));
        controller.advance(Duration::from_secs(30));
        let error = error_of(policy.decide(&mut ctx, &mut request, gone()));

        // -- verify --
        assert_eq!(error.kind(), ErrorKind::ServiceUnavailable);
        assert_eq!(error.sub_status(), SubStatusCode::UNKNOWN);
        assert_eq!(error.cause().map(|c| c.kind()), Some(ErrorKind::Gone));
    }

    #[tokio::test]
    async fn barrier_not_met_is_retried_as_gone() {
        // -- setup --
        let (clock, _controller) = mocked_clock();
        let policy = policy(clock, ConsistencyOptions::default());
        let mut ctx = policy.start();
        let mut request = request();

        // -- execute & verify --
        let barrier = StoreError::barrier_not_met(WriteBarrierKind::GlobalStrongWrite);
        backoff_of(policy.decide(&mut ctx, &mut request, barrier));
        assert!(ctx.force_address_refresh);
    }

    #[tokio::test]
    async fn non_topology_errors_are_not_retried() {
        // -- setup --
        let (clock, _controller) = mocked_clock();
        let policy = policy(clock, ConsistencyOptions::default());
        let mut ctx = policy.start();
        let mut request = request();

        // -- execute & verify --
        let conflict = StoreError::from_response("rntbd://replica-1", mock_store_response(StatusCode::CONFLICT, 3));
        assert_eq!(error_of(policy.decide(&mut ctx, &mut request, conflict)).kind(), ErrorKind::Response);

        let range_gone = StoreError::gone(SubStatusCode::PARTITION_KEY_RANGE_GONE, "range gone");
        assert_eq!(
            error_of(policy.decide(&mut ctx, &mut request, range_gone)).kind(),
            ErrorKind::PartitionKeyRangeGone
        );
    }
}
