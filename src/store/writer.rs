use crate::config::{ConsistencyOptionsValidated, ServiceConfiguration};
use crate::error::StoreError;
use crate::model::{
    ConsistencyLevel, LogicalRequest, Lsn, OperationType, ReadMode, StatusCode, SubStatusCode, WriteBarrierKind,
    WriteBarrierState,
};
use crate::retry::SessionTokenMismatchRetryPolicy;
use crate::routing::AddressResolver;
use crate::session::SessionContainer;
use crate::store::{FanoutRead, ReplicaFanoutReader, ReplicaResponse};
use crate::time::{Clock, Deadline};
use crate::transport::{StoreResponse, Transport};
use chrono::Utc;
use std::sync::Arc;
use tokio::time::Duration;

enum PrimaryWrite {
    Done(Result<StoreResponse, StoreError>),
    BarrierPending(WriteBarrierState),
}

/// Write path. Sends the write to the primary and, when the account replicates synchronously
/// across regions, holds the response back until the write's LSN is committed there.
pub struct BarrierWriteCoordinator<C: Clock> {
    logger: slog::Logger,
    fanout: ReplicaFanoutReader<C>,
    transport: Arc<dyn Transport>,
    address_resolver: Arc<dyn AddressResolver>,
    session_container: Arc<dyn SessionContainer>,
    service_configuration: Arc<dyn ServiceConfiguration>,
    options: Arc<ConsistencyOptionsValidated>,
}

impl<C: Clock> BarrierWriteCoordinator<C> {
    pub(crate) fn new(
        logger: slog::Logger,
        fanout: ReplicaFanoutReader<C>,
        transport: Arc<dyn Transport>,
        address_resolver: Arc<dyn AddressResolver>,
        session_container: Arc<dyn SessionContainer>,
        service_configuration: Arc<dyn ServiceConfiguration>,
        options: Arc<ConsistencyOptionsValidated>,
    ) -> Self {
        BarrierWriteCoordinator {
            logger,
            fanout,
            transport,
            address_resolver,
            session_container,
            service_configuration,
            options,
        }
    }

    pub async fn write(
        &self,
        request: &mut LogicalRequest,
        deadline: &Deadline<C>,
        force_refresh: bool,
    ) -> Result<StoreResponse, StoreError> {
        deadline.check_timeout()?;

        let original_session_token = request.session_token.clone();
        let policy = SessionTokenMismatchRetryPolicy::new(&self.options, deadline.clock().clone());
        let mut state = policy.start();

        let result = loop {
            let error = match self.write_once(request, deadline, force_refresh).await {
                Ok(response) => break Ok(response),
                Err(e) => e,
            };

            match policy.should_retry(&mut state, &error) {
                Some(backoff) => {
                    slog::debug!(
                        self.logger,
                        "Write hit a session mismatch, retry {} in {}ms.",
                        state.retries(),
                        backoff.as_millis()
                    );
                    request.session_token = original_session_token.clone();
                    deadline.clock().sleep(backoff).await;
                }
                None => break Err(error),
            }
        };
        request.session_token = original_session_token;

        result
    }

    async fn write_once(
        &self,
        request: &mut LogicalRequest,
        deadline: &Deadline<C>,
        force_refresh: bool,
    ) -> Result<StoreResponse, StoreError> {
        deadline.check_timeout()?;
        request.routing.statistics_mut();
        request.routing.force_refresh = force_refresh;

        // A retry of a write that already landed only waits on its barrier.
        let mut barrier = match request.routing.write_barrier.take() {
            Some(pending) => {
                slog::info!(
                    self.logger,
                    "Resuming {:?} barrier at LSN {}, last seen committed at {}.",
                    pending.kind,
                    pending.selected_lsn,
                    pending.tracked_global_lsn
                );
                pending
            }
            None => match self.write_to_primary(request).await? {
                PrimaryWrite::Done(result) => return result,
                PrimaryWrite::BarrierPending(pending) => pending,
            },
        };

        match self.wait_for_write_barrier(request, deadline, &mut barrier).await {
            Ok(true) => barrier.pending_write.into_response(&request.routing.charges),
            Ok(false) => {
                slog::warn!(
                    self.logger,
                    "{:?} barrier at LSN {} not met within {}ms, committed at {}.",
                    barrier.kind,
                    barrier.selected_lsn,
                    self.options.write_barrier_budget.as_millis(),
                    barrier.tracked_global_lsn
                );
                let kind = barrier.kind;
                request.routing.write_barrier = Some(barrier);
                Err(StoreError::barrier_not_met(kind))
            }
            Err(e) => {
                request.routing.write_barrier = Some(barrier);
                Err(e)
            }
        }
    }

    async fn write_to_primary(&self, request: &mut LogicalRequest) -> Result<PrimaryWrite, StoreError> {
        let addresses = self
            .address_resolver
            .resolve_addresses(request, request.routing.force_refresh)
            .await?;
        if addresses.collection_rid != request.collection_rid {
            slog::info!(
                self.logger,
                "Collection {} resolved as {}, dropping its session token.",
                request.collection_rid,
                addresses.collection_rid
            );
            self.session_container.clear_token(&request.collection_rid);
        }

        let primary = addresses
            .primary()
            .cloned()
            .ok_or_else(|| StoreError::gone(SubStatusCode::UNKNOWN, "no primary replica resolved for the write"))?;

        let consistency = request
            .consistency_override
            .unwrap_or_else(|| self.service_configuration.default_consistency());
        let carries_session = self.options.use_multiple_write_locations || request.operation == OperationType::Batch;
        if carries_session && consistency == ConsistencyLevel::Session {
            self.session_container.set_request_session_token(request);
        } else {
            self.session_container.validate_and_strip(request);
        }

        let started_at = Utc::now();
        let sent = self.transport.send(&primary, request).await;
        let completed_at = Utc::now();
        let response = ReplicaResponse::from_send(primary, sent, request.operation, false, false);
        self.fanout
            .record_response(request, &response, started_at, completed_at);

        if response
            .error()
            .map_or(false, |error| error.headers().write_request_triggers_address_refresh)
        {
            slog::info!(self.logger, "Write failure asked for an address refresh.");
            self.address_resolver.start_background_refresh(request);
        }

        let kind = self.classify_barrier(&response);
        if kind == WriteBarrierKind::None {
            return Ok(PrimaryWrite::Done(response.into_response(&request.routing.charges)));
        }

        let committed_lsn = committed_lsn(kind, &response);
        if !response.lsn().is_known() || !committed_lsn.is_known() {
            return Err(StoreError::gone(
                SubStatusCode::UNKNOWN,
                format!("{:?} write returned without its LSNs", kind),
            ));
        }

        let selected_lsn = response.lsn();
        request.routing.global_committed_selected_lsn = selected_lsn;
        request.routing.force_refresh = false;

        if committed_lsn >= selected_lsn {
            return Ok(PrimaryWrite::Done(response.into_response(&request.routing.charges)));
        }

        slog::info!(
            self.logger,
            "Write at LSN {} awaits {:?} barrier, committed at {}.",
            selected_lsn,
            kind,
            committed_lsn
        );
        Ok(PrimaryWrite::BarrierPending(WriteBarrierState {
            kind,
            selected_lsn,
            tracked_global_lsn: committed_lsn,
            pending_write: response,
        }))
    }

    fn classify_barrier(&self, response: &ReplicaResponse) -> WriteBarrierKind {
        let default_consistency = self.service_configuration.default_consistency();
        let touched_read_regions = response.number_of_read_regions() > 0;

        if self.service_configuration.global_strong_enabled()
            && default_consistency == ConsistencyLevel::Strong
            && is_committed_mutation(response)
            && touched_read_regions
        {
            WriteBarrierKind::GlobalStrongWrite
        } else if default_consistency != ConsistencyLevel::Strong
            && self.service_configuration.n_region_commit_enabled()
            && response.global_n_region_committed_lsn().is_known()
            && touched_read_regions
        {
            WriteBarrierKind::NRegionSynchronousCommit
        } else {
            WriteBarrierKind::None
        }
    }

    async fn wait_for_write_barrier(
        &self,
        request: &mut LogicalRequest,
        deadline: &Deadline<C>,
        state: &mut WriteBarrierState,
    ) -> Result<bool, StoreError> {
        let mut barrier = LogicalRequest::barrier_from(request);
        let result = self.poll_write_barrier(&mut barrier, deadline, state).await;
        request.absorb_barrier(barrier);

        result
    }

    async fn poll_write_barrier(
        &self,
        barrier: &mut LogicalRequest,
        deadline: &Deadline<C>,
        state: &mut WriteBarrierState,
    ) -> Result<bool, StoreError> {
        let read = FanoutRead {
            include_primary: true,
            replica_count: 1,
            requires_valid_lsn: false,
            use_session_token: false,
            read_mode: ReadMode::Strong,
            check_min_lsn: false,
            force_read_all: true,
        };
        let mut delays = self.options.write_barrier.delays();
        let mut waited = Duration::from_secs(0);

        loop {
            if deadline.is_expired() {
                return Ok(false);
            }

            let responses = self.fanout.read_multiple_replicas(barrier, deadline, read).await?;
            for response in &responses {
                let seen = committed_lsn(state.kind, response);
                if seen > state.tracked_global_lsn {
                    state.tracked_global_lsn = seen;
                }
            }
            if state.tracked_global_lsn >= state.selected_lsn {
                return Ok(true);
            }
            barrier.routing.force_refresh = false;

            let delay = match delays.next() {
                Some(delay) if waited + delay <= self.options.write_barrier_budget => delay,
                _ => return Ok(false),
            };
            waited += delay;
            deadline.clock().sleep(delay).await;
        }
    }
}

fn committed_lsn(kind: WriteBarrierKind, response: &ReplicaResponse) -> Lsn {
    match kind {
        WriteBarrierKind::GlobalStrongWrite => response.global_committed_lsn(),
        WriteBarrierKind::NRegionSynchronousCommit => response.global_n_region_committed_lsn(),
        WriteBarrierKind::None => Lsn::UNKNOWN,
    }
}

/// Statuses after which the write is durably applied (or durably rejected) on the primary.
fn is_committed_mutation(response: &ReplicaResponse) -> bool {
    let status = response.status();
    status.is_success()
        || status == StatusCode::CONFLICT
        || status == StatusCode::PRECONDITION_FAILED
        || (status == StatusCode::NOT_FOUND && response.sub_status() != SubStatusCode::READ_SESSION_NOT_AVAILABLE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BarrierSchedule;
    use crate::error::ErrorKind;
    use crate::model::ResourceType;
    use crate::session::SessionToken;
    use crate::simulation::ScriptedReply;
    use crate::test_utils::{deadline, Harness, PRIMARY, SECONDARIES};
    use crate::time::RealClock;
    use crate::transport::TransportErrorKind;
    use tokio::time::Instant;

    fn create() -> LogicalRequest {
        LogicalRequest::new(OperationType::Create, ResourceType::Document, "coll-1")
    }

    fn global_strong_harness() -> Harness {
        let mut harness = Harness::new(ConsistencyLevel::Strong);
        harness.service.global_strong_enabled = true;
        harness
    }

    fn global_strong_write(lsn: i64, global_committed_lsn: i64) -> StoreResponse {
        StoreResponse::new(StatusCode::CREATED)
            .with_lsn(lsn)
            .with_global_committed_lsn(global_committed_lsn)
            .with_read_regions(1)
    }

    fn set_head_replies(harness: &Harness, reply: StoreResponse) {
        for uri in [PRIMARY].iter().chain(SECONDARIES.iter()) {
            harness.replicas.set_reply_for(uri, OperationType::Head, reply.clone());
        }
    }

    #[tokio::test]
    async fn write_without_barrier_returns_primary_response() {
        // -- setup --
        let harness = Harness::new(ConsistencyLevel::Session);
        harness
            .replicas
            .set_reply_for(PRIMARY, OperationType::Create, StoreResponse::new(StatusCode::CREATED).with_lsn(11));
        let writer = harness.writer();
        let token = SessionToken::new(1, Lsn::new(4));
        let mut request = create().with_session_token(token.clone());

        // -- execute --
        let response = writer.write(&mut request, &deadline(), false).await.unwrap();

        // -- verify --
        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(harness.replicas.sends_to(PRIMARY), 1);
        assert_eq!(harness.replicas.total_sends(), 1);
        assert_eq!(request.session_token, Some(token));
    }

    #[tokio::test]
    async fn already_committed_write_skips_barrier() {
        // -- setup --
        let harness = global_strong_harness();
        harness
            .replicas
            .set_reply_for(PRIMARY, OperationType::Create, global_strong_write(10, 10));
        let writer = harness.writer();
        let mut request = create();

        // -- execute --
        writer.write(&mut request, &deadline(), false).await.unwrap();

        // -- verify --
        assert_eq!(harness.replicas.sends_of(OperationType::Head), 0);
        assert_eq!(request.routing.global_committed_selected_lsn, Lsn::new(10));
    }

    #[tokio::test(start_paused = true)]
    async fn global_strong_barrier_met_by_any_replica() {
        // -- setup --
        let harness = global_strong_harness();
        harness
            .replicas
            .set_reply_for(PRIMARY, OperationType::Create, global_strong_write(10, 8));
        set_head_replies(&harness, StoreResponse::ok().with_lsn(10).with_global_committed_lsn(8));
        harness.replicas.push_reply(
            SECONDARIES[2],
            StoreResponse::ok().with_lsn(10).with_global_committed_lsn(8),
        );
        harness.replicas.set_reply_for(
            SECONDARIES[2],
            OperationType::Head,
            StoreResponse::ok().with_lsn(10).with_global_committed_lsn(10),
        );
        let writer = harness.writer();
        let mut request = create();

        // -- execute --
        let response = writer.write(&mut request, &deadline(), false).await.unwrap();

        // -- verify --
        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(response.headers.lsn, Some(Lsn::new(10)));
        // Two polls, each reading every replica.
        assert_eq!(harness.replicas.sends_of(OperationType::Head), 8);
        assert!(request.routing.write_barrier.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn barrier_gives_up_after_delay_budget_and_resumes_on_retry() {
        // -- setup --
        let harness = global_strong_harness();
        harness
            .replicas
            .set_reply_for(PRIMARY, OperationType::Create, global_strong_write(10, 8));
        set_head_replies(&harness, StoreResponse::ok().with_lsn(10).with_global_committed_lsn(9));
        let writer = harness.writer();
        let mut request = create();
        let started = Instant::now();

        // -- execute & verify --
        let error = writer.write(&mut request, &deadline(), false).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::BarrierNotMet(WriteBarrierKind::GlobalStrongWrite));
        assert_eq!(error.sub_status(), SubStatusCode::GLOBAL_STRONG_WRITE_BARRIER_NOT_MET);
        assert_eq!(started.elapsed(), Duration::from_millis(940));
        assert_eq!(harness.replicas.sends_of(OperationType::Head), 35 * 4);
        let pending = request.routing.write_barrier.as_ref().unwrap();
        assert_eq!(pending.selected_lsn, Lsn::new(10));
        // Progress seen while polling survives into the retry.
        assert_eq!(pending.tracked_global_lsn, Lsn::new(9));

        set_head_replies(&harness, StoreResponse::ok().with_lsn(10).with_global_committed_lsn(10));
        let response = writer.write(&mut request, &deadline(), false).await.unwrap();
        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(harness.replicas.sends_of(OperationType::Create), 1);
        assert!(request.routing.write_barrier.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn n_region_barrier_tracks_its_own_committed_lsn() {
        // -- setup --
        let mut harness = Harness::new(ConsistencyLevel::Session);
        harness.service.n_region_commit_enabled = true;
        harness.options.write_barrier = Some(BarrierSchedule {
            short_count: 1,
            short_delay: Duration::from_millis(10),
            long_count: 1,
            long_delay: Duration::from_millis(10),
        });
        harness.replicas.set_reply_for(
            PRIMARY,
            OperationType::Create,
            StoreResponse::new(StatusCode::CREATED)
                .with_lsn(10)
                .with_global_n_region_committed_lsn(5)
                .with_read_regions(2),
        );
        // Global committed LSN is not what this barrier waits on.
        set_head_replies(
            &harness,
            StoreResponse::ok()
                .with_lsn(10)
                .with_global_committed_lsn(10)
                .with_global_n_region_committed_lsn(9),
        );
        let writer = harness.writer();
        let mut request = create();

        // -- execute --
        let error = writer.write(&mut request, &deadline(), false).await.unwrap_err();

        // -- verify --
        assert_eq!(error.sub_status(), SubStatusCode::N_REGION_COMMIT_WRITE_BARRIER_NOT_MET);
        assert_eq!(harness.replicas.sends_of(OperationType::Head), 3 * 4);
    }

    #[tokio::test]
    async fn barrier_write_without_lsn_is_gone() {
        // -- setup --
        let harness = global_strong_harness();
        harness.replicas.set_reply_for(
            PRIMARY,
            OperationType::Create,
            StoreResponse::new(StatusCode::CREATED)
                .with_global_committed_lsn(8)
                .with_read_regions(1),
        );
        let writer = harness.writer();
        let mut request = create();

        // -- execute --
        let error = writer.write(&mut request, &deadline(), false).await.unwrap_err();

        // -- verify --
        assert_eq!(error.kind(), ErrorKind::Gone);
    }

    #[tokio::test]
    async fn recreated_collection_drops_session_token() {
        // -- setup --
        let harness = Harness::new(ConsistencyLevel::Session);
        harness.replicas.set_resolved_collection_rid("coll-2");
        let writer = harness.writer();
        let mut request = create();

        // -- execute --
        writer.write(&mut request, &deadline(), false).await.unwrap();

        // -- verify --
        assert_eq!(harness.sessions.cleared_collections(), vec!["coll-1".to_string()]);
    }

    #[tokio::test]
    async fn failed_write_can_trigger_background_refresh() {
        // -- setup --
        let harness = Harness::new(ConsistencyLevel::Session);
        let mut unavailable = StoreResponse::new(StatusCode::SERVICE_UNAVAILABLE);
        unavailable.headers.write_request_triggers_address_refresh = true;
        harness.replicas.set_reply_for(PRIMARY, OperationType::Create, unavailable);
        let writer = harness.writer();
        let mut request = create();

        // -- execute --
        let error = writer.write(&mut request, &deadline(), false).await.unwrap_err();

        // -- verify --
        assert_eq!(error.kind(), ErrorKind::ServiceUnavailable);
        assert_eq!(harness.replicas.background_refresh_count(), 1);
    }

    #[tokio::test]
    async fn sent_write_lost_in_transport_is_a_timeout() {
        // -- setup --
        let harness = Harness::new(ConsistencyLevel::Session);
        harness.replicas.set_reply_for(
            PRIMARY,
            OperationType::Create,
            ScriptedReply::Fail {
                kind: TransportErrorKind::Timeout,
                payload_sent: true,
                cpu_overloaded: false,
            },
        );
        let writer = harness.writer();
        let mut request = create();

        // -- execute --
        let error = writer.write(&mut request, &deadline(), false).await.unwrap_err();

        // -- verify --
        assert_eq!(error.kind(), ErrorKind::RequestTimeout);
        let statistics = request.routing.statistics.unwrap();
        assert_eq!(statistics.failed_replicas(), &[PRIMARY.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn session_mismatch_on_write_is_retried() {
        // -- setup --
        let harness = Harness::new(ConsistencyLevel::Session);
        harness.replicas.push_reply(
            PRIMARY,
            StoreResponse::new(StatusCode::NOT_FOUND).with_sub_status(SubStatusCode::READ_SESSION_NOT_AVAILABLE),
        );
        let writer = harness.writer();
        let mut request = create();

        // -- execute --
        let response = writer.write(&mut request, &deadline(), false).await.unwrap();

        // -- verify --
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(harness.replicas.sends_to(PRIMARY), 2);
    }

    #[tokio::test]
    async fn expired_deadline_sends_nothing() {
        // -- setup --
        let harness = Harness::new(ConsistencyLevel::Session);
        let writer = harness.writer();
        let mut request = create();
        let expired = Deadline::new(RealClock, Duration::from_secs(0));

        // -- execute --
        let error = writer.write(&mut request, &expired, false).await.unwrap_err();

        // -- verify --
        assert_eq!(error.kind(), ErrorKind::DeadlineExceeded);
        assert_eq!(harness.replicas.total_sends(), 0);
    }
}
