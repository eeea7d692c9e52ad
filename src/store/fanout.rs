use crate::config::{ConsistencyOptionsValidated, ReplicaOrdering};
use crate::error::{ErrorKind, StoreError};
use crate::model::{LogicalRequest, ReadMode, StatusCode, StoreResponseRecord, SubStatusCode};
use crate::routing::{AddressResolver, ReplicaAddress};
use crate::session::SessionContainer;
use crate::store::ReplicaResponse;
use crate::time::{Clock, Deadline};
use crate::transport::{StoreResponse, Transport, TransportError};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use rand::seq::SliceRandom;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Parameters of one fan-out.
#[derive(Copy, Clone, Debug)]
pub struct FanoutRead {
    pub include_primary: bool,
    pub replica_count: usize,
    pub requires_valid_lsn: bool,
    pub use_session_token: bool,
    pub read_mode: ReadMode,
    /// Only accept replicas whose session token satisfies the request's.
    pub check_min_lsn: bool,
    /// Contact every resolved replica at once instead of `replica_count` at a time.
    pub force_read_all: bool,
}

struct FanoutOutcome {
    responses: Vec<ReplicaResponse>,
    retry_with_force_refresh: bool,
}

struct TimedSend {
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    result: Result<StoreResponse, TransportError>,
}

/// Issues a request to several replicas concurrently and keeps the answers that are usable.
pub struct ReplicaFanoutReader<C: Clock> {
    logger: slog::Logger,
    transport: Arc<dyn Transport>,
    address_resolver: Arc<dyn AddressResolver>,
    session_container: Arc<dyn SessionContainer>,
    options: Arc<ConsistencyOptionsValidated>,
    _clock: std::marker::PhantomData<C>,
}

impl<C: Clock> Clone for ReplicaFanoutReader<C> {
    fn clone(&self) -> Self {
        ReplicaFanoutReader {
            logger: self.logger.clone(),
            transport: self.transport.clone(),
            address_resolver: self.address_resolver.clone(),
            session_container: self.session_container.clone(),
            options: self.options.clone(),
            _clock: std::marker::PhantomData,
        }
    }
}

impl<C: Clock> ReplicaFanoutReader<C> {
    pub(crate) fn new(
        logger: slog::Logger,
        transport: Arc<dyn Transport>,
        address_resolver: Arc<dyn AddressResolver>,
        session_container: Arc<dyn SessionContainer>,
        options: Arc<ConsistencyOptionsValidated>,
    ) -> Self {
        ReplicaFanoutReader {
            logger,
            transport,
            address_resolver,
            session_container,
            options,
            _clock: std::marker::PhantomData,
        }
    }

    /// Returns at most the replicas that answered usably. Fewer than `replica_count` means the
    /// caller could not reach enough replicas, even after a forced address refresh when the
    /// request allows one.
    pub async fn read_multiple_replicas(
        &self,
        request: &mut LogicalRequest,
        deadline: &Deadline<C>,
        read: FanoutRead,
    ) -> Result<Vec<ReplicaResponse>, StoreError> {
        deadline.check_gone()?;

        let original_session_token = request.session_token.clone();
        let result = self.read_with_local_refresh(request, deadline, read).await;
        request.session_token = original_session_token;

        result
    }

    async fn read_with_local_refresh(
        &self,
        request: &mut LogicalRequest,
        deadline: &Deadline<C>,
        read: FanoutRead,
    ) -> Result<Vec<ReplicaResponse>, StoreError> {
        let original_session_token = request.session_token.clone();
        let outcome = self.read_once(request, deadline, read).await?;

        if request.routing.local_refresh_on_gone && outcome.retry_with_force_refresh && !request.routing.force_refresh {
            slog::info!(
                self.logger,
                "Only {} of {} replicas usable, retrying with forced address refresh.",
                outcome.responses.len(),
                read.replica_count
            );
            request.routing.force_refresh = true;
            request.session_token = original_session_token;
            let read = FanoutRead {
                check_min_lsn: false,
                ..read
            };
            let outcome = self.read_once(request, deadline, read).await?;
            return Ok(outcome.responses);
        }

        Ok(outcome.responses)
    }

    async fn read_once(
        &self,
        request: &mut LogicalRequest,
        deadline: &Deadline<C>,
        read: FanoutRead,
    ) -> Result<FanoutOutcome, StoreError> {
        let resolved = self
            .address_resolver
            .resolve_replicas(request, read.include_primary, request.routing.force_refresh)
            .await?;
        self.stamp_session_token(request, read.use_session_token, read.check_min_lsn);

        if resolved.len() < read.replica_count {
            slog::info!(
                self.logger,
                "Resolved {} replicas, need {}.",
                resolved.len(),
                read.replica_count
            );
            return Ok(FanoutOutcome {
                responses: Vec::new(),
                retry_with_force_refresh: !request.routing.force_refresh,
            });
        }

        let mut candidates: VecDeque<ReplicaAddress> =
            self.order_candidates(resolved, &request.routing.failed_endpoints).into();
        let use_local_lsn = read.read_mode != ReadMode::Strong;
        let mut responses = Vec::with_capacity(read.replica_count);
        let mut replicas_to_read = read.replica_count;
        let mut has_gone = false;
        let mut last_gone_sub_status = SubStatusCode::UNKNOWN;

        while !candidates.is_empty() {
            deadline.check_gone()?;

            let batch_size = if read.force_read_all {
                candidates.len()
            } else {
                replicas_to_read.min(candidates.len())
            };
            let batch: Vec<ReplicaAddress> = candidates.drain(..batch_size).collect();

            let sent = {
                let shared: &LogicalRequest = request;
                join_all(batch.iter().map(|replica| self.send_timed(replica, shared))).await
            };

            // Insertion order, not completion order.
            for (replica, timed) in batch.into_iter().zip(sent) {
                let response = ReplicaResponse::from_send(
                    replica,
                    timed.result,
                    request.operation,
                    read.requires_valid_lsn,
                    use_local_lsn,
                );
                self.record_response(request, &response, timed.started_at, timed.completed_at);
                verify_can_continue(&response)?;

                if response.is_topology_gone() {
                    has_gone = true;
                    last_gone_sub_status = response.sub_status();
                    if !request.routing.performed_background_refresh {
                        slog::info!(self.logger, "Gone replica seen, refreshing addresses in background.");
                        self.address_resolver.start_background_refresh(request);
                        request.routing.performed_background_refresh = true;
                    }
                }

                if response.is_valid() && self.satisfies_session(request, &response) {
                    responses.push(response);
                }
            }

            if responses.len() >= read.replica_count {
                return Ok(FanoutOutcome {
                    responses,
                    retry_with_force_refresh: false,
                });
            }

            replicas_to_read = read.replica_count - responses.len();
        }

        if has_gone {
            if !request.routing.local_refresh_on_gone {
                return Err(StoreError::gone(
                    last_gone_sub_status,
                    format!(
                        "{} of {} replicas usable and a replica reported gone",
                        responses.len(),
                        read.replica_count
                    ),
                ));
            }
            if !request.routing.force_refresh {
                return Ok(FanoutOutcome {
                    responses,
                    retry_with_force_refresh: true,
                });
            }
        }

        Ok(FanoutOutcome {
            responses,
            retry_with_force_refresh: false,
        })
    }

    pub async fn read_primary(
        &self,
        request: &mut LogicalRequest,
        deadline: &Deadline<C>,
        requires_valid_lsn: bool,
        use_session_token: bool,
    ) -> Result<ReplicaResponse, StoreError> {
        deadline.check_gone()?;

        let original_session_token = request.session_token.clone();
        let result = match self
            .read_primary_once(request, requires_valid_lsn, use_session_token, false)
            .await
        {
            Ok(Some(response)) => Ok(response),
            Ok(None) => {
                request.routing.force_refresh = true;
                request.session_token = original_session_token.clone();
                self.read_primary_once(request, requires_valid_lsn, use_session_token, true)
                    .await
                    .and_then(|response| response.ok_or_else(StoreError::no_valid_store_response))
            }
            Err(e) => Err(e),
        };
        request.session_token = original_session_token;

        result
    }

    /// `Ok(None)` asks the caller to retry once with a forced address refresh.
    async fn read_primary_once(
        &self,
        request: &mut LogicalRequest,
        requires_valid_lsn: bool,
        use_session_token: bool,
        is_retry_after_refresh: bool,
    ) -> Result<Option<ReplicaResponse>, StoreError> {
        let primary = self
            .address_resolver
            .resolve_primary(request, request.routing.force_refresh)
            .await?;
        self.stamp_session_token(request, use_session_token, false);

        let timed = self.send_timed(&primary, request).await;
        let response = ReplicaResponse::from_send(primary, timed.result, request.operation, requires_valid_lsn, false);
        self.record_response(request, &response, timed.started_at, timed.completed_at);

        if response.is_topology_gone() {
            if is_retry_after_refresh || !request.routing.local_refresh_on_gone || request.routing.force_refresh {
                return Err(response.into_error());
            }
            return Ok(None);
        }

        Ok(Some(response))
    }

    async fn send_timed(&self, replica: &ReplicaAddress, request: &LogicalRequest) -> TimedSend {
        let started_at = Utc::now();
        let result = self.transport.send(replica, request).await;
        TimedSend {
            started_at,
            completed_at: Utc::now(),
            result,
        }
    }

    fn stamp_session_token(&self, request: &mut LogicalRequest, use_session_token: bool, check_min_lsn: bool) {
        if use_session_token {
            self.session_container.set_request_session_token(request);
        } else {
            request.session_token = None;
        }

        request.routing.request_session_token = if check_min_lsn {
            request.session_token.clone()
        } else {
            None
        };
    }

    fn satisfies_session(&self, request: &LogicalRequest, response: &ReplicaResponse) -> bool {
        let requested = match &request.routing.request_session_token {
            Some(requested) => requested,
            None => return true,
        };

        let satisfied = response
            .session_token()
            .map_or(false, |token| requested.is_satisfied_by(token));

        satisfied || (!self.options.enforce_session_check && response.status() != StatusCode::NOT_FOUND)
    }

    /// Replicas that failed earlier in this operation go last.
    fn order_candidates(&self, mut resolved: Vec<ReplicaAddress>, failed_endpoints: &HashSet<String>) -> Vec<ReplicaAddress> {
        if self.options.replica_ordering == ReplicaOrdering::Randomized {
            resolved.shuffle(&mut rand::thread_rng());
        }

        let (mut healthy, failed): (Vec<_>, Vec<_>) = resolved
            .into_iter()
            .partition(|replica| !failed_endpoints.contains(&replica.uri));
        healthy.extend(failed);
        healthy
    }

    pub(crate) fn record_response(
        &self,
        request: &mut LogicalRequest,
        response: &ReplicaResponse,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) {
        let replica = response.replica();
        slog::debug!(
            self.logger,
            "Replica {} answered {:?}/{:?} at LSN {:?} (valid: {}).",
            replica.uri,
            response.status(),
            response.sub_status(),
            response.lsn(),
            response.is_valid()
        );

        if response.error().is_some() {
            request.routing.failed_endpoints.insert(replica.uri.clone());
        }
        request.routing.charges.add(response.request_charge());

        let statistics = request.routing.statistics_mut();
        if response.is_transport_failure() {
            statistics.record_failed(replica);
        } else {
            statistics.record_contacted(replica);
        }
        if response.is_client_cpu_overloaded() {
            statistics.record_cpu_overload();
        }
        statistics.record_response(StoreResponseRecord {
            replica: replica.uri.clone(),
            status: response.status(),
            sub_status: response.sub_status(),
            lsn: response.lsn(),
            started_at,
            completed_at,
        });
    }
}

/// Some replica answers invalidate the whole operation rather than just that replica.
fn verify_can_continue(response: &ReplicaResponse) -> Result<(), StoreError> {
    if let Some(error) = response.error() {
        let fatal = match error.kind() {
            ErrorKind::PartitionKeyRangeGone | ErrorKind::PartitionSplitting | ErrorKind::PartitionMigrating => true,
            _ => error.headers().request_validation_failure,
        };
        if fatal {
            return Err(error.clone());
        }
    }
    Ok(())
}
