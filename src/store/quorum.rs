use crate::config::{ConsistencyOptionsValidated, ServiceConfiguration};
use crate::error::StoreError;
use crate::model::{ConsistencyLevel, LogicalRequest, Lsn, ReadMode, SubStatusCode};
use crate::store::{FanoutRead, ReplicaFanoutReader, ReplicaResponse};
use crate::time::{Clock, Deadline};
use crate::transport::StoreResponse;
use std::sync::Arc;

/// What a quorum read established about the secondaries.
enum ReadQuorumOutcome {
    /// A quorum agreed on the selected response.
    Met(ReplicaResponse),
    /// Enough replicas answered, but the selected LSN is not yet on a quorum.
    Selected {
        selected_lsn: Lsn,
        global_committed_lsn: Lsn,
        response: ReplicaResponse,
    },
    /// Too few secondaries answered usably.
    NotSelected,
}

enum PrimaryReadOutcome {
    Succeeded(ReplicaResponse),
    /// The partition has more replicas than the read quorum assumes, so the primary alone
    /// cannot prove the write is on a quorum.
    RetryOnSecondary,
}

enum PrimaryCatchUp {
    Met,
    NotMet,
    Inconclusive,
}

/// Result of checking a set of responses for quorum agreement.
#[derive(Debug)]
pub(crate) struct QuorumCheck {
    pub met: bool,
    pub read_lsn: Lsn,
    pub global_committed_lsn: Lsn,
    pub selected: Option<ReplicaResponse>,
}

/// Decides whether `responses` show a quorum at one LSN, and which response to return.
///
/// `check_global_strong` additionally requires the selected LSN to be globally committed, but
/// only once some response reports read regions.
pub(crate) fn is_quorum_met(responses: &[ReplicaResponse], read_quorum: usize, check_global_strong: bool) -> QuorumCheck {
    let valid: Vec<&ReplicaResponse> = responses.iter().filter(|r| r.is_valid()).collect();

    let mut max_lsn = Lsn::new(0);
    let mut min_lsn = None;
    for response in &valid {
        max_lsn = max_lsn.max(response.lsn());
        min_lsn = Some(min_lsn.map_or(response.lsn(), |min: Lsn| min.min(response.lsn())));
    }
    let min_lsn = min_lsn.unwrap_or(Lsn::UNKNOWN);
    let replicas_at_max = valid.iter().filter(|r| r.lsn() == max_lsn).count();

    let at_max = || valid.iter().filter(|r| r.lsn() == max_lsn);
    let selected = at_max()
        .find(|r| r.status().is_success())
        .or_else(|| at_max().next())
        .map(|r| (*r).clone());

    let item_lsn = selected.as_ref().map_or(Lsn::UNKNOWN, |r| r.item_lsn());
    let read_lsn = if item_lsn.is_known() {
        item_lsn.min(max_lsn)
    } else {
        max_lsn
    };

    let max_read_regions = valid.iter().map(|r| r.number_of_read_regions()).max().unwrap_or(0);
    let max_global_committed_lsn = valid
        .iter()
        .map(|r| r.global_committed_lsn())
        .max()
        .unwrap_or(Lsn::UNKNOWN);
    let check_global_strong = check_global_strong && max_read_regions > 0;
    let global_committed_lsn = if check_global_strong { read_lsn } else { Lsn::UNKNOWN };

    let met_at_max = read_lsn > Lsn::new(0)
        && replicas_at_max >= read_quorum
        && (!check_global_strong || max_global_committed_lsn >= max_lsn);

    // Every replica already holds the item's LSN, even if they disagree beyond it.
    let met_at_item = valid.len() >= read_quorum
        && item_lsn.is_known()
        && item_lsn <= min_lsn
        && (!check_global_strong || item_lsn <= max_global_committed_lsn);

    QuorumCheck {
        met: met_at_max || met_at_item,
        read_lsn,
        global_committed_lsn,
        selected,
    }
}

/// Strong and bounded-staleness reads: agreement of a read quorum of secondaries, backed by read
/// barriers and a single primary fallback.
pub struct QuorumConvergence<C: Clock> {
    logger: slog::Logger,
    fanout: ReplicaFanoutReader<C>,
    service_configuration: Arc<dyn ServiceConfiguration>,
    options: Arc<ConsistencyOptionsValidated>,
}

impl<C: Clock> QuorumConvergence<C> {
    pub(crate) fn new(
        logger: slog::Logger,
        fanout: ReplicaFanoutReader<C>,
        service_configuration: Arc<dyn ServiceConfiguration>,
        options: Arc<ConsistencyOptionsValidated>,
    ) -> Self {
        QuorumConvergence {
            logger,
            fanout,
            service_configuration,
            options,
        }
    }

    pub async fn read_strong(
        &self,
        request: &mut LogicalRequest,
        deadline: &Deadline<C>,
        read_quorum: usize,
        read_mode: ReadMode,
    ) -> Result<StoreResponse, StoreError> {
        let mut retries_left = self.options.max_read_quorum_retries;
        let mut has_read_primary = false;

        loop {
            let mut retry_on_secondary = false;

            match self.read_quorum(request, deadline, read_quorum, read_mode).await? {
                ReadQuorumOutcome::Met(response) => {
                    return response.into_response(&request.routing.charges);
                }
                ReadQuorumOutcome::Selected {
                    selected_lsn,
                    global_committed_lsn,
                    response,
                } => {
                    let barrier_met = self
                        .wait_for_read_barrier(
                            request,
                            deadline,
                            true,
                            read_quorum,
                            selected_lsn,
                            global_committed_lsn,
                            read_mode,
                        )
                        .await?;
                    if barrier_met {
                        return response.into_response(&request.routing.charges);
                    }

                    slog::info!(
                        self.logger,
                        "Read barrier at LSN {} not met, caching selected response.",
                        selected_lsn
                    );
                    request.routing.quorum_selected_lsn = selected_lsn;
                    request.routing.global_committed_selected_lsn = global_committed_lsn;
                    request.routing.quorum_selected_response = Some(response);
                }
                ReadQuorumOutcome::NotSelected => {
                    if has_read_primary {
                        slog::warn!(self.logger, "Primary already read and secondaries still short of quorum.");
                        return Err(StoreError::read_quorum_not_met());
                    }

                    match self.read_primary(request, deadline, read_quorum).await? {
                        PrimaryReadOutcome::Succeeded(response) => {
                            return response.into_response(&request.routing.charges);
                        }
                        PrimaryReadOutcome::RetryOnSecondary => {
                            retry_on_secondary = true;
                            has_read_primary = true;
                        }
                    }
                }
            }

            retries_left -= 1;
            if retries_left == 0 || !retry_on_secondary {
                return Err(StoreError::read_quorum_not_met());
            }
        }
    }

    async fn read_quorum(
        &self,
        request: &mut LogicalRequest,
        deadline: &Deadline<C>,
        read_quorum: usize,
        read_mode: ReadMode,
    ) -> Result<ReadQuorumOutcome, StoreError> {
        let (selected_lsn, global_committed_lsn, response) = match request.routing.quorum_selected_response.clone() {
            Some(cached) => (
                request.routing.quorum_selected_lsn,
                request.routing.global_committed_selected_lsn,
                cached,
            ),
            None => {
                let responses = self
                    .fanout
                    .read_multiple_replicas(
                        request,
                        deadline,
                        FanoutRead {
                            include_primary: false,
                            replica_count: read_quorum,
                            requires_valid_lsn: true,
                            use_session_token: false,
                            read_mode,
                            check_min_lsn: false,
                            force_read_all: false,
                        },
                    )
                    .await?;

                let valid = responses.iter().filter(|r| r.is_valid()).count();
                if valid < read_quorum {
                    slog::info!(self.logger, "{} of {} secondaries answered with a valid LSN.", valid, read_quorum);
                    return Ok(ReadQuorumOutcome::NotSelected);
                }

                let check = is_quorum_met(&responses, read_quorum, self.is_global_strong_candidate(request));
                let selected = match check.selected {
                    Some(selected) => selected,
                    None => return Ok(ReadQuorumOutcome::NotSelected),
                };
                if check.met {
                    return Ok(ReadQuorumOutcome::Met(selected));
                }

                request.routing.force_refresh = false;
                (check.read_lsn, check.global_committed_lsn, selected)
            }
        };

        let barrier_met = self
            .wait_for_read_barrier(
                request,
                deadline,
                false,
                read_quorum,
                selected_lsn,
                global_committed_lsn,
                read_mode,
            )
            .await?;
        if barrier_met {
            return Ok(ReadQuorumOutcome::Met(response));
        }

        Ok(ReadQuorumOutcome::Selected {
            selected_lsn,
            global_committed_lsn,
            response,
        })
    }

    async fn read_primary(
        &self,
        request: &mut LogicalRequest,
        deadline: &Deadline<C>,
        read_quorum: usize,
    ) -> Result<PrimaryReadOutcome, StoreError> {
        deadline.check_gone()?;
        request.routing.force_refresh = false;

        let primary = self.fanout.read_primary(request, deadline, true, false).await?;
        if !primary.is_valid() {
            return Err(primary.into_error());
        }

        let replica_set_size = match primary.current_replica_set_size() {
            Some(size) if size > 0 => size as usize,
            _ => {
                return Err(StoreError::gone(
                    SubStatusCode::UNKNOWN,
                    "primary did not report its replica set size",
                ))
            }
        };
        if !primary.lsn().is_known() || !primary.quorum_acked_lsn().is_known() {
            return Err(StoreError::gone(SubStatusCode::UNKNOWN, "primary did not report its LSNs"));
        }
        if replica_set_size > read_quorum {
            slog::info!(
                self.logger,
                "Primary reports {} replicas, more than quorum {}; retrying on secondaries.",
                replica_set_size,
                read_quorum
            );
            return Ok(PrimaryReadOutcome::RetryOnSecondary);
        }

        if primary.lsn() != primary.quorum_acked_lsn() {
            match self
                .wait_for_primary_catch_up(request, deadline, read_quorum, primary.lsn())
                .await?
            {
                PrimaryCatchUp::Met => {}
                PrimaryCatchUp::Inconclusive => return Ok(PrimaryReadOutcome::RetryOnSecondary),
                PrimaryCatchUp::NotMet => return Err(StoreError::read_quorum_not_met()),
            }
        }

        Ok(PrimaryReadOutcome::Succeeded(primary))
    }

    async fn wait_for_primary_catch_up(
        &self,
        request: &mut LogicalRequest,
        deadline: &Deadline<C>,
        read_quorum: usize,
        target_lsn: Lsn,
    ) -> Result<PrimaryCatchUp, StoreError> {
        let mut barrier = LogicalRequest::barrier_from(request);
        let result = self
            .poll_primary_catch_up(&mut barrier, deadline, read_quorum, target_lsn)
            .await;
        request.absorb_barrier(barrier);

        result
    }

    async fn poll_primary_catch_up(
        &self,
        barrier: &mut LogicalRequest,
        deadline: &Deadline<C>,
        read_quorum: usize,
        target_lsn: Lsn,
    ) -> Result<PrimaryCatchUp, StoreError> {
        for _ in 0..self.options.primary_catch_up_retries {
            let primary = self.fanout.read_primary(barrier, deadline, true, false).await?;
            barrier.routing.force_refresh = false;
            if !primary.is_valid() {
                return Err(primary.into_error());
            }

            if primary.current_replica_set_size().map_or(false, |size| size as usize > read_quorum) {
                return Ok(PrimaryCatchUp::Inconclusive);
            }
            if primary.lsn() >= target_lsn && primary.quorum_acked_lsn() >= target_lsn {
                return Ok(PrimaryCatchUp::Met);
            }

            slog::debug!(
                self.logger,
                "Primary quorum-acked LSN {} behind {}.",
                primary.quorum_acked_lsn(),
                target_lsn
            );
            deadline.clock().sleep(self.options.primary_catch_up_delay).await;
        }

        Ok(PrimaryCatchUp::NotMet)
    }

    /// Polls until a quorum reports at least `barrier_lsn`, and when a global committed LSN is
    /// targeted, until some replica reports it committed.
    #[allow(clippy::too_many_arguments)]
    async fn wait_for_read_barrier(
        &self,
        request: &mut LogicalRequest,
        deadline: &Deadline<C>,
        include_primary: bool,
        read_quorum: usize,
        barrier_lsn: Lsn,
        target_global_committed_lsn: Lsn,
        read_mode: ReadMode,
    ) -> Result<bool, StoreError> {
        let mut barrier = LogicalRequest::barrier_from(request);
        let read = FanoutRead {
            include_primary,
            replica_count: read_quorum,
            requires_valid_lsn: true,
            use_session_token: false,
            read_mode,
            check_min_lsn: false,
            force_read_all: true,
        };
        let result = self
            .poll_read_barrier(&mut barrier, deadline, read, barrier_lsn, target_global_committed_lsn)
            .await;
        request.absorb_barrier(barrier);

        result
    }

    async fn poll_read_barrier(
        &self,
        barrier: &mut LogicalRequest,
        deadline: &Deadline<C>,
        read: FanoutRead,
        barrier_lsn: Lsn,
        target_global_committed_lsn: Lsn,
    ) -> Result<bool, StoreError> {
        let retries = self.options.read_barrier_retries;
        for attempt in 1..=retries {
            if self.poll_read_barrier_once(barrier, deadline, read, barrier_lsn, target_global_committed_lsn).await? {
                return Ok(true);
            }
            if attempt < retries {
                deadline.clock().sleep(self.options.read_barrier_delay).await;
            }
        }

        if target_global_committed_lsn > Lsn::new(0) {
            slog::info!(
                self.logger,
                "Waiting for global committed LSN {} across regions.",
                target_global_committed_lsn
            );
            for delay in self.options.multi_region_read_barrier.delays() {
                if self.poll_read_barrier_once(barrier, deadline, read, barrier_lsn, target_global_committed_lsn).await? {
                    return Ok(true);
                }
                deadline.clock().sleep(delay).await;
            }
        }

        slog::info!(self.logger, "Read barrier at LSN {} not met.", barrier_lsn);
        Ok(false)
    }

    async fn poll_read_barrier_once(
        &self,
        barrier: &mut LogicalRequest,
        deadline: &Deadline<C>,
        read: FanoutRead,
        barrier_lsn: Lsn,
        target_global_committed_lsn: Lsn,
    ) -> Result<bool, StoreError> {
        deadline.check_gone()?;
        let responses = self.fanout.read_multiple_replicas(barrier, deadline, read).await?;
        barrier.routing.force_refresh = false;

        let caught_up = responses.iter().filter(|r| r.lsn() >= barrier_lsn).count();
        let max_global_committed_lsn = responses
            .iter()
            .map(|r| r.global_committed_lsn())
            .max()
            .unwrap_or(Lsn::UNKNOWN);

        Ok(caught_up >= read.replica_count
            && (target_global_committed_lsn <= Lsn::new(0) || max_global_committed_lsn >= target_global_committed_lsn))
    }

    fn is_global_strong_candidate(&self, request: &LogicalRequest) -> bool {
        self.service_configuration.global_strong_enabled()
            && self.service_configuration.default_consistency() == ConsistencyLevel::Strong
            && request
                .consistency_override
                .map_or(true, |level| level == ConsistencyLevel::Strong)
    }
}
