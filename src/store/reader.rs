use crate::config::{ConsistencyOptionsValidated, ServiceConfiguration};
use crate::error::StoreError;
use crate::model::{ConsistencyLevel, LogicalRequest, ReadMode};
use crate::retry::SessionTokenMismatchRetryPolicy;
use crate::store::{FanoutRead, QuorumConvergence, ReplicaFanoutReader};
use crate::time::{Clock, Deadline};
use crate::transport::StoreResponse;
use std::sync::Arc;

/// Read path. Picks how many replicas to contact, and how to reconcile them, from the request's
/// effective consistency level.
pub struct ConsistencyDispatcher<C: Clock> {
    logger: slog::Logger,
    fanout: ReplicaFanoutReader<C>,
    quorum: QuorumConvergence<C>,
    service_configuration: Arc<dyn ServiceConfiguration>,
    options: Arc<ConsistencyOptionsValidated>,
}

impl<C: Clock> ConsistencyDispatcher<C> {
    pub(crate) fn new(
        logger: slog::Logger,
        fanout: ReplicaFanoutReader<C>,
        quorum: QuorumConvergence<C>,
        service_configuration: Arc<dyn ServiceConfiguration>,
        options: Arc<ConsistencyOptionsValidated>,
    ) -> Self {
        ConsistencyDispatcher {
            logger,
            fanout,
            quorum,
            service_configuration,
            options,
        }
    }

    pub async fn read(
        &self,
        request: &mut LogicalRequest,
        deadline: &Deadline<C>,
        is_in_retry: bool,
        force_refresh: bool,
    ) -> Result<StoreResponse, StoreError> {
        if is_in_retry {
            deadline.check_gone()?;
        } else {
            deadline.check_timeout()?;
        }

        request.routing.force_refresh = force_refresh;
        request.routing.statistics_mut();

        let (read_mode, use_session_token) = self.deduce_read_mode(request);
        slog::debug!(
            self.logger,
            "Reading {:?} {:?} in mode {:?} (session: {}).",
            request.resource_type,
            request.operation,
            read_mode,
            use_session_token
        );

        match read_mode {
            ReadMode::Primary => {
                let primary = self
                    .fanout
                    .read_primary(request, deadline, false, use_session_token)
                    .await?;
                primary.into_response(&request.routing.charges)
            }
            ReadMode::Any if use_session_token => self.read_session(request, deadline).await,
            ReadMode::Any => self.read_any(request, deadline).await,
            ReadMode::Strong | ReadMode::BoundedStaleness => {
                // Both levels read a regular majority quorum; bounded staleness always writes
                // through a majority that includes the primary.
                request.routing.local_refresh_on_gone = true;
                let read_quorum = self.read_quorum(request);
                self.quorum.read_strong(request, deadline, read_quorum, read_mode).await
            }
        }
    }

    /// Returns the read mode and whether the read carries the session token.
    fn deduce_read_mode(&self, request: &LogicalRequest) -> (ReadMode, bool) {
        if request.replica_index.is_some() {
            return (ReadMode::Primary, false);
        }

        let consistency = request
            .consistency_override
            .unwrap_or_else(|| self.service_configuration.default_consistency());
        match consistency {
            ConsistencyLevel::Session => (ReadMode::Any, true),
            ConsistencyLevel::Eventual | ConsistencyLevel::ConsistentPrefix => (ReadMode::Any, false),
            ConsistencyLevel::BoundedStaleness => (ReadMode::BoundedStaleness, false),
            ConsistencyLevel::Strong => (ReadMode::Strong, false),
        }
    }

    fn read_quorum(&self, request: &LogicalRequest) -> usize {
        let policy = if request.resource_type.is_read_from_master(request.operation) {
            self.service_configuration.system_replication_policy()
        } else {
            self.service_configuration.user_replication_policy()
        };
        policy.read_quorum()
    }

    async fn read_session(
        &self,
        request: &mut LogicalRequest,
        deadline: &Deadline<C>,
    ) -> Result<StoreResponse, StoreError> {
        let policy = SessionTokenMismatchRetryPolicy::new(&self.options, deadline.clock().clone());
        let mut state = policy.start();

        loop {
            let error = match self.read_session_once(request, deadline).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            match policy.should_retry(&mut state, &error) {
                Some(backoff) => {
                    slog::debug!(
                        self.logger,
                        "No replica satisfied the session token, retry {} in {}ms.",
                        state.retries(),
                        backoff.as_millis()
                    );
                    deadline.clock().sleep(backoff).await;
                }
                None => return Err(error),
            }
        }
    }

    async fn read_session_once(
        &self,
        request: &mut LogicalRequest,
        deadline: &Deadline<C>,
    ) -> Result<StoreResponse, StoreError> {
        deadline.check_gone()?;

        let responses = self
            .fanout
            .read_multiple_replicas(
                request,
                deadline,
                FanoutRead {
                    include_primary: true,
                    replica_count: 1,
                    requires_valid_lsn: true,
                    use_session_token: true,
                    read_mode: ReadMode::Any,
                    check_min_lsn: true,
                    force_read_all: false,
                },
            )
            .await?;

        // Replicas behind the session, including ones answering not found, never make it here.
        match responses.into_iter().next() {
            Some(response) => response.into_response(&request.routing.charges),
            None => Err(StoreError::session_not_available(
                "no replica has caught up to the session token",
            )),
        }
    }

    async fn read_any(&self, request: &mut LogicalRequest, deadline: &Deadline<C>) -> Result<StoreResponse, StoreError> {
        let responses = self
            .fanout
            .read_multiple_replicas(
                request,
                deadline,
                FanoutRead {
                    include_primary: true,
                    replica_count: 1,
                    requires_valid_lsn: false,
                    use_session_token: false,
                    read_mode: ReadMode::Any,
                    check_min_lsn: false,
                    force_read_all: false,
                },
            )
            .await?;

        match responses.into_iter().next() {
            Some(response) => response.into_response(&request.routing.charges),
            None => Err(StoreError::no_valid_store_response()),
        }
    }
}
