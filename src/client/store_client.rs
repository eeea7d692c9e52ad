use crate::config::{ConsistencyOptionsValidated, ServiceConfiguration};
use crate::error::StoreError;
use crate::model::{ConsistencyLevel, LogicalRequest};
use crate::retry::{GoneRetryPolicy, RetryDecision};
use crate::session::SessionContainer;
use crate::store::{BarrierWriteCoordinator, ConsistencyDispatcher};
use crate::time::{Clock, Deadline};
use crate::transport::StoreResponse;
use std::sync::Arc;
use tokio::time::Duration;

/// Executes one logical operation end to end, retrying topology failures until the operation's
/// wait budget runs out.
pub struct StoreClient<C: Clock> {
    logger: slog::Logger,
    clock: C,
    dispatcher: ConsistencyDispatcher<C>,
    writer: BarrierWriteCoordinator<C>,
    session_container: Arc<dyn SessionContainer>,
    service_configuration: Arc<dyn ServiceConfiguration>,
    options: Arc<ConsistencyOptionsValidated>,
}

impl<C: Clock> StoreClient<C> {
    pub(crate) fn new(
        logger: slog::Logger,
        clock: C,
        dispatcher: ConsistencyDispatcher<C>,
        writer: BarrierWriteCoordinator<C>,
        session_container: Arc<dyn SessionContainer>,
        service_configuration: Arc<dyn ServiceConfiguration>,
        options: Arc<ConsistencyOptionsValidated>,
    ) -> Self {
        StoreClient {
            logger,
            clock,
            dispatcher,
            writer,
            session_container,
            service_configuration,
            options,
        }
    }

    /// The request's routing context holds the operation's charges and diagnostics afterwards.
    pub async fn invoke(&self, request: &mut LogicalRequest) -> Result<StoreResponse, StoreError> {
        let wait_time = if self.service_configuration.default_consistency() == ConsistencyLevel::Strong {
            self.options.strong_gone_retry_wait
        } else {
            self.options.gone_retry_wait
        };
        let policy = GoneRetryPolicy::new(self.logger.clone(), &self.options, wait_time, self.clock.clone());
        let mut ctx = policy.start();

        loop {
            let deadline = Deadline::new(self.clock.clone(), ctx.remaining_time.unwrap_or(wait_time));
            ctx.apply_to(&mut request.routing);
            let force_refresh = request.routing.force_refresh;

            let result = if request.operation.is_write() {
                self.writer.write(request, &deadline, force_refresh).await
            } else {
                self.dispatcher
                    .read(request, &deadline, ctx.is_in_retry, force_refresh)
                    .await
            };

            let error = match result {
                Ok(response) => {
                    self.session_container.capture_session_token(request, &response);
                    return Ok(response);
                }
                Err(e) => e,
            };

            match policy.decide(&mut ctx, request, error) {
                RetryDecision::NoRetry(error) => {
                    slog::debug!(
                        self.logger,
                        "{:?} failed after {} attempts: {}",
                        request.operation,
                        ctx.attempt_count() + 1,
                        error
                    );
                    return Err(error);
                }
                RetryDecision::RetryAfter(backoff) => {
                    if backoff > Duration::from_secs(0) {
                        self.clock.sleep(backoff).await;
                    }
                }
            }
        }
    }
}
