use crate::client::StoreClient;
use crate::config::{ConsistencyOptions, ConsistencyOptionsValidated, ServiceConfiguration};
use crate::routing::AddressResolver;
use crate::session::SessionContainer;
use crate::store::{BarrierWriteCoordinator, ConsistencyDispatcher, QuorumConvergence, ReplicaFanoutReader};
use crate::time::{Clock, RealClock};
use crate::transport::Transport;
use std::convert::TryFrom;
use std::sync::Arc;

pub struct StoreClientConfig {
    pub logger: slog::Logger,
    pub options: ConsistencyOptions,
    pub transport: Arc<dyn Transport>,
    pub address_resolver: Arc<dyn AddressResolver>,
    pub session_container: Arc<dyn SessionContainer>,
    pub service_configuration: Arc<dyn ServiceConfiguration>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreClientCreationError {
    #[error("Illegal options for configuring client: {0}")]
    IllegalClientOptions(String),
}

pub fn try_create_store_client(config: StoreClientConfig) -> Result<StoreClient<RealClock>, StoreClientCreationError> {
    try_create_store_client_with_clock(config, RealClock)
}

pub fn try_create_store_client_with_clock<C: Clock>(
    config: StoreClientConfig,
    clock: C,
) -> Result<StoreClient<C>, StoreClientCreationError> {
    let root_logger = config.logger;

    let options = ConsistencyOptionsValidated::try_from(config.options)
        .map_err(|e| StoreClientCreationError::IllegalClientOptions(e.to_string()))?;
    let options = Arc::new(options);

    let fanout = ReplicaFanoutReader::new(
        root_logger.new(slog::o!("Component" => "Fanout")),
        config.transport.clone(),
        config.address_resolver.clone(),
        config.session_container.clone(),
        options.clone(),
    );
    let quorum = QuorumConvergence::new(
        root_logger.new(slog::o!("Component" => "Quorum")),
        fanout.clone(),
        config.service_configuration.clone(),
        options.clone(),
    );
    let dispatcher = ConsistencyDispatcher::new(
        root_logger.new(slog::o!("Component" => "Reader")),
        fanout.clone(),
        quorum,
        config.service_configuration.clone(),
        options.clone(),
    );
    let writer = BarrierWriteCoordinator::new(
        root_logger.new(slog::o!("Component" => "Writer")),
        fanout,
        config.transport,
        config.address_resolver,
        config.session_container.clone(),
        config.service_configuration.clone(),
        options.clone(),
    );

    Ok(StoreClient::new(
        root_logger.new(slog::o!("Component" => "StoreClient")),
        clock,
        dispatcher,
        writer,
        config.session_container,
        config.service_configuration,
        options,
    ))
}
