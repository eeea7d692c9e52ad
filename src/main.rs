use quorum_client::{
    try_create_store_client, ConsistencyLevel, ConsistencyOptions, InMemorySessionContainer, LogicalRequest, Lsn,
    OperationType, ReplicaAddress, ResourceType, SessionToken, SimulatedReplicaSet, StaticServiceConfiguration,
    StatusCode, StoreClientConfig, StoreResponse,
};
use slog::Drain;
use std::error::Error;
use std::sync::Arc;

const COLLECTION: &str = "demo-collection";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let logger = create_root_logger_for_stdout();

    let replicas = Arc::new(fake_partition(&logger));
    let sessions = Arc::new(InMemorySessionContainer::new());
    let client = try_create_store_client(StoreClientConfig {
        logger: logger.clone(),
        options: ConsistencyOptions::default(),
        transport: replicas.clone(),
        address_resolver: replicas.clone(),
        session_container: sessions.clone(),
        service_configuration: Arc::new(StaticServiceConfiguration::new(ConsistencyLevel::Session)),
    })?;

    let mut write = LogicalRequest::new(OperationType::Create, ResourceType::Document, COLLECTION);
    let response = client.invoke(&mut write).await?;
    slog::info!(logger, "Created document: {:?} at LSN {:?}", response.status, response.headers.lsn);
    slog::info!(logger, "Session token is now {:?}", sessions.token_for(COLLECTION));

    let mut read = LogicalRequest::new(OperationType::Read, ResourceType::Document, COLLECTION);
    let response = client.invoke(&mut read).await?;
    slog::info!(
        logger,
        "Session read answered {:?} at LSN {:?} after contacting {:?}",
        response.status,
        response.headers.lsn,
        read.routing.statistics_mut().contacted_replicas()
    );

    let mut read = LogicalRequest::new(OperationType::Read, ResourceType::Document, COLLECTION)
        .with_consistency(ConsistencyLevel::Strong);
    let response = client.invoke(&mut read).await?;
    slog::info!(
        logger,
        "Strong read answered {:?} at LSN {:?}, charged {} RU",
        response.status,
        response.headers.lsn,
        read.routing.charges.total()
    );

    Ok(())
}

/// One primary that has applied the demo write and three secondaries that are one step behind
/// for the first read each.
fn fake_partition(logger: &slog::Logger) -> SimulatedReplicaSet {
    let replicas = SimulatedReplicaSet::new(logger.new(slog::o!("Component" => "Replicas")), COLLECTION);
    let caught_up = replica_reply(11);

    replicas.add_replica(ReplicaAddress::primary("rntbd://demo-primary"), caught_up.clone());
    replicas.set_reply_for(
        "rntbd://demo-primary",
        OperationType::Create,
        StoreResponse::new(StatusCode::CREATED)
            .with_lsn(11)
            .with_session_token(SessionToken::new(1, Lsn::new(11))),
    );
    for i in 1..=3 {
        let uri = format!("rntbd://demo-secondary-{}", i);
        replicas.add_replica(ReplicaAddress::secondary(uri.clone()), caught_up.clone());
        replicas.push_reply(&uri, replica_reply(10));
    }

    replicas
}

fn replica_reply(lsn: i64) -> StoreResponse {
    StoreResponse::ok()
        .with_lsn(lsn)
        .with_replica_set_size(4)
        .with_session_token(SessionToken::new(1, Lsn::new(lsn)))
        .with_request_charge(1.0)
}

fn create_root_logger_for_stdout() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, slog::o!("App" => "quorum-client-demo"))
}
