use crate::client::{try_create_store_client, StoreClient, StoreClientConfig};
use crate::config::{ConsistencyOptions, ConsistencyOptionsValidated, ReplicaOrdering};
use crate::model::{ConsistencyLevel, StatusCode};
use crate::routing::ReplicaAddress;
use crate::simulation::{InMemorySessionContainer, SimulatedReplicaSet, StaticServiceConfiguration};
use crate::store::{BarrierWriteCoordinator, ConsistencyDispatcher, QuorumConvergence, ReplicaFanoutReader};
use crate::time::{Deadline, RealClock};
use crate::transport::StoreResponse;
use std::convert::TryFrom;
use std::sync::Arc;
use tokio::time::Duration;

pub(crate) const PRIMARY: &str = "rntbd://primary";
pub(crate) const SECONDARIES: [&str; 3] = [
    "rntbd://secondary-1",
    "rntbd://secondary-2",
    "rntbd://secondary-3",
];

pub(crate) fn create_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}

pub(crate) fn mock_store_response(status: StatusCode, lsn: i64) -> StoreResponse {
    StoreResponse::new(status).with_lsn(lsn)
}

pub(crate) fn deadline() -> Deadline<RealClock> {
    Deadline::new(RealClock, Duration::from_secs(30))
}

/// A four replica partition (primary first) that every replica answers at LSN 10. Tests adjust
/// `service` and `options` before building the component under test.
pub(crate) struct Harness {
    pub replicas: Arc<SimulatedReplicaSet>,
    pub sessions: Arc<InMemorySessionContainer>,
    pub service: StaticServiceConfiguration,
    pub options: ConsistencyOptions,
}

impl Harness {
    pub(crate) fn new(default_consistency: ConsistencyLevel) -> Self {
        let replicas = SimulatedReplicaSet::new(create_logger(), "coll-1");
        let caught_up = StoreResponse::ok().with_lsn(10).with_replica_set_size(4);
        replicas.add_replica(ReplicaAddress::primary(PRIMARY), caught_up.clone());
        for uri in SECONDARIES.iter() {
            replicas.add_replica(ReplicaAddress::secondary(*uri), caught_up.clone());
        }

        Harness {
            replicas: Arc::new(replicas),
            sessions: Arc::new(InMemorySessionContainer::new()),
            service: StaticServiceConfiguration::new(default_consistency),
            options: ConsistencyOptions {
                replica_ordering: Some(ReplicaOrdering::AsResolved),
                ..ConsistencyOptions::default()
            },
        }
    }

    fn validated_options(&self) -> Arc<ConsistencyOptionsValidated> {
        Arc::new(ConsistencyOptionsValidated::try_from(self.options.clone()).unwrap())
    }

    pub(crate) fn fanout(&self) -> ReplicaFanoutReader<RealClock> {
        ReplicaFanoutReader::new(
            create_logger(),
            self.replicas.clone(),
            self.replicas.clone(),
            self.sessions.clone(),
            self.validated_options(),
        )
    }

    pub(crate) fn quorum(&self) -> QuorumConvergence<RealClock> {
        QuorumConvergence::new(
            create_logger(),
            self.fanout(),
            Arc::new(self.service.clone()),
            self.validated_options(),
        )
    }

    pub(crate) fn dispatcher(&self) -> ConsistencyDispatcher<RealClock> {
        ConsistencyDispatcher::new(
            create_logger(),
            self.fanout(),
            self.quorum(),
            Arc::new(self.service.clone()),
            self.validated_options(),
        )
    }

    pub(crate) fn writer(&self) -> BarrierWriteCoordinator<RealClock> {
        BarrierWriteCoordinator::new(
            create_logger(),
            self.fanout(),
            self.replicas.clone(),
            self.replicas.clone(),
            self.sessions.clone(),
            Arc::new(self.service.clone()),
            self.validated_options(),
        )
    }

    pub(crate) fn client_config(&self) -> StoreClientConfig {
        StoreClientConfig {
            logger: create_logger(),
            options: self.options.clone(),
            transport: self.replicas.clone(),
            address_resolver: self.replicas.clone(),
            session_container: self.sessions.clone(),
            service_configuration: Arc::new(self.service.clone()),
        }
    }

    pub(crate) fn client(&self) -> StoreClient<RealClock> {
        try_create_store_client(self.client_config()).unwrap()
    }
}
