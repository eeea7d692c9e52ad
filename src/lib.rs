mod client;
mod config;
mod error;
mod model;
mod retry;
mod routing;
mod session;
mod simulation;
mod store;
mod time;
mod transport;
#[cfg(test)]
mod test_utils;

pub use client::try_create_store_client;
pub use client::try_create_store_client_with_clock;
pub use client::StoreClient;
pub use client::StoreClientConfig;
pub use client::StoreClientCreationError;
pub use config::BarrierSchedule;
pub use config::ConsistencyOptions;
pub use config::ReplicaOrdering;
pub use config::ReplicationPolicy;
pub use config::RetryWithOptions;
pub use config::ServiceConfiguration;
pub use error::ErrorKind;
pub use error::StoreError;
pub use model::ClientRequestStatistics;
pub use model::ConsistencyLevel;
pub use model::LogicalRequest;
pub use model::Lsn;
pub use model::OperationType;
pub use model::ReadMode;
pub use model::RequestChargeTracker;
pub use model::ResourceType;
pub use model::RoutingContext;
pub use model::StatusCode;
pub use model::StoreResponseRecord;
pub use model::SubStatusCode;
pub use model::WriteBarrierKind;
pub use model::WriteBarrierState;
pub use retry::GoneRetryPolicy;
pub use retry::RetryDecision;
pub use retry::RetryPolicyContext;
pub use routing::AddressResolver;
pub use routing::PartitionAddresses;
pub use routing::ReplicaAddress;
pub use session::SessionContainer;
pub use session::SessionToken;
pub use session::SessionTokenParseError;
pub use simulation::InMemorySessionContainer;
pub use simulation::ScriptedReply;
pub use simulation::SimulatedReplicaSet;
pub use simulation::StaticServiceConfiguration;
pub use store::BarrierWriteCoordinator;
pub use store::ConsistencyDispatcher;
pub use store::FanoutRead;
pub use store::QuorumConvergence;
pub use store::ReplicaFanoutReader;
pub use store::ReplicaResponse;
pub use time::Clock;
pub use time::Deadline;
pub use time::RealClock;
pub use transport::ResponseHeaders;
pub use transport::SendProgress;
pub use transport::SendProgressSnapshot;
pub use transport::StoreResponse;
pub use transport::Transport;
pub use transport::TransportError;
pub use transport::TransportErrorKind;

// `lib.rs` only declares private modules and re-exports their public types, so each module is
// free to organize its internals.
