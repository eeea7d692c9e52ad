//! In-process collaborators for driving the engine without a real cluster.
mod replica_set;
mod service_configuration;
mod session_container;

pub use replica_set::ScriptedReply;
pub use replica_set::SimulatedReplicaSet;
pub use service_configuration::StaticServiceConfiguration;
pub use session_container::InMemorySessionContainer;
