mod options;
mod schedule;
mod service;

pub use options::ConsistencyOptions;
pub use options::ReplicaOrdering;
pub use options::RetryWithOptions;
pub use schedule::BarrierSchedule;
pub use service::ReplicationPolicy;
pub use service::ServiceConfiguration;

pub(crate) use options::ConsistencyOptionsValidated;
