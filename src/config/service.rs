use crate::model::ConsistencyLevel;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReplicationPolicy {
    pub min_replica_set_size: u32,
    pub max_replica_set_size: u32,
}

impl ReplicationPolicy {
    /// Majority of the largest replica set the partition may have.
    pub fn read_quorum(&self) -> usize {
        let n = self.max_replica_set_size as usize;
        n - n / 2
    }
}

/// Read-only snapshot of the account's service configuration.
pub trait ServiceConfiguration: Send + Sync {
    fn default_consistency(&self) -> ConsistencyLevel;
    fn user_replication_policy(&self) -> ReplicationPolicy;
    fn system_replication_policy(&self) -> ReplicationPolicy;
    fn global_strong_enabled(&self) -> bool;
    fn n_region_commit_enabled(&self) -> bool;
}
