use crate::config::{ReplicationPolicy, ServiceConfiguration};
use crate::model::ConsistencyLevel;

#[derive(Clone, Debug)]
pub struct StaticServiceConfiguration {
    pub default_consistency: ConsistencyLevel,
    pub user_replication_policy: ReplicationPolicy,
    pub system_replication_policy: ReplicationPolicy,
    pub global_strong_enabled: bool,
    pub n_region_commit_enabled: bool,
}

impl StaticServiceConfiguration {
    /// Four-replica partitions, single region features off.
    pub fn new(default_consistency: ConsistencyLevel) -> Self {
        StaticServiceConfiguration {
            default_consistency,
            user_replication_policy: ReplicationPolicy {
                min_replica_set_size: 3,
                max_replica_set_size: 4,
            },
            system_replication_policy: ReplicationPolicy {
                min_replica_set_size: 3,
                max_replica_set_size: 4,
            },
            global_strong_enabled: false,
            n_region_commit_enabled: false,
        }
    }
}

impl ServiceConfiguration for StaticServiceConfiguration {
    fn default_consistency(&self) -> ConsistencyLevel {
        self.default_consistency
    }

    fn user_replication_policy(&self) -> ReplicationPolicy {
        self.user_replication_policy
    }

    fn system_replication_policy(&self) -> ReplicationPolicy {
        self.system_replication_policy
    }

    fn global_strong_enabled(&self) -> bool {
        self.global_strong_enabled
    }

    fn n_region_commit_enabled(&self) -> bool {
        self.n_region_commit_enabled
    }
}
