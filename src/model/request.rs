use crate::model::{
    ClientRequestStatistics, ConsistencyLevel, Lsn, OperationType, RequestChargeTracker, ResourceType,
};
use crate::session::SessionToken;
use crate::store::ReplicaResponse;
use bytes::Bytes;
use std::collections::HashSet;
use tokio::time::Duration;

/// One in-flight operation. Cloning deep-copies headers and routing state while the body bytes
/// stay shared.
#[derive(Clone, Debug)]
pub struct LogicalRequest {
    pub operation: OperationType,
    pub resource_type: ResourceType,
    pub resource_address: String,
    pub collection_rid: String,
    pub consistency_override: Option<ConsistencyLevel>,
    /// Pins the read to one replica. Pinned reads always go to the primary and skip sessions.
    pub replica_index: Option<usize>,
    pub session_token: Option<SessionToken>,
    /// Opts in to failing over to another region when the partition is archived.
    pub allow_archival_partition_failover: bool,
    pub body: Bytes,
    pub routing: RoutingContext,
}

impl LogicalRequest {
    pub fn new(operation: OperationType, resource_type: ResourceType, collection_rid: impl Into<String>) -> Self {
        let collection_rid = collection_rid.into();
        LogicalRequest {
            operation,
            resource_type,
            resource_address: format!("dbs/{}", collection_rid),
            collection_rid,
            consistency_override: None,
            replica_index: None,
            session_token: None,
            allow_archival_partition_failover: false,
            body: Bytes::new(),
            routing: RoutingContext::default(),
        }
    }

    pub fn with_consistency(mut self, consistency: ConsistencyLevel) -> Self {
        self.consistency_override = Some(consistency);
        self
    }

    pub fn with_session_token(mut self, token: SessionToken) -> Self {
        self.session_token = Some(token);
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub fn with_replica_index(mut self, replica_index: usize) -> Self {
        self.replica_index = Some(replica_index);
        self
    }

    /// A head-only request against the same partition, used to observe a replica's committed
    /// LSNs without reading the payload. Charges and diagnostics start empty and are folded
    /// back with [`LogicalRequest::absorb_barrier`].
    pub(crate) fn barrier_from(parent: &LogicalRequest) -> Self {
        LogicalRequest {
            operation: OperationType::Head,
            resource_type: parent.resource_type,
            resource_address: parent.resource_address.clone(),
            collection_rid: parent.collection_rid.clone(),
            consistency_override: parent.consistency_override,
            replica_index: None,
            session_token: None,
            allow_archival_partition_failover: parent.allow_archival_partition_failover,
            body: Bytes::new(),
            routing: RoutingContext {
                target_identity: parent.routing.target_identity.clone(),
                resolved_partition_key_range: parent.routing.resolved_partition_key_range.clone(),
                force_refresh: parent.routing.force_refresh,
                local_refresh_on_gone: parent.routing.local_refresh_on_gone,
                performed_background_refresh: parent.routing.performed_background_refresh,
                failed_endpoints: parent.routing.failed_endpoints.clone(),
                is_in_retry: parent.routing.is_in_retry,
                ..RoutingContext::default()
            },
        }
    }

    pub(crate) fn absorb_barrier(&mut self, barrier: LogicalRequest) {
        let routing = barrier.routing;
        self.routing.charges.add(routing.charges.total());
        self.routing.performed_background_refresh |= routing.performed_background_refresh;
        self.routing.failed_endpoints.extend(routing.failed_endpoints);
        if let Some(statistics) = routing.statistics {
            self.routing.statistics_mut().merge(statistics);
        }
    }
}

/// Mutable per-operation routing state. Owned by the single logical operation and mutated by
/// whichever component is currently executing it.
#[derive(Clone, Debug)]
pub struct RoutingContext {
    pub target_identity: Option<String>,
    pub resolved_partition_key_range: Option<String>,

    pub force_refresh: bool,
    pub force_name_cache_refresh: bool,
    pub force_collection_routing_map_refresh: bool,
    pub force_master_refresh: bool,
    pub force_partition_key_range_refresh: bool,

    pub is_in_retry: bool,
    pub client_retry_count: u32,
    pub region_reroute_attempt_count: u32,
    pub remaining_time: Option<Duration>,
    pub timeout_in_backoff: Option<Duration>,

    /// Set on strong/bounded-staleness reads so a Gone sighting forces a synchronous refresh.
    pub local_refresh_on_gone: bool,
    pub performed_background_refresh: bool,
    pub failed_endpoints: HashSet<String>,

    /// The session token a fan-out response has to satisfy. Only set while reading with a
    /// minimum-LSN check.
    pub request_session_token: Option<SessionToken>,

    pub quorum_selected_lsn: Lsn,
    pub global_committed_selected_lsn: Lsn,
    pub quorum_selected_response: Option<ReplicaResponse>,
    pub write_barrier: Option<WriteBarrierState>,

    pub charges: RequestChargeTracker,
    pub statistics: Option<ClientRequestStatistics>,
}

impl RoutingContext {
    pub fn statistics_mut(&mut self) -> &mut ClientRequestStatistics {
        self.statistics.get_or_insert_with(ClientRequestStatistics::new)
    }

    /// Forget which replica set the request was bound to, along with anything learned from it.
    pub(crate) fn clear_target(&mut self) {
        self.target_identity = None;
        self.resolved_partition_key_range = None;
        self.quorum_selected_lsn = Lsn::UNKNOWN;
        self.quorum_selected_response = None;
    }
}

impl Default for RoutingContext {
    fn default() -> Self {
        RoutingContext {
            target_identity: None,
            resolved_partition_key_range: None,
            force_refresh: false,
            force_name_cache_refresh: false,
            force_collection_routing_map_refresh: false,
            force_master_refresh: false,
            force_partition_key_range_refresh: false,
            is_in_retry: false,
            client_retry_count: 0,
            region_reroute_attempt_count: 0,
            remaining_time: None,
            timeout_in_backoff: None,
            local_refresh_on_gone: false,
            performed_background_refresh: false,
            failed_endpoints: HashSet::new(),
            request_session_token: None,
            quorum_selected_lsn: Lsn::UNKNOWN,
            global_committed_selected_lsn: Lsn::UNKNOWN,
            quorum_selected_response: None,
            write_barrier: None,
            charges: RequestChargeTracker::default(),
            statistics: None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WriteBarrierKind {
    None,
    GlobalStrongWrite,
    NRegionSynchronousCommit,
}

/// A write that succeeded on the primary but still waits for its LSN to become visible across
/// regions. Survives across attempts so a retry only polls the barrier instead of rewriting.
#[derive(Clone, Debug)]
pub struct WriteBarrierState {
    pub kind: WriteBarrierKind,
    pub selected_lsn: Lsn,
    pub tracked_global_lsn: Lsn,
    pub pending_write: ReplicaResponse,
}
