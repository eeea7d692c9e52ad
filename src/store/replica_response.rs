use crate::error::StoreError;
use crate::model::{Lsn, OperationType, RequestChargeTracker, StatusCode, SubStatusCode};
use crate::routing::ReplicaAddress;
use crate::session::SessionToken;
use crate::transport::{ResponseHeaders, StoreResponse, TransportError};

/// One replica's answer to a fan-out, successful or not, with its LSN headers pulled out.
/// Immutable once built.
#[derive(Clone, Debug)]
pub struct ReplicaResponse {
    replica: ReplicaAddress,
    outcome: Result<StoreResponse, StoreError>,
    status: StatusCode,
    sub_status: SubStatusCode,
    lsn: Lsn,
    quorum_acked_lsn: Lsn,
    global_committed_lsn: Lsn,
    global_n_region_committed_lsn: Lsn,
    item_lsn: Lsn,
    number_of_read_regions: u32,
    current_replica_set_size: Option<u32>,
    current_write_quorum: Option<u32>,
    request_charge: f64,
    session_token: Option<SessionToken>,
    transport_failure: bool,
    cpu_overloaded: bool,
    is_valid: bool,
}

impl ReplicaResponse {
    /// `use_local_lsn` prefers the replica's local LSN headers over the global ones.
    pub(crate) fn from_send(
        replica: ReplicaAddress,
        sent: Result<StoreResponse, TransportError>,
        operation: OperationType,
        requires_valid_lsn: bool,
        use_local_lsn: bool,
    ) -> Self {
        let mut transport_failure = false;
        let mut cpu_overloaded = false;
        let outcome = match sent {
            Ok(response) if response.status.is_success() => Ok(response),
            Ok(response) => Err(StoreError::from_response(&replica.uri, response)),
            Err(error) => {
                transport_failure = true;
                cpu_overloaded = error.cpu_overloaded;
                Err(StoreError::from_transport(&error, operation))
            }
        };

        ReplicaResponse::from_outcome(replica, outcome, requires_valid_lsn, use_local_lsn, transport_failure, cpu_overloaded)
    }

    fn from_outcome(
        replica: ReplicaAddress,
        outcome: Result<StoreResponse, StoreError>,
        requires_valid_lsn: bool,
        use_local_lsn: bool,
        transport_failure: bool,
        cpu_overloaded: bool,
    ) -> Self {
        let (status, sub_status, headers) = match &outcome {
            Ok(response) => (response.status, response.sub_status, &response.headers),
            Err(error) => (error.status(), error.sub_status(), error.headers()),
        };

        let pick = |local: Option<Lsn>, global: Option<Lsn>| {
            let chosen = if use_local_lsn { local.or(global) } else { global };
            chosen.unwrap_or(Lsn::UNKNOWN)
        };
        let lsn = pick(headers.local_lsn, headers.lsn);
        let quorum_acked_lsn = pick(headers.quorum_acked_local_lsn, headers.quorum_acked_lsn);
        let item_lsn = pick(headers.item_local_lsn, headers.item_lsn);

        let is_valid = match &outcome {
            Ok(_) => true,
            Err(_) => {
                let topology_gone = status == StatusCode::GONE && sub_status != SubStatusCode::NAME_CACHE_IS_STALE;
                !requires_valid_lsn || (!topology_gone && lsn.is_known())
            }
        };

        let global_committed_lsn = headers.global_committed_lsn.unwrap_or(Lsn::UNKNOWN);
        let global_n_region_committed_lsn = headers.global_n_region_committed_lsn.unwrap_or(Lsn::UNKNOWN);
        let number_of_read_regions = headers.number_of_read_regions.unwrap_or(0);
        let current_replica_set_size = headers.current_replica_set_size;
        let current_write_quorum = headers.current_write_quorum;
        let request_charge = headers.request_charge;
        let session_token = headers.session_token.clone();

        ReplicaResponse {
            replica,
            outcome,
            status,
            sub_status,
            lsn,
            quorum_acked_lsn,
            global_committed_lsn,
            global_n_region_committed_lsn,
            item_lsn,
            number_of_read_regions,
            current_replica_set_size,
            current_write_quorum,
            request_charge,
            session_token,
            transport_failure,
            cpu_overloaded,
            is_valid,
        }
    }

    pub fn replica(&self) -> &ReplicaAddress {
        &self.replica
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn sub_status(&self) -> SubStatusCode {
        self.sub_status
    }

    pub fn lsn(&self) -> Lsn {
        self.lsn
    }

    pub fn quorum_acked_lsn(&self) -> Lsn {
        self.quorum_acked_lsn
    }

    pub fn global_committed_lsn(&self) -> Lsn {
        self.global_committed_lsn
    }

    pub fn global_n_region_committed_lsn(&self) -> Lsn {
        self.global_n_region_committed_lsn
    }

    pub fn item_lsn(&self) -> Lsn {
        self.item_lsn
    }

    pub fn number_of_read_regions(&self) -> u32 {
        self.number_of_read_regions
    }

    pub fn current_replica_set_size(&self) -> Option<u32> {
        self.current_replica_set_size
    }

    pub fn current_write_quorum(&self) -> Option<u32> {
        self.current_write_quorum
    }

    pub fn request_charge(&self) -> f64 {
        self.request_charge
    }

    pub fn session_token(&self) -> Option<&SessionToken> {
        self.session_token.as_ref()
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn is_transport_failure(&self) -> bool {
        self.transport_failure
    }

    pub fn is_client_cpu_overloaded(&self) -> bool {
        self.cpu_overloaded
    }

    pub fn error(&self) -> Option<&StoreError> {
        self.outcome.as_ref().err()
    }

    pub(crate) fn headers(&self) -> &ResponseHeaders {
        match &self.outcome {
            Ok(response) => &response.headers,
            Err(error) => error.headers(),
        }
    }

    /// A topology-gone answer, excluding a stale name cache which is its own signal.
    pub(crate) fn is_topology_gone(&self) -> bool {
        self.status == StatusCode::GONE && self.sub_status != SubStatusCode::NAME_CACHE_IS_STALE
    }

    /// Surface this answer to the caller, stamped with the operation's total charge.
    pub(crate) fn into_response(self, charges: &RequestChargeTracker) -> Result<StoreResponse, StoreError> {
        if !self.is_valid {
            return Err(self.into_error());
        }

        match self.outcome {
            Ok(mut response) => {
                response.headers.request_charge = charges.total();
                Ok(response)
            }
            Err(mut error) => {
                error.headers_mut().request_charge = charges.total();
                Err(error)
            }
        }
    }

    pub(crate) fn into_error(self) -> StoreError {
        match self.outcome {
            Err(error) => error,
            Ok(response) => StoreError::internal(format!(
                "replica {} answered {:?}, which is not a failure",
                self.replica.uri, response.status
            )),
        }
    }
}
