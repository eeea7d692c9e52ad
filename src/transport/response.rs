use crate::model::{Lsn, StatusCode, SubStatusCode};
use crate::session::SessionToken;
use bytes::Bytes;

/// LSN bookkeeping and request metadata a replica returns alongside every response, including
/// error responses.
#[derive(Clone, Debug, Default)]
pub struct ResponseHeaders {
    pub lsn: Option<Lsn>,
    pub local_lsn: Option<Lsn>,
    pub quorum_acked_lsn: Option<Lsn>,
    pub quorum_acked_local_lsn: Option<Lsn>,
    pub global_committed_lsn: Option<Lsn>,
    pub global_n_region_committed_lsn: Option<Lsn>,
    pub item_lsn: Option<Lsn>,
    pub item_local_lsn: Option<Lsn>,
    pub number_of_read_regions: Option<u32>,
    pub current_replica_set_size: Option<u32>,
    pub current_write_quorum: Option<u32>,
    pub request_charge: f64,
    pub session_token: Option<SessionToken>,
    pub activity_id: Option<String>,
    pub write_request_triggers_address_refresh: bool,
    pub request_validation_failure: bool,
}

#[derive(Clone, Debug)]
pub struct StoreResponse {
    pub status: StatusCode,
    pub sub_status: SubStatusCode,
    pub headers: ResponseHeaders,
    pub body: Bytes,
}

impl StoreResponse {
    pub fn new(status: StatusCode) -> Self {
        StoreResponse {
            status,
            sub_status: SubStatusCode::UNKNOWN,
            headers: ResponseHeaders::default(),
            body: Bytes::new(),
        }
    }

    pub fn ok() -> Self {
        StoreResponse::new(StatusCode::OK)
    }

    pub fn with_sub_status(mut self, sub_status: SubStatusCode) -> Self {
        self.sub_status = sub_status;
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Sets `lsn` and `quorum_acked_lsn` to the same value, the common state of a caught-up replica.
    pub fn with_lsn(mut self, lsn: i64) -> Self {
        self.headers.lsn = Some(Lsn::new(lsn));
        self.headers.quorum_acked_lsn = Some(Lsn::new(lsn));
        self
    }

    pub fn with_quorum_acked_lsn(mut self, lsn: i64) -> Self {
        self.headers.quorum_acked_lsn = Some(Lsn::new(lsn));
        self
    }

    pub fn with_global_committed_lsn(mut self, lsn: i64) -> Self {
        self.headers.global_committed_lsn = Some(Lsn::new(lsn));
        self
    }

    pub fn with_global_n_region_committed_lsn(mut self, lsn: i64) -> Self {
        self.headers.global_n_region_committed_lsn = Some(Lsn::new(lsn));
        self
    }

    pub fn with_item_lsn(mut self, lsn: i64) -> Self {
        self.headers.item_lsn = Some(Lsn::new(lsn));
        self
    }

    pub fn with_read_regions(mut self, regions: u32) -> Self {
        self.headers.number_of_read_regions = Some(regions);
        self
    }

    pub fn with_replica_set_size(mut self, size: u32) -> Self {
        self.headers.current_replica_set_size = Some(size);
        self
    }

    pub fn with_session_token(mut self, token: SessionToken) -> Self {
        self.headers.session_token = Some(token);
        self
    }

    pub fn with_request_charge(mut self, charge: f64) -> Self {
        self.headers.request_charge = charge;
        self
    }
}
