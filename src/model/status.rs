use std::fmt;

#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const CREATED: StatusCode = StatusCode(201);
    pub const NO_CONTENT: StatusCode = StatusCode(204);
    pub const NOT_MODIFIED: StatusCode = StatusCode(304);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const REQUEST_TIMEOUT: StatusCode = StatusCode(408);
    pub const CONFLICT: StatusCode = StatusCode(409);
    pub const GONE: StatusCode = StatusCode(410);
    pub const PRECONDITION_FAILED: StatusCode = StatusCode(412);
    pub const TOO_MANY_REQUESTS: StatusCode = StatusCode(429);
    pub const RETRY_WITH: StatusCode = StatusCode(449);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(503);

    /// Everything at or above this is an error status.
    const STARTING_ERROR_CODE: u16 = 400;

    pub const fn new(code: u16) -> Self {
        StatusCode(code)
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }

    pub fn is_success(&self) -> bool {
        self.0 < Self::STARTING_ERROR_CODE
    }
}

impl fmt::Debug for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Refines a status code. The same numeric value means different things under different
/// statuses (1002 is a gone partition key range under 410, an unavailable session under 404).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct SubStatusCode(u32);

impl SubStatusCode {
    pub const UNKNOWN: SubStatusCode = SubStatusCode(0);

    // 410
    pub const NAME_CACHE_IS_STALE: SubStatusCode = SubStatusCode(1000);
    pub const PARTITION_KEY_RANGE_GONE: SubStatusCode = SubStatusCode(1002);
    pub const COMPLETING_SPLIT: SubStatusCode = SubStatusCode(1007);
    pub const COMPLETING_PARTITION_MIGRATION: SubStatusCode = SubStatusCode(1008);
    pub const LEASE_NOT_FOUND: SubStatusCode = SubStatusCode(1022);
    pub const ARCHIVAL_PARTITION_NOT_PRESENT: SubStatusCode = SubStatusCode(1024);

    // 404
    pub const READ_SESSION_NOT_AVAILABLE: SubStatusCode = SubStatusCode(1002);

    // Generated by this client rather than by a replica.
    pub const TRANSPORT_GENERATED_410: SubStatusCode = SubStatusCode(20001);
    pub const TIMEOUT_GENERATED_410: SubStatusCode = SubStatusCode(20002);
    pub const CLIENT_UNAVAILABLE: SubStatusCode = SubStatusCode(20003);
    pub const CLIENT_CPU_OVERLOAD: SubStatusCode = SubStatusCode(20004);
    pub const READ_QUORUM_NOT_MET: SubStatusCode = SubStatusCode(21007);
    pub const NO_VALID_STORE_RESPONSE: SubStatusCode = SubStatusCode(21009);
    pub const GLOBAL_STRONG_WRITE_BARRIER_NOT_MET: SubStatusCode = SubStatusCode(21011);
    pub const N_REGION_COMMIT_WRITE_BARRIER_NOT_MET: SubStatusCode = SubStatusCode(21012);

    pub const fn new(code: u32) -> Self {
        SubStatusCode(code)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for SubStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
