use crate::model::{OperationType, StatusCode, SubStatusCode, WriteBarrierKind};
use crate::transport::{ResponseHeaders, StoreResponse, TransportError};

/// Closed set of failure kinds the retry policies match on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Replica or address is no longer valid; refresh routing and retry.
    Gone,
    PartitionMigrating,
    /// The name cache is stale.
    InvalidPartition,
    PartitionSplitting,
    PartitionKeyRangeGone,
    LeaseNotFound,
    ArchivalPartitionNotPresent,
    RetryWith,
    BarrierNotMet(WriteBarrierKind),
    SessionNotAvailable,
    DeadlineExceeded,
    RequestTimeout,
    ServiceUnavailable,
    /// Any other status a replica returned, surfaced as-is.
    Response,
    Internal,
}

impl ErrorKind {
    pub fn classify(status: StatusCode, sub_status: SubStatusCode) -> ErrorKind {
        match status {
            StatusCode::GONE => match sub_status {
                SubStatusCode::NAME_CACHE_IS_STALE => ErrorKind::InvalidPartition,
                SubStatusCode::PARTITION_KEY_RANGE_GONE => ErrorKind::PartitionKeyRangeGone,
                SubStatusCode::COMPLETING_SPLIT => ErrorKind::PartitionSplitting,
                SubStatusCode::COMPLETING_PARTITION_MIGRATION => ErrorKind::PartitionMigrating,
                SubStatusCode::LEASE_NOT_FOUND => ErrorKind::LeaseNotFound,
                SubStatusCode::ARCHIVAL_PARTITION_NOT_PRESENT => ErrorKind::ArchivalPartitionNotPresent,
                SubStatusCode::GLOBAL_STRONG_WRITE_BARRIER_NOT_MET => {
                    ErrorKind::BarrierNotMet(WriteBarrierKind::GlobalStrongWrite)
                }
                SubStatusCode::N_REGION_COMMIT_WRITE_BARRIER_NOT_MET => {
                    ErrorKind::BarrierNotMet(WriteBarrierKind::NRegionSynchronousCommit)
                }
                _ => ErrorKind::Gone,
            },
            StatusCode::RETRY_WITH => ErrorKind::RetryWith,
            StatusCode::NOT_FOUND if sub_status == SubStatusCode::READ_SESSION_NOT_AVAILABLE => {
                ErrorKind::SessionNotAvailable
            }
            StatusCode::SERVICE_UNAVAILABLE => ErrorKind::ServiceUnavailable,
            StatusCode::REQUEST_TIMEOUT => ErrorKind::RequestTimeout,
            _ => ErrorKind::Response,
        }
    }
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("{kind:?} ({status:?}/{sub_status:?}): {message}")]
pub struct StoreError {
    kind: ErrorKind,
    status: StatusCode,
    sub_status: SubStatusCode,
    message: String,
    headers: Box<ResponseHeaders>,
    replica: Option<String>,
    #[source]
    cause: Option<Box<StoreError>>,
}

impl StoreError {
    fn new(kind: ErrorKind, status: StatusCode, sub_status: SubStatusCode, message: impl Into<String>) -> Self {
        StoreError {
            kind,
            status,
            sub_status,
            message: message.into(),
            headers: Box::new(ResponseHeaders::default()),
            replica: None,
            cause: None,
        }
    }

    fn classified(status: StatusCode, sub_status: SubStatusCode, message: impl Into<String>) -> Self {
        StoreError::new(ErrorKind::classify(status, sub_status), status, sub_status, message)
    }

    pub fn gone(sub_status: SubStatusCode, message: impl Into<String>) -> Self {
        StoreError::classified(StatusCode::GONE, sub_status, message)
    }

    pub fn read_quorum_not_met() -> Self {
        StoreError::gone(SubStatusCode::READ_QUORUM_NOT_MET, "read quorum not met")
    }

    pub fn no_valid_store_response() -> Self {
        StoreError::gone(SubStatusCode::NO_VALID_STORE_RESPONSE, "no valid response from any replica")
    }

    pub fn barrier_not_met(kind: WriteBarrierKind) -> Self {
        let sub_status = match kind {
            WriteBarrierKind::NRegionSynchronousCommit => SubStatusCode::N_REGION_COMMIT_WRITE_BARRIER_NOT_MET,
            WriteBarrierKind::GlobalStrongWrite | WriteBarrierKind::None => {
                SubStatusCode::GLOBAL_STRONG_WRITE_BARRIER_NOT_MET
            }
        };
        StoreError::new(
            ErrorKind::BarrierNotMet(kind),
            StatusCode::GONE,
            sub_status,
            format!("{:?} write barrier not met", kind),
        )
    }

    pub fn session_not_available(message: impl Into<String>) -> Self {
        StoreError::classified(StatusCode::NOT_FOUND, SubStatusCode::READ_SESSION_NOT_AVAILABLE, message)
    }

    /// The operation's deadline passed on a first attempt. Terminal.
    pub fn deadline_exceeded() -> Self {
        StoreError::new(
            ErrorKind::DeadlineExceeded,
            StatusCode::REQUEST_TIMEOUT,
            SubStatusCode::UNKNOWN,
            "operation deadline exceeded",
        )
    }

    /// The operation's deadline passed mid-retry. Reported as Gone so the retry policy decides.
    pub fn gone_on_deadline() -> Self {
        StoreError::gone(SubStatusCode::TIMEOUT_GENERATED_410, "operation deadline exceeded during retry")
    }

    pub fn service_unavailable(sub_status: SubStatusCode, message: impl Into<String>, cause: Option<StoreError>) -> Self {
        let mut error = StoreError::new(
            ErrorKind::ServiceUnavailable,
            StatusCode::SERVICE_UNAVAILABLE,
            sub_status,
            message,
        );
        error.cause = cause.map(Box::new);
        error
    }

    pub fn internal(message: impl Into<String>) -> Self {
        StoreError::new(
            ErrorKind::Internal,
            StatusCode::INTERNAL_SERVER_ERROR,
            SubStatusCode::UNKNOWN,
            message,
        )
    }

    /// An error status returned by a replica. Keeps its LSN headers for quorum bookkeeping.
    pub fn from_response(replica: &str, response: StoreResponse) -> Self {
        let mut error = StoreError::classified(
            response.status,
            response.sub_status,
            format!("replica returned {:?}/{:?}", response.status, response.sub_status),
        );
        error.headers = Box::new(response.headers);
        error.replica = Some(replica.to_string());
        error
    }

    /// Reads are always safe to retry elsewhere. A write is only safe when the replica never
    /// received the payload.
    pub fn from_transport(error: &TransportError, operation: OperationType) -> Self {
        let mut converted = if operation.is_write() && error.payload_sent {
            StoreError::classified(
                StatusCode::REQUEST_TIMEOUT,
                SubStatusCode::UNKNOWN,
                format!("{}; write outcome unknown", error),
            )
        } else {
            StoreError::gone(SubStatusCode::TRANSPORT_GENERATED_410, error.to_string())
        };
        converted.replica = Some(error.replica.clone());
        converted
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn sub_status(&self) -> SubStatusCode {
        self.sub_status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn headers(&self) -> &ResponseHeaders {
        &self.headers
    }

    pub(crate) fn headers_mut(&mut self) -> &mut ResponseHeaders {
        &mut self.headers
    }

    pub fn replica(&self) -> Option<&str> {
        self.replica.as_deref()
    }

    pub fn cause(&self) -> Option<&StoreError> {
        self.cause.as_deref()
    }
}
