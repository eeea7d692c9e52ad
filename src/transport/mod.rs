mod response;
mod send_progress;

pub use response::ResponseHeaders;
pub use response::StoreResponse;
pub use send_progress::SendProgress;
pub use send_progress::SendProgressSnapshot;

use crate::model::LogicalRequest;
use crate::routing::ReplicaAddress;

/// Sends one logical request to one replica. Service-level failures come back as a
/// `StoreResponse` with an error status; only failures to talk to the replica at all are a
/// `TransportError`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, replica: &ReplicaAddress, request: &LogicalRequest) -> Result<StoreResponse, TransportError>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    ConnectionFailed,
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("transport {kind:?} talking to {replica} (payload sent: {payload_sent})")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub replica: String,
    /// False guarantees the replica never saw the request.
    pub payload_sent: bool,
    pub cpu_overloaded: bool,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, replica: impl Into<String>) -> Self {
        TransportError {
            kind,
            replica: replica.into(),
            payload_sent: false,
            cpu_overloaded: false,
        }
    }

    /// Builds the error from what the send loop observed before it failed.
    pub fn from_progress(replica: impl Into<String>, progress: SendProgressSnapshot, cpu_overloaded: bool) -> Self {
        TransportError {
            kind: progress.failure.unwrap_or(TransportErrorKind::ConnectionFailed),
            replica: replica.into(),
            payload_sent: progress.payload_sent,
            cpu_overloaded,
        }
    }
}
