use crate::model::LogicalRequest;
use crate::transport::StoreResponse;

/// Per-client store of session tokens, shared across logical operations.
pub trait SessionContainer: Send + Sync {
    /// Stamp the partition-local session token onto the request. A token the caller supplied
    /// explicitly takes precedence over the tracked one.
    fn set_request_session_token(&self, request: &mut LogicalRequest);

    fn clear_token(&self, collection_rid: &str);

    /// Drop the session token from requests that must not carry one.
    fn validate_and_strip(&self, request: &mut LogicalRequest);

    /// Track the session progress reported by a successful response.
    fn capture_session_token(&self, request: &LogicalRequest, response: &StoreResponse);
}
