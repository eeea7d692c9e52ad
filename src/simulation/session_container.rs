use crate::model::LogicalRequest;
use crate::session::{SessionContainer, SessionToken};
use crate::transport::StoreResponse;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Tracks one session token per collection.
#[derive(Default)]
pub struct InMemorySessionContainer {
    tokens: Mutex<HashMap<String, SessionToken>>,
    cleared: Mutex<Vec<String>>,
}

impl InMemorySessionContainer {
    pub fn new() -> Self {
        InMemorySessionContainer::default()
    }

    fn tokens(&self) -> MutexGuard<'_, HashMap<String, SessionToken>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn token_for(&self, collection_rid: &str) -> Option<SessionToken> {
        self.tokens().get(collection_rid).cloned()
    }

    pub fn set_token(&self, collection_rid: impl Into<String>, token: SessionToken) {
        self.tokens().insert(collection_rid.into(), token);
    }

    /// Collections whose token was dropped, in order.
    pub fn cleared_collections(&self) -> Vec<String> {
        self.cleared.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl SessionContainer for InMemorySessionContainer {
    fn set_request_session_token(&self, request: &mut LogicalRequest) {
        if request.session_token.is_none() {
            request.session_token = self.token_for(&request.collection_rid);
        }
    }

    fn clear_token(&self, collection_rid: &str) {
        self.tokens().remove(collection_rid);
        self.cleared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(collection_rid.to_string());
    }

    fn validate_and_strip(&self, request: &mut LogicalRequest) {
        request.session_token = None;
    }

    fn capture_session_token(&self, request: &LogicalRequest, response: &StoreResponse) {
        let observed = match &response.headers.session_token {
            Some(token) => token,
            None => return,
        };

        let mut tokens = self.tokens();
        let merged = match tokens.get(&request.collection_rid) {
            Some(current) => current.merge(observed),
            None => observed.clone(),
        };
        tokens.insert(request.collection_rid.clone(), merged);
    }
}
