use crate::error::StoreError;
use crate::model::{LogicalRequest, OperationType};
use crate::routing::{AddressResolver, PartitionAddresses, ReplicaAddress};
use crate::transport::{SendProgress, StoreResponse, Transport, TransportError, TransportErrorKind};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Clone, Debug)]
pub enum ScriptedReply {
    Respond(StoreResponse),
    Fail {
        kind: TransportErrorKind,
        payload_sent: bool,
        cpu_overloaded: bool,
    },
}

impl ScriptedReply {
    pub fn connection_failure() -> Self {
        ScriptedReply::Fail {
            kind: TransportErrorKind::ConnectionFailed,
            payload_sent: false,
            cpu_overloaded: false,
        }
    }
}

impl From<StoreResponse> for ScriptedReply {
    fn from(response: StoreResponse) -> Self {
        ScriptedReply::Respond(response)
    }
}

struct SimulatedReplica {
    address: ReplicaAddress,
    queued: VecDeque<ScriptedReply>,
    per_operation: HashMap<OperationType, ScriptedReply>,
    default_reply: ScriptedReply,
}

impl SimulatedReplica {
    fn next_reply(&mut self, operation: OperationType) -> ScriptedReply {
        if let Some(reply) = self.queued.pop_front() {
            return reply;
        }
        self.per_operation
            .get(&operation)
            .unwrap_or(&self.default_reply)
            .clone()
    }
}

struct SimulationState {
    collection_rid: String,
    resolved_collection_rid: Option<String>,
    replicas: Vec<SimulatedReplica>,
    stale_view: Option<Vec<String>>,
    sends: Vec<(String, OperationType)>,
    resolutions: usize,
    forced_resolutions: usize,
    background_refreshes: usize,
}

/// A scripted replica set that acts as both the transport and the address cache. Each replica
/// answers from its queue of one-shot replies first, then from a per-operation reply, then from
/// its default reply.
pub struct SimulatedReplicaSet {
    logger: slog::Logger,
    state: Mutex<SimulationState>,
}

impl SimulatedReplicaSet {
    pub fn new(logger: slog::Logger, collection_rid: impl Into<String>) -> Self {
        SimulatedReplicaSet {
            logger,
            state: Mutex::new(SimulationState {
                collection_rid: collection_rid.into(),
                resolved_collection_rid: None,
                replicas: Vec::new(),
                stale_view: None,
                sends: Vec::new(),
                resolutions: 0,
                forced_resolutions: 0,
                background_refreshes: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimulationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_replica<R>(&self, uri: &str, f: impl FnOnce(&mut SimulatedReplica) -> R) -> Option<R> {
        let mut state = self.state();
        state
            .replicas
            .iter_mut()
            .find(|replica| replica.address.uri == uri)
            .map(f)
    }

    pub fn add_replica(&self, address: ReplicaAddress, default_reply: impl Into<ScriptedReply>) {
        self.state().replicas.push(SimulatedReplica {
            address,
            queued: VecDeque::new(),
            per_operation: HashMap::new(),
            default_reply: default_reply.into(),
        });
    }

    pub fn set_default_reply(&self, uri: &str, reply: impl Into<ScriptedReply>) {
        let reply = reply.into();
        self.with_replica(uri, |replica| replica.default_reply = reply);
    }

    pub fn set_reply_for(&self, uri: &str, operation: OperationType, reply: impl Into<ScriptedReply>) {
        let reply = reply.into();
        self.with_replica(uri, |replica| {
            replica.per_operation.insert(operation, reply);
        });
    }

    pub fn push_reply(&self, uri: &str, reply: impl Into<ScriptedReply>) {
        let reply = reply.into();
        self.with_replica(uri, |replica| replica.queued.push_back(reply));
    }

    /// Until the next forced resolution, the address cache only knows these replicas.
    pub fn set_stale_view(&self, uris: &[&str]) {
        self.state().stale_view = Some(uris.iter().map(|uri| uri.to_string()).collect());
    }

    /// Makes resolution report a different collection than the one requested.
    pub fn set_resolved_collection_rid(&self, collection_rid: impl Into<String>) {
        self.state().resolved_collection_rid = Some(collection_rid.into());
    }

    pub fn sends_to(&self, uri: &str) -> usize {
        self.state().sends.iter().filter(|(sent_to, _)| sent_to == uri).count()
    }

    pub fn sends_of(&self, operation: OperationType) -> usize {
        self.state().sends.iter().filter(|(_, sent)| *sent == operation).count()
    }

    pub fn total_sends(&self) -> usize {
        self.state().sends.len()
    }

    pub fn send_log(&self) -> Vec<(String, OperationType)> {
        self.state().sends.clone()
    }

    pub fn resolution_count(&self) -> usize {
        self.state().resolutions
    }

    pub fn forced_resolution_count(&self) -> usize {
        self.state().forced_resolutions
    }

    pub fn background_refresh_count(&self) -> usize {
        self.state().background_refreshes
    }
}

#[async_trait::async_trait]
impl Transport for SimulatedReplicaSet {
    async fn send(&self, replica: &ReplicaAddress, request: &LogicalRequest) -> Result<StoreResponse, TransportError> {
        let reply = {
            let mut state = self.state();
            state.sends.push((replica.uri.clone(), request.operation));
            state
                .replicas
                .iter_mut()
                .find(|candidate| candidate.address.uri == replica.uri)
                .map(|candidate| candidate.next_reply(request.operation))
        };

        let progress = SendProgress::new();
        match reply {
            Some(ScriptedReply::Respond(response)) => {
                progress.mark_payload_sent();
                Ok(response)
            }
            Some(ScriptedReply::Fail {
                kind,
                payload_sent,
                cpu_overloaded,
            }) => {
                if payload_sent {
                    progress.mark_payload_sent();
                }
                progress.record_failure(kind);
                slog::debug!(self.logger, "Simulated {:?} sending to {}.", kind, replica.uri);
                Err(TransportError::from_progress(
                    replica.uri.clone(),
                    progress.snapshot(),
                    cpu_overloaded,
                ))
            }
            None => {
                progress.record_failure(TransportErrorKind::ConnectionFailed);
                Err(TransportError::from_progress(replica.uri.clone(), progress.snapshot(), false))
            }
        }
    }
}

#[async_trait::async_trait]
impl AddressResolver for SimulatedReplicaSet {
    async fn resolve_addresses(
        &self,
        _request: &LogicalRequest,
        force_refresh: bool,
    ) -> Result<PartitionAddresses, StoreError> {
        let mut state = self.state();
        state.resolutions += 1;
        if force_refresh {
            state.forced_resolutions += 1;
            state.stale_view = None;
        }

        let replicas = state
            .replicas
            .iter()
            .filter(|replica| match &state.stale_view {
                Some(visible) => visible.contains(&replica.address.uri),
                None => true,
            })
            .map(|replica| replica.address.clone())
            .collect();

        Ok(PartitionAddresses {
            replicas,
            collection_rid: state
                .resolved_collection_rid
                .clone()
                .unwrap_or_else(|| state.collection_rid.clone()),
        })
    }

    fn start_background_refresh(&self, _request: &LogicalRequest) {
        let mut state = self.state();
        state.background_refreshes += 1;
        state.stale_view = None;
    }
}
