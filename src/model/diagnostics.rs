use crate::model::{Lsn, StatusCode, SubStatusCode};
use crate::routing::ReplicaAddress;
use chrono::{DateTime, Utc};

/// Running request charge of one logical operation, summed over every replica contacted.
#[derive(Clone, Debug, Default)]
pub struct RequestChargeTracker {
    total: f64,
}

impl RequestChargeTracker {
    pub fn add(&mut self, charge: f64) {
        self.total += charge;
    }

    pub fn total(&self) -> f64 {
        self.total
    }
}

#[derive(Clone, Debug)]
pub struct StoreResponseRecord {
    pub replica: String,
    pub status: StatusCode,
    pub sub_status: SubStatusCode,
    pub lsn: Lsn,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Diagnostics collected across all attempts of one logical operation. The failed-replica set
/// also feeds the connectivity heuristic of the gone retry policy.
#[derive(Clone, Debug)]
pub struct ClientRequestStatistics {
    request_started_at: DateTime<Utc>,
    contacted_replicas: Vec<String>,
    failed_replicas: Vec<String>,
    responses: Vec<StoreResponseRecord>,
    cpu_overloaded: bool,
}

impl ClientRequestStatistics {
    pub fn new() -> Self {
        ClientRequestStatistics {
            request_started_at: Utc::now(),
            contacted_replicas: Vec::new(),
            failed_replicas: Vec::new(),
            responses: Vec::new(),
            cpu_overloaded: false,
        }
    }

    pub(crate) fn record_contacted(&mut self, replica: &ReplicaAddress) {
        if !self.contacted_replicas.iter().any(|uri| uri == &replica.uri) {
            self.contacted_replicas.push(replica.uri.clone());
        }
    }

    pub(crate) fn record_failed(&mut self, replica: &ReplicaAddress) {
        if !self.failed_replicas.iter().any(|uri| uri == &replica.uri) {
            self.failed_replicas.push(replica.uri.clone());
        }
    }

    pub(crate) fn record_response(&mut self, record: StoreResponseRecord) {
        self.responses.push(record);
    }

    pub(crate) fn record_cpu_overload(&mut self) {
        self.cpu_overloaded = true;
    }

    /// Folds the diagnostics of a derived request (e.g. a barrier request) into this one.
    pub(crate) fn merge(&mut self, other: ClientRequestStatistics) {
        for uri in other.contacted_replicas {
            if !self.contacted_replicas.contains(&uri) {
                self.contacted_replicas.push(uri);
            }
        }
        for uri in other.failed_replicas {
            if !self.failed_replicas.contains(&uri) {
                self.failed_replicas.push(uri);
            }
        }
        self.responses.extend(other.responses);
        self.cpu_overloaded |= other.cpu_overloaded;
    }

    pub fn request_started_at(&self) -> DateTime<Utc> {
        self.request_started_at
    }

    pub fn contacted_replicas(&self) -> &[String] {
        &self.contacted_replicas
    }

    pub fn failed_replicas(&self) -> &[String] {
        &self.failed_replicas
    }

    pub fn responses(&self) -> &[StoreResponseRecord] {
        &self.responses
    }

    pub fn is_cpu_overloaded(&self) -> bool {
        self.cpu_overloaded
    }
}

impl Default for ClientRequestStatistics {
    fn default() -> Self {
        ClientRequestStatistics::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replicas_are_recorded_once() {
        let replica = ReplicaAddress::secondary("rntbd://replica-1");
        let mut statistics = ClientRequestStatistics::new();

        statistics.record_failed(&replica);
        statistics.record_failed(&replica);
        statistics.record_contacted(&replica);

        assert_eq!(statistics.failed_replicas().len(), 1);
        assert_eq!(statistics.contacted_replicas().len(), 1);
    }

    #[test]
    fn merge_keeps_cpu_overload() {
        let mut parent = ClientRequestStatistics::new();
        let mut barrier = ClientRequestStatistics::new();
        barrier.record_cpu_overload();
        barrier.record_failed(&ReplicaAddress::primary("rntbd://replica-1"));

        parent.merge(barrier);

        assert!(parent.is_cpu_overloaded());
        assert_eq!(parent.failed_replicas(), &["rntbd://replica-1".to_string()]);
    }
}
