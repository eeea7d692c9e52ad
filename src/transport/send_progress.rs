use crate::transport::TransportErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};

const PAYLOAD_SENT: u64 = 0b1;
const FAILURE_SHIFT: u32 = 1;
const FAILURE_NONE: u64 = 0;
const FAILURE_TIMEOUT: u64 = 1;
const FAILURE_CONNECTION: u64 = 2;

/// Progress of a single send, shared between the task writing the request and whoever times it
/// out. The failure code and payload-sent flag live in one word so a reader always sees a
/// consistent pair.
#[derive(Debug, Default)]
pub struct SendProgress {
    state: AtomicU64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SendProgressSnapshot {
    pub failure: Option<TransportErrorKind>,
    pub payload_sent: bool,
}

impl SendProgress {
    pub fn new() -> Self {
        SendProgress::default()
    }

    pub fn mark_payload_sent(&self) {
        self.state.fetch_or(PAYLOAD_SENT, Ordering::AcqRel);
    }

    /// Records the failure unless one was already recorded. Returns true if this call won.
    pub fn record_failure(&self, kind: TransportErrorKind) -> bool {
        let code = match kind {
            TransportErrorKind::Timeout => FAILURE_TIMEOUT,
            TransportErrorKind::ConnectionFailed => FAILURE_CONNECTION,
        };

        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current >> FAILURE_SHIFT != FAILURE_NONE {
                    None
                } else {
                    Some((code << FAILURE_SHIFT) | (current & PAYLOAD_SENT))
                }
            })
            .is_ok()
    }

    pub fn snapshot(&self) -> SendProgressSnapshot {
        let state = self.state.load(Ordering::Acquire);
        let failure = match state >> FAILURE_SHIFT {
            FAILURE_TIMEOUT => Some(TransportErrorKind::Timeout),
            FAILURE_CONNECTION => Some(TransportErrorKind::ConnectionFailed),
            _ => None,
        };

        SendProgressSnapshot {
            failure,
            payload_sent: state & PAYLOAD_SENT != 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn first_failure_wins() {
        let progress = SendProgress::new();
        progress.mark_payload_sent();

        assert!(progress.record_failure(TransportErrorKind::Timeout));
        assert!(!progress.record_failure(TransportErrorKind::ConnectionFailed));

        assert_eq!(
            progress.snapshot(),
            SendProgressSnapshot {
                failure: Some(TransportErrorKind::Timeout),
                payload_sent: true,
            }
        );
    }

    #[test]
    fn payload_flag_survives_failure_update() {
        let progress = SendProgress::new();
        progress.record_failure(TransportErrorKind::ConnectionFailed);
        progress.mark_payload_sent();

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.failure, Some(TransportErrorKind::ConnectionFailed));
        assert!(snapshot.payload_sent);
    }

    #[tokio::test]
    async fn concurrent_failures_record_exactly_one() {
        let progress = Arc::new(SendProgress::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let progress = progress.clone();
            handles.push(tokio::spawn(async move {
                let kind = if i % 2 == 0 {
                    TransportErrorKind::Timeout
                } else {
                    TransportErrorKind::ConnectionFailed
                };
                progress.record_failure(kind)
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert!(progress.snapshot().failure.is_some());
    }
}
