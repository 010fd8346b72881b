//! Correlator: outstanding request ids mapped to suspended continuations
//!
//! `register` runs on the thread issuing the call; `resolve` runs on the
//! thread performing the message poll. The worker never touches this map -
//! it only writes messages to its channel. Entries for cancelled requests
//! are simply gone, so a late message resolves to nothing and is dropped
//! silently.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::oneshot;

use motiv_protocol::{BridgeError, ResponsePayload};

/// Terminal outcome of one request-bearing command
pub type CommandResult = Result<ResponsePayload, BridgeError>;

/// Pending-continuation table plus the request id allocator
///
/// Ids are monotonic and never reused, so uniqueness among outstanding
/// requests holds trivially.
pub struct Correlator {
    pending: DashMap<u64, oneshot::Sender<CommandResult>>,
    next_id: AtomicU64,
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            // 0 is reserved for fire-and-forget
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a request id and park a continuation under it
    pub fn register(&self) -> (u64, oneshot::Receiver<CommandResult>) {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        self.pending.insert(request_id, sender);
        (request_id, receiver)
    }

    /// Resume the continuation registered under `request_id`
    ///
    /// Returns false when no continuation is waiting (cancelled or already
    /// resolved); the caller drops the result silently in that case.
    pub fn resolve(&self, request_id: u64, result: CommandResult) -> bool {
        match self.pending.remove(&request_id) {
            // A dropped receiver means the caller cancelled between the
            // map lookup and the send; that still counts as resolved.
            Some((_, sender)) => {
                let _ = sender.send(result);
                true
            }
            None => false,
        }
    }

    /// Forget the continuation registered under `request_id`
    pub fn cancel(&self, request_id: u64) {
        self.pending.remove(&request_id);
    }

    /// Resume every outstanding continuation with the given error
    /// (session teardown)
    pub fn fail_all(&self, error: &BridgeError) {
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for request_id in ids {
            if let Some((_, sender)) = self.pending.remove(&request_id) {
                let _ = sender.send(Err(error.clone()));
            }
        }
    }

    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motiv_protocol::ErrorKind;

    #[test]
    fn resolve_reaches_the_registered_continuation() {
        let correlator = Correlator::new();
        let (id, mut rx) = correlator.register();
        assert!(correlator.resolve(id, Ok(ResponsePayload::Ack)));
        match rx.try_recv() {
            Ok(Ok(ResponsePayload::Ack)) => {}
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(correlator.outstanding(), 0);
    }

    #[test]
    fn late_resolution_after_cancel_is_dropped() {
        let correlator = Correlator::new();
        let (id, rx) = correlator.register();
        drop(rx);
        correlator.cancel(id);
        assert!(!correlator.resolve(id, Ok(ResponsePayload::Ack)));
    }

    #[test]
    fn fail_all_resumes_everything_with_the_error() {
        let correlator = Correlator::new();
        let (_, mut first) = correlator.register();
        let (_, mut second) = correlator.register();
        correlator.fail_all(&BridgeError::lifecycle("torn down"));

        for rx in [&mut first, &mut second] {
            match rx.try_recv() {
                Ok(Err(err)) => assert_eq!(err.kind(), ErrorKind::Lifecycle),
                other => panic!("unexpected: {other:?}"),
            }
        }
    }

    #[test]
    fn ids_are_unique_and_nonzero() {
        let correlator = Correlator::new();
        let (a, _rx_a) = correlator.register();
        let (b, _rx_b) = correlator.register();
        assert_ne!(a, 0);
        assert_ne!(a, b);
    }
}
