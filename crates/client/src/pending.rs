//! Pending: the future half of an async bridge call
//!
//! Enqueueing a request-bearing command returns a `Pending<T>` immediately;
//! the caller's continuation resumes once a matching message is observed
//! during a poll. Nothing completes inside the enqueue itself.
//!
//! Dropping a `Pending` cancels it: the correlator entry is removed and the
//! worker's eventual message is discarded silently. The already-enqueued
//! command still executes - cancellation only abandons the result.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use motiv_protocol::{BridgeError, PropertyValue, ResponsePayload};

use crate::correlator::{CommandResult, Correlator};

/// Projects the completion payload into the operation's result type
pub(crate) type Mapper<T> = fn(ResponsePayload) -> Result<T, BridgeError>;

/// An in-flight bridge operation resolving to `T`
pub struct Pending<T> {
    request_id: u64,
    receiver: oneshot::Receiver<CommandResult>,
    correlator: Arc<Correlator>,
    map: Mapper<T>,
}

impl<T> std::fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pending")
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

impl<T> Pending<T> {
    pub(crate) fn new(
        request_id: u64,
        receiver: oneshot::Receiver<CommandResult>,
        correlator: Arc<Correlator>,
        map: Mapper<T>,
    ) -> Self {
        Self {
            request_id,
            receiver,
            correlator,
            map,
        }
    }

    /// Id correlating this operation with its terminal message
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Abandon the result; equivalent to dropping the future
    pub fn cancel(self) {}
}

impl<T> Future for Pending<T> {
    type Output = Result<T, BridgeError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result.and_then(this.map)),
            // Sender gone without a result: the session was torn down
            // around this request.
            Poll::Ready(Err(_)) => Poll::Ready(Err(BridgeError::lifecycle(
                "session torn down before the command completed",
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for Pending<T> {
    fn drop(&mut self) {
        // No-op after resolution; removes the live entry on cancellation.
        self.correlator.cancel(self.request_id);
    }
}

// =============================================================================
// Payload projections
// =============================================================================

fn unexpected<T>(payload: ResponsePayload) -> Result<T, BridgeError> {
    // Reaching this means the worker answered with the wrong payload
    // variant - a contract bug between facade and server, not a user error.
    Err(BridgeError::NativeOperationFailed {
        message: format!("unexpected response payload: {payload:?}"),
    })
}

pub(crate) fn map_ack(payload: ResponsePayload) -> Result<(), BridgeError> {
    match payload {
        ResponsePayload::Ack => Ok(()),
        other => unexpected(other),
    }
}

pub(crate) fn map_names(payload: ResponsePayload) -> Result<Vec<String>, BridgeError> {
    match payload {
        ResponsePayload::Names { names } => Ok(names),
        other => unexpected(other),
    }
}

pub(crate) fn map_property(payload: ResponsePayload) -> Result<PropertyValue, BridgeError> {
    match payload {
        ResponsePayload::Property { value } => Ok(value),
        other => unexpected(other),
    }
}

pub(crate) fn map_drawn(payload: ResponsePayload) -> Result<u32, BridgeError> {
    match payload {
        ResponsePayload::DrawCompleted { drawn } => Ok(drawn),
        other => unexpected(other),
    }
}
