//! Broadcast streams surfaced to session callers
//!
//! All three streams wrap bounded broadcast receivers filled during
//! `poll_messages`. A listener that falls behind loses the oldest buffered
//! items; property streams surface that as an explicit `Lagged` event,
//! error and settle streams skip past it with a log line.

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::broadcast::Receiver;

use motiv_engine::PropertyEvent;
use motiv_protocol::{BindableInstanceHandle, BridgeError, PropertyValue, StateMachineHandle};

/// Values observed on one subscribed (instance, path) pair
pub struct PropertyStream {
    instance: BindableInstanceHandle,
    path: String,
    receiver: Receiver<PropertyValue>,
}

impl PropertyStream {
    pub(crate) fn new(
        instance: BindableInstanceHandle,
        path: String,
        receiver: Receiver<PropertyValue>,
    ) -> Self {
        Self {
            instance,
            path,
            receiver,
        }
    }

    pub fn instance(&self) -> BindableInstanceHandle {
        self.instance
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Wait for the next event; `None` once the subscription is removed or
    /// the session torn down
    pub async fn next(&mut self) -> Option<PropertyEvent> {
        match self.receiver.recv().await {
            Ok(value) => Some(PropertyEvent::Changed(value)),
            Err(RecvError::Lagged(missed)) => Some(PropertyEvent::Lagged { missed }),
            Err(RecvError::Closed) => None,
        }
    }

    /// Non-blocking variant of [`next`](Self::next); `None` when nothing
    /// is buffered right now
    pub fn try_next(&mut self) -> Option<PropertyEvent> {
        match self.receiver.try_recv() {
            Ok(value) => Some(PropertyEvent::Changed(value)),
            Err(TryRecvError::Lagged(missed)) => Some(PropertyEvent::Lagged { missed }),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
        }
    }
}

/// Failures of fire-and-forget commands
///
/// These have no continuation to resume, so this stream is the only place
/// they surface. Async callers do not need it - their errors come back
/// through the pending operation itself.
pub struct ErrorStream {
    receiver: Receiver<BridgeError>,
}

impl ErrorStream {
    pub(crate) fn new(receiver: Receiver<BridgeError>) -> Self {
        Self { receiver }
    }

    pub async fn next(&mut self) -> Option<BridgeError> {
        loop {
            match self.receiver.recv().await {
                Ok(error) => return Some(error),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "error broadcast overflowed; oldest entries dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_next(&mut self) -> Option<BridgeError> {
        loop {
            match self.receiver.try_recv() {
                Ok(error) => return Some(error),
                Err(TryRecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "error broadcast overflowed; oldest entries dropped");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}

/// State machines observed settling (unsettled → settled edge)
pub struct SettleStream {
    receiver: Receiver<StateMachineHandle>,
}

impl SettleStream {
    pub(crate) fn new(receiver: Receiver<StateMachineHandle>) -> Self {
        Self { receiver }
    }

    pub async fn next(&mut self) -> Option<StateMachineHandle> {
        loop {
            match self.receiver.recv().await {
                Ok(handle) => return Some(handle),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "settle broadcast overflowed; oldest entries dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_next(&mut self) -> Option<StateMachineHandle> {
        loop {
            match self.receiver.try_recv() {
                Ok(handle) => return Some(handle),
                Err(TryRecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "settle broadcast overflowed; oldest entries dropped");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}
