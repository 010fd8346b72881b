//! Messages: worker → client
//!
//! The worker answers every request-bearing command with exactly one
//! terminal message (`Completed` or `Failed`) carrying the request id.
//! Unsolicited messages — property-change notifications, state machine
//! settling, fire-and-forget failures — carry request id 0 and identify
//! their origin by handle instead.
//!
//! Messages are drained only by the client's explicit poll; nothing in the
//! worker ever calls back into client code.

use serde::{Deserialize, Serialize};

use crate::commands::FIRE_AND_FORGET;
use crate::errors::BridgeError;
use crate::handles::{BindableInstanceHandle, StateMachineHandle};
use crate::properties::PropertyValue;

/// One event produced by the worker, consumed by a client poll
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Matches the originating command's request id; 0 for unsolicited
    /// messages
    pub request_id: u64,
    pub payload: MessagePayload,
}

impl Message {
    pub fn completed(request_id: u64, data: ResponsePayload) -> Self {
        Self {
            request_id,
            payload: MessagePayload::Completed { data },
        }
    }

    pub fn failed(request_id: u64, error: BridgeError) -> Self {
        Self {
            request_id,
            payload: MessagePayload::Failed { error },
        }
    }

    /// A failure with no continuation to notify; lands on the error
    /// broadcast
    pub fn broadcast_failure(error: BridgeError) -> Self {
        Self::failed(FIRE_AND_FORGET, error)
    }

    pub fn is_unsolicited(&self) -> bool {
        self.request_id == FIRE_AND_FORGET
    }
}

/// Tagged message payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePayload {
    /// Terminal success for the correlated request
    Completed { data: ResponsePayload },

    /// Terminal failure for the correlated request, or (with request id 0)
    /// a fire-and-forget failure for the error broadcast
    Failed { error: BridgeError },

    /// A subscribed property changed; carries the new value
    PropertyChanged {
        instance: BindableInstanceHandle,
        path: String,
        value: PropertyValue,
    },

    /// A state machine finished settling after one or more advances
    StateMachineSettled { state_machine: StateMachineHandle },
}

/// Data carried by a successful completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    /// The operation completed; the pre-allocated handle (if any) is now
    /// bound
    Ack,

    /// Enumeration result (artboard or state machine names)
    Names { names: Vec<String> },

    /// Property read result
    Property { value: PropertyValue },

    /// A draw batch completed in a single dispatch
    DrawCompleted { drawn: u32 },
}
