//! Typed errors crossing the bridge
//!
//! Every failure a command can produce is recovered at the worker's dispatch
//! boundary and converted into one of these values; the worker thread never
//! terminates on a bad command. Async callers see the error as the result of
//! their pending operation; fire-and-forget callers must watch the error
//! broadcast (there is no continuation to notify — see the session docs).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::handles::Handle;

/// Error classification, one per taxonomy entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A command referenced a handle that is not bound
    InvalidHandle,
    /// The native engine rejected an operation
    NativeOperationFailed,
    /// Operation attempted against a stopped or draining session
    Lifecycle,
    /// A dotted property path did not resolve on the target instance
    PropertyPath,
}

/// A bridge-level failure
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BridgeError {
    /// The referenced handle does not exist (never created, creation
    /// failed, or already released)
    #[error("invalid handle {handle}: {message}")]
    InvalidHandle { handle: Handle, message: String },

    /// The native engine rejected the operation (malformed scene bytes,
    /// unknown artboard name, decode failure, ...)
    #[error("native operation failed: {message}")]
    NativeOperationFailed { message: String },

    /// The session is not in a state that can accept the operation
    #[error("lifecycle error: {message}")]
    Lifecycle { message: String },

    /// The dotted property path did not resolve, or resolved to a
    /// different property kind
    #[error("property path '{path}' error: {message}")]
    PropertyPath { path: String, message: String },
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::InvalidHandle { .. } => ErrorKind::InvalidHandle,
            BridgeError::NativeOperationFailed { .. } => ErrorKind::NativeOperationFailed,
            BridgeError::Lifecycle { .. } => ErrorKind::Lifecycle,
            BridgeError::PropertyPath { .. } => ErrorKind::PropertyPath,
        }
    }

    /// Unbound-handle error for the given handle
    pub fn unbound(handle: impl Into<Handle>) -> Self {
        BridgeError::InvalidHandle {
            handle: handle.into(),
            message: "not bound".to_string(),
        }
    }

    pub fn lifecycle(message: impl Into<String>) -> Self {
        BridgeError::Lifecycle {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::FileHandle;

    #[test]
    fn display_names_the_handle() {
        let err = BridgeError::unbound(FileHandle::from_raw(3));
        assert_eq!(err.kind(), ErrorKind::InvalidHandle);
        assert_eq!(err.to_string(), "invalid handle file#3: not bound");
    }
}
