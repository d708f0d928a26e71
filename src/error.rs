//! Error types for the ledger coordinator

use crate::classify::DispatchFailure;
use std::time::Duration;
use thiserror::Error;

/// Coordinator error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The call could not be dispatched (bad signature, malformed call, connection down)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The ledger rejected the call
    #[error("Dispatch failed: {0}")]
    Dispatch(DispatchFailure),

    /// The outer relayed call was accepted but the wrapped call failed
    #[error("Nested dispatch failed: {0}")]
    NestedDispatch(DispatchFailure),

    /// Status stream ended before the submission settled
    #[error("Status stream closed before the submission settled")]
    StreamClosed,

    /// Caller-imposed deadline elapsed
    #[error("Submission timed out after {0:?}")]
    Timeout(Duration),

    /// Subject id does not fit in 32 bits
    #[error("Subject id out of range: {0} does not fit in 32 bits")]
    SubjectIdOutOfRange(u64),

    /// Claim or call payload is malformed
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Signer failed to produce a signature
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Submission not tracked
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The structured ledger failure behind this error, if any.
    ///
    /// Top-level and nested failures share the same payload shape so callers
    /// can render a diagnostic without caring which one fired.
    pub fn dispatch_failure(&self) -> Option<&DispatchFailure> {
        match self {
            Error::Dispatch(failure) | Error::NestedDispatch(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
