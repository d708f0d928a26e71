//! Ledger-facing types
//!
//! The coordinator never builds or interprets workflow calls itself. It only
//! needs a connection that can submit a signed [`Call`] and report its
//! lifecycle as a stream of [`StatusUpdate`]s, plus an error registry to
//! classify failures.

use crate::classify::{ErrorRegistry, RawDispatchError};
use crate::signer::Signer;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::Stream;
use sha3::{Digest, Keccak256};
use std::fmt;
use std::pin::Pin;

/// Module that hosts the relayed-call wrapper
pub const RELAY_SECTION: &str = "magic";

/// Call name of the relayed-call wrapper
pub const RELAY_CALL: &str = "codo";

/// Event emitted with the inner call's dispatch result
pub const RELAY_RESULT_EVENT: &str = "Codo";

/// 32-byte identifier (transaction hash, block hash, claim digest)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    /// Wrap raw bytes
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Keccak-256 of `data`
    pub fn keccak256(data: &[u8]) -> Self {
        let mut out = [0u8; 32];
        out.copy_from_slice(&Keccak256::digest(data));
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl From<[u8; 32]> for Hash32 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// Nonce selection for a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoncePolicy {
    /// Let the network pick the next available nonce
    #[default]
    Auto,

    /// Use the given nonce
    Explicit(u64),
}

/// Pre-built instruction for the ledger, optionally wrapping an inner call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    section: String,
    method: String,
    args: Vec<u8>,
    inner: Option<Box<Call>>,
}

impl Call {
    /// Create a call from its module, name and encoded arguments
    pub fn new(section: impl Into<String>, method: impl Into<String>, args: Vec<u8>) -> Self {
        Self {
            section: section.into(),
            method: method.into(),
            args,
            inner: None,
        }
    }

    /// Wrap `inner` in a relayed call executed on behalf of another account
    pub fn relayed(inner: Call) -> Self {
        Self {
            section: RELAY_SECTION.to_string(),
            method: RELAY_CALL.to_string(),
            args: Vec::new(),
            inner: Some(Box::new(inner)),
        }
    }

    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn args(&self) -> &[u8] {
        &self.args
    }

    /// Wrapped call, if this is a relayed call
    pub fn inner(&self) -> Option<&Call> {
        self.inner.as_deref()
    }

    pub fn is_relayed(&self) -> bool {
        self.inner.is_some()
    }

    /// Deterministic byte form: each field length-prefixed (u32 LE), inner
    /// call appended after a presence byte. Fails if a field does not fit
    /// the 32-bit length prefix.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.encode_into(&mut out)?;
        Ok(out)
    }

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        for field in [self.section.as_bytes(), self.method.as_bytes(), &self.args] {
            out.extend_from_slice(&length_prefix(field.len())?);
            out.extend_from_slice(field);
        }
        match &self.inner {
            Some(inner) => {
                out.push(1);
                inner.encode_into(out)
            }
            None => {
                out.push(0);
                Ok(())
            }
        }
    }
}

fn length_prefix(len: usize) -> Result<[u8; 4]> {
    u32::try_from(len)
        .map(u32::to_le_bytes)
        .map_err(|_| {
            Error::InvalidPayload(format!(
                "call field of {len} bytes exceeds the u32 length prefix"
            ))
        })
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.section, self.method)?;
        if let Some(inner) = &self.inner {
            write!(f, "({inner})")?;
        }
        Ok(())
    }
}

/// Typed event data value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventValue {
    /// Outcome of a dispatched call
    DispatchResult(std::result::Result<(), RawDispatchError>),

    /// Account identifier
    AccountId(Vec<u8>),

    /// Token amount
    Balance(u128),

    /// Raw bytes
    Bytes(Vec<u8>),

    /// Text
    Text(String),
}

/// Event emitted in a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Emitting module
    pub section: String,

    /// Event name
    pub method: String,

    /// Ordered event data
    pub data: Vec<EventValue>,
}

impl Event {
    pub fn new(section: impl Into<String>, method: impl Into<String>, data: Vec<EventValue>) -> Self {
        Self {
            section: section.into(),
            method: method.into(),
            data,
        }
    }

    /// Relayed-call result event carrying the given inner outcome
    pub fn relay_result(result: std::result::Result<(), RawDispatchError>) -> Self {
        Self::new(
            RELAY_SECTION,
            RELAY_RESULT_EVENT,
            vec![EventValue::DispatchResult(result)],
        )
    }

    /// Inner-call error if this is a relayed-call result event reporting failure
    pub fn nested_failure(&self) -> Option<&RawDispatchError> {
        if self.section != RELAY_SECTION || self.method != RELAY_RESULT_EVENT {
            return None;
        }
        match self.data.first() {
            Some(EventValue::DispatchResult(Err(error))) => Some(error),
            _ => None,
        }
    }
}

/// Lifecycle status of a submitted call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// Waiting on an earlier nonce
    Future,

    /// In the pool, ready for inclusion
    Ready,

    /// Gossiped to peers
    Broadcast,

    /// Included in the given block
    InBlock(Hash32),

    /// The including block was retracted
    Retracted(Hash32),

    /// Finality was not reached in time
    FinalityTimeout(Hash32),

    /// The including block was finalized
    Finalized(Hash32),

    /// Replaced by another call with the same nonce
    Usurped(Hash32),

    /// Dropped from the pool
    Dropped,

    /// Rejected by the pool as invalid
    Invalid,
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxStatus::Future => write!(f, "Future"),
            TxStatus::Ready => write!(f, "Ready"),
            TxStatus::Broadcast => write!(f, "Broadcast"),
            TxStatus::InBlock(block) => write!(f, "InBlock({block})"),
            TxStatus::Retracted(block) => write!(f, "Retracted({block})"),
            TxStatus::FinalityTimeout(block) => write!(f, "FinalityTimeout({block})"),
            TxStatus::Finalized(block) => write!(f, "Finalized({block})"),
            TxStatus::Usurped(by) => write!(f, "Usurped({by})"),
            TxStatus::Dropped => write!(f, "Dropped"),
            TxStatus::Invalid => write!(f, "Invalid"),
        }
    }
}

/// One notification on a submission's status stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    /// Current lifecycle status
    pub status: TxStatus,

    /// Dispatch error reported for the call, if any
    pub dispatch_error: Option<RawDispatchError>,

    /// Events emitted for this call in the including block
    pub events: Vec<Event>,
}

impl StatusUpdate {
    pub fn new(status: TxStatus) -> Self {
        Self {
            status,
            dispatch_error: None,
            events: Vec::new(),
        }
    }

    /// Attach a dispatch error (builder-style)
    pub fn with_dispatch_error(mut self, error: RawDispatchError) -> Self {
        self.dispatch_error = Some(error);
        self
    }

    /// Attach block events (builder-style)
    pub fn with_events(mut self, events: Vec<Event>) -> Self {
        self.events = events;
        self
    }
}

/// Stream of status notifications for a single submission
pub type StatusStream = Pin<Box<dyn Stream<Item = StatusUpdate> + Send>>;

/// Handle returned by a successful dispatch
pub struct Submitted {
    /// Identifying hash of the submitted call
    pub tx_hash: Hash32,

    /// Status notifications scoped to this call only
    pub updates: StatusStream,
}

/// Shared ledger session
///
/// Implementations must scope each returned stream to the one submitted call;
/// concurrent submissions never share a stream.
#[async_trait]
pub trait Connection: ErrorRegistry + Send + Sync {
    /// Sign `call` with `signer`, dispatch it and subscribe to its status.
    ///
    /// Errors here are local: the network never saw the call.
    async fn submit_and_watch(
        &self,
        call: &Call,
        signer: &dyn Signer,
        nonce: NoncePolicy,
    ) -> Result<Submitted>;
}
