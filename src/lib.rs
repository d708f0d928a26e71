//! # Ledger Coordinator
//!
//! Client-side plumbing for driving workflows against a Substrate-style
//! ledger.
//!
//! This crate provides:
//! - Transaction submission that settles once on inclusion or finalization
//! - Relayed call failure detection from block events
//! - Dispatch error classification against runtime metadata
//! - Canonical claim messages, digests and signatures
//! - Lifecycle tracking for concurrent submissions

#![warn(missing_docs, rust_2018_idioms)]
#![forbid(unsafe_code)]
#![allow(missing_docs)] // Internal implementation details

mod error;
pub mod classify;
pub mod ledger;
pub mod signer;
pub mod claim;
pub mod submission;
pub mod lifecycle;
mod coordinator;
pub mod mock;

pub use error::{Error, Result};
pub use classify::{classify, DispatchFailure, ErrorRegistry, ModuleError, RawDispatchError};
pub use ledger::{Call, Connection, Event, Hash32, NoncePolicy, StatusUpdate, TxStatus};
pub use signer::{Ed25519Signer, Signature, SignatureScheme, Signer};
pub use claim::{ClaimAuthorization, ClaimPayload, ClaimSignature, Score};
pub use submission::{submit, SubmissionObserver, SubmissionOutcome, SubmitOptions, WaitFor};
pub use lifecycle::{LifecycleTracker, SubmissionSlot, SubmissionStatus};
pub use coordinator::{Submitter, SubmitterConfig};
