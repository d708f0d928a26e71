//! Transaction submission lifecycle
//!
//! Turns "sign, send and watch" into a single future that settles exactly
//! once: it resolves with a [`SubmissionOutcome`] when the call lands in a
//! block (or is finalized, see [`WaitFor`]) and rejects on a dispatch error
//! or on a relayed call whose inner dispatch failed.

use crate::classify::{classify, ErrorRegistry};
use crate::ledger::{Call, Connection, Hash32, NoncePolicy, StatusUpdate, Submitted, TxStatus};
use crate::signer::Signer;
use crate::{Error, Result};
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of a settled submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionOutcome {
    /// Identifying hash of the submitted call
    pub transaction_id: Hash32,

    /// Block that included (or finalized) the call
    pub block_id: Hash32,
}

impl SubmissionOutcome {
    /// Create a new submission outcome
    pub fn new(transaction_id: Hash32, block_id: Hash32) -> Self {
        Self {
            transaction_id,
            block_id,
        }
    }
}

/// Lifecycle point at which a submission resolves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitFor {
    /// Resolve once the call is included in a block
    #[default]
    InBlock,

    /// Resolve once the including block is finalized
    Finalized,
}

/// Per-submission options
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubmitOptions {
    /// Nonce selection
    pub nonce: NoncePolicy,

    /// When to resolve
    pub wait_for: WaitFor,

    /// Deadline for the whole lifecycle; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl SubmitOptions {
    pub fn with_nonce(mut self, nonce: NoncePolicy) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn with_wait_for(mut self, wait_for: WaitFor) -> Self {
        self.wait_for = wait_for;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Hooks into a submission's progress
///
/// All methods default to no-ops. `on_settled` fires at most once per
/// dispatched call, including when the deadline elapses.
pub trait SubmissionObserver: Send + Sync {
    /// The network accepted the call for processing
    fn on_dispatched(&self, _tx_hash: Hash32, _call: &Call) {}

    /// A status notification arrived (before settlement)
    fn on_status(&self, _tx_hash: Hash32, _status: &TxStatus) {}

    /// The submission settled
    fn on_settled(&self, _tx_hash: Hash32, _result: &Result<SubmissionOutcome>) {}
}

impl SubmissionObserver for () {}

/// Settlement state machine for one submission
///
/// Feed it status updates in arrival order. It yields a result exactly once;
/// every update after that is ignored.
pub struct SubmissionWatcher<'r, R: ?Sized> {
    registry: &'r R,
    tx_hash: Hash32,
    wait_for: WaitFor,
    included_in: Option<Hash32>,
    settled: bool,
}

impl<'r, R> SubmissionWatcher<'r, R>
where
    R: ErrorRegistry + ?Sized,
{
    pub fn new(registry: &'r R, tx_hash: Hash32, wait_for: WaitFor) -> Self {
        Self {
            registry,
            tx_hash,
            wait_for,
            included_in: None,
            settled: false,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Block the call was last seen included in, if any
    pub fn included_in(&self) -> Option<Hash32> {
        self.included_in
    }

    /// Observe one update; `Some` means the submission just settled
    pub fn observe(&mut self, update: &StatusUpdate) -> Option<Result<SubmissionOutcome>> {
        if self.settled {
            debug!(
                "Ignoring status {} for settled transaction {}",
                update.status, self.tx_hash
            );
            return None;
        }

        let result = self.evaluate(update)?;
        self.settled = true;
        Some(result)
    }

    fn evaluate(&mut self, update: &StatusUpdate) -> Option<Result<SubmissionOutcome>> {
        debug!("Transaction {} status: {}", self.tx_hash, update.status);

        if let Some(raw) = &update.dispatch_error {
            let failure = classify(self.registry, raw);
            warn!("Transaction {} dispatch failed: {}", self.tx_hash, failure);
            return Some(Err(Error::Dispatch(failure)));
        }

        match update.status {
            TxStatus::InBlock(block) => {
                if let Some(err) = self.nested_failure(update) {
                    return Some(Err(err));
                }
                self.included_in = Some(block);
                match self.wait_for {
                    WaitFor::InBlock => {
                        info!("Transaction {} included in block {}", self.tx_hash, block);
                        Some(Ok(SubmissionOutcome::new(self.tx_hash, block)))
                    }
                    WaitFor::Finalized => None,
                }
            }
            TxStatus::Finalized(block) if self.wait_for == WaitFor::Finalized => {
                if let Some(err) = self.nested_failure(update) {
                    return Some(Err(err));
                }
                info!("Transaction {} finalized in block {}", self.tx_hash, block);
                Some(Ok(SubmissionOutcome::new(self.tx_hash, block)))
            }
            TxStatus::Retracted(block) => {
                if self.included_in == Some(block) {
                    self.included_in = None;
                }
                debug!("Transaction {} retracted from block {}", self.tx_hash, block);
                None
            }
            TxStatus::Dropped
            | TxStatus::Invalid
            | TxStatus::Usurped(_)
            | TxStatus::FinalityTimeout(_) => {
                warn!(
                    "Transaction {} reported {}, still waiting for inclusion",
                    self.tx_hash, update.status
                );
                None
            }
            _ => None,
        }
    }

    /// First relayed-call failure among the block's events, in emission order
    fn nested_failure(&self, update: &StatusUpdate) -> Option<Error> {
        let raw = update.events.iter().find_map(|event| event.nested_failure())?;
        let failure = classify(self.registry, raw);
        warn!(
            "Transaction {} relayed call failed: {}",
            self.tx_hash, failure
        );
        Some(Error::NestedDispatch(failure))
    }
}

/// Submit `call` and wait until it settles
pub async fn submit<C>(
    connection: &C,
    call: &Call,
    signer: &dyn Signer,
    options: &SubmitOptions,
) -> Result<SubmissionOutcome>
where
    C: Connection + ?Sized,
{
    submit_observed(connection, call, signer, options, &()).await
}

/// Submit `call`, reporting progress to `observer`
pub async fn submit_observed<C, O>(
    connection: &C,
    call: &Call,
    signer: &dyn Signer,
    options: &SubmitOptions,
    observer: &O,
) -> Result<SubmissionOutcome>
where
    C: Connection + ?Sized,
    O: SubmissionObserver + ?Sized,
{
    let mut dispatched = None;

    let Some(deadline) = options.timeout else {
        return run_lifecycle(connection, call, signer, options, observer, &mut dispatched).await;
    };

    let lifecycle = run_lifecycle(connection, call, signer, options, observer, &mut dispatched);
    let settled = tokio::time::timeout(deadline, lifecycle).await;
    match settled {
        Ok(result) => result,
        Err(_) => {
            let err = Error::Timeout(deadline);
            if let Some(tx_hash) = dispatched {
                warn!("Transaction {} did not settle within {:?}", tx_hash, deadline);
                observer.on_settled(tx_hash, &Err(err.clone()));
            }
            Err(err)
        }
    }
}

async fn run_lifecycle<C, O>(
    connection: &C,
    call: &Call,
    signer: &dyn Signer,
    options: &SubmitOptions,
    observer: &O,
    dispatched: &mut Option<Hash32>,
) -> Result<SubmissionOutcome>
where
    C: Connection + ?Sized,
    O: SubmissionObserver + ?Sized,
{
    debug!("Dispatching {} with nonce {:?}", call, options.nonce);

    let Submitted {
        tx_hash,
        mut updates,
    } = connection
        .submit_and_watch(call, signer, options.nonce)
        .await
        .map_err(|e| {
            warn!("Dispatch of {} failed: {}", call, e);
            e
        })?;

    *dispatched = Some(tx_hash);
    observer.on_dispatched(tx_hash, call);

    let mut watcher = SubmissionWatcher::new(connection, tx_hash, options.wait_for);
    while let Some(update) = updates.next().await {
        observer.on_status(tx_hash, &update.status);
        if let Some(result) = watcher.observe(&update) {
            observer.on_settled(tx_hash, &result);
            return result;
        }
    }

    warn!("Status stream for transaction {} closed early", tx_hash);
    let result = Err(Error::StreamClosed);
    observer.on_settled(tx_hash, &result);
    result
}
