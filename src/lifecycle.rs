//! Submission lifecycle tracking
//!
//! Records every submission made through a [`crate::Submitter`] from dispatch
//! until it settles, keyed by transaction hash.

use crate::ledger::{Call, Hash32, TxStatus};
use crate::submission::{SubmissionObserver, SubmissionOutcome};
use crate::{Error, Result};
use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Tracked status of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
    /// Dispatched, waiting for inclusion
    Pending,

    /// Included in a block
    InBlock,

    /// Including block finalized
    Finalized,

    /// Rejected by the ledger or by a relayed call
    Failed,

    /// Deadline elapsed before settlement
    TimedOut,

    /// Caller dropped the submission before it settled
    Abandoned,
}

impl SubmissionStatus {
    /// Check if this status indicates success
    pub fn is_successful(&self) -> bool {
        matches!(self, SubmissionStatus::InBlock | SubmissionStatus::Finalized)
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionStatus::Pending => write!(f, "Pending"),
            SubmissionStatus::InBlock => write!(f, "InBlock"),
            SubmissionStatus::Finalized => write!(f, "Finalized"),
            SubmissionStatus::Failed => write!(f, "Failed"),
            SubmissionStatus::TimedOut => write!(f, "TimedOut"),
            SubmissionStatus::Abandoned => write!(f, "Abandoned"),
        }
    }
}

/// Submission lifecycle information
#[derive(Debug, Clone)]
pub struct SubmissionRecord {
    /// Transaction hash
    pub tx_hash: Hash32,

    /// Call label, e.g. `ad.claim`
    pub call: String,

    /// Current status
    pub status: SubmissionStatus,

    /// Dispatch timestamp (Unix milliseconds)
    pub submitted_at: u64,

    /// Settlement timestamp (Unix milliseconds, if settled)
    pub settled_at: Option<u64>,

    /// Including block (if seen)
    pub block: Option<Hash32>,

    /// Error message (if failed or timed out)
    pub error: Option<String>,
}

impl SubmissionRecord {
    /// Create a new pending record
    pub fn new_pending(tx_hash: Hash32, call: String, submitted_at: u64) -> Self {
        Self {
            tx_hash,
            call,
            status: SubmissionStatus::Pending,
            submitted_at,
            settled_at: None,
            block: None,
            error: None,
        }
    }

    /// Check if the submission has settled
    pub fn is_settled(&self) -> bool {
        self.settled_at.is_some()
    }

    /// Time from dispatch to settlement (milliseconds)
    pub fn latency_ms(&self) -> Option<u64> {
        self.settled_at
            .map(|settled| settled.saturating_sub(self.submitted_at))
    }
}

/// Concurrent registry of submissions
///
/// Cloning shares the underlying map.
#[derive(Clone)]
pub struct LifecycleTracker {
    /// Tracked submissions (hash -> record)
    records: Arc<DashMap<Hash32, SubmissionRecord>>,

    /// Maximum number of records to keep
    max_tracked: usize,

    /// Slots handed out but not yet registered
    reserved: Arc<Mutex<usize>>,

    /// Current time provider (for testing)
    current_time_fn: Arc<dyn Fn() -> u64 + Send + Sync>,
}

impl LifecycleTracker {
    /// Create a new tracker
    pub fn new(max_tracked: usize) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            max_tracked,
            reserved: Arc::new(Mutex::new(0)),
            current_time_fn: Arc::new(|| {
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or_default()
            }),
        }
    }

    /// Set the current time function (for testing)
    pub fn with_time_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> u64 + Send + Sync + 'static,
    {
        self.current_time_fn = Arc::new(f);
        self
    }

    fn now(&self) -> u64 {
        (self.current_time_fn)()
    }

    /// Reserve room for one more record, evicting settled records if full.
    ///
    /// The check and the reservation happen under one lock, so concurrent
    /// callers never exceed the bound between reserving and dispatching.
    pub fn reserve(&self) -> Result<SubmissionSlot> {
        let mut reserved = lock(&self.reserved);

        if self.records.len() + *reserved >= self.max_tracked {
            self.prune_settled(0);
        }
        if self.records.len() + *reserved >= self.max_tracked {
            return Err(Error::Internal(format!(
                "Maximum tracked submissions reached: {}",
                self.max_tracked
            )));
        }

        *reserved += 1;
        Ok(SubmissionSlot {
            tracker: self.clone(),
            state: Mutex::new(SlotState::default()),
        })
    }

    /// Number of slots reserved but not yet dispatched
    pub fn reserved_count(&self) -> usize {
        *lock(&self.reserved)
    }

    fn register_reserved(&self, tx_hash: Hash32, call: &Call) {
        let mut reserved = lock(&self.reserved);
        self.register_pending(tx_hash, call);
        *reserved = reserved.saturating_sub(1);
    }

    fn release_reservation(&self) {
        let mut reserved = lock(&self.reserved);
        *reserved = reserved.saturating_sub(1);
    }

    /// Register a dispatched submission
    pub fn register_pending(&self, tx_hash: Hash32, call: &Call) {
        let record = SubmissionRecord::new_pending(tx_hash, call.to_string(), self.now());
        self.records.insert(tx_hash, record);
        debug!("Registered pending transaction: {}", tx_hash);
    }

    /// Record block inclusion
    pub fn mark_in_block(&self, tx_hash: &Hash32, block: Hash32) -> Result<()> {
        self.mark_included(tx_hash, SubmissionStatus::InBlock, block)?;
        debug!("Transaction {} marked in block {}", tx_hash, block);
        Ok(())
    }

    /// Record finalization of the including block
    pub fn mark_finalized(&self, tx_hash: &Hash32, block: Hash32) -> Result<()> {
        self.mark_included(tx_hash, SubmissionStatus::Finalized, block)?;
        debug!("Transaction {} finalized in block {}", tx_hash, block);
        Ok(())
    }

    /// Record that `block` no longer includes the submission
    pub fn mark_retracted(&self, tx_hash: &Hash32, block: Hash32) -> Result<()> {
        let mut record = self
            .records
            .get_mut(tx_hash)
            .ok_or_else(|| Error::TransactionNotFound(tx_hash.to_string()))?;

        if !record.is_settled() && record.block == Some(block) {
            record.status = SubmissionStatus::Pending;
            record.block = None;
            debug!("Transaction {} retracted from block {}", tx_hash, block);
        }
        Ok(())
    }

    fn mark_included(&self, tx_hash: &Hash32, status: SubmissionStatus, block: Hash32) -> Result<()> {
        let mut record = self
            .records
            .get_mut(tx_hash)
            .ok_or_else(|| Error::TransactionNotFound(tx_hash.to_string()))?;

        record.status = status;
        record.block = Some(block);
        Ok(())
    }

    /// Record successful settlement in `block`
    pub fn mark_settled(&self, tx_hash: &Hash32, block: Hash32) -> Result<()> {
        let timestamp = self.now();
        let mut record = self
            .records
            .get_mut(tx_hash)
            .ok_or_else(|| Error::TransactionNotFound(tx_hash.to_string()))?;

        if record.status == SubmissionStatus::Pending {
            record.status = SubmissionStatus::InBlock;
        }
        record.block = Some(block);
        record.settled_at = Some(timestamp);
        info!(
            "Transaction {} settled as {} in block {}",
            tx_hash, record.status, block
        );
        Ok(())
    }

    /// Record a failure
    pub fn mark_failed(&self, tx_hash: &Hash32, error: String) -> Result<()> {
        self.mark_error(tx_hash, SubmissionStatus::Failed, error)
    }

    /// Record a missed deadline
    pub fn mark_timed_out(&self, tx_hash: &Hash32, error: String) -> Result<()> {
        self.mark_error(tx_hash, SubmissionStatus::TimedOut, error)
    }

    /// Record that the caller gave up before settlement
    pub fn mark_abandoned(&self, tx_hash: &Hash32) -> Result<()> {
        self.mark_error(
            tx_hash,
            SubmissionStatus::Abandoned,
            "Submission dropped before it settled".to_string(),
        )
    }

    fn mark_error(&self, tx_hash: &Hash32, status: SubmissionStatus, error: String) -> Result<()> {
        let timestamp = self.now();
        let mut record = self
            .records
            .get_mut(tx_hash)
            .ok_or_else(|| Error::TransactionNotFound(tx_hash.to_string()))?;

        record.status = status;
        record.settled_at = Some(timestamp);
        record.error = Some(error.clone());
        warn!("Transaction {} {}: {}", tx_hash, status, error);
        Ok(())
    }

    /// Get submission status
    pub fn get_status(&self, tx_hash: &Hash32) -> Option<SubmissionStatus> {
        self.records.get(tx_hash).map(|record| record.status)
    }

    /// Get submission record
    pub fn get_record(&self, tx_hash: &Hash32) -> Option<SubmissionRecord> {
        self.records.get(tx_hash).map(|record| record.clone())
    }

    /// Submissions that have not settled yet
    pub fn get_unsettled(&self) -> Vec<Hash32> {
        self.records
            .iter()
            .filter(|entry| !entry.value().is_settled())
            .map(|entry| *entry.key())
            .collect()
    }

    /// Remove settled records older than the given age (milliseconds)
    pub fn prune_settled(&self, max_age_ms: u64) -> usize {
        let cutoff_time = self.now().saturating_sub(max_age_ms);

        let to_remove: Vec<Hash32> = self
            .records
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .settled_at
                    .map(|t| t <= cutoff_time)
                    .unwrap_or(false)
            })
            .map(|entry| *entry.key())
            .collect();

        let count = to_remove.len();
        for tx_hash in to_remove {
            self.records.remove(&tx_hash);
        }

        if count > 0 {
            debug!("Pruned {} settled submissions", count);
        }
        count
    }

    /// Remove unsettled records dispatched longer ago than the given age
    /// (milliseconds)
    pub fn expire_unsettled(&self, max_age_ms: u64) -> usize {
        let cutoff_time = self.now().saturating_sub(max_age_ms);

        let to_remove: Vec<Hash32> = self
            .records
            .iter()
            .filter(|entry| {
                let record = entry.value();
                !record.is_settled() && record.submitted_at <= cutoff_time
            })
            .map(|entry| *entry.key())
            .collect();

        let count = to_remove.len();
        for tx_hash in to_remove {
            self.records.remove(&tx_hash);
            warn!("Expired unsettled transaction {}", tx_hash);
        }
        count
    }

    /// Get statistics about tracked submissions
    pub fn get_statistics(&self) -> LifecycleStatistics {
        let mut stats = LifecycleStatistics::default();

        for entry in self.records.iter() {
            let record = entry.value();

            match record.status {
                SubmissionStatus::Pending => stats.pending_count += 1,
                SubmissionStatus::InBlock => stats.in_block_count += 1,
                SubmissionStatus::Finalized => stats.finalized_count += 1,
                SubmissionStatus::Failed => stats.failed_count += 1,
                SubmissionStatus::TimedOut => stats.timed_out_count += 1,
                SubmissionStatus::Abandoned => stats.abandoned_count += 1,
            }

            if let Some(latency) = record.latency_ms() {
                stats.settled_count += 1;
                if record.status.is_successful() {
                    stats.succeeded_count += 1;
                }
                stats.total_latency_ms += latency;
                stats.latency_sample_count += 1;
            }
        }

        stats.total_count = self.records.len();
        stats
    }
}

impl SubmissionObserver for LifecycleTracker {
    fn on_dispatched(&self, tx_hash: Hash32, call: &Call) {
        self.register_pending(tx_hash, call);
    }

    fn on_status(&self, tx_hash: Hash32, status: &TxStatus) {
        let updated = match status {
            TxStatus::InBlock(block) => self.mark_in_block(&tx_hash, *block),
            TxStatus::Finalized(block) => self.mark_finalized(&tx_hash, *block),
            TxStatus::Retracted(block) => self.mark_retracted(&tx_hash, *block),
            _ => Ok(()),
        };
        if let Err(e) = updated {
            warn!("Could not record status of {}: {}", tx_hash, e);
        }
    }

    fn on_settled(&self, tx_hash: Hash32, result: &Result<SubmissionOutcome>) {
        let updated = match result {
            Ok(outcome) => self.mark_settled(&tx_hash, outcome.block_id),
            Err(err @ Error::Timeout(_)) => self.mark_timed_out(&tx_hash, err.to_string()),
            Err(err) => self.mark_failed(&tx_hash, err.to_string()),
        };
        if let Err(e) = updated {
            warn!("Could not record settlement of {}: {}", tx_hash, e);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct SlotState {
    tx_hash: Option<Hash32>,
    settled: bool,
}

/// Capacity reserved in a [`LifecycleTracker`] for one submission
///
/// Observes that submission on the tracker's behalf. Dropping the slot
/// before dispatch returns the capacity; dropping it after dispatch but
/// before settlement marks the record `Abandoned`.
pub struct SubmissionSlot {
    tracker: LifecycleTracker,
    state: Mutex<SlotState>,
}

impl SubmissionObserver for SubmissionSlot {
    fn on_dispatched(&self, tx_hash: Hash32, call: &Call) {
        let mut state = lock(&self.state);
        if state.tx_hash.is_none() {
            self.tracker.register_reserved(tx_hash, call);
            state.tx_hash = Some(tx_hash);
        }
    }

    fn on_status(&self, tx_hash: Hash32, status: &TxStatus) {
        self.tracker.on_status(tx_hash, status);
    }

    fn on_settled(&self, tx_hash: Hash32, result: &Result<SubmissionOutcome>) {
        self.tracker.on_settled(tx_hash, result);
        lock(&self.state).settled = true;
    }
}

impl Drop for SubmissionSlot {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        match state.tx_hash {
            None => self.tracker.release_reservation(),
            Some(tx_hash) if !state.settled => {
                if let Err(e) = self.tracker.mark_abandoned(&tx_hash) {
                    debug!("Abandoned transaction {} no longer tracked: {}", tx_hash, e);
                }
            }
            Some(_) => {}
        }
    }
}

/// Lifecycle statistics
#[derive(Debug, Clone, Default)]
pub struct LifecycleStatistics {
    /// Total number of tracked submissions
    pub total_count: usize,

    /// Number of pending submissions
    pub pending_count: usize,

    /// Number of submissions last seen in a block
    pub in_block_count: usize,

    /// Number of finalized submissions
    pub finalized_count: usize,

    /// Number of failed submissions
    pub failed_count: usize,

    /// Number of timed out submissions
    pub timed_out_count: usize,

    /// Number of abandoned submissions
    pub abandoned_count: usize,

    /// Number of settled submissions
    pub settled_count: usize,

    /// Number of submissions that settled successfully
    pub succeeded_count: usize,

    /// Total dispatch-to-settlement latency (milliseconds)
    pub total_latency_ms: u64,

    /// Number of samples for latency calculation
    pub latency_sample_count: usize,
}

impl LifecycleStatistics {
    /// Get average latency (milliseconds)
    pub fn average_latency_ms(&self) -> Option<f64> {
        if self.latency_sample_count > 0 {
            Some(self.total_latency_ms as f64 / self.latency_sample_count as f64)
        } else {
            None
        }
    }

    /// Get success rate over settled submissions (0.0 to 1.0)
    pub fn success_rate(&self) -> f64 {
        if self.settled_count > 0 {
            self.succeeded_count as f64 / self.settled_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::DispatchFailure;

    fn tx(n: u8) -> Hash32 {
        Hash32::new([n; 32])
    }

    fn call() -> Call {
        Call::new("did", "register", vec![])
    }

    #[test]
    fn test_lifecycle_transitions() {
        let tracker = LifecycleTracker::new(1000).with_time_fn(|| 1000);
        let hash = tx(1);

        tracker.on_dispatched(hash, &call());
        assert_eq!(tracker.get_status(&hash), Some(SubmissionStatus::Pending));

        tracker.on_status(hash, &TxStatus::Ready);
        assert_eq!(tracker.get_status(&hash), Some(SubmissionStatus::Pending));

        tracker.on_status(hash, &TxStatus::InBlock(tx(7)));
        assert_eq!(tracker.get_status(&hash), Some(SubmissionStatus::InBlock));
        assert!(!tracker.get_record(&hash).unwrap().is_settled());

        tracker.on_status(hash, &TxStatus::Finalized(tx(7)));
        tracker.on_settled(hash, &Ok(SubmissionOutcome::new(hash, tx(7))));

        let record = tracker.get_record(&hash).unwrap();
        assert_eq!(record.status, SubmissionStatus::Finalized);
        assert_eq!(record.block, Some(tx(7)));
        assert_eq!(record.call, "did.register");
        assert!(record.is_settled());
    }

    #[test]
    fn test_failures_and_timeouts() {
        let tracker = LifecycleTracker::new(1000).with_time_fn(|| 1000);

        tracker.on_dispatched(tx(1), &call());
        tracker.on_settled(
            tx(1),
            &Err(Error::NestedDispatch(DispatchFailure::Opaque {
                raw: "BadOrigin".to_string(),
            })),
        );
        let failed = tracker.get_record(&tx(1)).unwrap();
        assert_eq!(failed.status, SubmissionStatus::Failed);
        assert_eq!(
            failed.error.as_deref(),
            Some("Nested dispatch failed: BadOrigin")
        );

        tracker.on_dispatched(tx(2), &call());
        tracker.on_settled(tx(2), &Err(Error::Timeout(std::time::Duration::from_secs(5))));
        assert_eq!(tracker.get_status(&tx(2)), Some(SubmissionStatus::TimedOut));
    }

    #[test]
    fn test_unknown_transaction() {
        let tracker = LifecycleTracker::new(10);
        let result = tracker.mark_in_block(&tx(9), tx(1));
        assert!(matches!(result, Err(Error::TransactionNotFound(_))));
    }

    #[test]
    fn test_statistics() {
        let tracker = LifecycleTracker::new(1000).with_time_fn(|| 1000);

        for i in 0..5 {
            let hash = tx(i);
            tracker.on_dispatched(hash, &call());
            if i < 3 {
                tracker.on_status(hash, &TxStatus::InBlock(tx(100)));
                tracker.on_settled(hash, &Ok(SubmissionOutcome::new(hash, tx(100))));
            }
        }
        tracker.on_settled(tx(4), &Err(Error::StreamClosed));

        let stats = tracker.get_statistics();
        assert_eq!(stats.total_count, 5);
        assert_eq!(stats.pending_count, 1);
        assert_eq!(stats.in_block_count, 3);
        assert_eq!(stats.failed_count, 1);
        assert_eq!(stats.settled_count, 4);
        assert_eq!(stats.success_rate(), 0.75);
        assert_eq!(stats.average_latency_ms(), Some(0.0));
        assert_eq!(tracker.get_unsettled(), vec![tx(3)]);
    }

    #[test]
    fn test_prune_settled() {
        let now = Arc::new(std::sync::atomic::AtomicU64::new(1_000));
        let clock = now.clone();
        let tracker = LifecycleTracker::new(1000)
            .with_time_fn(move || clock.load(std::sync::atomic::Ordering::SeqCst));

        tracker.on_dispatched(tx(1), &call());
        tracker.on_settled(tx(1), &Ok(SubmissionOutcome::new(tx(1), tx(9))));
        tracker.on_dispatched(tx(2), &call());

        now.store(10_000, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(tracker.prune_settled(60_000), 0);
        assert_eq!(tracker.prune_settled(5_000), 1);
        assert_eq!(tracker.get_status(&tx(1)), None);
        assert_eq!(tracker.get_status(&tx(2)), Some(SubmissionStatus::Pending));
    }

    #[test]
    fn test_max_capacity() {
        let tracker = LifecycleTracker::new(2).with_time_fn(|| 1000);

        tracker.on_dispatched(tx(1), &call());
        tracker.on_dispatched(tx(2), &call());
        assert!(tracker.reserve().is_err());

        // Settled records are evicted to make room
        tracker.on_settled(tx(1), &Ok(SubmissionOutcome::new(tx(1), tx(9))));
        assert!(tracker.reserve().is_ok());
        assert_eq!(tracker.get_status(&tx(1)), None);
    }

    #[test]
    fn test_reservation_counts_before_dispatch() {
        let tracker = LifecycleTracker::new(1).with_time_fn(|| 1000);

        let slot = tracker.reserve().unwrap();
        assert_eq!(tracker.reserved_count(), 1);
        assert!(tracker.reserve().is_err());

        // Dispatch turns the reservation into a record
        slot.on_dispatched(tx(1), &call());
        assert_eq!(tracker.reserved_count(), 0);
        assert!(tracker.reserve().is_err());

        slot.on_settled(tx(1), &Ok(SubmissionOutcome::new(tx(1), tx(9))));
        drop(slot);
        assert_eq!(tracker.get_status(&tx(1)), Some(SubmissionStatus::InBlock));

        // An unused slot gives its capacity back
        let unused = tracker.reserve().unwrap();
        drop(unused);
        assert_eq!(tracker.reserved_count(), 0);
    }

    #[test]
    fn test_dropped_slot_abandons_unsettled_record() {
        let tracker = LifecycleTracker::new(10).with_time_fn(|| 1000);

        let slot = tracker.reserve().unwrap();
        slot.on_dispatched(tx(1), &call());
        slot.on_status(tx(1), &TxStatus::Ready);
        drop(slot);

        let record = tracker.get_record(&tx(1)).unwrap();
        assert_eq!(record.status, SubmissionStatus::Abandoned);
        assert!(record.is_settled());
        assert_eq!(tracker.prune_settled(0), 1);
        assert_eq!(tracker.get_statistics().total_count, 0);
    }

    #[test]
    fn test_retraction_resets_inclusion() {
        let tracker = LifecycleTracker::new(10).with_time_fn(|| 1000);
        let hash = tx(1);

        tracker.on_dispatched(hash, &call());
        tracker.on_status(hash, &TxStatus::InBlock(tx(7)));

        // A retraction of some other block changes nothing
        tracker.on_status(hash, &TxStatus::Retracted(tx(8)));
        assert_eq!(tracker.get_status(&hash), Some(SubmissionStatus::InBlock));

        tracker.on_status(hash, &TxStatus::Retracted(tx(7)));
        let record = tracker.get_record(&hash).unwrap();
        assert_eq!(record.status, SubmissionStatus::Pending);
        assert_eq!(record.block, None);

        tracker.on_status(hash, &TxStatus::InBlock(tx(9)));
        assert_eq!(tracker.get_record(&hash).unwrap().block, Some(tx(9)));
    }

    #[test]
    fn test_expire_unsettled() {
        let now = Arc::new(std::sync::atomic::AtomicU64::new(1_000));
        let clock = now.clone();
        let tracker = LifecycleTracker::new(1000)
            .with_time_fn(move || clock.load(std::sync::atomic::Ordering::SeqCst));

        tracker.on_dispatched(tx(1), &call());
        tracker.on_dispatched(tx(2), &call());
        tracker.on_settled(tx(2), &Ok(SubmissionOutcome::new(tx(2), tx(9))));

        now.store(10_000, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(tracker.expire_unsettled(60_000), 0);
        assert_eq!(tracker.expire_unsettled(5_000), 1);
        assert_eq!(tracker.get_status(&tx(1)), None);
        assert_eq!(tracker.get_status(&tx(2)), Some(SubmissionStatus::InBlock));
    }
}
