//! Submission coordinator
//!
//! Shares one ledger connection between workflow steps, applies default
//! submit options and keeps a lifecycle record of every submission.

use crate::ledger::{Call, Connection, Hash32};
use crate::lifecycle::{LifecycleStatistics, LifecycleTracker, SubmissionRecord, SubmissionStatus};
use crate::signer::Signer;
use crate::submission::{submit_observed, SubmissionOutcome, SubmitOptions};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Submitter configuration
#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    /// Options applied by [`Submitter::submit`]
    pub options: SubmitOptions,

    /// Maximum number of submissions to track
    pub max_tracked_submissions: usize,

    /// Maximum age for settled submissions before pruning (milliseconds)
    pub max_settled_age_ms: u64,

    /// Maximum age for unsettled submissions before expiry (milliseconds)
    pub max_unsettled_age_ms: u64,

    /// Interval for cleanup tasks (milliseconds)
    pub cleanup_interval_ms: u64,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            options: SubmitOptions::default(),
            max_tracked_submissions: 10_000,
            max_settled_age_ms: 3_600_000,    // 1 hour
            max_unsettled_age_ms: 86_400_000, // 24 hours
            cleanup_interval_ms: 60_000,      // 1 minute
        }
    }
}

impl SubmitterConfig {
    pub fn with_options(mut self, options: SubmitOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_max_tracked_submissions(mut self, max: usize) -> Self {
        self.max_tracked_submissions = max;
        self
    }

    pub fn with_max_settled_age_ms(mut self, age_ms: u64) -> Self {
        self.max_settled_age_ms = age_ms;
        self
    }

    pub fn with_max_unsettled_age_ms(mut self, age_ms: u64) -> Self {
        self.max_unsettled_age_ms = age_ms;
        self
    }

    pub fn with_cleanup_interval_ms(mut self, interval_ms: u64) -> Self {
        self.cleanup_interval_ms = interval_ms;
        self
    }
}

/// Submission coordinator
///
/// Each call to [`Submitter::submit`] is an independent lifecycle with its
/// own status stream; many may be in flight at once.
pub struct Submitter<C: ?Sized> {
    /// Configuration
    config: SubmitterConfig,

    /// Shared ledger session
    connection: Arc<C>,

    /// Lifecycle tracker
    tracker: LifecycleTracker,
}

impl<C> Submitter<C>
where
    C: Connection + ?Sized + 'static,
{
    /// Create a new submitter
    pub fn new(config: SubmitterConfig, connection: Arc<C>) -> Self {
        let tracker = LifecycleTracker::new(config.max_tracked_submissions);
        Self {
            config,
            connection,
            tracker,
        }
    }

    /// Replace the tracker (for testing)
    pub fn with_tracker(mut self, tracker: LifecycleTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn connection(&self) -> &Arc<C> {
        &self.connection
    }

    pub fn config(&self) -> &SubmitterConfig {
        &self.config
    }

    /// Submit a call with the configured options
    pub async fn submit(&self, call: &Call, signer: &dyn Signer) -> Result<SubmissionOutcome> {
        let options = self.config.options.clone();
        self.submit_with(call, signer, &options).await
    }

    /// Submit a call with explicit options
    pub async fn submit_with(
        &self,
        call: &Call,
        signer: &dyn Signer,
        options: &SubmitOptions,
    ) -> Result<SubmissionOutcome> {
        // Dropping this future drops the slot, which abandons the record
        let slot = self.tracker.reserve()?;

        let outcome =
            submit_observed(self.connection.as_ref(), call, signer, options, &slot).await?;

        info!(
            "{} settled: tx {} in block {}",
            call, outcome.transaction_id, outcome.block_id
        );
        Ok(outcome)
    }

    /// Wrap `inner` in a relayed call and submit it
    pub async fn submit_relayed(
        &self,
        inner: Call,
        signer: &dyn Signer,
    ) -> Result<SubmissionOutcome> {
        let call = Call::relayed(inner);
        self.submit(&call, signer).await
    }

    /// Get submission status
    pub fn get_status(&self, tx_hash: &Hash32) -> Option<SubmissionStatus> {
        self.tracker.get_status(tx_hash)
    }

    /// Get submission record
    pub fn get_record(&self, tx_hash: &Hash32) -> Option<SubmissionRecord> {
        self.tracker.get_record(tx_hash)
    }

    /// Get submitter statistics
    pub fn get_statistics(&self) -> LifecycleStatistics {
        self.tracker.get_statistics()
    }

    /// Prune settled submissions and expire stale unsettled ones
    pub fn run_cleanup(&self) -> usize {
        debug!("Running cleanup tasks");

        let pruned = self.tracker.prune_settled(self.config.max_settled_age_ms);
        if pruned > 0 {
            info!("Pruned {} settled submissions", pruned);
        }

        let expired = self
            .tracker
            .expire_unsettled(self.config.max_unsettled_age_ms);
        if expired > 0 {
            info!("Expired {} unsettled submissions", expired);
        }
        pruned + expired
    }

    /// Start the periodic cleanup task
    pub fn start_background_tasks(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let submitter = self;
        let handle = tokio::spawn(async move {
            let period = Duration::from_millis(submitter.config.cleanup_interval_ms);
            loop {
                tokio::time::sleep(period).await;
                submitter.run_cleanup();
            }
        });

        info!("Submitter background tasks started");
        handle
    }
}
