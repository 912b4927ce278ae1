//! Reconciliation poller (strategic retry)
//!
//! Periodic sweep over rows the synchronous path could not confirm: rows
//! still `Pending`, `Failed` rows, and `Sent` rows that have gone stale.
//! One delivery attempt per row per sweep. Rows that run out of budget are
//! quarantined as `Ignored`; rows selected with the budget already spent
//! (after `max_retries` was lowered) are quarantined without an attempt.

use crate::config::RetryPolicy;
use crate::consumer::DownstreamConsumer;
use crate::delivery::{confirm, quarantine};
use crate::metrics::{DeliveryPath, SyncMetrics};
use crate::status::{next_status, Outcome};
use crate::store::{RetryQuery, SnapshotStore, StatusUpdate, SyncLogStore};
use crate::types::{ChangeRecord, SyncLogEntry, SyncStatus};
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counters of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Rows returned by the eligibility query
    pub selected: usize,
    /// Rows moved to `Success`
    pub delivered: usize,
    /// Rows left `Failed` with budget remaining
    pub failed: usize,
    /// Rows moved to `Ignored`
    pub quarantined: usize,
    /// Rows claimed elsewhere or that hit a storage error
    pub skipped: usize,
}

enum RowResult {
    Delivered,
    Failed,
    Quarantined,
    Skipped,
}

/// Strategic retry sweep
#[derive(Clone)]
pub struct ReconciliationPoller {
    logs: Arc<dyn SyncLogStore>,
    snapshots: Arc<dyn SnapshotStore>,
    consumer: Arc<dyn DownstreamConsumer>,
    policy: RetryPolicy,
    interval: Duration,
    metrics: Arc<SyncMetrics>,
}

impl ReconciliationPoller {
    /// Create poller sweeping every `interval`
    pub fn new(
        logs: Arc<dyn SyncLogStore>,
        snapshots: Arc<dyn SnapshotStore>,
        consumer: Arc<dyn DownstreamConsumer>,
        policy: RetryPolicy,
        interval: Duration,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            logs,
            snapshots,
            consumer,
            policy,
            interval,
            metrics,
        }
    }

    /// Sweep on every tick until `cancel` fires
    ///
    /// A failed sweep is logged and retried on the next tick.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(interval_ms = self.interval.as_millis() as u64, "Reconciliation poller started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Reconciliation poller stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            match self.sweep(&cancel).await {
                Ok(report) if report.selected > 0 => info!(?report, "Reconciliation sweep finished"),
                Ok(_) => {}
                Err(e) => error!(error = %e, "Reconciliation sweep failed"),
            }
        }
    }

    /// Run one sweep
    ///
    /// Rows are handled in (user, height) order. A bad row never stops the
    /// sweep; cancellation stops it between rows.
    pub async fn sweep(&self, cancel: &CancellationToken) -> Result<SweepReport> {
        let sent_before = Utc::now()
            - chrono::Duration::from_std(self.policy.sent_stale_after())
                .unwrap_or_else(|_| chrono::Duration::zero());
        let rows = self
            .logs
            .fetch_retryable(&RetryQuery {
                sent_before,
                limit: self.policy.sweep_batch_limit,
            })
            .await?;

        let mut report = SweepReport {
            selected: rows.len(),
            ..SweepReport::default()
        };

        for row in rows {
            if cancel.is_cancelled() {
                debug!("Sweep interrupted by cancellation");
                break;
            }
            let result = match self.retry_row(&row).await {
                Ok(result) => result,
                Err(e) => {
                    error!(id = row.id, tx_id = %row.tx_id, error = %e, "Failed to retry row");
                    RowResult::Skipped
                }
            };
            match result {
                RowResult::Delivered => report.delivered += 1,
                RowResult::Failed => report.failed += 1,
                RowResult::Quarantined => report.quarantined += 1,
                RowResult::Skipped => report.skipped += 1,
            }
        }

        Ok(report)
    }

    async fn retry_row(&self, row: &SyncLogEntry) -> Result<RowResult> {
        next_status(row.status, Outcome::Dispatched, &self.policy)?;
        let Some(claimed) = self.logs.claim(row.id, row.status, row.updated_at).await? else {
            debug!(id = row.id, "Row changed since it was selected, skipping");
            return Ok(RowResult::Skipped);
        };

        if claimed.retry_count >= self.policy.max_retries {
            next_status(SyncStatus::Sent, Outcome::BudgetSpent, &self.policy)?;
            let last_error = claimed.error_message.clone().unwrap_or_default();
            quarantine(
                &*self.logs,
                &self.metrics,
                &claimed,
                claimed.retry_count,
                &last_error,
            )
            .await?;
            return Ok(RowResult::Quarantined);
        }

        let record = ChangeRecord::from(&claimed);
        let error = match self.consumer.deliver(&record).await {
            Ok(()) => {
                self.metrics.record_attempt(DeliveryPath::Strategic, true);
                confirm(&*self.logs, &*self.snapshots, &self.policy, &claimed).await?;
                info!(id = claimed.id, tx_id = %claimed.tx_id, "Delivered change on retry");
                return Ok(RowResult::Delivered);
            }
            Err(e) => e,
        };
        self.metrics.record_attempt(DeliveryPath::Strategic, false);

        let retry_count = self.logs.increment_retry_count(claimed.id).await?;
        let status = next_status(
            SyncStatus::Sent,
            Outcome::SweepFailed { retry_count },
            &self.policy,
        )?;

        if status == SyncStatus::Ignored {
            quarantine(
                &*self.logs,
                &self.metrics,
                &claimed,
                retry_count,
                &error.to_string(),
            )
            .await?;
            return Ok(RowResult::Quarantined);
        }

        self.logs
            .update_status(claimed.id, &StatusUpdate::with_error(status, error.to_string()))
            .await?;
        warn!(
            id = claimed.id,
            tx_id = %claimed.tx_id,
            retry_count,
            error = %error,
            "Retry delivery failed"
        );
        Ok(RowResult::Failed)
    }
}
