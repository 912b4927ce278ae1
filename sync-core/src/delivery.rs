//! Delivery engine (tactical retry)
//!
//! Runs synchronously right after a row is recorded: claim it as `Sent`,
//! try the downstream consumer a few times in-process, then settle the row
//! through the state machine. Longer outages are left to the
//! reconciliation poller via the persisted retry counter.

use crate::config::RetryPolicy;
use crate::consumer::DownstreamConsumer;
use crate::metrics::{DeliveryPath, SyncMetrics};
use crate::status::{next_status, Outcome, MAX_RETRIES_MESSAGE};
use crate::store::{SnapshotStore, StatusUpdate, SyncLogStore};
use crate::types::{ChangeRecord, SyncLogEntry, SyncStatus};
use crate::{Error, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How a delivery run ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Consumer confirmed; row is `Success`
    Confirmed,
    /// Another actor moved the row first; nothing done
    Skipped,
}

/// Drives freshly recorded rows through the tactical retry loop
#[derive(Clone)]
pub struct DeliveryEngine {
    logs: Arc<dyn SyncLogStore>,
    snapshots: Arc<dyn SnapshotStore>,
    consumer: Arc<dyn DownstreamConsumer>,
    policy: RetryPolicy,
    metrics: Arc<SyncMetrics>,
}

impl DeliveryEngine {
    /// Create engine
    pub fn new(
        logs: Arc<dyn SyncLogStore>,
        snapshots: Arc<dyn SnapshotStore>,
        consumer: Arc<dyn DownstreamConsumer>,
        policy: RetryPolicy,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            logs,
            snapshots,
            consumer,
            policy,
            metrics,
        }
    }

    /// Deliver `entry` as read right after insertion
    ///
    /// Exhausting every attempt bumps the persisted retry count and returns
    /// [`Error::DeliveryExhausted`]; the caller logs it and moves on.
    /// Cancellation between attempts leaves the row `Sent` for the poller.
    pub async fn deliver(&self, entry: &SyncLogEntry, cancel: &CancellationToken) -> Result<Delivery> {
        next_status(entry.status, Outcome::Dispatched, &self.policy)?;
        let Some(claimed) = self
            .logs
            .claim(entry.id, entry.status, entry.updated_at)
            .await?
        else {
            debug!(id = entry.id, tx_id = %entry.tx_id, "Row claimed elsewhere, skipping delivery");
            return Ok(Delivery::Skipped);
        };

        let record = ChangeRecord::from(&claimed);
        let attempts = self.policy.tactical_attempts;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.consumer.deliver(&record).await {
                Ok(()) => {
                    self.metrics.record_attempt(DeliveryPath::Tactical, true);
                    confirm(&*self.logs, &*self.snapshots, &self.policy, &claimed).await?;
                    info!(id = claimed.id, tx_id = %claimed.tx_id, attempt, "Delivered change");
                    return Ok(Delivery::Confirmed);
                }
                Err(e) => {
                    self.metrics.record_attempt(DeliveryPath::Tactical, false);
                    warn!(
                        id = claimed.id,
                        tx_id = %claimed.tx_id,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Delivery attempt failed"
                    );
                    last_error = e.to_string();
                }
            }

            if attempt < attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(id = claimed.id, "Delivery cancelled, row left in Sent");
                        return Err(Error::Cancelled);
                    }
                    _ = tokio::time::sleep(self.policy.tactical_backoff()) => {}
                }
            }
        }

        let retry_count = self.logs.increment_retry_count(claimed.id).await?;
        let status = next_status(
            SyncStatus::Sent,
            Outcome::TacticalExhausted { retry_count },
            &self.policy,
        )?;

        match status {
            SyncStatus::Ignored => {
                quarantine(&*self.logs, &self.metrics, &claimed, retry_count, &last_error).await?;
            }
            _ => {
                self.logs
                    .update_status(claimed.id, &StatusUpdate::with_error(status, last_error.clone()))
                    .await?;
                if status == SyncStatus::Failed {
                    warn!(id = claimed.id, tx_id = %claimed.tx_id, retry_count, "Row marked Failed");
                }
            }
        }

        Err(Error::DeliveryExhausted {
            attempts,
            last_error,
        })
    }
}

/// Settle a confirmed delivery: `Success`, counter reset, error cleared,
/// then advance the user's snapshot
///
/// Snapshot failures are logged; the row stays `Success`.
pub(crate) async fn confirm(
    logs: &dyn SyncLogStore,
    snapshots: &dyn SnapshotStore,
    policy: &RetryPolicy,
    entry: &SyncLogEntry,
) -> Result<()> {
    let status = next_status(SyncStatus::Sent, Outcome::Delivered, policy)?;
    let update = StatusUpdate {
        status,
        ..StatusUpdate::success()
    };
    if !logs.update_status(entry.id, &update).await? {
        debug!(id = entry.id, "Row already terminal, success not recorded");
        return Ok(());
    }

    match snapshots
        .advance_snapshot(&entry.user_id, entry.block_height, entry.balance_after)
        .await
    {
        Ok(true) => {}
        Ok(false) => debug!(
            user_id = %entry.user_id,
            height = entry.block_height,
            "Snapshot already ahead of delivered change"
        ),
        Err(e) => error!(user_id = %entry.user_id, error = %e, "Failed to advance user snapshot"),
    }
    Ok(())
}

/// Move a row out of the retry loop for good
pub(crate) async fn quarantine(
    logs: &dyn SyncLogStore,
    metrics: &SyncMetrics,
    entry: &SyncLogEntry,
    retry_count: i32,
    last_error: &str,
) -> Result<()> {
    logs.update_status(
        entry.id,
        &StatusUpdate::with_error(SyncStatus::Ignored, MAX_RETRIES_MESSAGE),
    )
    .await?;
    metrics.record_quarantined();
    error!(
        id = entry.id,
        user_id = %entry.user_id,
        tx_id = %entry.tx_id,
        retry_count,
        last_error,
        "Row quarantined, manual intervention required"
    );
    Ok(())
}
