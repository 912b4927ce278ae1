//! Idempotent sync-log writer
//!
//! Sole creator of sync-log rows. Insertion is keyed on the transaction id,
//! so a ledger redelivering a change after a listener restart is harmless.

use crate::metrics::SyncMetrics;
use crate::store::{RecordOutcome, SyncLogStore};
use crate::types::{ChangeEvent, NewSyncLogEntry};
use crate::Result;
use std::sync::Arc;
use tracing::{debug, info};

/// Writes accepted changes as `Pending` rows
#[derive(Clone)]
pub struct SyncLogWriter {
    logs: Arc<dyn SyncLogStore>,
    metrics: Arc<SyncMetrics>,
}

impl SyncLogWriter {
    /// Writer over `logs`
    pub fn new(logs: Arc<dyn SyncLogStore>, metrics: Arc<SyncMetrics>) -> Self {
        Self { logs, metrics }
    }

    /// Record `event` for `user_id`; a known transaction id returns the
    /// existing row untouched
    pub async fn record_change(&self, event: &ChangeEvent, user_id: &str) -> Result<RecordOutcome> {
        let entry = NewSyncLogEntry::from_change(event, user_id);
        let outcome = self.logs.insert_or_ignore(&entry).await?;

        match &outcome {
            RecordOutcome::Inserted(row) => {
                self.metrics.record_inserted();
                info!(
                    id = row.id,
                    user_id = %row.user_id,
                    tx_id = %row.tx_id,
                    height = row.block_height,
                    "Recorded balance change"
                );
            }
            RecordOutcome::Duplicate(row) => {
                self.metrics.record_duplicate();
                debug!(
                    id = row.id,
                    tx_id = %row.tx_id,
                    status = %row.status,
                    "Transaction already recorded"
                );
            }
        }

        Ok(outcome)
    }
}
