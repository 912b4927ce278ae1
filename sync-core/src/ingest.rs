//! Ingestion and ordering filter
//!
//! Decodes a raw record, resolves the owning user through their
//! authorization baseline and discards changes that predate it. Height is
//! the only ordering guarantee; exact redeliveries are absorbed by the
//! writer's transaction-id key.

use crate::decode::decode_event;
use crate::metrics::SyncMetrics;
use crate::store::{AuthorizationStore, RecordOutcome};
use crate::types::{RawEvent, SyncLogEntry};
use crate::writer::SyncLogWriter;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, warn};

/// Why a record produced no row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Record could not be decoded
    Decode,
    /// Address belongs to no authorized user
    Unauthorized,
    /// Height is below the user's baseline
    Stale,
}

impl DropReason {
    /// Metric label
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::Decode => "decode",
            DropReason::Unauthorized => "unauthorized",
            DropReason::Stale => "stale",
        }
    }
}

/// Result of ingesting one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// New `Pending` row
    Recorded(SyncLogEntry),
    /// Transaction id already known; existing row
    Duplicate(SyncLogEntry),
    /// Nothing written
    Dropped(DropReason),
}

/// Whether a change at `event_height` is causally after a baseline taken at
/// `baseline_height`
pub fn admits(baseline_height: i64, event_height: i64) -> bool {
    event_height >= baseline_height
}

/// Decode, authorize and order raw records before they reach the writer
#[derive(Clone)]
pub struct OrderingFilter {
    auths: Arc<dyn AuthorizationStore>,
    writer: SyncLogWriter,
    metrics: Arc<SyncMetrics>,
}

impl OrderingFilter {
    /// Filter reading baselines from `auths` and writing through `writer`
    pub fn new(
        auths: Arc<dyn AuthorizationStore>,
        writer: SyncLogWriter,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            auths,
            writer,
            metrics,
        }
    }

    /// Ingest one record
    ///
    /// Decode failures, unknown addresses and stale heights are reported as
    /// [`IngestOutcome::Dropped`]; only persistence failures are errors.
    pub async fn ingest(&self, raw: &RawEvent) -> Result<IngestOutcome> {
        self.metrics.record_received();

        let event = match decode_event(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable event");
                return Ok(self.drop_with(DropReason::Decode));
            }
        };

        let Some(auth) = self.auths.find_by_address(&event.address).await? else {
            debug!(address = %event.address, tx_id = %event.tx_id, "Address not authorized, skipping");
            return Ok(self.drop_with(DropReason::Unauthorized));
        };

        if !admits(auth.baseline_height, event.height) {
            debug!(
                user_id = %auth.user_id,
                tx_id = %event.tx_id,
                height = event.height,
                baseline_height = auth.baseline_height,
                "Event predates authorization baseline, skipping"
            );
            return Ok(self.drop_with(DropReason::Stale));
        }

        let outcome = match self.writer.record_change(&event, &auth.user_id).await? {
            RecordOutcome::Inserted(row) => IngestOutcome::Recorded(row),
            RecordOutcome::Duplicate(row) => IngestOutcome::Duplicate(row),
        };
        Ok(outcome)
    }

    fn drop_with(&self, reason: DropReason) -> IngestOutcome {
        self.metrics.record_dropped(reason.as_str());
        IngestOutcome::Dropped(reason)
    }
}
