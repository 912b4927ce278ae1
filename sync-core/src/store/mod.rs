//! Persistence seams of the pipeline
//!
//! The persisted sync-log is the only state shared between the synchronous
//! delivery path and the reconciliation poller. Every mutation is a
//! single-row statement keyed by primary key; the retry counter is bumped
//! with an atomic increment on the database side.

pub mod memory;

use crate::types::{
    AuthorizationRecord, NewAuthorization, NewSyncLogEntry, SyncLogEntry, SyncStatus,
    UserVersionSnapshot,
};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::MemoryStore;

/// Result of an insert-or-ignore keyed on transaction id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// A new row was written
    Inserted(SyncLogEntry),
    /// A row with the same transaction id already existed; returned unchanged
    Duplicate(SyncLogEntry),
}

impl RecordOutcome {
    /// The row, new or existing
    pub fn entry(&self) -> &SyncLogEntry {
        match self {
            RecordOutcome::Inserted(entry) | RecordOutcome::Duplicate(entry) => entry,
        }
    }

    /// Whether the call wrote a row
    pub fn is_inserted(&self) -> bool {
        matches!(self, RecordOutcome::Inserted(_))
    }
}

/// How a status update treats the error message column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorField {
    /// Set to NULL
    Clear,
    /// Overwrite
    Set(String),
}

/// Multi-field update applied to one row by primary key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    /// New status
    pub status: SyncStatus,
    /// New retry count; `None` leaves the column untouched
    pub retry_count: Option<i32>,
    /// Error message handling
    pub error: ErrorField,
}

impl StatusUpdate {
    /// Confirmed delivery: retry count reset, error cleared
    pub fn success() -> Self {
        Self {
            status: SyncStatus::Success,
            retry_count: Some(0),
            error: ErrorField::Clear,
        }
    }

    /// Status change recording an error, counter already bumped atomically
    pub fn with_error(status: SyncStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            retry_count: None,
            error: ErrorField::Set(message.into()),
        }
    }
}

/// Filter of the reconciliation sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryQuery {
    /// `Sent` rows last touched before this instant count as unconfirmed
    pub sent_before: DateTime<Utc>,
    /// Maximum rows returned
    pub limit: i64,
}

/// Read access to authorization baselines, plus the one-shot authorize write
#[async_trait]
pub trait AuthorizationStore: Send + Sync {
    /// Baseline of the user owning `address`
    async fn find_by_address(&self, address: &str) -> Result<Option<AuthorizationRecord>>;

    /// Baseline of `user_id`
    async fn find_by_user_id(&self, user_id: &str) -> Result<Option<AuthorizationRecord>>;

    /// Atomically create the authorization record and the version-0
    /// snapshot (insert-or-ignore); the baseline sync-log row is written only
    /// when the snapshot was new
    async fn authorize(&self, new: NewAuthorization) -> Result<AuthorizationRecord>;
}

/// Sync-log table
#[async_trait]
pub trait SyncLogStore: Send + Sync {
    /// Insert a `Pending` row unless the transaction id is already present
    async fn insert_or_ignore(&self, entry: &NewSyncLogEntry) -> Result<RecordOutcome>;

    /// Row by primary key
    async fn get(&self, id: i64) -> Result<Option<SyncLogEntry>>;

    /// Highest recorded height for a contract and event type
    async fn max_height(&self, contract_name: &str, event_type: &str) -> Result<Option<i64>>;

    /// Move a row to `Sent` if it is still in `expected` and untouched since
    /// `seen_updated_at`; returns the claimed row
    async fn claim(
        &self,
        id: i64,
        expected: SyncStatus,
        seen_updated_at: DateTime<Utc>,
    ) -> Result<Option<SyncLogEntry>>;

    /// Atomically add one to `retry_count`, returning the new value
    async fn increment_retry_count(&self, id: i64) -> Result<i32>;

    /// Apply `update` unless the row is terminal; returns whether a row changed
    async fn update_status(&self, id: i64, update: &StatusUpdate) -> Result<bool>;

    /// Rows eligible for a sweep, ordered by user then height
    async fn fetch_retryable(&self, query: &RetryQuery) -> Result<Vec<SyncLogEntry>>;

    /// Rows in `status`, newest first
    async fn list_by_status(&self, status: SyncStatus, limit: i64) -> Result<Vec<SyncLogEntry>>;
}

/// Per-user version snapshots
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Snapshot of `user_id`
    async fn get_snapshot(&self, user_id: &str) -> Result<Option<UserVersionSnapshot>>;

    /// Bump the version and set the balance, unless the snapshot already
    /// reflects a higher height; returns whether it moved
    async fn advance_snapshot(&self, user_id: &str, block_height: i64, balance: i64)
        -> Result<bool>;
}
