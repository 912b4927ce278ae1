//! Core data model for the sync pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event type recorded for the baseline row written at authorization
pub const INIT_EVENT_TYPE: &str = "INIT";

/// Delivery status of a sync-log row
///
/// Stored as a small integer code. `Success` and `Ignored` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    /// Recorded, not yet handed to the downstream consumer
    Pending,
    /// Handed over, awaiting confirmation
    Sent,
    /// Confirmed by the downstream consumer
    Success,
    /// Delivery failed, eligible for another sweep
    Failed,
    /// Retry budget exhausted; quarantined for operators
    Ignored,
}

impl SyncStatus {
    /// Persisted code
    pub fn code(self) -> i16 {
        match self {
            SyncStatus::Pending => 0,
            SyncStatus::Sent => 1,
            SyncStatus::Success => 2,
            SyncStatus::Failed => 3,
            SyncStatus::Ignored => 4,
        }
    }

    /// Parse a persisted code
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(SyncStatus::Pending),
            1 => Some(SyncStatus::Sent),
            2 => Some(SyncStatus::Success),
            3 => Some(SyncStatus::Failed),
            4 => Some(SyncStatus::Ignored),
            _ => None,
        }
    }

    /// No transition is permitted out of a terminal status
    pub fn is_terminal(self) -> bool {
        matches!(self, SyncStatus::Success | SyncStatus::Ignored)
    }

    /// Lower-case name, used for metric labels and query parameters
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Sent => "sent",
            SyncStatus::Success => "success",
            SyncStatus::Failed => "failed",
            SyncStatus::Ignored => "ignored",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authorization baseline of one end user
///
/// Written once when the user authorizes; read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRecord {
    /// Surrogate id
    pub id: i64,
    /// User identifier (unique)
    pub user_id: String,
    /// On-chain wallet address (unique)
    pub address: String,
    /// Digital-currency wallet identifier
    pub dcid: String,
    /// Ledger height the baseline was taken at
    pub baseline_height: i64,
    /// Balance at the baseline height
    pub baseline_balance: i64,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Everything needed to authorize a user in one atomic step
#[derive(Debug, Clone)]
pub struct NewAuthorization {
    /// User identifier
    pub user_id: String,
    /// On-chain wallet address
    pub address: String,
    /// Digital-currency wallet identifier
    pub dcid: String,
    /// Ledger height of the baseline snapshot
    pub baseline_height: i64,
    /// Balance of the baseline snapshot
    pub baseline_balance: i64,
    /// Baseline row handed to the downstream consumer
    pub init_entry: NewSyncLogEntry,
}

/// Opaque record produced by an event source
///
/// A JSON `null` stands for a nil record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawEvent(pub serde_json::Value);

impl RawEvent {
    /// Wrap a JSON value
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Nil record
    pub fn nil() -> Self {
        Self(serde_json::Value::Null)
    }
}

/// Canonical balance change decoded from a raw ledger event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Wallet address the change applies to
    pub address: String,
    /// Ledger height of the change
    pub height: i64,
    /// Balance after the change
    pub balance: i64,
    /// Signed change amount
    pub change_value: i64,
    /// Transaction identifier (deduplication key)
    pub tx_id: String,
    /// Contract that emitted the event
    pub contract_name: String,
    /// Event topic
    pub topic: String,
    /// Chain the event came from
    pub chain_id: String,
}

/// One persisted change, append-only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    /// Surrogate id
    pub id: i64,
    /// Owning user
    pub user_id: String,
    /// Ledger height of the change
    pub block_height: i64,
    /// Balance after the change
    pub balance_after: i64,
    /// Signed change amount
    pub change_value: i64,
    /// Topic / event type
    pub event_type: String,
    /// Transaction identifier (unique)
    pub tx_id: String,
    /// Contract the change came from
    pub contract_name: String,
    /// Chain the change came from
    pub chain_id: String,
    /// Delivery status
    pub status: SyncStatus,
    /// Persisted strategic failure counter
    pub retry_count: i32,
    /// Last delivery error
    pub error_message: Option<String>,
    /// Insert time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

/// Insert form of a sync-log row; always starts `Pending` with no retries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSyncLogEntry {
    /// Owning user
    pub user_id: String,
    /// Ledger height of the change
    pub block_height: i64,
    /// Balance after the change
    pub balance_after: i64,
    /// Signed change amount
    pub change_value: i64,
    /// Topic / event type
    pub event_type: String,
    /// Transaction identifier (unique)
    pub tx_id: String,
    /// Contract the change came from
    pub contract_name: String,
    /// Chain the change came from
    pub chain_id: String,
}

impl NewSyncLogEntry {
    /// Row for an accepted change of an authorized user
    pub fn from_change(event: &ChangeEvent, user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            block_height: event.height,
            balance_after: event.balance,
            change_value: event.change_value,
            event_type: event.topic.clone(),
            tx_id: event.tx_id.clone(),
            contract_name: event.contract_name.clone(),
            chain_id: event.chain_id.clone(),
        }
    }
}

/// Cached per-user state, advanced on successful delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserVersionSnapshot {
    /// Owning user
    pub user_id: String,
    /// Number of successful deliveries since authorization
    pub current_version: i64,
    /// Balance after the latest delivered change
    pub current_balance: i64,
    /// Ledger height of the latest delivered change
    pub block_height: i64,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// Record handed to the downstream consumer
///
/// Built from the persisted row so every delivery path sends the same thing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Owning user
    pub user_id: String,
    /// Ledger height of the change
    pub block_height: i64,
    /// Balance after the change
    pub balance_after: i64,
    /// Signed change amount
    pub change_value: i64,
    /// Topic / event type
    pub event_type: String,
    /// Transaction identifier; the consumer deduplicates on it
    pub tx_id: String,
    /// Contract the change came from
    pub contract_name: String,
    /// Chain the change came from
    pub chain_id: String,
}

impl From<&SyncLogEntry> for ChangeRecord {
    fn from(entry: &SyncLogEntry) -> Self {
        Self {
            user_id: entry.user_id.clone(),
            block_height: entry.block_height,
            balance_after: entry.balance_after,
            change_value: entry.change_value,
            event_type: entry.event_type.clone(),
            tx_id: entry.tx_id.clone(),
            contract_name: entry.contract_name.clone(),
            chain_id: entry.chain_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_round_trip() {
        for status in [
            SyncStatus::Pending,
            SyncStatus::Sent,
            SyncStatus::Success,
            SyncStatus::Failed,
            SyncStatus::Ignored,
        ] {
            assert_eq!(SyncStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(SyncStatus::from_code(9), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(SyncStatus::Success.is_terminal());
        assert!(SyncStatus::Ignored.is_terminal());
        assert!(!SyncStatus::Failed.is_terminal());
        assert!(!SyncStatus::Pending.is_terminal());
    }
}
