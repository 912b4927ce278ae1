//! Error types for the sync pipeline

use crate::types::SyncStatus;
use thiserror::Error;

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Sync pipeline errors
#[derive(Error, Debug)]
pub enum Error {
    /// Raw ledger event could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Persistence layer failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Single downstream delivery attempt failed
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// All in-process delivery attempts failed
    #[error("all {attempts} tactical retries failed: {last_error}")]
    DeliveryExhausted {
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt
        last_error: String,
    },

    /// Event source rejected the subscription or failed
    #[error("Event source error: {0}")]
    Source(String),

    /// Event source closed its sequence
    #[error("event channel closed")]
    SourceClosed,

    /// Worker pool no longer accepts tasks
    #[error("worker pool has been stopped")]
    PoolClosed,

    /// Operation abandoned because the shared cancellation signal fired
    #[error("operation cancelled")]
    Cancelled,

    /// Status transition not permitted by the state machine
    #[error("Invalid status transition from {from} on {outcome}")]
    InvalidTransition {
        /// Status the row was in
        from: SyncStatus,
        /// Outcome that was applied
        outcome: &'static str,
    },

    /// Row not found by primary key
    #[error("Sync log entry not found: {0}")]
    EntryNotFound(i64),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Typed failures of the raw event decode step
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Source delivered a null record
    #[error("nil event received")]
    NilEvent,

    /// Envelope did not match the contract event shape
    #[error("failed to decode event envelope: {0}")]
    Envelope(String),

    /// Envelope carried no payload
    #[error("event data is empty")]
    EmptyPayload,

    /// Payload did not match the balance change shape
    #[error("failed to decode change payload: {0}")]
    Payload(String),

    /// Payload decoded but is missing a required value
    #[error("missing field: {0}")]
    MissingField(&'static str),
}

impl Error {
    /// Whether the error came from the persistence layer
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Storage(_))
    }
}
