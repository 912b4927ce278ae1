//! Chain Sync Core
//!
//! Relays balance-change events from a smart-contract event stream into a
//! relational sync-log and forwards each change to a downstream consumer.
//!
//! # Architecture
//!
//! - **Ordering filter**: drops events below the user's authorization baseline
//! - **Idempotent writer**: one row per transaction id, insert-or-ignore
//! - **Tactical retry**: bounded in-process attempts right after recording
//! - **Strategic retry**: periodic sweep over unconfirmed rows, then quarantine
//!
//! # Invariants
//!
//! - At most one sync-log row per transaction id
//! - No row for a change below its user's baseline height
//! - No status transition out of `Success` or `Ignored`
//! - Persisted status is the only coordination between delivery paths

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod config;
pub mod consumer;
pub mod decode;
pub mod delivery;
pub mod error;
pub mod ingest;
pub mod listener;
pub mod metrics;
pub mod pipeline;
pub mod poller;
pub mod scheduler;
pub mod source;
pub mod status;
pub mod store;
pub mod types;
pub mod writer;

// Re-exports
pub use config::{RetryPolicy, SyncConfig};
pub use consumer::DownstreamConsumer;
pub use delivery::{Delivery, DeliveryEngine};
pub use error::{DecodeError, Error, Result};
pub use ingest::{DropReason, IngestOutcome, OrderingFilter};
pub use listener::EventListener;
pub use metrics::SyncMetrics;
pub use pipeline::SyncPipeline;
pub use poller::{ReconciliationPoller, SweepReport};
pub use scheduler::WorkerPool;
pub use source::{EndHeight, EventSource, SubscriptionFilter};
pub use status::{next_status, Outcome};
pub use store::{AuthorizationStore, MemoryStore, SnapshotStore, SyncLogStore};
pub use types::{
    AuthorizationRecord, ChangeEvent, ChangeRecord, NewAuthorization, NewSyncLogEntry, RawEvent,
    SyncLogEntry, SyncStatus, UserVersionSnapshot,
};
pub use writer::SyncLogWriter;
