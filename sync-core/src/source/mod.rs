//! Event source seam
//!
//! An event source turns a height range and topic filter into a lazy,
//! cancellable sequence of opaque records delivered over a bounded channel.
//! Terminal errors (an unknown contract, say) are returned from
//! [`EventSource::subscribe`] before the first record; a closed channel
//! means the source has nothing more to say.

pub mod scripted;

use crate::types::RawEvent;
use crate::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use scripted::ScriptedSource;

/// Channel capacity used by the bundled sources
pub const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Upper end of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndHeight {
    /// Stop after this height (inclusive)
    Bounded(i64),
    /// Follow the chain head forever
    Unbounded,
}

impl EndHeight {
    /// Whether `height` is inside the range
    pub fn admits(self, height: i64) -> bool {
        match self {
            EndHeight::Bounded(end) => height <= end,
            EndHeight::Unbounded => true,
        }
    }
}

/// What to subscribe to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionFilter {
    /// First height to deliver (inclusive)
    pub start_height: i64,
    /// Last height to deliver
    pub end_height: EndHeight,
    /// Emitting contract
    pub contract_name: String,
    /// Event topic
    pub topic: String,
}

/// Asynchronous source of opaque ledger events
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Open a subscription; the sequence ends when `cancel` fires
    async fn subscribe(
        &self,
        filter: SubscriptionFilter,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<RawEvent>>;
}
