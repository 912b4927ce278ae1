//! Scripted event source replaying a fixed list of records

use super::{EventSource, SubscriptionFilter, EVENT_CHANNEL_CAPACITY};
use crate::types::RawEvent;
use crate::{Error, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Contract name the scripted source refuses, to exercise subscribe errors
pub const REJECTED_CONTRACT: &str = "error_contract";

/// Replays records in order, honouring the height range and cancellation
///
/// With `keep_open` the channel stays open after the last record until the
/// subscription is cancelled, like a live chain with no new blocks.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    events: Vec<RawEvent>,
    keep_open: bool,
}

impl ScriptedSource {
    /// Source that closes after the last record
    pub fn new(events: Vec<RawEvent>) -> Self {
        Self {
            events,
            keep_open: false,
        }
    }

    /// Source that stays open after the last record
    pub fn live(events: Vec<RawEvent>) -> Self {
        Self {
            events,
            keep_open: true,
        }
    }

    fn height_of(event: &RawEvent) -> Option<i64> {
        event.0.get("block_height").and_then(|h| h.as_i64())
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn subscribe(
        &self,
        filter: SubscriptionFilter,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<RawEvent>> {
        if filter.contract_name == REJECTED_CONTRACT {
            return Err(Error::Source(format!(
                "contract {} does not exist",
                filter.contract_name
            )));
        }

        // Records without a height (nil or malformed) pass through to the decoder
        let events: Vec<RawEvent> = self
            .events
            .iter()
            .filter(|e| match Self::height_of(e) {
                Some(h) => h >= filter.start_height && filter.end_height.admits(h),
                None => true,
            })
            .cloned()
            .collect();
        let keep_open = self.keep_open;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            for event in events {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    sent = tx.send(event) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
            if keep_open {
                cancel.cancelled().await;
            }
            debug!("scripted source finished");
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::EndHeight;
    use serde_json::json;

    fn filter(contract: &str, start: i64, end: EndHeight) -> SubscriptionFilter {
        SubscriptionFilter {
            start_height: start,
            end_height: end,
            contract_name: contract.to_string(),
            topic: "cic_topic".to_string(),
        }
    }

    fn at(height: i64) -> RawEvent {
        RawEvent::new(json!({ "block_height": height, "event_data": [] }))
    }

    #[tokio::test]
    async fn test_rejects_error_contract_before_first_record() {
        let source = ScriptedSource::new(vec![at(1)]);
        let result = source
            .subscribe(
                filter(REJECTED_CONTRACT, 0, EndHeight::Unbounded),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(Error::Source(_))));
    }

    #[tokio::test]
    async fn test_honours_height_range() {
        let source = ScriptedSource::new(vec![at(1), at(5), at(10), RawEvent::nil()]);
        let mut rx = source
            .subscribe(
                filter("carbon_integral", 5, EndHeight::Bounded(9)),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let mut received = Vec::new();
        while let Some(event) = rx.recv().await {
            received.push(event);
        }
        assert_eq!(received, vec![at(5), RawEvent::nil()]);
    }

    #[tokio::test]
    async fn test_live_source_closes_on_cancel() {
        let cancel = CancellationToken::new();
        let source = ScriptedSource::live(vec![at(1)]);
        let mut rx = source
            .subscribe(filter("carbon_integral", 0, EndHeight::Unbounded), cancel.clone())
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(at(1)));
        cancel.cancel();
        assert_eq!(rx.recv().await, None);
    }
}
