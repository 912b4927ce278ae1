//! Event-listen loop
//!
//! Resumes from the highest recorded height, subscribes without an upper
//! bound and feeds every record through ingestion and, for fresh rows, the
//! delivery engine. Events are processed one at a time, so a slow consumer
//! throttles ingestion.

use crate::config::SyncConfig;
use crate::delivery::DeliveryEngine;
use crate::ingest::{IngestOutcome, OrderingFilter};
use crate::source::{EndHeight, EventSource, SubscriptionFilter};
use crate::store::SyncLogStore;
use crate::{Error, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Long-running listener task
#[derive(Clone)]
pub struct EventListener {
    source: Arc<dyn EventSource>,
    logs: Arc<dyn SyncLogStore>,
    filter: OrderingFilter,
    delivery: DeliveryEngine,
    config: SyncConfig,
}

impl EventListener {
    /// Create listener
    pub fn new(
        source: Arc<dyn EventSource>,
        logs: Arc<dyn SyncLogStore>,
        filter: OrderingFilter,
        delivery: DeliveryEngine,
        config: SyncConfig,
    ) -> Self {
        Self {
            source,
            logs,
            filter,
            delivery,
            config,
        }
    }

    /// Height to resume from: the highest recorded change for the
    /// configured contract and topic, else the configured default
    pub async fn start_height(&self) -> Result<i64> {
        let recorded = self
            .logs
            .max_height(&self.config.contract_name, &self.config.topic)
            .await?;
        Ok(recorded.unwrap_or(self.config.default_height))
    }

    /// Listen until cancelled or the source closes
    ///
    /// Cancellation returns `Ok`; a closed channel returns
    /// [`Error::SourceClosed`]. Errors of a single event never end the loop.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let start_height = self.start_height().await?;
        let filter = SubscriptionFilter {
            start_height,
            end_height: EndHeight::Unbounded,
            contract_name: self.config.contract_name.clone(),
            topic: self.config.topic.clone(),
        };

        let mut events = self.source.subscribe(filter, cancel.clone()).await?;
        info!(
            contract = %self.config.contract_name,
            topic = %self.config.topic,
            start_height,
            "Listening for contract events"
        );

        loop {
            let raw = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Event listener stopped");
                    return Ok(());
                }
                next = events.recv() => match next {
                    Some(raw) => raw,
                    None => {
                        if cancel.is_cancelled() {
                            return Ok(());
                        }
                        warn!("Event channel closed");
                        return Err(Error::SourceClosed);
                    }
                },
            };

            match self.filter.ingest(&raw).await {
                Ok(IngestOutcome::Recorded(entry)) => {
                    match self.delivery.deliver(&entry, &cancel).await {
                        Ok(_) => {}
                        Err(Error::Cancelled) => debug!(id = entry.id, "Delivery interrupted by shutdown"),
                        Err(e) => warn!(id = entry.id, tx_id = %entry.tx_id, error = %e, "Delivery failed, left for reconciliation"),
                    }
                }
                Ok(IngestOutcome::Duplicate(_)) | Ok(IngestOutcome::Dropped(_)) => {}
                Err(e) => error!(error = %e, "Failed to handle contract event"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{ConsumerMode, RecordingConsumer};
    use crate::metrics::SyncMetrics;
    use crate::source::scripted::REJECTED_CONTRACT;
    use crate::source::ScriptedSource;
    use crate::store::MemoryStore;
    use crate::types::{NewSyncLogEntry, RawEvent, INIT_EVENT_TYPE};
    use crate::writer::SyncLogWriter;

    fn listener(store: &Arc<MemoryStore>, source: ScriptedSource, config: SyncConfig) -> EventListener {
        let metrics = Arc::new(SyncMetrics::default());
        let consumer = Arc::new(RecordingConsumer::new(ConsumerMode::Accept));
        let writer = SyncLogWriter::new(store.clone(), metrics.clone());
        let filter = OrderingFilter::new(store.clone(), writer, metrics.clone());
        let delivery = DeliveryEngine::new(
            store.clone(),
            store.clone(),
            consumer,
            config.retry.clone(),
            metrics,
        );
        EventListener::new(Arc::new(source), store.clone(), filter, delivery, config)
    }

    fn row(tx_id: &str, height: i64, event_type: &str) -> NewSyncLogEntry {
        NewSyncLogEntry {
            user_id: "u1".to_string(),
            block_height: height,
            balance_after: 0,
            change_value: 0,
            event_type: event_type.to_string(),
            tx_id: tx_id.to_string(),
            contract_name: "carbon_integral".to_string(),
            chain_id: "chain1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_start_height_defaults_when_empty() {
        let store = Arc::new(MemoryStore::new());
        let config = SyncConfig {
            default_height: 42,
            ..SyncConfig::default()
        };
        let listener = listener(&store, ScriptedSource::default(), config);
        assert_eq!(listener.start_height().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_start_height_ignores_baseline_rows() {
        let store = Arc::new(MemoryStore::new());
        store.insert_or_ignore(&row("tx1", 70, "cic_topic")).await.unwrap();
        store.insert_or_ignore(&row("init", 900, INIT_EVENT_TYPE)).await.unwrap();

        let listener = listener(&store, ScriptedSource::default(), SyncConfig::default());
        assert_eq!(listener.start_height().await.unwrap(), 70);
    }

    #[tokio::test]
    async fn test_closed_source_ends_listener() {
        let store = Arc::new(MemoryStore::new());
        let listener = listener(
            &store,
            ScriptedSource::new(vec![RawEvent::nil()]),
            SyncConfig::default(),
        );
        let result = listener.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::SourceClosed)));
    }

    #[tokio::test]
    async fn test_subscribe_error_ends_listener() {
        let store = Arc::new(MemoryStore::new());
        let config = SyncConfig {
            contract_name: REJECTED_CONTRACT.to_string(),
            ..SyncConfig::default()
        };
        let listener = listener(&store, ScriptedSource::default(), config);
        let result = listener.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::Source(_))));
    }

    #[tokio::test]
    async fn test_cancel_returns_ok() {
        let store = Arc::new(MemoryStore::new());
        let listener = listener(&store, ScriptedSource::live(vec![]), SyncConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(listener.run(cancel).await.is_ok());
    }
}
