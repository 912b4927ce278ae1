//! Pipeline composition
//!
//! The process builds the store, event source and downstream consumer and
//! hands them in here; nothing in the pipeline reaches for a global.

use crate::config::SyncConfig;
use crate::consumer::DownstreamConsumer;
use crate::delivery::DeliveryEngine;
use crate::ingest::OrderingFilter;
use crate::listener::EventListener;
use crate::metrics::SyncMetrics;
use crate::poller::ReconciliationPoller;
use crate::scheduler::WorkerPool;
use crate::source::EventSource;
use crate::store::{AuthorizationStore, SnapshotStore, SyncLogStore};
use crate::writer::SyncLogWriter;
use crate::Result;
use std::sync::Arc;

/// Listener and poller wired over shared handles
#[derive(Clone)]
pub struct SyncPipeline {
    filter: OrderingFilter,
    delivery: DeliveryEngine,
    listener: EventListener,
    poller: ReconciliationPoller,
    metrics: Arc<SyncMetrics>,
}

impl SyncPipeline {
    /// Wire the pipeline; `config` is validated first
    pub fn new<S>(
        config: SyncConfig,
        store: Arc<S>,
        source: Arc<dyn EventSource>,
        consumer: Arc<dyn DownstreamConsumer>,
        metrics: Arc<SyncMetrics>,
    ) -> Result<Self>
    where
        S: AuthorizationStore + SyncLogStore + SnapshotStore + 'static,
    {
        config.validate()?;

        let auths: Arc<dyn AuthorizationStore> = store.clone();
        let logs: Arc<dyn SyncLogStore> = store.clone();
        let snapshots: Arc<dyn SnapshotStore> = store;

        let writer = SyncLogWriter::new(logs.clone(), metrics.clone());
        let filter = OrderingFilter::new(auths, writer, metrics.clone());
        let delivery = DeliveryEngine::new(
            logs.clone(),
            snapshots.clone(),
            consumer.clone(),
            config.retry.clone(),
            metrics.clone(),
        );
        let poller = ReconciliationPoller::new(
            logs.clone(),
            snapshots,
            consumer,
            config.retry.clone(),
            config.poll_interval(),
            metrics.clone(),
        );
        let listener = EventListener::new(
            source,
            logs,
            filter.clone(),
            delivery.clone(),
            config,
        );

        Ok(Self {
            filter,
            delivery,
            listener,
            poller,
            metrics,
        })
    }

    /// Ordering filter feeding the writer
    pub fn filter(&self) -> &OrderingFilter {
        &self.filter
    }

    /// Tactical delivery engine
    pub fn delivery(&self) -> &DeliveryEngine {
        &self.delivery
    }

    /// Listener task
    pub fn listener(&self) -> &EventListener {
        &self.listener
    }

    /// Poller task
    pub fn poller(&self) -> &ReconciliationPoller {
        &self.poller
    }

    /// Metrics shared by every component
    pub fn metrics(&self) -> &Arc<SyncMetrics> {
        &self.metrics
    }

    /// Submit the listener and the poller to `pool`
    pub async fn submit_to(&self, pool: &WorkerPool) -> Result<()> {
        let listener = self.listener.clone();
        pool.submit("event-listener", move |cancel| async move {
            listener.run(cancel).await
        })
        .await?;

        let poller = self.poller.clone();
        pool.submit("reconciliation-poller", move |cancel| async move {
            poller.run(cancel).await
        })
        .await
    }
}
