//! Metrics collection for observability
//!
//! Prometheus counters for the sync pipeline, kept in a private registry so
//! several pipelines (and tests) can coexist in one process.
//!
//! # Metrics
//!
//! - `chain_sync_events_received_total` - Raw records taken from the event source
//! - `chain_sync_events_dropped_total{reason}` - Records dropped by the ordering filter
//! - `chain_sync_rows_recorded_total` - Sync-log rows inserted
//! - `chain_sync_duplicates_total` - Redelivered transaction ids
//! - `chain_sync_delivery_attempts_total{path,result}` - Downstream delivery attempts
//! - `chain_sync_rows_quarantined_total` - Rows moved to `Ignored`

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Delivery path label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPath {
    /// In-process retry right after the row was recorded
    Tactical,
    /// Reconciliation sweep
    Strategic,
}

impl DeliveryPath {
    fn as_str(self) -> &'static str {
        match self {
            DeliveryPath::Tactical => "tactical",
            DeliveryPath::Strategic => "strategic",
        }
    }
}

/// Metrics collector
#[derive(Clone)]
pub struct SyncMetrics {
    /// Raw records received
    pub events_received: IntCounter,

    /// Dropped records by reason
    pub events_dropped: IntCounterVec,

    /// Rows inserted
    pub rows_recorded: IntCounter,

    /// Redelivered transaction ids
    pub duplicates: IntCounter,

    /// Delivery attempts by path and result
    pub delivery_attempts: IntCounterVec,

    /// Rows quarantined
    pub rows_quarantined: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl SyncMetrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let events_received = IntCounter::with_opts(Opts::new(
            "chain_sync_events_received_total",
            "Raw records taken from the event source",
        ))?;
        registry.register(Box::new(events_received.clone()))?;

        let events_dropped = IntCounterVec::new(
            Opts::new(
                "chain_sync_events_dropped_total",
                "Records dropped by the ordering filter",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(events_dropped.clone()))?;

        let rows_recorded = IntCounter::with_opts(Opts::new(
            "chain_sync_rows_recorded_total",
            "Sync-log rows inserted",
        ))?;
        registry.register(Box::new(rows_recorded.clone()))?;

        let duplicates = IntCounter::with_opts(Opts::new(
            "chain_sync_duplicates_total",
            "Redelivered transaction ids",
        ))?;
        registry.register(Box::new(duplicates.clone()))?;

        let delivery_attempts = IntCounterVec::new(
            Opts::new(
                "chain_sync_delivery_attempts_total",
                "Downstream delivery attempts",
            ),
            &["path", "result"],
        )?;
        registry.register(Box::new(delivery_attempts.clone()))?;

        let rows_quarantined = IntCounter::with_opts(Opts::new(
            "chain_sync_rows_quarantined_total",
            "Rows moved to Ignored",
        ))?;
        registry.register(Box::new(rows_quarantined.clone()))?;

        Ok(Self {
            events_received,
            events_dropped,
            rows_recorded,
            duplicates,
            delivery_attempts,
            rows_quarantined,
            registry,
        })
    }

    /// Record a raw record taken from the source
    pub fn record_received(&self) {
        self.events_received.inc();
    }

    /// Record a dropped record
    pub fn record_dropped(&self, reason: &str) {
        self.events_dropped.with_label_values(&[reason]).inc();
    }

    /// Record a freshly inserted row
    pub fn record_inserted(&self) {
        self.rows_recorded.inc();
    }

    /// Record a redelivered transaction id
    pub fn record_duplicate(&self) {
        self.duplicates.inc();
    }

    /// Record one delivery attempt
    pub fn record_attempt(&self, path: DeliveryPath, ok: bool) {
        let result = if ok { "success" } else { "failure" };
        self.delivery_attempts
            .with_label_values(&[path.as_str(), result])
            .inc();
    }

    /// Record a quarantined row
    pub fn record_quarantined(&self) {
        self.rows_quarantined.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new().expect("Failed to create sync metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = SyncMetrics::new().unwrap();
        metrics.record_received();
        metrics.record_dropped("stale");
        metrics.record_attempt(DeliveryPath::Tactical, false);

        assert_eq!(metrics.events_received.get(), 1);
        assert_eq!(
            metrics.events_dropped.with_label_values(&["stale"]).get(),
            1
        );
        assert_eq!(
            metrics
                .delivery_attempts
                .with_label_values(&["tactical", "failure"])
                .get(),
            1
        );
    }

    #[test]
    fn test_independent_registries() {
        let a = SyncMetrics::new().unwrap();
        let b = SyncMetrics::new().unwrap();
        a.record_inserted();
        assert_eq!(a.rows_recorded.get(), 1);
        assert_eq!(b.rows_recorded.get(), 0);
        assert!(!a.registry().gather().is_empty());
    }
}
