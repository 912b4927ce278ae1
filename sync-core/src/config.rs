//! Configuration for the sync pipeline

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry budget shared by the delivery engine and the reconciliation poller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// In-process delivery attempts per tactical run
    pub tactical_attempts: u32,

    /// Fixed pause between tactical attempts
    pub tactical_backoff_ms: u64,

    /// Persisted retry count at which tactical exhaustion marks a row `Failed`
    pub failed_threshold: i32,

    /// Persisted retry count at which a row is quarantined (`Ignored`)
    pub max_retries: i32,

    /// Age after which a `Sent` row counts as unconfirmed and is swept again
    pub sent_stale_after_ms: u64,

    /// Maximum rows handled per sweep
    pub sweep_batch_limit: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            tactical_attempts: 3,
            tactical_backoff_ms: 50,
            failed_threshold: 3,
            max_retries: 5,
            sent_stale_after_ms: 30_000,
            sweep_batch_limit: 500,
        }
    }
}

impl RetryPolicy {
    /// Pause between tactical attempts
    pub fn tactical_backoff(&self) -> Duration {
        Duration::from_millis(self.tactical_backoff_ms)
    }

    /// Staleness window for `Sent` rows
    pub fn sent_stale_after(&self) -> Duration {
        Duration::from_millis(self.sent_stale_after_ms)
    }

    /// Validate thresholds
    pub fn validate(&self) -> Result<()> {
        if self.tactical_attempts == 0 {
            return Err(Error::Config(
                "tactical_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_retries < 1 {
            return Err(Error::Config("max_retries must be at least 1".to_string()));
        }
        if self.failed_threshold < 1 || self.failed_threshold > self.max_retries {
            return Err(Error::Config(format!(
                "failed_threshold must be within 1..={}, got {}",
                self.max_retries, self.failed_threshold
            )));
        }
        if self.sweep_batch_limit < 1 {
            return Err(Error::Config(
                "sweep_batch_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Sync pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Contract whose events are relayed
    pub contract_name: String,

    /// Event topic of balance changes
    pub topic: String,

    /// Start height when nothing has been recorded yet
    pub default_height: i64,

    /// Worker pool size
    pub worker_count: usize,

    /// Interval between reconciliation sweeps
    pub poll_interval_ms: u64,

    /// Retry budget
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            contract_name: "carbon_integral".to_string(),
            topic: "cic_topic".to_string(),
            default_height: 0,
            worker_count: 10,
            poll_interval_ms: 5_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Interval between reconciliation sweeps
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.contract_name.is_empty() {
            return Err(Error::Config("contract_name is required".to_string()));
        }
        if self.topic.is_empty() {
            return Err(Error::Config("topic is required".to_string()));
        }
        if self.default_height < 0 {
            return Err(Error::Config(
                "default_height cannot be negative".to_string(),
            ));
        }
        // listener + poller always hold a worker each
        if self.worker_count < 2 {
            return Err(Error::Config("worker_count must be at least 2".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms cannot be 0".to_string()));
        }
        self.retry.validate()
    }
}
