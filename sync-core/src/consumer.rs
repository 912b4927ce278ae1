//! Downstream consumer seam

use crate::types::ChangeRecord;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// System that receives confirmed balance changes
///
/// Implementations must be idempotent on `tx_id`: the pipeline delivers at
/// least once.
#[async_trait]
pub trait DownstreamConsumer: Send + Sync {
    /// Deliver one change; `Err` counts as a failed attempt
    async fn deliver(&self, record: &ChangeRecord) -> Result<()>;
}

/// Scripted behaviour of a [`RecordingConsumer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerMode {
    /// Accept everything
    Accept,
    /// Reject everything
    Reject,
    /// Reject the next `n` calls, then accept
    RejectFirst(usize),
}

/// In-memory consumer that records calls and follows a script
#[derive(Debug)]
pub struct RecordingConsumer {
    mode: Mutex<ConsumerMode>,
    delivered: Mutex<Vec<ChangeRecord>>,
    calls: Mutex<VecDeque<String>>,
}

impl RecordingConsumer {
    /// Consumer following `mode`
    pub fn new(mode: ConsumerMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            delivered: Mutex::new(Vec::new()),
            calls: Mutex::new(VecDeque::new()),
        }
    }

    /// Switch behaviour
    pub fn set_mode(&self, mode: ConsumerMode) {
        if let Ok(mut current) = self.mode.lock() {
            *current = mode;
        }
    }

    /// Successfully delivered records, in order
    pub fn delivered(&self) -> Vec<ChangeRecord> {
        self.delivered
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    /// Transaction ids of every call, accepted or not
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DownstreamConsumer for RecordingConsumer {
    async fn deliver(&self, record: &ChangeRecord) -> Result<()> {
        let mut mode = self
            .mode
            .lock()
            .map_err(|_| Error::Delivery("consumer state poisoned".to_string()))?;
        if let Ok(mut calls) = self.calls.lock() {
            calls.push_back(record.tx_id.clone());
        }

        let accept = match *mode {
            ConsumerMode::Accept => true,
            ConsumerMode::Reject => false,
            ConsumerMode::RejectFirst(0) => true,
            ConsumerMode::RejectFirst(n) => {
                *mode = ConsumerMode::RejectFirst(n - 1);
                false
            }
        };
        drop(mode);

        if !accept {
            return Err(Error::Delivery(format!(
                "downstream rejected {}",
                record.tx_id
            )));
        }
        if let Ok(mut delivered) = self.delivered.lock() {
            delivered.push(record.clone());
        }
        Ok(())
    }
}
