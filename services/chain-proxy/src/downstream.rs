//! HTTP downstream consumer

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use sync_core::{ChangeRecord, DownstreamConsumer, Error, Result};
use tracing::debug;

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Posts each change as JSON to a single endpoint
///
/// The tx id travels as the idempotency key so the receiver can drop
/// redeliveries.
pub struct HttpConsumer {
    url: String,
    http_client: Client,
}

impl HttpConsumer {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Delivery(e.to_string()))?;

        Ok(Self {
            url: url.into(),
            http_client,
        })
    }
}

#[async_trait]
impl DownstreamConsumer for HttpConsumer {
    async fn deliver(&self, record: &ChangeRecord) -> Result<()> {
        let response = self
            .http_client
            .post(&self.url)
            .header(IDEMPOTENCY_HEADER, &record.tx_id)
            .json(record)
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Delivery(format!(
                "downstream returned http status {}",
                status
            )));
        }

        debug!(tx_id = %record.tx_id, "Change accepted downstream");
        Ok(())
    }
}
