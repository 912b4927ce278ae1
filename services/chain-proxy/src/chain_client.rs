//! Event source polling the chain RPC gateway
//!
//! `GET <rpc>/contracts/<contract>/events?topic=&from=&offset=&to=&limit=`
//! returns `{events: [...]}` in height order, skipping the first `offset`
//! records at height `from`. The first page is fetched inside `subscribe`,
//! so an unknown contract fails the subscription before any record is
//! delivered. Afterwards the gateway is polled from the last height seen,
//! offset by the records already read at that height; a full page is
//! followed immediately by the next one, anything shorter waits for the
//! poll interval. Records already sent at the current height are not sent
//! again.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use sync_core::source::{EndHeight, EventSource, SubscriptionFilter, EVENT_CHANNEL_CAPACITY};
use sync_core::{Error, RawEvent, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
struct EventsPage {
    #[serde(default)]
    events: Vec<serde_json::Value>,
}

#[derive(Clone)]
pub struct HttpEventSource {
    base_url: String,
    http_client: Client,
    page_limit: u32,
    poll_interval: Duration,
}

/// Resume point: current height, records read at it, tx ids sent at it
#[derive(Debug, Default)]
struct Cursor {
    height: i64,
    offset: usize,
    sent_at_height: HashSet<String>,
}

impl Cursor {
    fn new(start_height: i64) -> Self {
        Self {
            height: start_height,
            offset: 0,
            sent_at_height: HashSet::new(),
        }
    }

    fn position(&self) -> (i64, usize) {
        (self.height, self.offset)
    }

    /// Whether `event` should be sent; advances the cursor past it
    ///
    /// Records without a tx id cannot be recognised again and always pass.
    fn admit(&mut self, event: &serde_json::Value) -> bool {
        let height = event
            .get("block_height")
            .and_then(|h| h.as_i64())
            .unwrap_or(self.height);

        if height < self.height {
            return false;
        }
        if height > self.height {
            self.height = height;
            self.offset = 0;
            self.sent_at_height.clear();
        }
        self.offset += 1;

        match event.get("tx_id").and_then(|t| t.as_str()) {
            Some(tx_id) if !tx_id.is_empty() => self.sent_at_height.insert(tx_id.to_string()),
            _ => true,
        }
    }
}

impl HttpEventSource {
    pub fn new(
        base_url: impl Into<String>,
        page_limit: u32,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Source(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
            page_limit,
            poll_interval,
        })
    }

    fn page_url(&self, filter: &SubscriptionFilter) -> String {
        format!("{}/contracts/{}/events", self.base_url, filter.contract_name)
    }

    async fn fetch_page(
        &self,
        filter: &SubscriptionFilter,
        (from, offset): (i64, usize),
    ) -> Result<Vec<serde_json::Value>> {
        let mut query: Vec<(&str, String)> = vec![
            ("topic", filter.topic.clone()),
            ("from", from.to_string()),
            ("offset", offset.to_string()),
            ("limit", self.page_limit.to_string()),
        ];
        if let EndHeight::Bounded(end) = filter.end_height {
            query.push(("to", end.to_string()));
        }

        let response = self
            .http_client
            .get(self.page_url(filter))
            .query(&query)
            .send()
            .await
            .map_err(|e| Error::Source(format!("event request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status.is_client_error() {
            return Err(Error::Source(format!(
                "contract {} rejected by chain gateway: http status {}",
                filter.contract_name, status
            )));
        }
        if !status.is_success() {
            return Err(Error::Source(format!("chain gateway returned http status {}", status)));
        }

        let page: EventsPage = response
            .json()
            .await
            .map_err(|e| Error::Source(format!("invalid events page: {}", e)))?;
        Ok(page.events)
    }

    async fn run_subscription(
        self,
        filter: SubscriptionFilter,
        mut cursor: Cursor,
        first_page: Vec<serde_json::Value>,
        tx: mpsc::Sender<RawEvent>,
        cancel: CancellationToken,
    ) {
        let mut page = first_page;
        loop {
            let full_page = page.len() >= self.page_limit as usize;
            let mut admitted = 0usize;
            for event in page.drain(..) {
                if !cursor.admit(&event) {
                    continue;
                }
                admitted += 1;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    sent = tx.send(RawEvent::new(event)) => {
                        if sent.is_err() {
                            debug!("Event receiver dropped, ending subscription");
                            return;
                        }
                    }
                }
            }

            if let EndHeight::Bounded(end) = filter.end_height {
                if cursor.height >= end {
                    info!(end_height = end, "Reached end height, closing subscription");
                    return;
                }
            }

            if full_page && admitted == 0 {
                error!(
                    height = cursor.height,
                    offset = cursor.offset,
                    "Full page of events without a new record; chain gateway may be ignoring offset"
                );
            }

            if !full_page || admitted == 0 {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }

            page = match self.fetch_page(&filter, cursor.position()).await {
                Ok(events) => events,
                Err(e) => {
                    warn!(
                        error = %e,
                        from = cursor.height,
                        offset = cursor.offset,
                        "Failed to poll contract events, retrying"
                    );
                    Vec::new()
                }
            };
        }
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn subscribe(
        &self,
        filter: SubscriptionFilter,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<RawEvent>> {
        let first_page = self.fetch_page(&filter, (filter.start_height, 0)).await?;
        info!(
            contract = %filter.contract_name,
            topic = %filter.topic,
            from = filter.start_height,
            events = first_page.len(),
            "Subscribed to contract events"
        );

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cursor = Cursor::new(filter.start_height);
        tokio::spawn(self.clone().run_subscription(filter, cursor, first_page, tx, cancel));

        Ok(rx)
    }
}
