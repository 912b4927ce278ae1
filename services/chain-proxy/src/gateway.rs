//! Wallet gateway client
//!
//! The gateway maps user ids to on-chain addresses and serves the wallet's
//! historical state, from which the authorization baseline is taken.

use crate::errors::{ProxyError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const GET_ADDR_METHOD: &str = "getUserAddr";
const GET_WALLET_METHOD: &str = "getWalletHistoryInfo";

/// Integral holdings of a wallet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    #[serde(default)]
    pub integral_map: HashMap<String, i64>,
    #[serde(default)]
    pub split_integral_map: HashMap<String, i64>,
}

/// One historical wallet state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletInfoDetail {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub tx_id: String,
    pub block_height: i64,
    pub total: i64,
    #[serde(default)]
    pub wallet_info: Option<Wallet>,
}

#[derive(Debug, Deserialize)]
struct GatewayResponse<T> {
    code: i32,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct UserAddr {
    addr: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletHistory {
    #[serde(default)]
    wallet_history_info: Vec<WalletInfoDetail>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GetAddrRequest<'a> {
    user_id: &'a str,
}

#[derive(Serialize)]
struct GetWalletRequest<'a> {
    address: &'a str,
}

#[async_trait]
pub trait WalletGateway: Send + Sync {
    /// On-chain address of `user_id`
    async fn user_address(&self, user_id: &str) -> Result<String>;

    /// Every recorded state of the wallet at `address`
    async fn wallet_history(&self, address: &str) -> Result<Vec<WalletInfoDetail>>;
}

/// Latest wallet state by block height
///
/// Not cross-checked against change events arriving concurrently.
pub fn latest_wallet_info(history: Vec<WalletInfoDetail>) -> Option<WalletInfoDetail> {
    history.into_iter().max_by_key(|info| info.block_height)
}

pub struct HttpWalletGateway {
    base_url: String,
    http_client: Client,
}

impl HttpWalletGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    async fn post<B, T>(&self, method: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, method);
        debug!(url = %url, "Calling wallet gateway");

        let response = self.http_client.post(&url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProxyError::Gateway(format!(
                "{} returned http status {}",
                method, status
            )));
        }

        let body: GatewayResponse<T> = response.json().await?;
        if body.code != 0 {
            return Err(ProxyError::Gateway(format!(
                "{} returned code {}: {}",
                method,
                body.code,
                body.msg.unwrap_or_default()
            )));
        }

        body.data
            .ok_or_else(|| ProxyError::Gateway(format!("{} returned no data", method)))
    }
}

#[async_trait]
impl WalletGateway for HttpWalletGateway {
    async fn user_address(&self, user_id: &str) -> Result<String> {
        let data: UserAddr = self
            .post(GET_ADDR_METHOD, &GetAddrRequest { user_id })
            .await?;
        if data.addr.is_empty() {
            return Err(ProxyError::Gateway(format!(
                "no address registered for user {}",
                user_id
            )));
        }
        Ok(data.addr)
    }

    async fn wallet_history(&self, address: &str) -> Result<Vec<WalletInfoDetail>> {
        let data: WalletHistory = self
            .post(GET_WALLET_METHOD, &GetWalletRequest { address })
            .await?;
        Ok(data.wallet_history_info)
    }
}
